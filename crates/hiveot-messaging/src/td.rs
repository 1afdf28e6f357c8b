// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hiveot.net

//! Thing Description model (WoT TD 1.1 subset) and digital-twin IDs.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Prefix of digital-twin thing IDs.
pub const DIGITWIN_PREFIX: &str = "dtw:";

/// Build the digital-twin ID `dtw:{agentID}:{nativeThingID}`.
pub fn make_digitwin_id(agent_id: &str, thing_id: &str) -> String {
    format!("{}{}:{}", DIGITWIN_PREFIX, agent_id, thing_id)
}

/// Split a digital-twin ID into `(agentID, nativeThingID)`.
///
/// The agent ID ends at the first colon after the prefix; the native ID may
/// itself contain colons. Returns None for IDs that are not digital-twin IDs.
pub fn split_digitwin_id(dthing_id: &str) -> Option<(&str, &str)> {
    let rest = dthing_id.strip_prefix(DIGITWIN_PREFIX)?;
    let (agent_id, thing_id) = rest.split_once(':')?;
    if agent_id.is_empty() || thing_id.is_empty() {
        return None;
    }
    Some((agent_id, thing_id))
}

/// The built-in directory service, addressed as a digital twin.
pub mod directory {
    pub const AGENT_ID: &str = "digitwin";
    pub const THING_ID: &str = "ThingDirectory";
    /// `dtw:digitwin:ThingDirectory`
    pub const DTHING_ID: &str = "dtw:digitwin:ThingDirectory";

    pub const ACTION_READ_TD: &str = "readTD";
    pub const ACTION_READ_ALL_TDS: &str = "readAllTDs";
    pub const ACTION_UPDATE_THING: &str = "updateThing";
    pub const ACTION_REMOVE_THING: &str = "removeThing";

    pub const EVENT_THING_UPDATED: &str = "thingUpdated";
    pub const EVENT_THING_REMOVED: &str = "thingRemoved";

    /// Hard cap on the page size of `readAllTDs`.
    pub const READ_DIR_LIMIT: usize = 1000;
}

/// True if the ID carries the digital-twin prefix.
pub fn is_digitwin_id(thing_id: &str) -> bool {
    thing_id.starts_with(DIGITWIN_PREFIX)
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }
    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(s)) => vec![s],
        Some(OneOrMany::Many(v)) => v,
    })
}

/// Protocol binding of an affordance operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Form {
    pub href: String,

    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub op: Vec<String>,

    #[serde(rename = "contentType", default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    #[serde(rename = "htv:methodName", default, skip_serializing_if = "Option::is_none")]
    pub method_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subprotocol: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Form {
    pub fn new(href: impl Into<String>, ops: &[&str]) -> Self {
        Self {
            href: href.into(),
            op: ops.iter().map(|o| o.to_string()).collect(),
            ..Default::default()
        }
    }
}

/// Data schema of a property, event payload or action input/output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataSchema {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    #[serde(rename = "readOnly", default, skip_serializing_if = "std::ops::Not::not")]
    pub read_only: bool,

    #[serde(rename = "writeOnly", default, skip_serializing_if = "std::ops::Not::not")]
    pub write_only: bool,

    #[serde(rename = "enum", default, skip_serializing_if = "Vec::is_empty")]
    pub enumeration: Vec<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, DataSchema>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<DataSchema>>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DataSchema {
    /// Schema of the given JSON type.
    pub fn of_type(data_type: &str) -> Self {
        Self {
            data_type: Some(data_type.to_string()),
            ..Default::default()
        }
    }

    /// Check a value against this schema.
    ///
    /// Covers the JSON type, enumerations, numeric bounds, required object
    /// members and nested object/array schemas. A schema without a type
    /// accepts anything.
    pub fn validate(&self, value: &Value) -> Result<(), String> {
        if !self.enumeration.is_empty() && !self.enumeration.contains(value) {
            return Err(format!("value {} is not one of the allowed values", value));
        }
        let Some(data_type) = self.data_type.as_deref() else {
            return Ok(());
        };
        let type_ok = match data_type {
            "string" => value.is_string(),
            "number" => value.is_number(),
            "integer" => value.is_i64() || value.is_u64(),
            "boolean" => value.is_boolean(),
            "object" => value.is_object(),
            "array" => value.is_array(),
            "null" => value.is_null(),
            _ => true,
        };
        if !type_ok {
            return Err(format!("expected {} but got {}", data_type, json_type(value)));
        }
        if let Some(n) = value.as_f64() {
            if self.minimum.is_some_and(|min| n < min) {
                return Err(format!("{} is below the minimum", n));
            }
            if self.maximum.is_some_and(|max| n > max) {
                return Err(format!("{} is above the maximum", n));
            }
        }
        if let Some(obj) = value.as_object() {
            for key in &self.required {
                if !obj.contains_key(key) {
                    return Err(format!("missing required field '{}'", key));
                }
            }
            for (key, schema) in &self.properties {
                if let Some(v) = obj.get(key) {
                    schema.validate(v).map_err(|e| format!("{}: {}", key, e))?;
                }
            }
        }
        if let (Some(items), Some(arr)) = (&self.items, value.as_array()) {
            for (i, v) in arr.iter().enumerate() {
                items.validate(v).map_err(|e| format!("[{}]: {}", i, e))?;
            }
        }
        Ok(())
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Property affordance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyAffordance {
    #[serde(flatten)]
    pub schema: DataSchema,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub observable: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub forms: Vec<Form>,

    /// Roles allowed to use this affordance. Empty allows every role.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow: Vec<String>,

    /// Roles denied this affordance.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deny: Vec<String>,
}

/// Event affordance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventAffordance {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<DataSchema>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub forms: Vec<Form>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deny: Vec<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Action affordance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionAffordance {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<DataSchema>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<DataSchema>,

    /// Safe actions do not change the state of the thing.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub safe: bool,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub idempotent: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub forms: Vec<Form>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deny: Vec<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Thing Description document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThingDescription {
    #[serde(rename = "@context", default, skip_serializing_if = "Value::is_null")]
    pub context: Value,

    pub id: String,

    #[serde(default)]
    pub title: String,

    #[serde(rename = "@type", default, skip_serializing_if = "Value::is_null")]
    pub at_type: Value,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub base: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub created: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub modified: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, PropertyAffordance>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub events: BTreeMap<String, EventAffordance>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub actions: BTreeMap<String, ActionAffordance>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub forms: Vec<Form>,

    #[serde(rename = "securityDefinitions", default, skip_serializing_if = "Map::is_empty")]
    pub security_definitions: Map<String, Value>,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub security: Value,

    #[serde(rename = "schemaDefinitions", default, skip_serializing_if = "Map::is_empty")]
    pub schema_definitions: Map<String, Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ThingDescription {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    /// Parse a TD from a request input: a JSON object or a JSON string
    /// holding the serialized TD.
    pub fn from_input(input: &Value) -> Result<Self, serde_json::Error> {
        match input {
            Value::String(text) => serde_json::from_str(text),
            other => serde_json::from_value(other.clone()),
        }
    }

    pub fn add_property(mut self, name: &str, title: &str, data_type: &str) -> Self {
        let mut schema = DataSchema::of_type(data_type);
        schema.title = title.to_string();
        self.properties.insert(
            name.to_string(),
            PropertyAffordance {
                schema,
                observable: true,
                ..Default::default()
            },
        );
        self
    }

    pub fn add_event(mut self, name: &str, title: &str, data_type: &str) -> Self {
        self.events.insert(
            name.to_string(),
            EventAffordance {
                title: title.to_string(),
                data: Some(DataSchema::of_type(data_type)),
                ..Default::default()
            },
        );
        self
    }

    pub fn add_action(
        mut self,
        name: &str,
        title: &str,
        input: Option<DataSchema>,
        output: Option<DataSchema>,
    ) -> Self {
        self.actions.insert(
            name.to_string(),
            ActionAffordance {
                title: title.to_string(),
                input,
                output,
                ..Default::default()
            },
        );
        self
    }

    /// Remove every form, at thing level and on all affordances.
    pub fn strip_forms(&mut self) {
        self.forms.clear();
        self.properties.values_mut().for_each(|p| p.forms.clear());
        self.events.values_mut().for_each(|e| e.forms.clear());
        self.actions.values_mut().for_each(|a| a.forms.clear());
    }

    /// Allow and deny role lists of the affordance addressed by an operation.
    pub fn access_lists(&self, operation: &str, name: &str) -> Option<(&[String], &[String])> {
        use crate::envelope::op;
        match operation {
            op::INVOKE_ACTION | op::QUERY_ACTION => self
                .actions
                .get(name)
                .map(|a| (a.allow.as_slice(), a.deny.as_slice())),
            op::WRITE_PROPERTY | op::READ_PROPERTY | op::OBSERVE_PROPERTY => self
                .properties
                .get(name)
                .map(|p| (p.allow.as_slice(), p.deny.as_slice())),
            op::SUBSCRIBE_EVENT | op::READ_EVENT => self
                .events
                .get(name)
                .map(|e| (e.allow.as_slice(), e.deny.as_slice())),
            _ => None,
        }
    }
}

/// Supplies the forms that describe how to reach a digital twin through the
/// hub's protocol bindings.
pub trait FormProvider: Send + Sync {
    /// Add thing-level and affordance-level forms to the TD.
    fn add_forms(&self, td: &mut ThingDescription);
}

/// Provider that adds no forms.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoForms;

impl FormProvider for NoForms {
    fn add_forms(&self, _td: &mut ThingDescription) {}
}
