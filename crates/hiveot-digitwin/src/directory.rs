// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hiveot.net

//! Thing directory
//!
//! Built-in Thing at `dtw:digitwin:ThingDirectory` that lets consumers read
//! digital-twin TDs and lets agents publish and remove their Things.
//!
//! | Action | Input | Output | Who |
//! |---|---|---|---|
//! | `readTD` | thing ID | TD | anyone |
//! | `readAllTDs` | `{limit, offset}` | TD array | anyone |
//! | `updateThing` | agent TD | - | agents |
//! | `removeThing` | thing ID | - | admins, managers, owning agent |

use crate::error::{Result, StoreError};
use crate::store::DigitwinStore;
use hiveot_messaging::{
    directory, op, roles, DataSchema, FormProvider, NotificationMessage, RequestMessage,
    ResponseMessage, ThingDescription,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

/// Paging input of `readAllTDs`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReadAllInput {
    limit: usize,
    offset: usize,
}

/// Result of a directory request.
#[derive(Debug)]
pub struct DirectoryReply {
    pub response: ResponseMessage,
    /// Directory event to publish, if the request changed the directory.
    pub event: Option<NotificationMessage>,
}

/// Directory service over the digital-twin store.
pub struct Directory {
    store: Arc<DigitwinStore>,
    forms: Arc<dyn FormProvider>,
    td: ThingDescription,
}

impl Directory {
    pub fn new(store: Arc<DigitwinStore>, forms: Arc<dyn FormProvider>) -> Self {
        let mut td = directory_td();
        forms.add_forms(&mut td);
        Self { store, forms, td }
    }

    /// TD of the directory itself.
    pub fn td(&self) -> &ThingDescription {
        &self.td
    }

    pub fn store(&self) -> &Arc<DigitwinStore> {
        &self.store
    }

    /// Handle a request addressed to the directory Thing.
    ///
    /// `role` is the role of `req.sender_id`.
    pub fn handle_request(&self, req: &RequestMessage, role: Option<&str>) -> DirectoryReply {
        if req.operation != op::INVOKE_ACTION {
            return DirectoryReply {
                response: req.create_error_response(
                    StoreError::Invalid(format!(
                        "directory does not support operation '{}'",
                        req.operation
                    ))
                    .to_error_value(),
                ),
                event: None,
            };
        }
        let result = match req.name.as_str() {
            directory::ACTION_READ_TD => self.read_td(&req.input).map(|v| (v, None)),
            directory::ACTION_READ_ALL_TDS => self.read_all_tds(&req.input).map(|v| (v, None)),
            directory::ACTION_UPDATE_THING => self
                .update_thing(&req.sender_id, role, &req.input)
                .map(|event| (Value::Null, Some(event))),
            directory::ACTION_REMOVE_THING => self
                .remove_thing(&req.sender_id, role, &req.input)
                .map(|event| (Value::Null, Some(event))),
            other => Err(StoreError::NotFound(format!(
                "directory has no action '{}'",
                other
            ))),
        };
        match result {
            Ok((value, event)) => DirectoryReply {
                response: req.create_response(value, None),
                event,
            },
            Err(e) => {
                debug!(
                    "directory '{}' from '{}' failed: {}",
                    req.name, req.sender_id, e
                );
                DirectoryReply {
                    response: req.create_error_response(e.to_error_value()),
                    event: None,
                }
            }
        }
    }

    /// TD of a Thing, as JSON.
    pub fn read_td(&self, input: &Value) -> Result<Value> {
        let thing_id = input
            .as_str()
            .ok_or_else(|| StoreError::Invalid("readTD expects a thing ID".into()))?;
        if thing_id == directory::DTHING_ID {
            return Ok(serde_json::to_value(&self.td)?);
        }
        Ok(serde_json::to_value(self.store.read_dtd(thing_id)?)?)
    }

    /// Page of TDs, as a JSON array.
    pub fn read_all_tds(&self, input: &Value) -> Result<Value> {
        let paging = match input {
            Value::Null => ReadAllInput::default(),
            other => ReadAllInput::deserialize(other)?,
        };
        let tds = self.store.read_all_dtds(paging.limit, paging.offset);
        Ok(serde_json::to_value(tds)?)
    }

    /// Store a TD published by an agent. Returns the `thingUpdated` event.
    pub fn update_thing(
        &self,
        agent_id: &str,
        role: Option<&str>,
        input: &Value,
    ) -> Result<NotificationMessage> {
        if !matches!(role, Some(roles::AGENT) | Some(roles::SERVICE)) {
            return Err(StoreError::Forbidden(format!(
                "'{}' is not an agent and cannot publish TDs",
                agent_id
            )));
        }
        let td = ThingDescription::from_input(input)
            .map_err(|e| StoreError::Invalid(format!("invalid TD: {}", e)))?;
        let dtd = self.store.update_td(agent_id, td, self.forms.as_ref())?;
        info!("agent '{}' published TD '{}'", agent_id, dtd.id);
        Ok(directory_event(
            directory::EVENT_THING_UPDATED,
            serde_json::to_value(&dtd)?,
        ))
    }

    /// Remove a Thing. Returns the `thingRemoved` event.
    ///
    /// Admins and managers may remove any Thing, agents only their own.
    pub fn remove_thing(
        &self,
        sender_id: &str,
        role: Option<&str>,
        input: &Value,
    ) -> Result<NotificationMessage> {
        let thing_id = input
            .as_str()
            .ok_or_else(|| StoreError::Invalid("removeThing expects a thing ID".into()))?;
        let allowed = match role {
            Some(roles::ADMIN) | Some(roles::MANAGER) => true,
            Some(roles::AGENT) | Some(roles::SERVICE) => {
                self.store.thing_agent(thing_id).as_deref() == Some(sender_id)
            }
            _ => false,
        };
        if !allowed {
            return Err(StoreError::Forbidden(format!(
                "'{}' may not remove '{}'",
                sender_id, thing_id
            )));
        }
        self.store.remove_thing(thing_id)?;
        Ok(directory_event(directory::EVENT_THING_REMOVED, json!(thing_id)))
    }
}

fn directory_event(name: &str, data: Value) -> NotificationMessage {
    let mut notif = NotificationMessage::new(op::SUBSCRIBE_EVENT, directory::DTHING_ID, name, data);
    notif.sender_id = directory::AGENT_ID.to_string();
    notif
}

/// TD of the directory Thing, without forms.
pub fn directory_td() -> ThingDescription {
    let mut paging = DataSchema::of_type("object");
    paging
        .properties
        .insert("limit".into(), DataSchema::of_type("integer"));
    paging
        .properties
        .insert("offset".into(), DataSchema::of_type("integer"));

    let mut td = ThingDescription::new(directory::DTHING_ID, "Thing Directory")
        .add_action(
            directory::ACTION_READ_TD,
            "Read TD",
            Some(DataSchema::of_type("string")),
            Some(DataSchema::of_type("object")),
        )
        .add_action(
            directory::ACTION_READ_ALL_TDS,
            "Read all TDs",
            Some(paging),
            Some(DataSchema::of_type("array")),
        )
        .add_action(
            directory::ACTION_UPDATE_THING,
            "Update Thing",
            Some(DataSchema::of_type("object")),
            None,
        )
        .add_action(
            directory::ACTION_REMOVE_THING,
            "Remove Thing",
            Some(DataSchema::of_type("string")),
            None,
        )
        .add_event(directory::EVENT_THING_UPDATED, "Thing updated", "object")
        .add_event(directory::EVENT_THING_REMOVED, "Thing removed", "string");
    td.description = "Directory of the digital twins served by this hub".into();

    for name in [directory::ACTION_READ_TD, directory::ACTION_READ_ALL_TDS] {
        if let Some(action) = td.actions.get_mut(name) {
            action.safe = true;
            action.idempotent = true;
        }
    }
    if let Some(action) = td.actions.get_mut(directory::ACTION_UPDATE_THING) {
        action.allow = vec![roles::AGENT.into(), roles::SERVICE.into()];
    }
    if let Some(action) = td.actions.get_mut(directory::ACTION_REMOVE_THING) {
        action.allow = vec![
            roles::ADMIN.into(),
            roles::MANAGER.into(),
            roles::AGENT.into(),
            roles::SERVICE.into(),
        ];
    }
    td
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::MemoryBucket;
    use crate::store::DIGITWIN_BUCKET;
    use hiveot_messaging::NoForms;

    fn new_directory() -> Directory {
        let store = Arc::new(DigitwinStore::new(Arc::new(MemoryBucket::new(
            DIGITWIN_BUCKET,
        ))));
        Directory::new(store, Arc::new(NoForms))
    }

    fn dir_request(name: &str, input: Value, sender: &str) -> RequestMessage {
        let mut req = RequestMessage::new(op::INVOKE_ACTION, directory::DTHING_ID, name, input)
            .with_correlation_id("c1");
        req.sender_id = sender.to_string();
        req
    }

    fn agent_td_json() -> Value {
        serde_json::to_value(ThingDescription::new("thing1", "Thing 1")).unwrap()
    }

    #[test]
    fn test_update_then_read_td() {
        let dir = new_directory();
        let req = dir_request(directory::ACTION_UPDATE_THING, agent_td_json(), "agent1");
        let reply = dir.handle_request(&req, Some(roles::AGENT));
        assert!(reply.response.error.is_none());
        let event = reply.event.unwrap();
        assert_eq!(event.name, directory::EVENT_THING_UPDATED);
        assert_eq!(event.data["id"], json!("dtw:agent1:thing1"));

        let req = dir_request(directory::ACTION_READ_TD, json!("dtw:agent1:thing1"), "user1");
        let reply = dir.handle_request(&req, Some(roles::VIEWER));
        assert_eq!(reply.response.value["title"], json!("Thing 1"));
        assert!(reply.event.is_none());
    }

    #[test]
    fn test_update_accepts_serialized_td() {
        let dir = new_directory();
        let text = serde_json::to_string(&agent_td_json()).unwrap();
        let req = dir_request(directory::ACTION_UPDATE_THING, json!(text), "agent1");
        let reply = dir.handle_request(&req, Some(roles::AGENT));
        assert!(reply.response.error.is_none());
        assert_eq!(dir.store().count(), 1);
    }

    #[test]
    fn test_update_requires_agent_role() {
        let dir = new_directory();
        let req = dir_request(directory::ACTION_UPDATE_THING, agent_td_json(), "user1");
        let reply = dir.handle_request(&req, Some(roles::OPERATOR));
        assert_eq!(reply.response.error.unwrap().status, 403);
        assert!(reply.event.is_none());
    }

    #[test]
    fn test_read_directory_td_and_unknown() {
        let dir = new_directory();
        let req = dir_request(directory::ACTION_READ_TD, json!(directory::DTHING_ID), "u");
        let reply = dir.handle_request(&req, None);
        assert_eq!(reply.response.value["id"], json!(directory::DTHING_ID));

        let req = dir_request(directory::ACTION_READ_TD, json!("dtw:a:nope"), "u");
        assert_eq!(dir.handle_request(&req, None).response.error.unwrap().status, 404);

        let req = dir_request(directory::ACTION_READ_TD, json!(5), "u");
        assert_eq!(dir.handle_request(&req, None).response.error.unwrap().status, 400);

        let req = dir_request("format", Value::Null, "u");
        assert_eq!(dir.handle_request(&req, None).response.error.unwrap().status, 404);
    }

    #[test]
    fn test_read_all_tds_paging() {
        let dir = new_directory();
        for i in 0..3 {
            let td = serde_json::to_value(ThingDescription::new(format!("t{}", i), "t")).unwrap();
            dir.update_thing("agent1", Some(roles::AGENT), &td).unwrap();
        }
        let all = dir.read_all_tds(&Value::Null).unwrap();
        assert_eq!(all.as_array().unwrap().len(), 3);
        let page = dir.read_all_tds(&json!({"limit": 1, "offset": 2})).unwrap();
        assert_eq!(page[0]["id"], json!("dtw:agent1:t2"));
        assert!(dir.read_all_tds(&json!("bad")).is_err());
    }

    #[test]
    fn test_remove_thing_permissions() {
        let dir = new_directory();
        dir.update_thing("agent1", Some(roles::AGENT), &agent_td_json())
            .unwrap();
        let id = json!("dtw:agent1:thing1");

        assert!(matches!(
            dir.remove_thing("agent2", Some(roles::AGENT), &id),
            Err(StoreError::Forbidden(_))
        ));
        assert!(matches!(
            dir.remove_thing("user1", Some(roles::OPERATOR), &id),
            Err(StoreError::Forbidden(_))
        ));
        let event = dir.remove_thing("agent1", Some(roles::AGENT), &id).unwrap();
        assert_eq!(event.name, directory::EVENT_THING_REMOVED);
        assert_eq!(event.data, id);
        assert!(matches!(
            dir.remove_thing("admin", Some(roles::ADMIN), &id),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_directory_rejects_other_operations() {
        let dir = new_directory();
        let mut req = dir_request(directory::ACTION_READ_TD, Value::Null, "u");
        req.operation = op::READ_PROPERTY.into();
        assert_eq!(dir.handle_request(&req, None).response.error.unwrap().status, 400);
    }
}
