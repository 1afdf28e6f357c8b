// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hiveot.net

//! Message envelopes.
//!
//! Every exchange between consumers, agents and the hub is one of three
//! envelope kinds:
//!
//! - [`RequestMessage`] - asks for something and expects one terminal response
//! - [`ResponseMessage`] - the terminal reply, matched by correlation ID
//! - [`NotificationMessage`] - unsolicited update delivered to subscribers
//!
//! [`ActionStatus`] and [`ThingValue`] are the structured payloads carried in
//! `value` and `data`.

use crate::error::ErrorValue;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Operation vocabulary used verbatim in envelopes.
pub mod op {
    pub const INVOKE_ACTION: &str = "invokeaction";
    pub const QUERY_ACTION: &str = "queryaction";
    pub const QUERY_ALL_ACTIONS: &str = "queryallactions";
    pub const READ_PROPERTY: &str = "readproperty";
    pub const READ_ALL_PROPERTIES: &str = "readallproperties";
    pub const WRITE_PROPERTY: &str = "writeproperty";
    pub const READ_EVENT: &str = "readevent";
    pub const READ_ALL_EVENTS: &str = "readallevents";
    pub const OBSERVE_PROPERTY: &str = "observeproperty";
    pub const OBSERVE_ALL_PROPERTIES: &str = "observeallproperties";
    pub const UNOBSERVE_PROPERTY: &str = "unobserveproperty";
    pub const UNOBSERVE_ALL_PROPERTIES: &str = "unobserveallproperties";
    pub const SUBSCRIBE_EVENT: &str = "subscribeevent";
    pub const SUBSCRIBE_ALL_EVENTS: &str = "subscribeallevents";
    pub const UNSUBSCRIBE_EVENT: &str = "unsubscribeevent";
    pub const UNSUBSCRIBE_ALL_EVENTS: &str = "unsubscribeallevents";
    pub const PING: &str = "ping";
    pub const LOGIN: &str = "login";
    pub const REFRESH: &str = "refresh";
    pub const LOGOUT: &str = "logout";
    pub const UPDATE_THING: &str = "updatething";

    /// Operations that start delivery of notifications.
    pub fn is_subscribe(operation: &str) -> bool {
        matches!(
            operation,
            SUBSCRIBE_EVENT | SUBSCRIBE_ALL_EVENTS | OBSERVE_PROPERTY | OBSERVE_ALL_PROPERTIES
        )
    }

    /// Operations that stop delivery of notifications.
    pub fn is_unsubscribe(operation: &str) -> bool {
        matches!(
            operation,
            UNSUBSCRIBE_EVENT
                | UNSUBSCRIBE_ALL_EVENTS
                | UNOBSERVE_PROPERTY
                | UNOBSERVE_ALL_PROPERTIES
        )
    }

    /// Read operation a notification of this operation discloses.
    pub fn read_permission(operation: &str) -> Option<&'static str> {
        match operation {
            SUBSCRIBE_EVENT | SUBSCRIBE_ALL_EVENTS => Some(READ_EVENT),
            OBSERVE_PROPERTY | OBSERVE_ALL_PROPERTIES => Some(READ_PROPERTY),
            _ => None,
        }
    }
}

/// Value of the `messageType` field for requests.
pub const MSG_TYPE_REQUEST: &str = "request";
/// Value of the `messageType` field for responses.
pub const MSG_TYPE_RESPONSE: &str = "response";
/// Value of the `messageType` field for notifications.
pub const MSG_TYPE_NOTIFICATION: &str = "notification";

/// Current UTC time as an RFC3339 timestamp with millisecond precision.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse an RFC3339 timestamp. Returns None for empty or malformed input.
pub fn parse_timestamp(ts: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(ts)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Generate a new unique ID for messages and correlation.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn request_type() -> String {
    MSG_TYPE_REQUEST.to_string()
}

fn response_type() -> String {
    MSG_TYPE_RESPONSE.to_string()
}

fn notification_type() -> String {
    MSG_TYPE_NOTIFICATION.to_string()
}

/// Request to invoke an operation that expects an eventual response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestMessage {
    #[serde(rename = "messageType", default = "request_type")]
    pub message_type: String,

    pub operation: String,

    /// Digital-twin ID between consumer and hub, native ID between hub and agent.
    #[serde(rename = "thingID", default)]
    pub thing_id: String,

    /// Affordance name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub input: Value,

    #[serde(rename = "correlationID", default, skip_serializing_if = "String::is_empty")]
    pub correlation_id: String,

    /// Authenticated sender. Always overwritten by the receiving server.
    #[serde(rename = "senderID", default, skip_serializing_if = "String::is_empty")]
    pub sender_id: String,

    #[serde(default)]
    pub created: String,

    #[serde(rename = "messageID", default)]
    pub message_id: String,
}

impl RequestMessage {
    /// Create a request with a fresh message ID and creation time.
    pub fn new(
        operation: impl Into<String>,
        thing_id: impl Into<String>,
        name: impl Into<String>,
        input: Value,
    ) -> Self {
        Self {
            message_type: request_type(),
            operation: operation.into(),
            thing_id: thing_id.into(),
            name: name.into(),
            input,
            correlation_id: String::new(),
            sender_id: String::new(),
            created: now_timestamp(),
            message_id: new_id(),
        }
    }

    /// Set the correlation ID (builder style).
    pub fn with_correlation_id(mut self, cid: impl Into<String>) -> Self {
        self.correlation_id = cid.into();
        self
    }

    /// Build the terminal response for this request.
    ///
    /// The response echoes operation, thing, name and correlation ID. When
    /// `error` is set the value is dropped.
    pub fn create_response(&self, value: Value, error: Option<ErrorValue>) -> ResponseMessage {
        let value = if error.is_some() { Value::Null } else { value };
        ResponseMessage {
            message_type: response_type(),
            operation: self.operation.clone(),
            thing_id: self.thing_id.clone(),
            name: self.name.clone(),
            correlation_id: self.correlation_id.clone(),
            value,
            error,
            sender_id: String::new(),
            timestamp: now_timestamp(),
            message_id: new_id(),
        }
    }

    /// Build a failed response from an error value.
    pub fn create_error_response(&self, error: ErrorValue) -> ResponseMessage {
        self.create_response(Value::Null, Some(error))
    }

    /// Build a progress notification for this request.
    pub fn create_notification(&self, data: Value) -> NotificationMessage {
        NotificationMessage {
            message_type: notification_type(),
            operation: self.operation.clone(),
            thing_id: self.thing_id.clone(),
            name: self.name.clone(),
            data,
            correlation_id: self.correlation_id.clone(),
            sender_id: String::new(),
            timestamp: now_timestamp(),
            message_id: new_id(),
        }
    }

    /// Short human readable form of the input, for logging.
    pub fn input_summary(&self, max_len: usize) -> String {
        summarize(&self.input, max_len)
    }
}

/// Terminal reply to a request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseMessage {
    #[serde(rename = "messageType", default = "response_type")]
    pub message_type: String,

    pub operation: String,

    #[serde(rename = "thingID", default)]
    pub thing_id: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(rename = "correlationID", default)]
    pub correlation_id: String,

    /// Action output, or a ThingValue (map) for read operations.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub value: Value,

    /// Present if and only if the request failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorValue>,

    #[serde(rename = "senderID", default, skip_serializing_if = "String::is_empty")]
    pub sender_id: String,

    #[serde(default)]
    pub timestamp: String,

    #[serde(rename = "messageID", default)]
    pub message_id: String,
}

impl ResponseMessage {
    /// Decode the value into the given type.
    pub fn decode_value<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.value.clone())
    }
}

/// Unsolicited message delivered to subscribers or to the invoker of an action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationMessage {
    #[serde(rename = "messageType", default = "notification_type")]
    pub message_type: String,

    pub operation: String,

    #[serde(rename = "thingID", default)]
    pub thing_id: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,

    /// Only set on action progress: the correlation ID of the action request.
    #[serde(rename = "correlationID", default, skip_serializing_if = "String::is_empty")]
    pub correlation_id: String,

    #[serde(rename = "senderID", default, skip_serializing_if = "String::is_empty")]
    pub sender_id: String,

    #[serde(default)]
    pub timestamp: String,

    #[serde(rename = "messageID", default)]
    pub message_id: String,
}

impl NotificationMessage {
    /// Create a notification with a fresh message ID and timestamp.
    pub fn new(
        operation: impl Into<String>,
        thing_id: impl Into<String>,
        name: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            message_type: notification_type(),
            operation: operation.into(),
            thing_id: thing_id.into(),
            name: name.into(),
            data,
            correlation_id: String::new(),
            sender_id: String::new(),
            timestamp: now_timestamp(),
            message_id: new_id(),
        }
    }

    /// Convert into the ThingValue it describes.
    pub fn to_thing_value(&self, affordance_type: AffordanceType) -> ThingValue {
        ThingValue {
            affordance_type,
            thing_id: self.thing_id.clone(),
            name: self.name.clone(),
            data: self.data.clone(),
            timestamp: self.timestamp.clone(),
        }
    }
}

/// Any of the three envelope kinds, as decoded from a wire message.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Request(RequestMessage),
    Response(ResponseMessage),
    Notification(NotificationMessage),
}

impl Envelope {
    /// The `messageType` value of this envelope.
    pub fn message_type(&self) -> &'static str {
        match self {
            Envelope::Request(_) => MSG_TYPE_REQUEST,
            Envelope::Response(_) => MSG_TYPE_RESPONSE,
            Envelope::Notification(_) => MSG_TYPE_NOTIFICATION,
        }
    }
}

/// Progress of an action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionProgress {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl ActionProgress {
    /// True for completed and failed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ActionProgress::Completed | ActionProgress::Failed)
    }
}

/// Status record of the most recent invocation of an action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionStatus {
    /// Correlation ID of the consumer request that started the action.
    #[serde(rename = "actionID", default)]
    pub action_id: String,

    #[serde(rename = "agentID", default, skip_serializing_if = "String::is_empty")]
    pub agent_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorValue>,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub input: Value,

    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub output: Value,

    #[serde(rename = "senderID", default)]
    pub sender_id: String,

    #[serde(default)]
    pub status: ActionProgress,

    #[serde(rename = "thingID", default)]
    pub thing_id: String,

    #[serde(rename = "timeRequested", default)]
    pub time_requested: String,

    #[serde(rename = "timeUpdated", default)]
    pub time_updated: String,
}

/// Kind of affordance a value belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AffordanceType {
    #[default]
    Property,
    Event,
    Action,
}

/// Last known value of a property, event or action output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThingValue {
    #[serde(rename = "affordanceType", default)]
    pub affordance_type: AffordanceType,

    #[serde(rename = "thingID", default)]
    pub thing_id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub data: Value,

    #[serde(default)]
    pub timestamp: String,
}

impl ThingValue {
    pub fn new(
        affordance_type: AffordanceType,
        thing_id: impl Into<String>,
        name: impl Into<String>,
        data: Value,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            affordance_type,
            thing_id: thing_id.into(),
            name: name.into(),
            data,
            timestamp: timestamp.into(),
        }
    }

    /// True if this value is older than `other`.
    ///
    /// A value without a parsable timestamp is older than one with a
    /// timestamp and never older than another one without.
    pub fn is_older_than(&self, other: &ThingValue) -> bool {
        match (
            parse_timestamp(&self.timestamp),
            parse_timestamp(&other.timestamp),
        ) {
            (Some(mine), Some(theirs)) => mine < theirs,
            (None, Some(_)) => true,
            _ => false,
        }
    }
}

/// Map of affordance name to value, as returned by the read-all operations.
pub type ThingValueMap = HashMap<String, ThingValue>;

fn summarize(value: &Value, max_len: usize) -> String {
    let mut text = match value {
        Value::Null => return String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if text.len() > max_len {
        let mut cut = max_len;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push_str("...");
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_json_roundtrip() {
        let mut req = RequestMessage::new(op::INVOKE_ACTION, "dtw:a1:t1", "start", json!({"x": 1}));
        req.correlation_id = "cid-1".to_string();
        req.sender_id = "c1".to_string();

        let text = serde_json::to_string(&req).unwrap();
        assert!(text.contains("\"messageType\":\"request\""));
        assert!(text.contains("\"thingID\":\"dtw:a1:t1\""));
        assert!(text.contains("\"correlationID\":\"cid-1\""));

        let parsed: RequestMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, req);
    }

    #[test]
    fn test_response_echoes_request() {
        let req = RequestMessage::new(op::READ_PROPERTY, "dtw:a1:t1", "temp", Value::Null)
            .with_correlation_id("abc");
        let resp = req.create_response(json!(21.5), None);

        assert_eq!(resp.operation, op::READ_PROPERTY);
        assert_eq!(resp.thing_id, "dtw:a1:t1");
        assert_eq!(resp.name, "temp");
        assert_eq!(resp.correlation_id, "abc");
        assert_eq!(resp.value, json!(21.5));
        assert!(resp.error.is_none());
    }

    #[test]
    fn test_error_response_drops_value() {
        let req = RequestMessage::new(op::INVOKE_ACTION, "dtw:a1:t1", "go", Value::Null)
            .with_correlation_id("c");
        let resp = req.create_response(json!("ignored"), Some(ErrorValue::unavailable("agent offline")));
        assert!(resp.value.is_null());
        assert_eq!(resp.error.as_ref().map(|e| e.status), Some(503));

        let text = serde_json::to_string(&resp).unwrap();
        let parsed: ResponseMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, resp);
    }

    #[test]
    fn test_action_status_wire_names() {
        let status = ActionStatus {
            action_id: "cid".into(),
            name: "start".into(),
            status: ActionProgress::Running,
            ..Default::default()
        };
        let v = serde_json::to_value(&status).unwrap();
        assert_eq!(v["status"], "running");
        assert_eq!(v["actionID"], "cid");
        assert!(ActionProgress::Completed.is_terminal());
        assert!(!ActionProgress::Running.is_terminal());
    }

    #[test]
    fn test_thing_value_ordering() {
        let newer = ThingValue::new(
            AffordanceType::Property,
            "t",
            "p",
            json!(20),
            "2024-01-01T00:00:01.000Z",
        );
        let older = ThingValue::new(
            AffordanceType::Property,
            "t",
            "p",
            json!(19),
            "2024-01-01T00:00:00.999Z",
        );
        assert!(older.is_older_than(&newer));
        assert!(!newer.is_older_than(&older));

        let unknown = ThingValue::new(AffordanceType::Property, "t", "p", json!(1), "");
        let garbled = ThingValue::new(AffordanceType::Property, "t", "p", json!(2), "yesterday");
        assert!(unknown.is_older_than(&newer));
        assert!(garbled.is_older_than(&older));
        assert!(!newer.is_older_than(&unknown));
        assert!(!unknown.is_older_than(&garbled));
    }

    #[test]
    fn test_input_summary_truncates() {
        let req = RequestMessage::new(op::INVOKE_ACTION, "t", "n", json!("abcdefghij"));
        assert_eq!(req.input_summary(4), "abcd...");
        assert_eq!(req.input_summary(40), "abcdefghij");
    }
}
