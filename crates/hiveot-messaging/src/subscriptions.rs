// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hiveot.net

//! Server-side subscription state of one connection.
//!
//! Event subscriptions and property observations are kept per connection as
//! `thingID -> {names}`. An empty thing ID matches every thing; an empty name
//! matches every affordance of the thing.

use crate::envelope::{op, NotificationMessage, RequestMessage, ResponseMessage};
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashSet;
use tracing::debug;

/// Event subscriptions and property observations of a connection.
#[derive(Debug, Default)]
pub struct Subscriptions {
    events: DashMap<String, HashSet<String>>,
    properties: DashMap<String, HashSet<String>>,
}

fn add(map: &DashMap<String, HashSet<String>>, thing_id: &str, name: &str) {
    map.entry(thing_id.to_string())
        .or_default()
        .insert(name.to_string());
}

fn remove(map: &DashMap<String, HashSet<String>>, thing_id: &str, name: &str) {
    if name.is_empty() {
        map.remove(thing_id);
        return;
    }
    let now_empty = match map.get_mut(thing_id) {
        Some(mut names) => {
            names.remove(name);
            names.is_empty()
        }
        None => false,
    };
    if now_empty {
        map.remove(thing_id);
    }
}

fn matches(map: &DashMap<String, HashSet<String>>, thing_id: &str, name: &str) -> bool {
    [thing_id, ""].iter().any(|key| {
        map.get(*key).is_some_and(|names| {
            names.contains("") || name.is_empty() || names.contains(name)
        })
    })
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to an event, or to all events of the thing when name is empty.
    pub fn subscribe_event(&self, thing_id: &str, name: &str) {
        add(&self.events, thing_id, name);
    }

    pub fn unsubscribe_event(&self, thing_id: &str, name: &str) {
        remove(&self.events, thing_id, name);
    }

    /// Observe a property, or all properties of the thing when name is empty.
    pub fn observe_property(&self, thing_id: &str, name: &str) {
        add(&self.properties, thing_id, name);
    }

    pub fn unobserve_property(&self, thing_id: &str, name: &str) {
        remove(&self.properties, thing_id, name);
    }

    pub fn is_subscribed(&self, thing_id: &str, name: &str) -> bool {
        matches(&self.events, thing_id, name)
    }

    pub fn is_observed(&self, thing_id: &str, name: &str) -> bool {
        matches(&self.properties, thing_id, name)
    }

    /// Whether a broadcast notification should be delivered on this connection.
    ///
    /// Action progress is never broadcast; it is sent directly to the invoker.
    pub fn accepts(&self, notif: &NotificationMessage) -> bool {
        match notif.operation.as_str() {
            op::SUBSCRIBE_EVENT | op::SUBSCRIBE_ALL_EVENTS => {
                self.is_subscribed(&notif.thing_id, &notif.name)
            }
            op::OBSERVE_PROPERTY | op::OBSERVE_ALL_PROPERTIES => {
                self.is_observed(&notif.thing_id, &notif.name)
            }
            _ => false,
        }
    }

    /// Apply a subscription request and build its acknowledgement.
    ///
    /// Returns None if the request is not a subscription operation.
    pub fn handle_request(&self, req: &RequestMessage) -> Option<ResponseMessage> {
        let thing_id = req.thing_id.as_str();
        let name = req.name.as_str();
        match req.operation.as_str() {
            op::SUBSCRIBE_EVENT => self.subscribe_event(thing_id, name),
            op::SUBSCRIBE_ALL_EVENTS => self.subscribe_event(thing_id, ""),
            op::UNSUBSCRIBE_EVENT => self.unsubscribe_event(thing_id, name),
            op::UNSUBSCRIBE_ALL_EVENTS => self.unsubscribe_event(thing_id, ""),
            op::OBSERVE_PROPERTY => self.observe_property(thing_id, name),
            op::OBSERVE_ALL_PROPERTIES => self.observe_property(thing_id, ""),
            op::UNOBSERVE_PROPERTY => self.unobserve_property(thing_id, name),
            op::UNOBSERVE_ALL_PROPERTIES => self.unobserve_property(thing_id, ""),
            _ => return None,
        }
        debug!(
            "subscription '{}' thing='{}' name='{}' sender='{}'",
            req.operation, thing_id, name, req.sender_id
        );
        Some(req.create_response(Value::Null, None))
    }

    /// Drop all subscriptions.
    pub fn clear(&self) {
        self.events.clear();
        self.properties.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(thing_id: &str, name: &str) -> NotificationMessage {
        NotificationMessage::new(op::SUBSCRIBE_EVENT, thing_id, name, json!(1))
    }

    #[test]
    fn test_subscribe_all_events_of_thing() {
        let subs = Subscriptions::new();
        subs.subscribe_event("dtw:a1:t1", "");
        assert!(subs.accepts(&event("dtw:a1:t1", "temperature")));
        assert!(!subs.accepts(&event("dtw:a1:t2", "temperature")));
    }

    #[test]
    fn test_subscribe_single_event() {
        let subs = Subscriptions::new();
        subs.subscribe_event("dtw:a1:t1", "alarm");
        assert!(subs.accepts(&event("dtw:a1:t1", "alarm")));
        assert!(!subs.accepts(&event("dtw:a1:t1", "temperature")));

        subs.unsubscribe_event("dtw:a1:t1", "alarm");
        assert!(!subs.accepts(&event("dtw:a1:t1", "alarm")));
    }

    #[test]
    fn test_wildcard_thing() {
        let subs = Subscriptions::new();
        subs.subscribe_event("", "");
        assert!(subs.accepts(&event("dtw:x:y", "z")));
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let subs = Subscriptions::new();
        subs.subscribe_event("t", "");
        subs.subscribe_event("t", "");
        assert_eq!(subs.events.get("t").map(|n| n.len()), Some(1));
        subs.unsubscribe_event("t", "");
        assert!(!subs.is_subscribed("t", "a"));
    }

    #[test]
    fn test_properties_separate_from_events() {
        let subs = Subscriptions::new();
        subs.observe_property("t", "p1");
        let prop = NotificationMessage::new(op::OBSERVE_PROPERTY, "t", "p1", json!(2));
        assert!(subs.accepts(&prop));
        assert!(!subs.accepts(&event("t", "p1")));

        let all = NotificationMessage::new(op::OBSERVE_ALL_PROPERTIES, "t", "", json!({"p1": 2}));
        assert!(subs.accepts(&all));
    }

    #[test]
    fn test_progress_never_broadcast() {
        let subs = Subscriptions::new();
        subs.subscribe_event("", "");
        subs.observe_property("", "");
        let progress = NotificationMessage::new(op::INVOKE_ACTION, "t", "a", json!({}));
        assert!(!subs.accepts(&progress));
    }

    #[test]
    fn test_handle_request_acknowledges() {
        let subs = Subscriptions::new();
        let req = RequestMessage::new(op::SUBSCRIBE_ALL_EVENTS, "dtw:a1:t1", "", json!(null))
            .with_correlation_id("s1");
        let resp = subs.handle_request(&req).unwrap();
        assert_eq!(resp.correlation_id, "s1");
        assert!(resp.error.is_none());
        assert!(subs.is_subscribed("dtw:a1:t1", "anything"));

        let other = RequestMessage::new(op::INVOKE_ACTION, "t", "a", json!(null));
        assert!(subs.handle_request(&other).is_none());
    }
}
