// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hiveot.net

//! Role based authorization of consumer requests.
//!
//! A request passes when the sender's role permits the operation and the
//! addressed affordance's `allow`/`deny` lists, if any, admit the role.
//! Safe actions count as reads.

use hiveot_messaging::{
    op, roles, ErrorValue, NotificationMessage, RequestMessage, ThingDescription,
};
use std::collections::{HashMap, HashSet};
use tracing::debug;

const READ_OPS: &[&str] = &[
    op::READ_PROPERTY,
    op::READ_ALL_PROPERTIES,
    op::READ_EVENT,
    op::READ_ALL_EVENTS,
    op::QUERY_ACTION,
    op::QUERY_ALL_ACTIONS,
];

/// Operation permissions per role.
#[derive(Debug, Clone)]
pub struct Authorizer {
    permissions: HashMap<String, HashSet<String>>,
}

impl Default for Authorizer {
    fn default() -> Self {
        let mut authz = Self {
            permissions: HashMap::new(),
        };
        authz.grant(roles::VIEWER, READ_OPS);
        authz.grant(roles::OPERATOR, READ_OPS);
        authz.grant(roles::OPERATOR, &[op::INVOKE_ACTION]);
        for role in [roles::MANAGER, roles::ADMIN, roles::SERVICE] {
            authz.grant(role, READ_OPS);
            authz.grant(role, &[op::INVOKE_ACTION, op::WRITE_PROPERTY]);
        }
        authz.grant(roles::AGENT, &[op::INVOKE_ACTION]);
        authz
    }
}

impl Authorizer {
    /// Allow a role to use the given operations.
    pub fn grant(&mut self, role: &str, operations: &[&str]) {
        self.permissions
            .entry(role.to_string())
            .or_default()
            .extend(operations.iter().map(|o| o.to_string()));
    }

    pub fn role_allows(&self, role: &str, operation: &str) -> bool {
        self.permissions
            .get(role)
            .is_some_and(|ops| ops.contains(operation))
    }

    /// Check a request against the sender's role and the TD of its Thing.
    ///
    /// The TD is optional; without it only the role permissions apply.
    pub fn authorize(
        &self,
        role: Option<&str>,
        req: &RequestMessage,
        td: Option<&ThingDescription>,
    ) -> Result<(), ErrorValue> {
        let safe_action = req.operation == op::INVOKE_ACTION
            && td
                .and_then(|td| td.actions.get(&req.name))
                .is_some_and(|a| a.safe);
        let permission = if safe_action {
            op::QUERY_ACTION
        } else {
            req.operation.as_str()
        };
        self.check(
            role,
            &req.sender_id,
            permission,
            &req.operation,
            &req.thing_id,
            &req.name,
            td,
        )
    }

    /// Check a subscribe or observe request.
    ///
    /// Receiving events or property updates needs the matching read
    /// permission, and the affordance must admit the role.
    pub fn authorize_subscription(
        &self,
        role: Option<&str>,
        req: &RequestMessage,
        td: Option<&ThingDescription>,
    ) -> Result<(), ErrorValue> {
        let Some(permission) = op::read_permission(&req.operation) else {
            return Err(ErrorValue::bad_request(format!(
                "'{}' is not a subscription",
                req.operation
            )));
        };
        self.check(
            role,
            &req.sender_id,
            permission,
            permission,
            &req.thing_id,
            &req.name,
            td,
        )
    }

    /// Whether a client may receive a broadcast event or property update.
    pub fn may_receive(
        &self,
        role: Option<&str>,
        client_id: &str,
        notif: &NotificationMessage,
        td: Option<&ThingDescription>,
    ) -> bool {
        let Some(permission) = op::read_permission(&notif.operation) else {
            return false;
        };
        self.check(
            role,
            client_id,
            permission,
            permission,
            &notif.thing_id,
            &notif.name,
            td,
        )
        .is_ok()
    }

    #[allow(clippy::too_many_arguments)]
    fn check(
        &self,
        role: Option<&str>,
        client_id: &str,
        permission: &str,
        operation: &str,
        thing_id: &str,
        name: &str,
        td: Option<&ThingDescription>,
    ) -> Result<(), ErrorValue> {
        let Some(role) = role else {
            return Err(ErrorValue::forbidden(format!(
                "client '{}' has no role",
                client_id
            )));
        };
        if !self.role_allows(role, permission) {
            debug!(
                "role '{}' of '{}' may not use '{}'",
                role, client_id, operation
            );
            return Err(ErrorValue::forbidden(format!(
                "role '{}' may not use '{}'",
                role, operation
            )));
        }

        if let Some((allow, deny)) = td.and_then(|td| td.access_lists(operation, name)) {
            let listed = |list: &[String]| list.iter().any(|r| r == role);
            if listed(deny) || (!allow.is_empty() && !listed(allow)) {
                return Err(ErrorValue::forbidden(format!(
                    "role '{}' may not use '{}' of '{}'",
                    role, name, thing_id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn request(operation: &str, name: &str) -> RequestMessage {
        let mut req = RequestMessage::new(operation, "dtw:agent1:thing1", name, Value::Null);
        req.sender_id = "client1".into();
        req
    }

    fn td() -> ThingDescription {
        let mut td = ThingDescription::new("dtw:agent1:thing1", "Thing")
            .add_property("setpoint", "Setpoint", "number")
            .add_action("reboot", "Reboot", None, None)
            .add_action("status", "Status", None, None);
        if let Some(a) = td.actions.get_mut("reboot") {
            a.allow = vec![roles::ADMIN.into()];
        }
        if let Some(a) = td.actions.get_mut("status") {
            a.safe = true;
        }
        if let Some(p) = td.properties.get_mut("setpoint") {
            p.deny = vec![roles::SERVICE.into()];
        }
        td
    }

    #[test]
    fn test_role_permissions() {
        let authz = Authorizer::default();
        let read = request(op::READ_PROPERTY, "setpoint");
        let invoke = request(op::INVOKE_ACTION, "other");
        let write = request(op::WRITE_PROPERTY, "other");

        assert!(authz.authorize(Some(roles::VIEWER), &read, None).is_ok());
        assert!(authz.authorize(Some(roles::VIEWER), &invoke, None).is_err());
        assert!(authz.authorize(Some(roles::OPERATOR), &invoke, None).is_ok());
        assert!(authz.authorize(Some(roles::OPERATOR), &write, None).is_err());
        assert!(authz.authorize(Some(roles::MANAGER), &write, None).is_ok());
        assert!(authz.authorize(Some(roles::AGENT), &read, None).is_err());
        assert_eq!(authz.authorize(None, &read, None).unwrap_err().status, 403);
        assert!(authz.authorize(Some("nobody"), &read, None).is_err());
    }

    #[test]
    fn test_td_access_lists() {
        let authz = Authorizer::default();
        let td = td();
        let reboot = request(op::INVOKE_ACTION, "reboot");
        assert!(authz.authorize(Some(roles::OPERATOR), &reboot, Some(&td)).is_err());
        assert!(authz.authorize(Some(roles::ADMIN), &reboot, Some(&td)).is_ok());

        let write = request(op::WRITE_PROPERTY, "setpoint");
        assert!(authz.authorize(Some(roles::SERVICE), &write, Some(&td)).is_err());
        assert!(authz.authorize(Some(roles::MANAGER), &write, Some(&td)).is_ok());
    }

    #[test]
    fn test_safe_actions_are_reads() {
        let authz = Authorizer::default();
        let td = td();
        let status = request(op::INVOKE_ACTION, "status");
        assert!(authz.authorize(Some(roles::VIEWER), &status, Some(&td)).is_ok());
        assert!(authz.authorize(Some(roles::VIEWER), &status, None).is_err());
    }

    #[test]
    fn test_subscriptions_need_read_permission() {
        let authz = Authorizer::default();
        let mut td = td().add_event("alarm", "Alarm", "boolean");
        if let Some(e) = td.events.get_mut("alarm") {
            e.deny = vec![roles::OPERATOR.into()];
        }
        let subscribe = request(op::SUBSCRIBE_EVENT, "alarm");
        let observe_all = request(op::OBSERVE_ALL_PROPERTIES, "");

        assert_eq!(
            authz.authorize_subscription(None, &subscribe, None).unwrap_err().status,
            403
        );
        assert!(authz.authorize_subscription(Some(roles::AGENT), &observe_all, None).is_err());
        assert!(authz.authorize_subscription(Some(roles::VIEWER), &observe_all, Some(&td)).is_ok());
        assert!(authz.authorize_subscription(Some(roles::VIEWER), &subscribe, Some(&td)).is_ok());
        assert!(authz.authorize_subscription(Some(roles::OPERATOR), &subscribe, Some(&td)).is_err());

        let alarm =
            NotificationMessage::new(op::SUBSCRIBE_EVENT, "dtw:agent1:thing1", "alarm", Value::Null);
        assert!(authz.may_receive(Some(roles::VIEWER), "v1", &alarm, Some(&td)));
        assert!(!authz.may_receive(Some(roles::OPERATOR), "o1", &alarm, Some(&td)));
        assert!(!authz.may_receive(None, "ghost", &alarm, Some(&td)));
    }
}
