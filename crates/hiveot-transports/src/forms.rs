// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hiveot.net

//! Forms pointing at the hub's protocol bindings.

use crate::mqtt::topics;
use hiveot_messaging::{op, Form, FormProvider, ThingDescription};
use serde_json::{json, Value};

/// Path of the WebSocket endpoint.
pub const WSS_PATH: &str = "/hiveot/wss";
/// Path of the SSE return channel.
pub const SSE_PATH: &str = "/hiveot/sse";
/// WebSocket sub-protocol name of the envelope binding.
pub const WSS_SUBPROTOCOL: &str = "hiveot";

const JSON: &str = "application/json";

/// URL template of the HTTP-basic binding.
pub fn thing_op_path(operation: &str, thing_id: &str, name: &str) -> String {
    if name.is_empty() {
        format!("/things/{}/{}", operation, thing_id)
    } else {
        format!("/things/{}/{}/{}", operation, thing_id, name)
    }
}

/// Adds forms for every enabled binding to a digital-twin TD.
#[derive(Debug, Clone, Default)]
pub struct HubForms {
    http_addr: Option<String>,
    mqtt_addr: Option<String>,
    mqtt_ws_addr: Option<String>,
}

impl HubForms {
    pub fn new(
        http_addr: Option<String>,
        mqtt_addr: Option<String>,
        mqtt_ws_addr: Option<String>,
    ) -> Self {
        Self {
            http_addr,
            mqtt_addr,
            mqtt_ws_addr,
        }
    }

    fn http_form(&self, addr: &str, operation: &str, method: &str, thing_id: &str, name: &str) -> Form {
        let mut form = Form::new(
            format!("http://{}{}", addr, thing_op_path(operation, thing_id, name)),
            &[operation],
        );
        form.method_name = Some(method.to_string());
        form.content_type = Some(JSON.to_string());
        form
    }

    fn mqtt_forms(&self, thing_id: &str) -> Vec<Form> {
        let mut forms = Vec::new();
        let all_ops = [
            op::READ_ALL_PROPERTIES,
            op::OBSERVE_ALL_PROPERTIES,
            op::SUBSCRIBE_ALL_EVENTS,
            op::QUERY_ALL_ACTIONS,
        ];
        for (scheme, addr) in [("mqtt", &self.mqtt_addr), ("ws", &self.mqtt_ws_addr)] {
            let Some(addr) = addr else { continue };
            let href = match scheme {
                "ws" => format!("ws://{}/mqtt", addr),
                _ => format!("mqtt://{}", addr),
            };
            let mut form = Form::new(href, &all_ops);
            form.content_type = Some(JSON.to_string());
            form.extra.insert(
                "mqv:topic".to_string(),
                Value::String(topics::thing_topic(thing_id, "", "+", "+")),
            );
            forms.push(form);
        }
        forms
    }
}

impl FormProvider for HubForms {
    fn add_forms(&self, td: &mut ThingDescription) {
        let thing_id = td.id.clone();

        if let Some(addr) = &self.http_addr {
            td.forms.push(self.http_form(addr, op::READ_ALL_PROPERTIES, "GET", &thing_id, ""));
            td.forms.push(self.http_form(addr, op::READ_ALL_EVENTS, "GET", &thing_id, ""));
            td.forms.push(self.http_form(addr, op::QUERY_ALL_ACTIONS, "GET", &thing_id, ""));

            let mut wss = Form::new(
                format!("ws://{}{}", addr, WSS_PATH),
                &[
                    op::OBSERVE_ALL_PROPERTIES,
                    op::SUBSCRIBE_ALL_EVENTS,
                    op::UNOBSERVE_ALL_PROPERTIES,
                    op::UNSUBSCRIBE_ALL_EVENTS,
                ],
            );
            wss.subprotocol = Some(WSS_SUBPROTOCOL.to_string());
            td.forms.push(wss);

            let mut sse = Form::new(
                format!("http://{}{}", addr, SSE_PATH),
                &[op::OBSERVE_ALL_PROPERTIES, op::SUBSCRIBE_ALL_EVENTS],
            );
            sse.subprotocol = Some("sse".to_string());
            sse.content_type = Some("text/event-stream".to_string());
            td.forms.push(sse);

            for (name, prop) in td.properties.iter_mut() {
                prop.forms
                    .push(self.http_form(addr, op::READ_PROPERTY, "GET", &thing_id, name));
                if !prop.schema.read_only {
                    prop.forms
                        .push(self.http_form(addr, op::WRITE_PROPERTY, "PUT", &thing_id, name));
                }
            }
            for (name, event) in td.events.iter_mut() {
                event
                    .forms
                    .push(self.http_form(addr, op::READ_EVENT, "GET", &thing_id, name));
            }
            for (name, action) in td.actions.iter_mut() {
                action
                    .forms
                    .push(self.http_form(addr, op::INVOKE_ACTION, "POST", &thing_id, name));
                action
                    .forms
                    .push(self.http_form(addr, op::QUERY_ACTION, "GET", &thing_id, name));
            }
        }

        td.forms.extend(self.mqtt_forms(&thing_id));

        if td.security_definitions.is_empty() && self.http_addr.is_some() {
            td.security_definitions
                .insert("bearer_sc".to_string(), json!({"scheme": "bearer", "in": "header"}));
            td.security = json!("bearer_sc");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_forms_per_affordance() {
        let mut td = ThingDescription::new("dtw:agent1:thing1", "Thing 1")
            .add_property("temp", "Temperature", "number")
            .add_event("alarm", "Alarm", "boolean")
            .add_action("reset", "Reset", None, None);
        td.properties.get_mut("temp").unwrap().schema.read_only = true;

        let forms = HubForms::new(Some("127.0.0.1:8444".into()), None, None);
        forms.add_forms(&mut td);

        let prop_forms = &td.properties["temp"].forms;
        assert_eq!(prop_forms.len(), 1);
        assert_eq!(
            prop_forms[0].href,
            "http://127.0.0.1:8444/things/readproperty/dtw:agent1:thing1/temp"
        );
        assert_eq!(prop_forms[0].method_name.as_deref(), Some("GET"));

        let action_forms = &td.actions["reset"].forms;
        assert_eq!(action_forms[0].op, vec![op::INVOKE_ACTION.to_string()]);
        assert_eq!(action_forms[0].method_name.as_deref(), Some("POST"));
        assert!(td
            .forms
            .iter()
            .any(|f| f.href == "ws://127.0.0.1:8444/hiveot/wss"));
        assert_eq!(td.security, json!("bearer_sc"));
    }

    #[test]
    fn test_mqtt_forms_only_when_enabled() {
        let mut td = ThingDescription::new("dtw:agent1:thing1", "Thing 1");
        HubForms::new(None, None, None).add_forms(&mut td);
        assert!(td.forms.is_empty());

        HubForms::new(None, Some("127.0.0.1:8883".into()), Some("127.0.0.1:8884".into()))
            .add_forms(&mut td);
        assert_eq!(td.forms.len(), 2);
        assert_eq!(td.forms[0].href, "mqtt://127.0.0.1:8883");
        assert_eq!(td.forms[1].href, "ws://127.0.0.1:8884/mqtt");
        assert_eq!(
            td.forms[0].extra["mqv:topic"],
            json!("things/agent1/thing1/+/+")
        );
    }
}
