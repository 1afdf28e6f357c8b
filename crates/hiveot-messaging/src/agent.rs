// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hiveot.net

//! Agent helper: a consumer that also serves requests for its own things.

use crate::connection::{request_handler, run_request_handler, Connection, RequestHandler};
use crate::consumer::Consumer;
use crate::envelope::{
    now_timestamp, op, ActionProgress, ActionStatus, NotificationMessage, RequestMessage,
    ResponseMessage,
};
use crate::error::{ErrorValue, Result};
use crate::td::{directory, ThingDescription};
use serde_json::{Map, Value};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Agent side of the hub connection.
///
/// Requests are handed to the application handler on their own task. A
/// handler that returns a response has it sent right away; a handler that
/// returns None must call [`Agent::send_response`] later.
#[derive(Clone)]
pub struct Agent {
    consumer: Consumer,
}

impl Agent {
    pub fn new(cc: Arc<dyn Connection>) -> Self {
        let consumer = Consumer::new(cc.clone());
        let app = consumer.app_handlers().clone();
        let weak: Weak<dyn Connection> = Arc::downgrade(&cc);

        cc.set_request_handler(request_handler(move |req, info| {
            let app = app.clone();
            let weak = weak.clone();
            async move {
                let Some(handler) = app.request_handler() else {
                    warn!("[{}] agent has no request handler", info.connection_id);
                    return Some(req.create_error_response(ErrorValue::internal(
                        "no handler for requests",
                    )));
                };
                tokio::spawn(async move {
                    let Some(resp) = run_request_handler(handler, req, info.clone()).await else {
                        return;
                    };
                    match weak.upgrade() {
                        Some(cc) => {
                            if let Err(e) = cc.send_response(resp) {
                                warn!("[{}] failed to send response: {}", info.connection_id, e);
                            }
                        }
                        None => debug!(
                            "[{}] connection gone, response dropped",
                            info.connection_id
                        ),
                    }
                });
                None
            }
        }));
        Self { consumer }
    }

    /// Handler serving requests for the agent's things.
    pub fn set_request_handler(&self, handler: RequestHandler) {
        self.consumer.app_handlers().set_request_handler(handler);
    }

    pub fn consumer(&self) -> &Consumer {
        &self.consumer
    }

    pub fn agent_id(&self) -> &str {
        self.consumer.client_id()
    }

    pub fn is_connected(&self) -> bool {
        self.consumer.is_connected()
    }

    pub fn disconnect(&self) {
        self.consumer.disconnect();
    }

    /// Send the response of a request that was answered asynchronously.
    pub fn send_response(&self, resp: ResponseMessage) -> Result<()> {
        self.consumer.connection().send_response(resp)
    }

    /// Publish an event of one of the agent's things.
    pub fn pub_event(&self, thing_id: &str, name: &str, data: Value) -> Result<()> {
        let notif = NotificationMessage::new(op::SUBSCRIBE_EVENT, thing_id, name, data);
        self.consumer.connection().send_notification(notif)
    }

    /// Publish a property value change.
    pub fn pub_property(&self, thing_id: &str, name: &str, value: Value) -> Result<()> {
        let notif = NotificationMessage::new(op::OBSERVE_PROPERTY, thing_id, name, value);
        self.consumer.connection().send_notification(notif)
    }

    /// Publish several property values in one notification.
    pub fn pub_properties(&self, thing_id: &str, values: Map<String, Value>) -> Result<()> {
        let notif = NotificationMessage::new(
            op::OBSERVE_ALL_PROPERTIES,
            thing_id,
            "",
            Value::Object(values),
        );
        self.consumer.connection().send_notification(notif)
    }

    /// Report that a long running action is in progress.
    ///
    /// The notification carries the request's correlation ID so the hub can
    /// relay it to the invoking consumer.
    pub fn pub_action_progress(&self, req: &RequestMessage, output: Value) -> Result<()> {
        let status = ActionStatus {
            action_id: req.correlation_id.clone(),
            agent_id: self.agent_id().to_string(),
            error: None,
            input: req.input.clone(),
            name: req.name.clone(),
            output,
            sender_id: req.sender_id.clone(),
            status: ActionProgress::Running,
            thing_id: req.thing_id.clone(),
            time_requested: req.created.clone(),
            time_updated: now_timestamp(),
        };
        let notif = req.create_notification(serde_json::to_value(status)?);
        self.consumer.connection().send_notification(notif)
    }

    /// Publish the TD of one of the agent's things to the hub directory.
    pub async fn update_thing(&self, td: &ThingDescription) -> Result<()> {
        self.consumer
            .invoke_action(
                directory::DTHING_ID,
                directory::ACTION_UPDATE_THING,
                serde_json::to_value(td)?,
            )
            .await?;
        Ok(())
    }
}
