// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hiveot.net

//! Consumer helper.
//!
//! A [`Consumer`] owns a [`Connection`] and a correlation registry and turns
//! the fire-and-forget connection into a request-and-response client. The
//! connection's handler slots are wired once at construction; application
//! handlers are kept in a separate slot set so the connection never points
//! back at the consumer.

use crate::connection::{
    connect_handler, notification_handler, response_handler, ConnectHandler, Connection,
    ConnectionInfo, HandlerSlots, NotificationHandler, ResponseHandler,
};
use crate::envelope::{
    new_id, op, ActionStatus, NotificationMessage, RequestMessage, ResponseMessage, ThingValue,
    ThingValueMap,
};
use crate::error::{MessagingError, Result};
use crate::rnr::RnrChannels;
use crate::td::{directory, ThingDescription};
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Default time to wait for a response.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(60);

type NotificationSender = mpsc::UnboundedSender<(NotificationMessage, ConnectionInfo)>;

/// Run the application notification handler on its own task, in arrival
/// order, so a slow handler does not hold up responses on the connection.
fn spawn_notification_worker(app: Arc<HandlerSlots>) -> NotificationSender {
    let (tx, mut rx) = mpsc::unbounded_channel::<(NotificationMessage, ConnectionInfo)>();
    tokio::spawn(async move {
        while let Some((notif, info)) = rx.recv().await {
            let Some(handler) = app.notification_handler() else {
                continue;
            };
            if AssertUnwindSafe(handler(notif, info.clone()))
                .catch_unwind()
                .await
                .is_err()
            {
                error!("[{}] notification handler panicked", info.connection_id);
            }
        }
    });
    tx
}

/// Request-and-response client on top of a connection.
#[derive(Clone)]
pub struct Consumer {
    cc: Arc<dyn Connection>,
    rnr: Arc<RnrChannels>,
    app: Arc<HandlerSlots>,
    rpc_timeout: Duration,
}

impl Consumer {
    /// Take ownership of the connection's response, notification and connect
    /// handler slots.
    pub fn new(cc: Arc<dyn Connection>) -> Self {
        let rnr = Arc::new(RnrChannels::new());
        let app = Arc::new(HandlerSlots::default());

        let (rnr2, app2) = (rnr.clone(), app.clone());
        cc.set_response_handler(response_handler(move |resp, info| {
            let (rnr, app) = (rnr2.clone(), app2.clone());
            async move {
                if rnr.is_open(&resp.correlation_id) {
                    rnr.handle_response(resp).await;
                } else if let Some(handler) = app.response_handler() {
                    handler(resp, info).await;
                } else {
                    debug!(
                        "[{}] unexpected response '{}' for '{}' dropped",
                        info.connection_id, resp.correlation_id, resp.operation
                    );
                }
            }
        }));

        let app2 = app.clone();
        let queue = OnceLock::new();
        cc.set_notification_handler(notification_handler(move |notif, info| {
            let tx: &NotificationSender =
                queue.get_or_init(|| spawn_notification_worker(app2.clone()));
            let queued = tx.send((notif, info));
            async move {
                if let Err(mpsc::error::SendError((notif, info))) = queued {
                    debug!(
                        "[{}] notification worker stopped, '{}' dropped",
                        info.connection_id, notif.name
                    );
                }
            }
        }));

        let (rnr2, app2) = (rnr.clone(), app.clone());
        cc.set_connect_handler(connect_handler(move |connected, err, info| {
            if !connected {
                rnr2.close_all();
            }
            app2.notify_connect(connected, err, info);
        }));

        Self {
            cc,
            rnr,
            app,
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
        }
    }

    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    pub fn rpc_timeout(&self) -> Duration {
        self.rpc_timeout
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.cc
    }

    pub fn client_id(&self) -> &str {
        &self.cc.info().client_id
    }

    pub fn is_connected(&self) -> bool {
        self.cc.is_connected()
    }

    pub fn disconnect(&self) {
        self.cc.disconnect();
    }

    /// Number of requests currently waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.rnr.len()
    }

    pub(crate) fn app_handlers(&self) -> &Arc<HandlerSlots> {
        &self.app
    }

    /// Handler for responses that no caller is waiting for.
    pub fn set_response_handler(&self, handler: ResponseHandler) {
        self.app.set_response_handler(handler);
    }

    /// Handler for events, property updates and action progress.
    pub fn set_notification_handler(&self, handler: NotificationHandler) {
        self.app.set_notification_handler(handler);
    }

    pub fn set_connect_handler(&self, handler: ConnectHandler) {
        self.app.set_connect_handler(handler);
    }

    /// Send a request.
    ///
    /// A correlation ID is generated if absent. With `wait` the call blocks
    /// until the response arrives, the RPC timeout elapses or the connection
    /// is lost. Without `wait` it returns `Ok(None)` once the request is on
    /// the wire; the response goes to the response handler.
    pub async fn send_request(
        &self,
        mut req: RequestMessage,
        wait: bool,
    ) -> Result<Option<ResponseMessage>> {
        if req.correlation_id.is_empty() {
            req.correlation_id = new_id();
        }
        if !wait {
            self.cc.send_request(req)?;
            return Ok(None);
        }

        let cid = req.correlation_id.clone();
        let operation = req.operation.clone();
        let mut rx = self.rnr.open(&cid)?;
        if let Err(e) = self.cc.send_request(req) {
            self.rnr.close(&cid);
            return Err(e);
        }
        let resp = RnrChannels::wait_for_response(&mut rx, self.rpc_timeout).await;
        self.rnr.close(&cid);
        match resp {
            Some(resp) => Ok(Some(resp)),
            None if !self.cc.is_connected() => {
                warn!("'{}' request '{}' aborted: connection lost", operation, cid);
                Err(MessagingError::ConnectionLost)
            }
            None => {
                warn!("'{}' request '{}' timed out", operation, cid);
                Err(MessagingError::Timeout)
            }
        }
    }

    /// Send a request and wait for its response, failing on an error response.
    pub async fn rpc(
        &self,
        operation: &str,
        thing_id: &str,
        name: &str,
        input: Value,
    ) -> Result<Value> {
        let req = RequestMessage::new(operation, thing_id, name, input);
        let resp = self
            .send_request(req, true)
            .await?
            .ok_or(MessagingError::Timeout)?;
        match resp.error {
            Some(err) => Err(MessagingError::Remote(err)),
            None => Ok(resp.value),
        }
    }

    /// [`Consumer::rpc`] decoding the response value.
    pub async fn rpc_as<T: DeserializeOwned>(
        &self,
        operation: &str,
        thing_id: &str,
        name: &str,
        input: Value,
    ) -> Result<T> {
        let value = self.rpc(operation, thing_id, name, input).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn invoke_action(&self, thing_id: &str, name: &str, input: Value) -> Result<Value> {
        self.rpc(op::INVOKE_ACTION, thing_id, name, input).await
    }

    pub async fn query_action(&self, thing_id: &str, name: &str) -> Result<ActionStatus> {
        self.rpc_as(op::QUERY_ACTION, thing_id, name, Value::Null)
            .await
    }

    /// Latest status of every action of the thing, keyed by action name.
    pub async fn query_all_actions(&self, thing_id: &str) -> Result<HashMap<String, ActionStatus>> {
        self.rpc_as(op::QUERY_ALL_ACTIONS, thing_id, "", Value::Null)
            .await
    }

    pub async fn read_property(&self, thing_id: &str, name: &str) -> Result<ThingValue> {
        self.rpc_as(op::READ_PROPERTY, thing_id, name, Value::Null)
            .await
    }

    pub async fn read_all_properties(&self, thing_id: &str) -> Result<ThingValueMap> {
        self.rpc_as(op::READ_ALL_PROPERTIES, thing_id, "", Value::Null)
            .await
    }

    pub async fn read_event(&self, thing_id: &str, name: &str) -> Result<ThingValue> {
        self.rpc_as(op::READ_EVENT, thing_id, name, Value::Null)
            .await
    }

    pub async fn read_all_events(&self, thing_id: &str) -> Result<ThingValueMap> {
        self.rpc_as(op::READ_ALL_EVENTS, thing_id, "", Value::Null)
            .await
    }

    /// Write a property and wait for the agent's acknowledgement.
    pub async fn write_property(&self, thing_id: &str, name: &str, value: Value) -> Result<Value> {
        self.rpc(op::WRITE_PROPERTY, thing_id, name, value).await
    }

    /// Subscribe to an event, or to all events of the thing if name is empty.
    pub async fn subscribe(&self, thing_id: &str, name: &str) -> Result<()> {
        let operation = if name.is_empty() {
            op::SUBSCRIBE_ALL_EVENTS
        } else {
            op::SUBSCRIBE_EVENT
        };
        self.rpc(operation, thing_id, name, Value::Null).await?;
        Ok(())
    }

    pub async fn unsubscribe(&self, thing_id: &str, name: &str) -> Result<()> {
        let operation = if name.is_empty() {
            op::UNSUBSCRIBE_ALL_EVENTS
        } else {
            op::UNSUBSCRIBE_EVENT
        };
        self.rpc(operation, thing_id, name, Value::Null).await?;
        Ok(())
    }

    /// Observe a property, or all properties of the thing if name is empty.
    pub async fn observe_property(&self, thing_id: &str, name: &str) -> Result<()> {
        let operation = if name.is_empty() {
            op::OBSERVE_ALL_PROPERTIES
        } else {
            op::OBSERVE_PROPERTY
        };
        self.rpc(operation, thing_id, name, Value::Null).await?;
        Ok(())
    }

    pub async fn unobserve_property(&self, thing_id: &str, name: &str) -> Result<()> {
        let operation = if name.is_empty() {
            op::UNOBSERVE_ALL_PROPERTIES
        } else {
            op::UNOBSERVE_PROPERTY
        };
        self.rpc(operation, thing_id, name, Value::Null).await?;
        Ok(())
    }

    pub async fn ping(&self) -> Result<Value> {
        self.rpc(op::PING, "", "", Value::Null).await
    }

    /// Read the digital-twin TD of a thing from the directory.
    pub async fn read_td(&self, thing_id: &str) -> Result<ThingDescription> {
        self.rpc_as(
            op::INVOKE_ACTION,
            directory::DTHING_ID,
            directory::ACTION_READ_TD,
            json!(thing_id),
        )
        .await
    }

    /// Read a page of digital-twin TDs from the directory.
    pub async fn read_all_tds(&self, limit: usize, offset: usize) -> Result<Vec<ThingDescription>> {
        self.rpc_as(
            op::INVOKE_ACTION,
            directory::DTHING_ID,
            directory::ACTION_READ_ALL_TDS,
            json!({"limit": limit, "offset": offset}),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::request_handler;
    use crate::embedded::EmbeddedConnection;
    use crate::envelope::AffordanceType;
    use crate::error::ErrorValue;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn echo_pair() -> (Consumer, Arc<EmbeddedConnection>) {
        let (client, server) = EmbeddedConnection::pair("c1", "s1");
        server.set_request_handler(request_handler(|req, _info| async move {
            match req.name.as_str() {
                "slow" => None,
                "fail" => Some(req.create_error_response(ErrorValue::not_found("no such thing"))),
                "prop" => {
                    let tv = ThingValue::new(
                        AffordanceType::Property,
                        req.thing_id.clone(),
                        "prop",
                        json!(20),
                        "2026-01-01T00:00:01.000Z",
                    );
                    Some(req.create_response(json!(tv), None))
                }
                _ => Some(req.create_response(req.input.clone(), None)),
            }
        }));
        let consumer = Consumer::new(client).with_rpc_timeout(Duration::from_millis(200));
        (consumer, server)
    }

    #[tokio::test]
    async fn test_invoke_action_round_trip() {
        let (consumer, _server) = echo_pair();
        let value = consumer
            .invoke_action("dtw:a1:thing1", "action1", json!("hello"))
            .await
            .unwrap();
        assert_eq!(value, json!("hello"));
        assert_eq!(consumer.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_response_carries_request_correlation_id() {
        let (consumer, _server) = echo_pair();
        let req =
            RequestMessage::new(op::INVOKE_ACTION, "t", "a", json!(1)).with_correlation_id("cid-7");
        let resp = consumer.send_request(req, true).await.unwrap().unwrap();
        assert_eq!(resp.correlation_id, "cid-7");
    }

    #[tokio::test]
    async fn test_error_response_is_terminal() {
        let (consumer, _server) = echo_pair();
        let err = consumer
            .invoke_action("t", "fail", Value::Null)
            .await
            .unwrap_err();
        match err {
            MessagingError::Remote(e) => assert_eq!(e.status, 404),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_property_decodes_thing_value() {
        let (consumer, _server) = echo_pair();
        let tv = consumer.read_property("dtw:a1:t", "prop").await.unwrap();
        assert_eq!(tv.data, json!(20));
        assert_eq!(tv.affordance_type, AffordanceType::Property);
    }

    #[tokio::test]
    async fn test_timeout_without_response() {
        let (consumer, _server) = echo_pair();
        let err = consumer
            .invoke_action("t", "slow", Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, MessagingError::Timeout));
        assert_eq!(consumer.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_releases_waiter() {
        let (consumer, _server) = echo_pair();
        let consumer = consumer.with_rpc_timeout(Duration::from_secs(10));
        let c2 = consumer.clone();
        let call = tokio::spawn(async move { c2.invoke_action("t", "slow", Value::Null).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(consumer.pending_requests(), 1);
        let started = std::time::Instant::now();
        consumer.disconnect();

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, MessagingError::ConnectionLost));
        assert!(started.elapsed() < Duration::from_millis(200));
        assert_eq!(consumer.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_send_fails_after_disconnect() {
        let (consumer, _server) = echo_pair();
        consumer.disconnect();
        let err = consumer.ping().await.unwrap_err();
        assert!(matches!(err, MessagingError::NotConnected));
        assert_eq!(consumer.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_ping_answered_by_peer() {
        let (consumer, _server) = echo_pair();
        assert_eq!(consumer.ping().await.unwrap(), json!("pong"));
    }

    #[tokio::test]
    async fn test_subscribe_handled_by_server_connection() {
        let (consumer, server) = echo_pair();
        consumer.subscribe("dtw:a1:t", "").await.unwrap();
        let subs = server.subscriptions().unwrap();
        assert!(subs.is_subscribed("dtw:a1:t", "temperature"));
        consumer.unsubscribe("dtw:a1:t", "").await.unwrap();
        assert!(!subs.is_subscribed("dtw:a1:t", "temperature"));
    }

    #[tokio::test]
    async fn test_notifications_reach_app_handler() {
        let (consumer, server) = echo_pair();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        consumer.set_notification_handler(notification_handler(move |_n, _| {
            let count = count2.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
            }
        }));
        server
            .send_notification(NotificationMessage::new(op::SUBSCRIBE_EVENT, "t", "e", json!(1)))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_async_request_response_goes_to_handler() {
        let (consumer, _server) = echo_pair();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        consumer.set_response_handler(response_handler(move |resp, _| {
            let count = count2.clone();
            async move {
                assert_eq!(resp.value, json!(5));
                count.fetch_add(1, Ordering::SeqCst);
            }
        }));
        let req = RequestMessage::new(op::INVOKE_ACTION, "t", "a", json!(5));
        assert!(consumer.send_request(req, false).await.unwrap().is_none());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slow_notification_handler_does_not_delay_responses() {
        let (consumer, server) = echo_pair();
        let release = Arc::new(tokio::sync::Notify::new());
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let (release2, seen2) = (release.clone(), seen.clone());
        consumer.set_notification_handler(notification_handler(move |n, _| {
            let (release, seen) = (release2.clone(), seen2.clone());
            async move {
                if n.name == "first" {
                    release.notified().await;
                }
                seen.lock().unwrap().push(n.name);
            }
        }));
        for name in ["first", "second"] {
            server
                .send_notification(NotificationMessage::new(op::SUBSCRIBE_EVENT, "t", name, json!(1)))
                .unwrap();
        }

        let value = consumer.invoke_action("t", "echo", json!(3)).await.unwrap();
        assert_eq!(value, json!(3));
        assert!(seen.lock().unwrap().is_empty());

        release.notify_one();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(*seen.lock().unwrap(), vec!["first".to_string(), "second".to_string()]);
    }
}
