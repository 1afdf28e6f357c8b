// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hiveot.net

//! Connection abstraction.
//!
//! A [`Connection`] is one live session with one remote party. Every
//! protocol binding produces objects of this shape. Connections carry four
//! handler slots that the application fills in; inbound messages are decoded
//! once by the binding and handed to a [`Dispatcher`], which runs the handlers
//! on a worker task so a slow handler never stalls the wire reader.

use crate::envelope::{op, Envelope, NotificationMessage, RequestMessage, ResponseMessage};
use crate::error::{ErrorValue, MessagingError};
use crate::subscriptions::Subscriptions;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::json;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Protocol names reported in [`ConnectionInfo::protocol`].
pub mod protocol {
    pub const EMBEDDED: &str = "embedded";
    pub const HTTP: &str = "http";
    pub const SSE: &str = "sse";
    pub const WSS: &str = "wss";
    pub const MQTT: &str = "mqtt";
}

/// Identity of a connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Unique per session; a reconnect gets a new ID.
    pub connection_id: String,
    /// Authenticated client ID.
    pub client_id: String,
    /// Session ID issued by the authenticator.
    pub session_id: String,
    pub protocol: String,
    pub remote_addr: String,
}

impl ConnectionInfo {
    pub fn new(
        connection_id: impl Into<String>,
        client_id: impl Into<String>,
        protocol: &str,
    ) -> Self {
        Self {
            connection_id: connection_id.into(),
            client_id: client_id.into(),
            session_id: String::new(),
            protocol: protocol.to_string(),
            remote_addr: String::new(),
        }
    }

    /// Registry key: `clientID:connectionID`.
    pub fn key(&self) -> String {
        format!("{}:{}", self.client_id, self.connection_id)
    }
}

/// Handles an inbound request. Returning Some sends the response back on the
/// same connection; None means the response is sent later.
pub type RequestHandler = Arc<
    dyn Fn(RequestMessage, ConnectionInfo) -> BoxFuture<'static, Option<ResponseMessage>>
        + Send
        + Sync,
>;

/// Handles an inbound response.
pub type ResponseHandler =
    Arc<dyn Fn(ResponseMessage, ConnectionInfo) -> BoxFuture<'static, ()> + Send + Sync>;

/// Handles an inbound notification.
pub type NotificationHandler =
    Arc<dyn Fn(NotificationMessage, ConnectionInfo) -> BoxFuture<'static, ()> + Send + Sync>;

/// Called on connect and disconnect. The error is set when the transport was lost.
pub type ConnectHandler =
    Arc<dyn Fn(bool, Option<&MessagingError>, &ConnectionInfo) + Send + Sync>;

/// Box an async closure as a [`RequestHandler`].
pub fn request_handler<F, Fut>(f: F) -> RequestHandler
where
    F: Fn(RequestMessage, ConnectionInfo) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<ResponseMessage>> + Send + 'static,
{
    Arc::new(move |req, info| f(req, info).boxed())
}

/// Box an async closure as a [`ResponseHandler`].
pub fn response_handler<F, Fut>(f: F) -> ResponseHandler
where
    F: Fn(ResponseMessage, ConnectionInfo) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |resp, info| f(resp, info).boxed())
}

/// Box an async closure as a [`NotificationHandler`].
pub fn notification_handler<F, Fut>(f: F) -> NotificationHandler
where
    F: Fn(NotificationMessage, ConnectionInfo) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |notif, info| f(notif, info).boxed())
}

/// Box a closure as a [`ConnectHandler`].
pub fn connect_handler<F>(f: F) -> ConnectHandler
where
    F: Fn(bool, Option<&MessagingError>, &ConnectionInfo) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// The four application callback slots of a connection.
#[derive(Default)]
pub struct HandlerSlots {
    request: RwLock<Option<RequestHandler>>,
    response: RwLock<Option<ResponseHandler>>,
    notification: RwLock<Option<NotificationHandler>>,
    connect: RwLock<Option<ConnectHandler>>,
}

impl HandlerSlots {
    pub fn set_request_handler(&self, handler: RequestHandler) {
        *self.request.write().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    pub fn set_response_handler(&self, handler: ResponseHandler) {
        *self.response.write().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    pub fn set_notification_handler(&self, handler: NotificationHandler) {
        *self
            .notification
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    pub fn set_connect_handler(&self, handler: ConnectHandler) {
        *self.connect.write().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    pub fn request_handler(&self) -> Option<RequestHandler> {
        self.request
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn response_handler(&self) -> Option<ResponseHandler> {
        self.response
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn notification_handler(&self) -> Option<NotificationHandler> {
        self.notification
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn connect_handler(&self) -> Option<ConnectHandler> {
        self.connect
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Invoke the connect handler, if any.
    pub fn notify_connect(&self, connected: bool, err: Option<&MessagingError>, info: &ConnectionInfo) {
        if let Some(handler) = self.connect_handler() {
            handler(connected, err, info);
        }
    }
}

/// One live session with one remote party.
///
/// Sends are fire-and-forget at the connection level: they fail only if the
/// message cannot be handed to the transport. Waiting for a response is the
/// caller's job, see [`crate::RnrChannels`].
pub trait Connection: Send + Sync {
    fn info(&self) -> &ConnectionInfo;

    /// Transport liveness plus protocol-level "connected and authorized".
    fn is_connected(&self) -> bool;

    fn send_request(&self, req: RequestMessage) -> Result<(), MessagingError>;

    /// The response must carry the correlation ID of its request.
    fn send_response(&self, resp: ResponseMessage) -> Result<(), MessagingError>;

    /// Succeeds regardless of whether the remote side subscribed.
    fn send_notification(&self, notif: NotificationMessage) -> Result<(), MessagingError>;

    /// Close the connection. Subsequent sends fail.
    fn disconnect(&self);

    fn handlers(&self) -> &HandlerSlots;

    /// Subscription state of server-side connections.
    fn subscriptions(&self) -> Option<&Subscriptions> {
        None
    }

    fn set_request_handler(&self, handler: RequestHandler) {
        self.handlers().set_request_handler(handler);
    }

    fn set_response_handler(&self, handler: ResponseHandler) {
        self.handlers().set_response_handler(handler);
    }

    fn set_notification_handler(&self, handler: NotificationHandler) {
        self.handlers().set_notification_handler(handler);
    }

    fn set_connect_handler(&self, handler: ConnectHandler) {
        self.handlers().set_connect_handler(handler);
    }
}

/// Connected flag with a one-shot transition to disconnected.
#[derive(Debug)]
pub struct LinkState {
    connected: AtomicBool,
}

impl LinkState {
    pub fn new(connected: bool) -> Self {
        Self {
            connected: AtomicBool::new(connected),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn set_connected(&self) {
        self.connected.store(true, Ordering::Release);
    }

    /// Mark disconnected. Returns true only for the call that made the transition.
    pub fn mark_disconnected(&self) -> bool {
        self.connected.swap(false, Ordering::AcqRel)
    }
}

/// Sends a response back on the connection that received the request.
pub type ReplyFn = Arc<dyn Fn(ResponseMessage) -> Result<(), MessagingError> + Send + Sync>;

/// Per-connection dispatch options.
#[derive(Clone, Default)]
pub struct DispatchOptions {
    /// Server side: overwrite the sender ID of every inbound message with the
    /// authenticated client ID.
    pub stamp_sender: Option<String>,
    /// Server side: handle subscription operations locally.
    pub subscriptions: Option<Arc<Subscriptions>>,
}

/// Hands decoded inbound envelopes to the handler slots, in arrival order, on
/// a worker task owned by the connection.
pub struct Dispatcher {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl Dispatcher {
    /// Spawn the worker task. It ends when the dispatcher is dropped.
    pub fn spawn(
        info: ConnectionInfo,
        handlers: Arc<HandlerSlots>,
        reply: ReplyFn,
        options: DispatchOptions,
    ) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                dispatch_one(envelope, &info, &handlers, &reply, &options).await;
            }
            debug!("[{}] dispatcher stopped", info.connection_id);
        });
        Self { tx }
    }

    /// Queue an inbound envelope for handling.
    pub fn dispatch(&self, envelope: Envelope) -> Result<(), MessagingError> {
        self.tx
            .send(envelope)
            .map_err(|_| MessagingError::NotConnected)
    }
}

async fn dispatch_one(
    envelope: Envelope,
    info: &ConnectionInfo,
    handlers: &HandlerSlots,
    reply: &ReplyFn,
    options: &DispatchOptions,
) {
    match envelope {
        Envelope::Request(mut req) => {
            if let Some(sender) = &options.stamp_sender {
                req.sender_id = sender.clone();
            }
            let resp = if req.operation == op::PING {
                Some(req.create_response(json!("pong"), None))
            } else if op::is_subscribe(&req.operation) || op::is_unsubscribe(&req.operation) {
                match options.subscriptions.as_ref() {
                    Some(subs) => handle_subscription(subs, req, info, handlers).await,
                    None => Some(req.create_error_response(ErrorValue::bad_request(format!(
                        "'{}' is not supported on this connection",
                        req.operation
                    )))),
                }
            } else {
                match handlers.request_handler() {
                    Some(handler) => run_request_handler(handler, req, info.clone()).await,
                    None => {
                        warn!(
                            "[{}] no request handler for '{}'",
                            info.connection_id, req.operation
                        );
                        Some(req.create_error_response(ErrorValue::internal(
                            "no handler for requests",
                        )))
                    }
                }
            };
            if let Some(resp) = resp {
                if let Err(e) = reply(resp) {
                    warn!("[{}] failed to send response: {}", info.connection_id, e);
                }
            }
        }
        Envelope::Response(mut resp) => {
            if let Some(sender) = &options.stamp_sender {
                resp.sender_id = sender.clone();
            }
            match handlers.response_handler() {
                Some(handler) => {
                    if AssertUnwindSafe(handler(resp, info.clone()))
                        .catch_unwind()
                        .await
                        .is_err()
                    {
                        error!("[{}] response handler panicked", info.connection_id);
                    }
                }
                None => debug!(
                    "[{}] no response handler, response '{}' dropped",
                    info.connection_id, resp.correlation_id
                ),
            }
        }
        Envelope::Notification(mut notif) => {
            if let Some(sender) = &options.stamp_sender {
                notif.sender_id = sender.clone();
            }
            match handlers.notification_handler() {
                Some(handler) => {
                    if AssertUnwindSafe(handler(notif, info.clone()))
                        .catch_unwind()
                        .await
                        .is_err()
                    {
                        error!("[{}] notification handler panicked", info.connection_id);
                    }
                }
                None => debug!(
                    "[{}] no notification handler, '{}' dropped",
                    info.connection_id, notif.name
                ),
            }
        }
    }
}

/// Apply a subscription operation on a server-side connection.
///
/// Subscribe and observe requests are offered to the request handler first;
/// an error response refuses them. Unsubscribing is always accepted.
async fn handle_subscription(
    subs: &Subscriptions,
    req: RequestMessage,
    info: &ConnectionInfo,
    handlers: &HandlerSlots,
) -> Option<ResponseMessage> {
    if op::is_subscribe(&req.operation) {
        if let Some(handler) = handlers.request_handler() {
            let verdict = run_request_handler(handler, req.clone(), info.clone()).await;
            if let Some(resp) = verdict.filter(|r| r.error.is_some()) {
                debug!(
                    "[{}] '{}' of '{}' refused",
                    info.connection_id, req.operation, req.thing_id
                );
                return Some(resp);
            }
        }
    }
    subs.handle_request(&req)
}

/// Run a request handler, converting a panic into a 500 response.
pub async fn run_request_handler(
    handler: RequestHandler,
    req: RequestMessage,
    info: ConnectionInfo,
) -> Option<ResponseMessage> {
    let fallback = req.clone();
    match AssertUnwindSafe(handler(req, info.clone()))
        .catch_unwind()
        .await
    {
        Ok(resp) => resp,
        Err(_) => {
            error!(
                "[{}] request handler panicked on '{}'",
                info.connection_id, fallback.operation
            );
            Some(fallback.create_error_response(ErrorValue::internal("request handler failed")))
        }
    }
}
