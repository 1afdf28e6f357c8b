// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hiveot.net

//! SSE return channel of the HTTP binding.
//!
//! One [`SseConnection`] per open stream. Inbound messages arrive as HTTP
//! posts and are injected into the connection's dispatcher; outbound messages
//! are written to the stream, except responses that an HTTP call is waiting
//! for, which are handed to that call instead.

use super::SSE_PING_EVENT;
use axum::response::sse::Event;
use dashmap::DashMap;
use futures::stream::{self, Stream, StreamExt};
use hiveot_messaging::{
    Connection, ConnectionInfo, DispatchOptions, Dispatcher, Envelope, HandlerSlots,
    JsonConverter, LinkState, MessageConverter, MessagingError, NotificationMessage, ReplyFn,
    RequestMessage, ResponseMessage, Subscriptions,
};
use std::convert::Infallible;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Open SSE connections by registry key.
pub(crate) type SseStreams = Arc<DashMap<String, Arc<SseConnection>>>;

/// Hub side of an SSE session.
pub struct SseConnection {
    info: ConnectionInfo,
    handlers: Arc<HandlerSlots>,
    state: LinkState,
    tx: Mutex<Option<mpsc::UnboundedSender<Envelope>>>,
    dispatcher: Dispatcher,
    subscriptions: Arc<Subscriptions>,
    waiters: DashMap<String, oneshot::Sender<ResponseMessage>>,
}

impl SseConnection {
    pub(crate) fn new(info: ConnectionInfo, tx: mpsc::UnboundedSender<Envelope>) -> Arc<Self> {
        Arc::new_cyclic(|me: &Weak<Self>| {
            let handlers = Arc::new(HandlerSlots::default());
            let subscriptions = Arc::new(Subscriptions::new());
            let me = me.clone();
            let reply: ReplyFn = Arc::new(move |resp| match me.upgrade() {
                Some(conn) => conn.send_response(resp),
                None => Err(MessagingError::NotConnected),
            });
            let dispatcher = Dispatcher::spawn(
                info.clone(),
                handlers.clone(),
                reply,
                DispatchOptions {
                    stamp_sender: Some(info.client_id.clone()),
                    subscriptions: Some(subscriptions.clone()),
                },
            );
            Self {
                info,
                handlers,
                state: LinkState::new(true),
                tx: Mutex::new(Some(tx)),
                dispatcher,
                subscriptions,
                waiters: DashMap::new(),
            }
        })
    }

    /// Hand a message received over HTTP to the hub.
    pub(crate) fn inject(&self, envelope: Envelope) -> Result<(), MessagingError> {
        if !self.state.is_connected() {
            return Err(MessagingError::NotConnected);
        }
        self.dispatcher.dispatch(envelope)
    }

    /// Route the response of `correlation_id` to the returned receiver
    /// instead of the stream.
    pub(crate) fn open_waiter(
        &self,
        correlation_id: &str,
    ) -> Result<oneshot::Receiver<ResponseMessage>, MessagingError> {
        if self.waiters.contains_key(correlation_id) {
            return Err(MessagingError::DuplicateCorrelation(
                correlation_id.to_string(),
            ));
        }
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(correlation_id.to_string(), tx);
        Ok(rx)
    }

    /// Stop waiting; a late response goes to the stream.
    pub(crate) fn cancel_waiter(&self, correlation_id: &str) {
        self.waiters.remove(correlation_id);
    }

    fn push(&self, envelope: Envelope) -> Result<(), MessagingError> {
        if !self.state.is_connected() {
            return Err(MessagingError::NotConnected);
        }
        let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(tx) => tx
                .send(envelope)
                .map_err(|_| MessagingError::ConnectionLost),
            None => Err(MessagingError::NotConnected),
        }
    }

    pub(crate) fn close(&self, err: Option<MessagingError>) {
        if self.state.mark_disconnected() {
            self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
            self.waiters.clear();
            info!(
                "[{}] SSE session of '{}' closed",
                self.info.connection_id, self.info.client_id
            );
            self.handlers.notify_connect(false, err.as_ref(), &self.info);
        }
    }
}

impl Connection for SseConnection {
    fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    fn send_request(&self, req: RequestMessage) -> Result<(), MessagingError> {
        self.push(Envelope::Request(req))
    }

    fn send_response(&self, resp: ResponseMessage) -> Result<(), MessagingError> {
        if let Some((_, waiter)) = self.waiters.remove(&resp.correlation_id) {
            return match waiter.send(resp) {
                Ok(()) => Ok(()),
                Err(resp) => self.push(Envelope::Response(resp)),
            };
        }
        self.push(Envelope::Response(resp))
    }

    fn send_notification(&self, notif: NotificationMessage) -> Result<(), MessagingError> {
        self.push(Envelope::Notification(notif))
    }

    fn disconnect(&self) {
        self.close(None);
    }

    fn handlers(&self) -> &HandlerSlots {
        &self.handlers
    }

    fn subscriptions(&self) -> Option<&Subscriptions> {
        Some(&self.subscriptions)
    }
}

/// Frame an envelope as an SSE event named after its message type.
pub(crate) fn envelope_event(envelope: &Envelope) -> Result<Event, MessagingError> {
    let message_id = match envelope {
        Envelope::Request(req) => &req.message_id,
        Envelope::Response(resp) => &resp.message_id,
        Envelope::Notification(notif) => &notif.message_id,
    };
    let data = JsonConverter.encode(envelope)?;
    Ok(Event::default()
        .event(envelope.message_type())
        .id(message_id.as_str())
        .data(data))
}

struct StreamState {
    conn: Arc<SseConnection>,
    rx: mpsc::UnboundedReceiver<Envelope>,
    streams: SseStreams,
}

impl Drop for StreamState {
    fn drop(&mut self) {
        let key = self.conn.info.key();
        self.streams
            .remove_if(&key, |_, open| Arc::ptr_eq(open, &self.conn));
        debug!("[{}] SSE stream ended", self.conn.info.connection_id);
        self.conn.close(Some(MessagingError::ConnectionLost));
    }
}

/// Event stream of a connection. Dropping the stream closes the connection.
pub(crate) fn event_stream(
    conn: Arc<SseConnection>,
    rx: mpsc::UnboundedReceiver<Envelope>,
    streams: SseStreams,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let hello = Event::default()
        .event(SSE_PING_EVENT)
        .data(conn.info.connection_id.clone());
    let state = StreamState { conn, rx, streams };
    let messages = stream::unfold(state, |mut state| async move {
        loop {
            let envelope = state.rx.recv().await?;
            match envelope_event(&envelope) {
                Ok(event) => return Some((Ok(event), state)),
                Err(e) => warn!(
                    "[{}] SSE message dropped: {}",
                    state.conn.info.connection_id, e
                ),
            }
        }
    });
    stream::once(async move { Ok(hello) }).chain(messages)
}
