// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hiveot.net

//! WebSocket server sessions.

use super::reject_malformed;
use crate::forms::{WSS_PATH, WSS_SUBPROTOCOL};
use crate::httpbasic::bearer_token;
use crate::server::TransportContext;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use hiveot_messaging::{
    new_id, protocol, Connection, ConnectionInfo, DispatchOptions, Dispatcher, Envelope,
    HandlerSlots, JsonConverter, LinkState, MessageConverter, MessagingError,
    NotificationMessage, ReplyFn, RequestMessage, ResponseMessage, Subscriptions,
};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

/// Hub side of one WebSocket session.
pub struct WssConnection {
    info: ConnectionInfo,
    handlers: Arc<HandlerSlots>,
    state: LinkState,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    dispatcher: Dispatcher,
    subscriptions: Arc<Subscriptions>,
    closed: Notify,
}

impl WssConnection {
    fn new(info: ConnectionInfo, outbound: mpsc::UnboundedSender<Message>) -> Arc<Self> {
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
                outbound: Mutex::new(Some(outbound)),
                dispatcher,
                subscriptions,
                closed: Notify::new(),
            }
        })
    }

    fn send_envelope(&self, envelope: &Envelope) -> Result<(), MessagingError> {
        if !self.state.is_connected() {
            return Err(MessagingError::NotConnected);
        }
        let text = JsonConverter.encode(envelope)?;
        let guard = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(tx) => tx
                .send(Message::Text(text))
                .map_err(|_| MessagingError::ConnectionLost),
            None => Err(MessagingError::NotConnected),
        }
    }

    fn handle_frame(&self, raw: &[u8]) {
        match JsonConverter.decode_bytes(raw) {
            Ok(envelope) => {
                if let Err(e) = self.dispatcher.dispatch(envelope) {
                    warn!("[{}] dispatch failed: {}", self.info.connection_id, e);
                }
            }
            Err(e) => {
                warn!("[{}] invalid frame: {}", self.info.connection_id, e);
                if let Some(resp) = reject_malformed(raw, &e) {
                    let _ = self.send_response(resp);
                }
            }
        }
    }

    fn close(&self, err: Option<MessagingError>) {
        if self.state.mark_disconnected() {
            if let Some(tx) = self
                .outbound
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
            {
                let _ = tx.send(Message::Close(None));
            }
            self.closed.notify_one();
            info!(
                "[{}] WebSocket session of '{}' closed",
                self.info.connection_id, self.info.client_id
            );
            self.handlers.notify_connect(false, err.as_ref(), &self.info);
        }
    }
}

impl Connection for WssConnection {
    fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    fn send_request(&self, req: RequestMessage) -> Result<(), MessagingError> {
        self.send_envelope(&Envelope::Request(req))
    }

    fn send_response(&self, resp: ResponseMessage) -> Result<(), MessagingError> {
        self.send_envelope(&Envelope::Response(resp))
    }

    fn send_notification(&self, notif: NotificationMessage) -> Result<(), MessagingError> {
        self.send_envelope(&Envelope::Notification(notif))
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

/// Routes of the WebSocket binding.
pub fn router(ctx: Arc<TransportContext>) -> Router {
    Router::new()
        .route(WSS_PATH, get(wss_handler))
        .with_state(ctx)
}

async fn wss_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(ctx): State<Arc<TransportContext>>,
) -> Response {
    let Some(token) = bearer_token(&headers) else {
        return (StatusCode::UNAUTHORIZED, "missing bearer token").into_response();
    };
    let (client_id, session_id) = match ctx.authenticate(token, &addr.to_string()) {
        Ok(ids) => ids,
        Err(e) => {
            warn!("WebSocket connection from {} refused: {}", addr, e);
            return (StatusCode::UNAUTHORIZED, e.to_string()).into_response();
        }
    };
    let mut info = ConnectionInfo::new(
        format!("WSS-{}", &new_id()[..8]),
        client_id,
        protocol::WSS,
    );
    info.session_id = session_id;
    info.remote_addr = addr.to_string();
    ws.protocols([WSS_SUBPROTOCOL])
        .on_upgrade(move |socket| run_session(ctx, socket, info))
}

async fn run_session(ctx: Arc<TransportContext>, socket: WebSocket, info: ConnectionInfo) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let connection_id = info.connection_id.clone();
    let conn = WssConnection::new(info, tx);
    ctx.register_connection(conn.clone());

    let (mut ws_tx, mut ws_rx) = socket.split();
    let cid = connection_id.clone();
    let forward = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_tx.send(msg).await.is_err() {
                debug!("[{}] WebSocket send failed", cid);
                break;
            }
            if closing {
                break;
            }
        }
    });

    let err = loop {
        let msg = tokio::select! {
            _ = conn.closed.notified() => break None,
            msg = ws_rx.next() => msg,
        };
        match msg {
            Some(Ok(Message::Text(text))) => conn.handle_frame(text.as_bytes()),
            Some(Ok(Message::Binary(data))) => conn.handle_frame(&data),
            Some(Ok(Message::Close(_))) => {
                debug!("[{}] client closed the WebSocket", connection_id);
                break None;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!("[{}] WebSocket error: {}", connection_id, e);
                break Some(MessagingError::ConnectionLost);
            }
            None => break Some(MessagingError::ConnectionLost),
        }
    };
    conn.close(err);
    if tokio::time::timeout(Duration::from_secs(1), forward)
        .await
        .is_err()
    {
        debug!("[{}] WebSocket writer did not finish", connection_id);
    }
}
