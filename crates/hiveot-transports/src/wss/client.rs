// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hiveot.net

//! WebSocket client connection.

use crate::error::Result;
use crate::forms::WSS_SUBPROTOCOL;
use futures::{SinkExt, StreamExt};
use hiveot_messaging::{
    new_id, protocol, Connection, ConnectionInfo, DispatchOptions, Dispatcher, Envelope,
    HandlerSlots, JsonConverter, LinkState, MessageConverter, MessagingError,
    NotificationMessage, ReplyFn, RequestMessage, ResponseMessage,
};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Client end of a WebSocket session with the hub.
pub struct WssClientConnection {
    info: ConnectionInfo,
    handlers: Arc<HandlerSlots>,
    state: LinkState,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    dispatcher: Dispatcher,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl WssClientConnection {
    /// Connect to `ws://host:port/hiveot/wss` with a token.
    pub async fn connect(url: &str, client_id: &str, token: &str) -> Result<Arc<Self>> {
        let mut request = url.into_client_request()?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| crate::error::TransportError::Unauthorized(e.to_string()))?;
        request.headers_mut().insert("Authorization", bearer);
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static(WSS_SUBPROTOCOL),
        );
        let (ws, _) = tokio_tungstenite::connect_async(request).await?;
        let (mut ws_tx, mut ws_rx) = ws.split();

        let mut info = ConnectionInfo::new(
            format!("WSS-{}", &new_id()[..8]),
            client_id,
            protocol::WSS,
        );
        info.remote_addr = url.to_string();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

        let conn = Arc::new_cyclic(|me: &Weak<Self>| {
            let handlers = Arc::new(HandlerSlots::default());
            let me = me.clone();
            let reply: ReplyFn = Arc::new(move |resp| match me.upgrade() {
                Some(conn) => conn.send_response(resp),
                None => Err(MessagingError::NotConnected),
            });
            let dispatcher = Dispatcher::spawn(
                info.clone(),
                handlers.clone(),
                reply,
                DispatchOptions::default(),
            );
            Self {
                info,
                handlers,
                state: LinkState::new(true),
                outbound: Mutex::new(Some(tx)),
                dispatcher,
                reader: Mutex::new(None),
            }
        });

        let connection_id = conn.info.connection_id.clone();
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if ws_tx.send(msg).await.is_err() {
                    debug!("[{}] WebSocket send failed", connection_id);
                    break;
                }
            }
            let _ = ws_tx.close().await;
        });

        let weak = Arc::downgrade(&conn);
        let reader = tokio::spawn(async move {
            while let Some(msg) = ws_rx.next().await {
                let Some(conn) = weak.upgrade() else { return };
                match msg {
                    Ok(Message::Text(text)) => conn.handle_frame(text.as_bytes()),
                    Ok(Message::Binary(data)) => conn.handle_frame(&data),
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!("[{}] WebSocket read failed: {}", conn.info.connection_id, e);
                        break;
                    }
                }
            }
            if let Some(conn) = weak.upgrade() {
                conn.close(Some(MessagingError::ConnectionLost));
            }
        });
        *conn.reader.lock().unwrap_or_else(PoisonError::into_inner) = Some(reader);

        info!("[{}] WebSocket connected to {}", conn.info.connection_id, url);
        Ok(conn)
    }

    fn handle_frame(&self, raw: &[u8]) {
        match JsonConverter.decode_bytes(raw) {
            Ok(envelope) => {
                let _ = self.dispatcher.dispatch(envelope);
            }
            Err(e) => warn!("[{}] invalid frame: {}", self.info.connection_id, e),
        }
    }

    fn send_envelope(&self, envelope: &Envelope) -> std::result::Result<(), MessagingError> {
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
            if err.is_none() {
                if let Some(reader) = self
                    .reader
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take()
                {
                    reader.abort();
                }
            }
            info!("[{}] WebSocket connection closed", self.info.connection_id);
            self.handlers.notify_connect(false, err.as_ref(), &self.info);
        }
    }
}

impl Connection for WssClientConnection {
    fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    fn send_request(&self, req: RequestMessage) -> std::result::Result<(), MessagingError> {
        self.send_envelope(&Envelope::Request(req))
    }

    fn send_response(&self, resp: ResponseMessage) -> std::result::Result<(), MessagingError> {
        self.send_envelope(&Envelope::Response(resp))
    }

    fn send_notification(
        &self,
        notif: NotificationMessage,
    ) -> std::result::Result<(), MessagingError> {
        self.send_envelope(&Envelope::Notification(notif))
    }

    fn disconnect(&self) {
        self.close(None);
    }

    fn handlers(&self) -> &HandlerSlots {
        &self.handlers
    }
}
