// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hiveot.net

//! HTTP-basic client with an SSE return channel.

use super::{
    CONNECTION_ID_HEADER, LOGIN_PATH, NOTIFICATION_PATH, REQUEST_PATH, RESPONSE_PATH,
    SSE_PING_EVENT,
};
use crate::error::{Result, TransportError};
use crate::forms::SSE_PATH;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use hiveot_messaging::{
    decode_value, new_id, protocol, Connection, ConnectionInfo, DispatchOptions, Dispatcher,
    Envelope, ErrorValue, HandlerSlots, LinkState, MessagingError, NotificationMessage, ReplyFn,
    RequestMessage, ResponseMessage,
};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Client of the HTTP binding.
///
/// Requests are posted as envelopes and answered in the HTTP reply.
/// Requests addressed to this client and notifications arrive on the SSE
/// stream; responses and notifications it sends are posted in order by a
/// background worker.
pub struct HttpClientConnection {
    info: ConnectionInfo,
    handlers: Arc<HandlerSlots>,
    state: LinkState,
    base_url: String,
    token: String,
    http: reqwest::Client,
    dispatcher: Dispatcher,
    outbound: Mutex<Option<mpsc::UnboundedSender<Envelope>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    me: Weak<Self>,
}

impl HttpClientConnection {
    /// Obtain a token with a password, e.g. from `http://127.0.0.1:8444`.
    pub async fn login(base_url: &str, client_id: &str, password: &str) -> Result<String> {
        let resp = reqwest::Client::new()
            .post(format!("{}{}", base_url, LOGIN_PATH))
            .json(&json!({"login": client_id, "password": password}))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(TransportError::Unauthorized(format!(
                "login of '{}' failed with {}",
                client_id,
                resp.status()
            )));
        }
        Ok(resp.json::<String>().await?)
    }

    /// Open the SSE stream and return the connected client.
    pub async fn connect(base_url: &str, client_id: &str, token: &str) -> Result<Arc<Self>> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let connection_id = format!("HTTP-{}", &new_id()[..8]);
        let http = reqwest::Client::new();

        let resp = http
            .get(format!("{}{}", base_url, SSE_PATH))
            .bearer_auth(token)
            .header(CONNECTION_ID_HEADER, &connection_id)
            .send()
            .await?;
        match resp.status() {
            s if s.is_success() => {}
            StatusCode::UNAUTHORIZED => {
                return Err(TransportError::Unauthorized(format!(
                    "'{}' refused by {}",
                    client_id, base_url
                )))
            }
            other => {
                return Err(TransportError::Http(format!(
                    "SSE connect to {} failed with {}",
                    base_url, other
                )))
            }
        }

        let mut info = ConnectionInfo::new(connection_id.clone(), client_id, protocol::SSE);
        info.remote_addr = base_url.clone();
        let (tx, rx) = mpsc::unbounded_channel();

        let conn = Arc::new_cyclic(|me: &Weak<Self>| {
            let handlers = Arc::new(HandlerSlots::default());
            let weak = me.clone();
            let reply: ReplyFn = Arc::new(move |resp| match weak.upgrade() {
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
                base_url,
                token: token.to_string(),
                http,
                dispatcher,
                outbound: Mutex::new(Some(tx)),
                reader: Mutex::new(None),
                me: me.clone(),
            }
        });

        tokio::spawn(post_worker(Arc::downgrade(&conn), rx));

        let weak = Arc::downgrade(&conn);
        let mut events = resp.bytes_stream().eventsource();
        let reader = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let Some(conn) = weak.upgrade() else { return };
                match event {
                    Ok(event) if event.event == SSE_PING_EVENT => {
                        debug!("[{}] SSE stream ready", conn.info.connection_id);
                    }
                    Ok(event) => conn.handle_event(&event.data),
                    Err(e) => {
                        debug!("[{}] SSE stream failed: {}", conn.info.connection_id, e);
                        break;
                    }
                }
            }
            if let Some(conn) = weak.upgrade() {
                conn.close(Some(MessagingError::ConnectionLost));
            }
        });
        *conn.reader.lock().unwrap_or_else(PoisonError::into_inner) = Some(reader);

        info!(
            "[{}] connected to {} as '{}'",
            connection_id, conn.base_url, client_id
        );
        Ok(conn)
    }

    fn handle_event(&self, data: &str) {
        let decoded = serde_json::from_str::<Value>(data)
            .map_err(MessagingError::from)
            .and_then(decode_value);
        match decoded {
            Ok(envelope) => {
                let _ = self.dispatcher.dispatch(envelope);
            }
            Err(e) => warn!("[{}] invalid SSE message: {}", self.info.connection_id, e),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn queue(&self, envelope: Envelope) -> std::result::Result<(), MessagingError> {
        if !self.state.is_connected() {
            return Err(MessagingError::NotConnected);
        }
        let guard = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(tx) => tx
                .send(envelope)
                .map_err(|_| MessagingError::ConnectionLost),
            None => Err(MessagingError::NotConnected),
        }
    }

    async fn post_request(&self, req: &RequestMessage) -> Result<ResponseMessage> {
        let resp = self
            .http
            .post(self.url(REQUEST_PATH))
            .bearer_auth(&self.token)
            .header(CONNECTION_ID_HEADER, &self.info.connection_id)
            .json(req)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(TransportError::Http(format!(
                "request failed with {}",
                resp.status()
            )));
        }
        Ok(resp.json::<ResponseMessage>().await?)
    }

    async fn post_envelope(&self, envelope: &Envelope) -> Result<()> {
        let request = match envelope {
            Envelope::Response(resp) => self.http.post(self.url(RESPONSE_PATH)).json(resp),
            Envelope::Notification(notif) => {
                self.http.post(self.url(NOTIFICATION_PATH)).json(notif)
            }
            Envelope::Request(_) => {
                return Err(TransportError::Protocol("requests are posted directly".into()))
            }
        };
        let resp = request
            .bearer_auth(&self.token)
            .header(CONNECTION_ID_HEADER, &self.info.connection_id)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(TransportError::Http(format!(
                "{} post failed with {}",
                envelope.message_type(),
                resp.status()
            )));
        }
        Ok(())
    }

    fn close(&self, err: Option<MessagingError>) {
        if self.state.mark_disconnected() {
            self.outbound
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
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
            info!("[{}] HTTP connection closed", self.info.connection_id);
            self.handlers.notify_connect(false, err.as_ref(), &self.info);
        }
    }
}

/// Post queued responses and notifications one at a time.
async fn post_worker(conn: Weak<HttpClientConnection>, mut rx: mpsc::UnboundedReceiver<Envelope>) {
    while let Some(envelope) = rx.recv().await {
        let Some(conn) = conn.upgrade() else { break };
        if let Err(e) = conn.post_envelope(&envelope).await {
            warn!("[{}] {}", conn.info.connection_id, e);
        }
    }
}

impl Connection for HttpClientConnection {
    fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// Posts the request in the background; the response is dispatched to
    /// the response handler like any other.
    fn send_request(&self, req: RequestMessage) -> std::result::Result<(), MessagingError> {
        if !self.state.is_connected() {
            return Err(MessagingError::NotConnected);
        }
        let Some(conn) = self.me.upgrade() else {
            return Err(MessagingError::NotConnected);
        };
        tokio::spawn(async move {
            let resp = match conn.post_request(&req).await {
                Ok(resp) => resp,
                Err(e) => {
                    warn!(
                        "[{}] request '{}' failed: {}",
                        conn.info.connection_id, req.correlation_id, e
                    );
                    req.create_error_response(ErrorValue::from(&e))
                }
            };
            let _ = conn.dispatcher.dispatch(Envelope::Response(resp));
        });
        Ok(())
    }

    fn send_response(&self, resp: ResponseMessage) -> std::result::Result<(), MessagingError> {
        self.queue(Envelope::Response(resp))
    }

    fn send_notification(
        &self,
        notif: NotificationMessage,
    ) -> std::result::Result<(), MessagingError> {
        self.queue(Envelope::Notification(notif))
    }

    fn disconnect(&self) {
        self.close(None);
    }

    fn handlers(&self) -> &HandlerSlots {
        &self.handlers
    }
}
