// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hiveot.net

//! Shared server context and the transport manager.
//!
//! Every binding authenticates through the [`TransportContext`] and registers
//! its server-side connections with it. Registration installs the hub's
//! handlers on the connection and hooks its disconnect into the registry, so
//! the bindings never talk to the router directly.

use crate::connections::ConnectionRegistry;
use crate::embedded::EmbeddedServer;
use crate::error::{Result, TransportError};
use crate::forms::HubForms;
use crate::httpbasic::HttpServer;
use crate::mqtt::MqttBroker;
use crate::sessions::SessionManager;
use hiveot_messaging::{
    connect_handler, Authenticator, ConnectHandler, Connection, NotificationHandler,
    RequestHandler, ResponseHandler, DEFAULT_RPC_TIMEOUT,
};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Handlers the hub installs on every server-side connection.
#[derive(Clone)]
pub struct ServerHandlers {
    pub request: RequestHandler,
    pub response: ResponseHandler,
    pub notification: NotificationHandler,
    /// Called after a connection is added and after it is removed.
    pub connect: Option<ConnectHandler>,
}

/// State shared by all bindings of one hub instance.
pub struct TransportContext {
    pub registry: Arc<ConnectionRegistry>,
    pub sessions: Arc<SessionManager>,
    authn: Arc<dyn Authenticator>,
    handlers: RwLock<Option<ServerHandlers>>,
    rpc_timeout: Duration,
}

impl TransportContext {
    pub fn new(authn: Arc<dyn Authenticator>, sessions: Arc<SessionManager>) -> Arc<Self> {
        Arc::new(Self {
            registry: Arc::new(ConnectionRegistry::new()),
            sessions,
            authn,
            handlers: RwLock::new(None),
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
        })
    }

    /// Same as [`new`](Self::new) with a custom wait limit for HTTP requests.
    pub fn with_rpc_timeout(
        authn: Arc<dyn Authenticator>,
        sessions: Arc<SessionManager>,
        rpc_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry: Arc::new(ConnectionRegistry::new()),
            sessions,
            authn,
            handlers: RwLock::new(None),
            rpc_timeout,
        })
    }

    /// Install the hub handlers. Applies to connections registered afterwards.
    pub fn set_handlers(&self, handlers: ServerHandlers) {
        *self.handlers.write().unwrap_or_else(PoisonError::into_inner) = Some(handlers);
    }

    fn handlers(&self) -> Option<ServerHandlers> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn authenticator(&self) -> &Arc<dyn Authenticator> {
        &self.authn
    }

    pub fn rpc_timeout(&self) -> Duration {
        self.rpc_timeout
    }

    /// Validate a token and open or touch its session.
    ///
    /// Returns `(clientID, sessionID)`.
    pub fn authenticate(&self, token: &str, remote_addr: &str) -> Result<(String, String)> {
        let (client_id, session_id) = self
            .authn
            .validate_token(token)
            .map_err(|e| TransportError::Unauthorized(e.to_string()))?;
        if !self.sessions.touch(&session_id) {
            self.sessions
                .open_session(&client_id, &session_id, remote_addr);
        }
        Ok((client_id, session_id))
    }

    /// Log the client out: invalidate its tokens, drop its sessions and close
    /// all of its connections.
    pub fn logout(&self, client_id: &str) {
        info!("logout of '{}'", client_id);
        self.authn.logout(client_id);
        self.sessions.close_client_sessions(client_id);
        self.registry.close_all_client_connections(client_id);
    }

    /// Install the hub handlers on a new server-side connection and add it
    /// to the registry.
    pub fn register_connection(self: &Arc<Self>, conn: Arc<dyn Connection>) {
        let handlers = self.handlers();
        let hub_connect = handlers.as_ref().and_then(|h| h.connect.clone());
        if let Some(h) = &handlers {
            conn.set_request_handler(h.request.clone());
            conn.set_response_handler(h.response.clone());
            conn.set_notification_handler(h.notification.clone());
        }

        let instance = self.registry.next_instance();
        let ctx: Weak<TransportContext> = Arc::downgrade(self);
        let on_close = hub_connect.clone();
        conn.set_connect_handler(connect_handler(move |connected, err, info| {
            if connected {
                return;
            }
            if let Some(ctx) = ctx.upgrade() {
                if !ctx.registry.remove_instance(&info.key(), instance) {
                    debug!("[{}] connection was already replaced", info.connection_id);
                }
            }
            if let Some(h) = &on_close {
                h(false, err, info);
            }
        }));

        let info = conn.info().clone();
        self.registry.add_connection_instance(conn, instance);
        if let Some(h) = hub_connect {
            h(true, None, &info);
        }
    }
}

/// Addresses of the network bindings. `None` disables a binding.
#[derive(Debug, Clone, Default)]
pub struct TransportConfig {
    /// HTTP-basic, SSE and WebSocket share this listener.
    pub http_addr: Option<String>,
    pub mqtt_tcp_addr: Option<String>,
    pub mqtt_ws_addr: Option<String>,
}

/// Owns the listeners of all enabled bindings.
///
/// Listeners are bound in [`bind`](Self::bind) so the actual addresses are
/// known before serving; this lets the forms be computed and tests bind to
/// port 0.
pub struct TransportManager {
    ctx: Arc<TransportContext>,
    http: Option<HttpServer>,
    mqtt: Option<MqttBroker>,
    embedded: EmbeddedServer,
    http_addr: Option<SocketAddr>,
    mqtt_tcp_addr: Option<SocketAddr>,
    mqtt_ws_addr: Option<SocketAddr>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TransportManager {
    pub async fn bind(config: &TransportConfig, ctx: Arc<TransportContext>) -> Result<Self> {
        let http = match &config.http_addr {
            Some(addr) => Some(HttpServer::bind(addr, ctx.clone()).await?),
            None => None,
        };
        let mqtt = match (&config.mqtt_tcp_addr, &config.mqtt_ws_addr) {
            (None, None) => None,
            (tcp, ws) => Some(MqttBroker::bind(tcp.as_deref(), ws.as_deref(), ctx.clone()).await?),
        };
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            http_addr: http.as_ref().map(HttpServer::local_addr),
            mqtt_tcp_addr: mqtt.as_ref().and_then(MqttBroker::tcp_addr),
            mqtt_ws_addr: mqtt.as_ref().and_then(MqttBroker::ws_addr),
            embedded: EmbeddedServer::new(ctx.clone()),
            ctx,
            http,
            mqtt,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn context(&self) -> &Arc<TransportContext> {
        &self.ctx
    }

    pub fn embedded(&self) -> &EmbeddedServer {
        &self.embedded
    }

    pub fn http_addr(&self) -> Option<SocketAddr> {
        self.http_addr
    }

    pub fn mqtt_tcp_addr(&self) -> Option<SocketAddr> {
        self.mqtt_tcp_addr
    }

    pub fn mqtt_ws_addr(&self) -> Option<SocketAddr> {
        self.mqtt_ws_addr
    }

    /// Forms describing how to reach digital twins through these bindings.
    pub fn forms(&self) -> HubForms {
        HubForms::new(
            self.http_addr.map(|a| a.to_string()),
            self.mqtt_tcp_addr.map(|a| a.to_string()),
            self.mqtt_ws_addr.map(|a| a.to_string()),
        )
    }

    /// Start serving on all bound listeners.
    pub fn start(&mut self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(http) = self.http.take() {
            info!("HTTP/SSE/WSS binding listening on {}", http.local_addr());
            tasks.push(http.serve(self.shutdown.subscribe()));
        }
        if let Some(mqtt) = self.mqtt.take() {
            tasks.extend(mqtt.serve(self.shutdown.subscribe()));
        }
    }

    /// Close all connections and stop the servers.
    pub async fn stop(&self) {
        self.ctx.registry.close_all();
        let _ = self.shutdown.send(true);
        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            let abort = task.abort_handle();
            if tokio::time::timeout(Duration::from_secs(3), task)
                .await
                .is_err()
            {
                warn!("server task did not stop in time, aborting");
                abort.abort();
            }
        }
        info!("transports stopped");
    }
}

/// Resolves once the shutdown flag is raised or its sender is gone.
pub(crate) async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            break;
        }
    }
}
