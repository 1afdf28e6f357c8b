// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hiveot.net

//! Hub runtime assembly.
//!
//! [`HubRuntime::start`] opens the digital-twin store, binds the protocol
//! bindings, installs the router and starts the background loops:
//!
//! | Loop | Interval | Work |
//! |---|---|---|
//! | gc | `gc_interval_secs` | fail forwarded requests past their deadline |
//! | save | `save_interval_secs` | write changed digital twins to the bucket |
//! | sessions | `gc_interval_secs` | close connections of idle sessions |

use crate::config::{ConfigError, HubConfig, StorageBackend};
use crate::router::Router;
use hiveot_digitwin::{
    Bucket, DigitwinStore, Directory, MemoryBucket, SqliteBucket, StoreError, DIGITWIN_BUCKET,
};
use hiveot_messaging::{Authenticator, Connection, MemoryAuthenticator};
use hiveot_transports::{
    EmbeddedServer, SessionManager, TransportContext, TransportError, TransportManager,
};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Runtime errors.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Build the built-in authenticator from the configured client table.
pub fn authenticator_from_config(config: &HubConfig) -> Arc<MemoryAuthenticator> {
    let authn = Arc::new(MemoryAuthenticator::new());
    for client in &config.clients {
        authn.add_client(&client.id, &client.password, &client.role);
    }
    authn
}

/// A running hub.
pub struct HubRuntime {
    config: HubConfig,
    router: Arc<Router>,
    store: Arc<DigitwinStore>,
    transports: TransportManager,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl HubRuntime {
    /// Start a hub with the given configuration and authenticator.
    pub async fn start(
        config: HubConfig,
        authn: Arc<dyn Authenticator>,
    ) -> Result<Self, RuntimeError> {
        config.validate()?;

        let bucket = open_bucket(&config)?;
        let store = Arc::new(DigitwinStore::open(bucket)?);
        info!("digital-twin store loaded with {} things", store.count());

        let sessions = Arc::new(SessionManager::new(config.session_idle_timeout()));
        let ctx = TransportContext::with_rpc_timeout(authn.clone(), sessions, config.rpc_timeout());
        let mut transports = TransportManager::bind(&config.transport_config(), ctx.clone()).await?;

        let directory = Directory::new(store.clone(), Arc::new(transports.forms()));
        let router = Arc::new(
            Router::new(directory, ctx.registry.clone(), authn, config.rpc_timeout())
                .with_strict(config.strict),
        );
        ctx.set_handlers(router.handlers());
        transports.start();

        let (shutdown, _) = watch::channel(false);
        let runtime = Self {
            config,
            router,
            store,
            transports,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        };
        runtime.spawn_loops();

        info!(
            "hub started: http={} mqtt={} mqtt-ws={}",
            fmt_addr(runtime.http_addr()),
            fmt_addr(runtime.mqtt_tcp_addr()),
            fmt_addr(runtime.mqtt_ws_addr())
        );
        Ok(runtime)
    }

    fn spawn_loops(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);

        let router = self.router.clone();
        tasks.push(spawn_every(
            self.config.gc_interval(),
            self.shutdown.subscribe(),
            move || {
                let expired = router.gc();
                if expired > 0 {
                    debug!("gc: {} forwarded requests expired", expired);
                }
            },
        ));

        let store = self.store.clone();
        tasks.push(spawn_every(
            self.config.save_interval(),
            self.shutdown.subscribe(),
            move || match store.save_changes() {
                Ok(0) => {}
                Ok(n) => debug!("saved {} digital twins", n),
                Err(e) => error!("failed to save digital twins: {}", e),
            },
        ));

        let ctx = self.transports.context().clone();
        tasks.push(spawn_every(
            self.config.gc_interval(),
            self.shutdown.subscribe(),
            move || {
                for session in ctx.sessions.remove_expired() {
                    info!(
                        "session '{}' of '{}' expired",
                        session.session_id, session.client_id
                    );
                    for conn in ctx.registry.client_connections(&session.client_id) {
                        if conn.info().session_id == session.session_id {
                            conn.disconnect();
                        }
                    }
                }
            },
        ));
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn store(&self) -> &Arc<DigitwinStore> {
        &self.store
    }

    pub fn context(&self) -> &Arc<TransportContext> {
        self.transports.context()
    }

    pub fn embedded(&self) -> &EmbeddedServer {
        self.transports.embedded()
    }

    /// Connect an in-process client.
    pub fn connect_embedded(&self, client_id: &str) -> Arc<dyn Connection> {
        self.transports.embedded().connect(client_id)
    }

    pub fn http_addr(&self) -> Option<SocketAddr> {
        self.transports.http_addr()
    }

    pub fn mqtt_tcp_addr(&self) -> Option<SocketAddr> {
        self.transports.mqtt_tcp_addr()
    }

    pub fn mqtt_ws_addr(&self) -> Option<SocketAddr> {
        self.transports.mqtt_ws_addr()
    }

    /// Stop the hub: fail outstanding requests, stop the loops, close all
    /// connections and save changed digital twins.
    pub async fn stop(&self) {
        info!("stopping hub");
        self.router.release_all();
        let _ = self.shutdown.send(true);
        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("background task ended abnormally: {}", e);
            }
        }
        self.transports.stop().await;
        match self.store.save_changes() {
            Ok(n) => info!("hub stopped, {} digital twins saved", n),
            Err(e) => error!("failed to save digital twins on stop: {}", e),
        }
    }
}

fn open_bucket(config: &HubConfig) -> Result<Arc<dyn Bucket>, RuntimeError> {
    match config.storage.backend {
        StorageBackend::Memory => {
            info!("using in-memory storage");
            Ok(Arc::new(MemoryBucket::new(DIGITWIN_BUCKET)))
        }
        StorageBackend::Sqlite => {
            let path = config.storage_path();
            std::fs::create_dir_all(&config.home)?;
            info!("using sqlite storage at {}", path.display());
            let bucket = SqliteBucket::open(&path, DIGITWIN_BUCKET).map_err(StoreError::Bucket)?;
            Ok(Arc::new(bucket))
        }
    }
}

/// Run `work` every `period` until shutdown.
fn spawn_every<F>(period: Duration, mut shutdown: watch::Receiver<bool>, work: F) -> JoinHandle<()>
where
    F: Fn() + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => work(),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

fn fmt_addr(addr: Option<SocketAddr>) -> String {
    addr.map_or_else(|| "off".to_string(), |a| a.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use hiveot_messaging::roles;

    #[test]
    fn test_authenticator_from_config() {
        let mut config = HubConfig::for_testing();
        config.clients.push(ClientConfig {
            id: "user1".into(),
            password: "pass1".into(),
            role: roles::OPERATOR.into(),
        });
        let authn = authenticator_from_config(&config);
        assert_eq!(authn.client_role("user1").as_deref(), Some(roles::OPERATOR));
        assert!(authn.login("user1", "pass1").is_ok());
        assert!(authn.login("user1", "wrong").is_err());
    }

    #[tokio::test]
    async fn test_start_and_stop_with_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = HubConfig::for_testing();
        config.home = dir.path().join("home");
        config.storage.backend = StorageBackend::Sqlite;
        config.mqtt.enabled = false;

        let runtime = HubRuntime::start(config, Arc::new(MemoryAuthenticator::new()))
            .await
            .unwrap();
        assert!(runtime.http_addr().is_some());
        assert!(runtime.mqtt_tcp_addr().is_none());
        runtime.stop().await;
        assert!(dir.path().join("home").join("digitwin.db").exists());
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut config = HubConfig::for_testing();
        config.rpc_timeout_secs = 0;
        let result = HubRuntime::start(config, Arc::new(MemoryAuthenticator::new())).await;
        assert!(matches!(result, Err(RuntimeError::Config(_))));
    }
}
