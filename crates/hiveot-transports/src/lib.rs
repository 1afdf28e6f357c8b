// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hiveot.net

//! HiveOT Transports
//!
//! Protocol bindings of the hub: servers that terminate client sessions and
//! the matching client connections.
//!
//! # Bindings
//!
//! - **HTTP-basic + SSE** -- WoT operations as HTTP calls, SSE return channel
//! - **WebSocket** -- one JSON envelope per frame
//! - **MQTT 5** -- embedded broker over TCP and WebSocket
//! - **Embedded** -- in-process connection pairs
//!
//! # Architecture
//!
//! ```text
//! TransportManager
//! +-- HttpServer          (/things, /authn, /hiveot/sse, /hiveot/wss)
//! +-- MqttBroker          (tcp, ws /mqtt)
//! +-- EmbeddedServer
//! +-- TransportContext
//!     +-- Authenticator
//!     +-- SessionManager
//!     +-- ConnectionRegistry  (clientID:connectionID -> dyn Connection)
//!     +-- ServerHandlers      (installed on every new connection)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use hiveot_transports::{TransportConfig, TransportContext, TransportManager, SessionManager};
//!
//! let ctx = TransportContext::new(authn, Arc::new(SessionManager::default()));
//! ctx.set_handlers(handlers);
//! let config = TransportConfig {
//!     http_addr: Some("0.0.0.0:8444".into()),
//!     ..Default::default()
//! };
//! let mut transports = TransportManager::bind(&config, ctx).await?;
//! transports.start();
//! ```

pub mod connections;
pub mod embedded;
pub mod error;
pub mod forms;
pub mod httpbasic;
pub mod mqtt;
pub mod server;
pub mod sessions;
pub mod wss;

pub use connections::ConnectionRegistry;
pub use embedded::EmbeddedServer;
pub use error::{Result, TransportError};
pub use forms::HubForms;
pub use httpbasic::{HttpClientConnection, HttpServer};
pub use mqtt::{MqttBroker, MqttClientConnection};
pub use server::{ServerHandlers, TransportConfig, TransportContext, TransportManager};
pub use sessions::{Session, SessionManager};
pub use wss::WssClientConnection;
