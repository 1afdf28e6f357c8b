// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hiveot.net

//! HiveOT Hub Runtime
//!
//! Assembles the hub: configuration, authorization, the message router and
//! the background loops around the digital-twin store and the protocol
//! bindings.
//!
//! # Features
//!
//! - **Router** -- consumer requests to agents via digital twins, responses
//!   back, notifications fanned out to subscribers
//! - **Forwarding table** -- router-internal correlation IDs with deadlines
//! - **Authorization** -- role permissions plus TD `allow`/`deny` lists
//! - **Configuration** -- TOML file with environment overrides
//!
//! # Architecture
//!
//! ```text
//! HubRuntime
//! +-- TransportManager   (embedded, http+sse+wss, mqtt)
//! |   +-- TransportContext -> ServerHandlers
//! +-- Router
//! |   +-- Authorizer
//! |   +-- ForwardingTable  (rcid -> consumer request)
//! |   +-- Directory
//! +-- DigitwinStore      (write-behind to the bucket)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use hiveot_runtime::{authenticator_from_config, HubConfig, HubRuntime};
//!
//! let config = HubConfig::from_file("hub.toml")?;
//! let authn = authenticator_from_config(&config);
//! let hub = HubRuntime::start(config, authn).await?;
//! tokio::signal::ctrl_c().await?;
//! hub.stop().await;
//! ```

pub mod authz;
pub mod config;
pub mod forward;
pub mod router;
pub mod runtime;

pub use authz::Authorizer;
pub use config::{
    ClientConfig, ConfigError, HttpConfig, HubConfig, MqttConfig, StorageBackend, StorageConfig,
};
pub use forward::{ForwardEntry, ForwardingTable};
pub use router::Router;
pub use runtime::{authenticator_from_config, HubRuntime, RuntimeError};
