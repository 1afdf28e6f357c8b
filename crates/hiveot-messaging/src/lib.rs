// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hiveot.net

//! HiveOT Messaging
//!
//! Message model and client-side plumbing shared by the hub and its clients.
//!
//! # Features
//!
//! - **Envelopes** -- Request, Response and Notification with correlation IDs
//! - **RnR channels** -- single-slot correlation registry for synchronous RPC
//! - **Connections** -- one trait for every protocol binding, with handler slots
//!   and an ordered dispatcher
//! - **Consumer / Agent** -- RPC helpers and publishing helpers on top of a connection
//! - **Thing Descriptions** -- WoT TD model, digital-twin IDs, dataschema checks
//!
//! # Architecture
//!
//! ```text
//! Consumer / Agent
//! +-- RnrChannels        (correlation ID -> response slot)
//! +-- dyn Connection     (embedded, http+sse, wss, mqtt)
//!     +-- HandlerSlots   (request, response, notification, connect)
//!     +-- Dispatcher     (ordered handler worker)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use hiveot_messaging::{Consumer, EmbeddedConnection};
//! use serde_json::json;
//!
//! let (client, _server) = EmbeddedConnection::pair("consumer1", "session1");
//! let consumer = Consumer::new(client);
//! let output = consumer
//!     .invoke_action("dtw:agent1:thing1", "action1", json!("hello"))
//!     .await?;
//! ```

pub mod agent;
pub mod authn;
pub mod connection;
pub mod consumer;
pub mod converter;
pub mod embedded;
pub mod envelope;
pub mod error;
pub mod rnr;
pub mod subscriptions;
pub mod td;

pub use agent::Agent;
pub use authn::{roles, Authenticator, MemoryAuthenticator};
pub use connection::{
    connect_handler, notification_handler, protocol, request_handler, response_handler,
    run_request_handler, ConnectHandler, Connection, ConnectionInfo, DispatchOptions, Dispatcher,
    HandlerSlots, LinkState, NotificationHandler, ReplyFn, RequestHandler, ResponseHandler,
};
pub use consumer::{Consumer, DEFAULT_RPC_TIMEOUT};
pub use converter::{decode_value, JsonConverter, MessageConverter};
pub use embedded::EmbeddedConnection;
pub use envelope::{
    new_id, now_timestamp, op, parse_timestamp, ActionProgress, ActionStatus, AffordanceType,
    Envelope, NotificationMessage, RequestMessage, ResponseMessage, ThingValue, ThingValueMap,
    MSG_TYPE_NOTIFICATION, MSG_TYPE_REQUEST, MSG_TYPE_RESPONSE,
};
pub use error::{ErrorValue, MessagingError, Result};
pub use rnr::{RnrChannels, RnrReceiver};
pub use subscriptions::Subscriptions;
pub use td::{
    directory, is_digitwin_id, make_digitwin_id, split_digitwin_id, ActionAffordance, DataSchema,
    EventAffordance, Form, FormProvider, NoForms, PropertyAffordance, ThingDescription,
};
