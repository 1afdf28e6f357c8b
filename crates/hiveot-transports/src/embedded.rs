// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hiveot.net

//! In-process binding.
//!
//! Services running inside the hub process, and the test suites, connect
//! through linked [`EmbeddedConnection`] pairs. The server end is registered
//! like any network connection.

use crate::error::Result;
use crate::server::TransportContext;
use hiveot_messaging::{new_id, Connection, EmbeddedConnection};
use std::sync::Arc;

/// Hands out embedded connections to the hub.
#[derive(Clone)]
pub struct EmbeddedServer {
    ctx: Arc<TransportContext>,
}

impl EmbeddedServer {
    pub fn new(ctx: Arc<TransportContext>) -> Self {
        Self { ctx }
    }

    /// Connect a trusted in-process client without a token.
    pub fn connect(&self, client_id: &str) -> Arc<dyn Connection> {
        let session_id = new_id();
        self.ctx
            .sessions
            .open_session(client_id, &session_id, "embedded");
        self.open(client_id, &session_id)
    }

    /// Connect with a token issued by the authenticator.
    pub fn connect_with_token(&self, token: &str) -> Result<Arc<dyn Connection>> {
        let (client_id, session_id) = self.ctx.authenticate(token, "embedded")?;
        Ok(self.open(&client_id, &session_id))
    }

    fn open(&self, client_id: &str, session_id: &str) -> Arc<dyn Connection> {
        let (client, server) = EmbeddedConnection::pair(client_id, session_id);
        self.ctx.register_connection(server);
        client
    }
}
