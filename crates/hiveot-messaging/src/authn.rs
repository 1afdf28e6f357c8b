// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hiveot.net

//! Authentication surface consumed by the hub.
//!
//! The hub does not store credentials or sign tokens itself. Bindings call an
//! [`Authenticator`] at session establishment; the HTTP binding also exposes
//! login/refresh/logout as thin adapters over it.
//!
//! [`MemoryAuthenticator`] keeps a client table and opaque session tokens in
//! memory. It backs the standalone hub and the test suites.

use crate::error::MessagingError;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Role names understood by the hub's authorization rules.
pub mod roles {
    pub const VIEWER: &str = "viewer";
    pub const OPERATOR: &str = "operator";
    pub const MANAGER: &str = "manager";
    pub const ADMIN: &str = "admin";
    pub const AGENT: &str = "agent";
    pub const SERVICE: &str = "service";
}

/// Token based authentication.
pub trait Authenticator: Send + Sync {
    /// Verify a password and issue a token for a new session.
    fn login(&self, client_id: &str, password: &str) -> Result<String, MessagingError>;

    /// Validate a token, returning `(clientID, sessionID)`.
    fn validate_token(&self, token: &str) -> Result<(String, String), MessagingError>;

    /// Replace a valid token of the client with a new one for the same session.
    fn refresh_token(&self, client_id: &str, old_token: &str) -> Result<String, MessagingError>;

    /// Invalidate all tokens of the client.
    fn logout(&self, client_id: &str);

    /// Role of the client, as an opaque string.
    fn client_role(&self, client_id: &str) -> Option<String>;
}

#[derive(Debug, Clone)]
struct ClientEntry {
    password: String,
    role: String,
}

#[derive(Debug, Clone)]
struct TokenEntry {
    client_id: String,
    session_id: String,
}

/// In-memory client table with opaque uuid tokens.
#[derive(Debug, Default)]
pub struct MemoryAuthenticator {
    clients: RwLock<HashMap<String, ClientEntry>>,
    tokens: RwLock<HashMap<String, TokenEntry>>,
}

impl MemoryAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a client.
    pub fn add_client(&self, client_id: &str, password: &str, role: &str) {
        self.clients
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                client_id.to_string(),
                ClientEntry {
                    password: password.to_string(),
                    role: role.to_string(),
                },
            );
        info!("Client '{}' added with role '{}'", client_id, role);
    }

    /// Remove a client and its tokens.
    pub fn remove_client(&self, client_id: &str) {
        self.clients
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(client_id);
        self.logout(client_id);
    }

    /// Issue a token for a known client without checking a password.
    ///
    /// Used by services that are started by the hub itself.
    pub fn create_token(&self, client_id: &str) -> Result<String, MessagingError> {
        if !self
            .clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(client_id)
        {
            return Err(MessagingError::Unauthorized(format!(
                "unknown client '{}'",
                client_id
            )));
        }
        Ok(self.issue(client_id, &Uuid::new_v4().to_string()))
    }

    fn issue(&self, client_id: &str, session_id: &str) -> String {
        let token = Uuid::new_v4().to_string();
        self.tokens
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                token.clone(),
                TokenEntry {
                    client_id: client_id.to_string(),
                    session_id: session_id.to_string(),
                },
            );
        token
    }
}

impl Authenticator for MemoryAuthenticator {
    fn login(&self, client_id: &str, password: &str) -> Result<String, MessagingError> {
        let valid = self
            .clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(client_id)
            .is_some_and(|c| c.password == password);
        if !valid {
            warn!("Login failed for client '{}'", client_id);
            return Err(MessagingError::Unauthorized("invalid login".into()));
        }
        let token = self.issue(client_id, &Uuid::new_v4().to_string());
        debug!("Client '{}' logged in", client_id);
        Ok(token)
    }

    fn validate_token(&self, token: &str) -> Result<(String, String), MessagingError> {
        let tokens = self.tokens.read().unwrap_or_else(PoisonError::into_inner);
        tokens
            .get(token)
            .map(|t| (t.client_id.clone(), t.session_id.clone()))
            .ok_or_else(|| MessagingError::Unauthorized("invalid token".into()))
    }

    fn refresh_token(&self, client_id: &str, old_token: &str) -> Result<String, MessagingError> {
        let session_id = {
            let mut tokens = self.tokens.write().unwrap_or_else(PoisonError::into_inner);
            match tokens.get(old_token) {
                Some(entry) if entry.client_id == client_id => {
                    let session_id = entry.session_id.clone();
                    tokens.remove(old_token);
                    session_id
                }
                _ => {
                    return Err(MessagingError::Unauthorized(
                        "token does not belong to client".into(),
                    ))
                }
            }
        };
        Ok(self.issue(client_id, &session_id))
    }

    fn logout(&self, client_id: &str) {
        let mut tokens = self.tokens.write().unwrap_or_else(PoisonError::into_inner);
        tokens.retain(|_, t| t.client_id != client_id);
        debug!("Client '{}' logged out", client_id);
    }

    fn client_role(&self, client_id: &str) -> Option<String> {
        self.clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(client_id)
            .map(|c| c.role.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_and_validate() {
        let authn = MemoryAuthenticator::new();
        authn.add_client("c1", "secret", roles::OPERATOR);

        let token = authn.login("c1", "secret").unwrap();
        let (client_id, session_id) = authn.validate_token(&token).unwrap();
        assert_eq!(client_id, "c1");
        assert!(!session_id.is_empty());
        assert_eq!(authn.client_role("c1").as_deref(), Some(roles::OPERATOR));
    }

    #[test]
    fn test_bad_password() {
        let authn = MemoryAuthenticator::new();
        authn.add_client("c1", "secret", roles::VIEWER);
        assert!(authn.login("c1", "wrong").is_err());
        assert!(authn.login("nobody", "secret").is_err());
        assert!(authn.validate_token("garbage").is_err());
    }

    #[test]
    fn test_refresh_keeps_session() {
        let authn = MemoryAuthenticator::new();
        authn.add_client("c1", "secret", roles::VIEWER);
        let token = authn.login("c1", "secret").unwrap();
        let (_, session) = authn.validate_token(&token).unwrap();

        let token2 = authn.refresh_token("c1", &token).unwrap();
        assert!(authn.validate_token(&token).is_err());
        let (_, session2) = authn.validate_token(&token2).unwrap();
        assert_eq!(session, session2);

        assert!(authn.refresh_token("c2", &token2).is_err());
    }

    #[test]
    fn test_logout_invalidates_all_tokens() {
        let authn = MemoryAuthenticator::new();
        authn.add_client("c1", "secret", roles::VIEWER);
        let t1 = authn.login("c1", "secret").unwrap();
        let t2 = authn.login("c1", "secret").unwrap();
        authn.logout("c1");
        assert!(authn.validate_token(&t1).is_err());
        assert!(authn.validate_token(&t2).is_err());
    }
}
