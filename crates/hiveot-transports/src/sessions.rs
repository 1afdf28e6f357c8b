// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hiveot.net

//! Authenticated client sessions.
//!
//! A session is created when a client authenticates at a binding and lives
//! until logout or until it has been idle longer than the configured timeout.
//! One session can carry several connections.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// One authenticated session.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub client_id: String,
    pub remote_addr: String,
    pub created: Instant,
    pub last_activity: Instant,
}

impl Session {
    /// Check if the session has been idle longer than `idle_timeout`.
    pub fn is_expired(&self, idle_timeout: Duration) -> bool {
        self.last_activity.elapsed() > idle_timeout
    }
}

/// Session table owned by the runtime and shared by all bindings.
#[derive(Debug)]
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Session>>,
    idle_timeout: Duration,
}

impl SessionManager {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            idle_timeout,
        }
    }

    /// Create the session, or refresh it if it already exists.
    pub fn open_session(&self, client_id: &str, session_id: &str, remote_addr: &str) -> Session {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let session = sessions
            .entry(session_id.to_string())
            .and_modify(|s| s.last_activity = now)
            .or_insert_with(|| {
                debug!("session '{}' of '{}' opened", session_id, client_id);
                Session {
                    session_id: session_id.to_string(),
                    client_id: client_id.to_string(),
                    remote_addr: remote_addr.to_string(),
                    created: now,
                    last_activity: now,
                }
            });
        session.clone()
    }

    /// Record activity on a session. Returns false if the session is unknown.
    pub fn touch(&self, session_id: &str) -> bool {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        match sessions.get_mut(session_id) {
            Some(s) => {
                s.last_activity = Instant::now();
                true
            }
            None => false,
        }
    }

    pub fn get_session(&self, session_id: &str) -> Option<Session> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
    }

    pub fn sessions_of_client(&self, client_id: &str) -> Vec<Session> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|s| s.client_id == client_id)
            .cloned()
            .collect()
    }

    pub fn close_session(&self, session_id: &str) -> Option<Session> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id)
    }

    /// Remove all sessions of the client, returning how many were removed.
    pub fn close_client_sessions(&self, client_id: &str) -> usize {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let before = sessions.len();
        sessions.retain(|_, s| s.client_id != client_id);
        before - sessions.len()
    }

    /// Remove sessions idle longer than the timeout and return them.
    pub fn remove_expired(&self) -> Vec<Session> {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let expired: Vec<String> = sessions
            .values()
            .filter(|s| s.is_expired(self.idle_timeout))
            .map(|s| s.session_id.clone())
            .collect();
        let removed: Vec<Session> = expired
            .iter()
            .filter_map(|id| sessions.remove(id))
            .collect();
        if !removed.is_empty() {
            info!("expired {} idle sessions", removed.len());
        }
        removed
    }

    pub fn close_all(&self) {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn count(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600))
    }
}
