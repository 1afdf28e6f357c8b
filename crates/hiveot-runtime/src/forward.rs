// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hiveot.net

//! Forwarding table
//!
//! Maps the router-internal correlation ID of every request forwarded to an
//! agent back to the consumer that sent it. Entries leave the table on the
//! agent's response, on deadline expiry or when either connection goes away.

use hiveot_messaging::RequestMessage;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

/// One outstanding forwarded request.
#[derive(Debug, Clone)]
pub struct ForwardEntry {
    /// Router-internal correlation ID.
    pub rcid: String,
    /// The consumer's request as received: digital-twin thing ID and the
    /// consumer's correlation ID.
    pub request: RequestMessage,
    /// Registry key of the consumer connection.
    pub consumer_key: String,
    pub agent_id: String,
    /// Registry key of the agent connection the request was sent on.
    pub agent_key: String,
    pub deadline: Instant,
}

/// Outstanding forwarded requests by internal correlation ID.
#[derive(Debug, Default)]
pub struct ForwardingTable {
    entries: Mutex<HashMap<String, ForwardEntry>>,
}

impl ForwardingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entry: ForwardEntry) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entry.rcid.clone(), entry);
    }

    /// Remove the entry of `rcid` if it was forwarded to `agent_id`.
    ///
    /// Entries of other agents stay in place.
    pub fn take(&self, rcid: &str, agent_id: &str) -> Option<ForwardEntry> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get(rcid) {
            Some(entry) if entry.agent_id == agent_id => entries.remove(rcid),
            _ => None,
        }
    }

    /// Copy of the entry of `rcid`.
    pub fn get(&self, rcid: &str) -> Option<ForwardEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(rcid)
            .cloned()
    }

    /// Remove and return the entries past their deadline.
    pub fn remove_expired(&self, now: Instant) -> Vec<ForwardEntry> {
        self.drain_where(|e| e.deadline <= now)
    }

    /// Remove and return the entries forwarded on an agent connection.
    pub fn remove_by_agent_key(&self, agent_key: &str) -> Vec<ForwardEntry> {
        self.drain_where(|e| e.agent_key == agent_key)
    }

    /// Remove and return the entries of a consumer connection.
    pub fn remove_by_consumer_key(&self, consumer_key: &str) -> Vec<ForwardEntry> {
        self.drain_where(|e| e.consumer_key == consumer_key)
    }

    /// Remove and return every entry.
    pub fn remove_all(&self) -> Vec<ForwardEntry> {
        self.drain_where(|_| true)
    }

    fn drain_where(&self, pred: impl Fn(&ForwardEntry) -> bool) -> Vec<ForwardEntry> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let keys: Vec<String> = entries
            .values()
            .filter(|e| pred(e))
            .map(|e| e.rcid.clone())
            .collect();
        keys.iter().filter_map(|k| entries.remove(k)).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
