// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hiveot.net

//! Registry of live server-side connections.
//!
//! Connections are keyed by `clientID:connectionID`, with a secondary index
//! by client ID. The registry is read-mostly; it is written only on connect
//! and disconnect. Connections are never closed while the lock is held since
//! closing calls back into the registry.

use hiveot_messaging::Connection;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

struct Entry {
    conn: Arc<dyn Connection>,
    instance: u64,
}

#[derive(Default)]
struct Inner {
    /// `clientID:connectionID` -> connection
    by_key: HashMap<String, Entry>,
    /// clientID -> keys, in connect order
    by_client: HashMap<String, Vec<String>>,
}

impl Inner {
    fn remove(&mut self, key: &str) -> Option<Entry> {
        let entry = self.by_key.remove(key)?;
        let client_id = &entry.conn.info().client_id;
        if let Some(keys) = self.by_client.get_mut(client_id) {
            keys.retain(|k| k != key);
            if keys.is_empty() {
                self.by_client.remove(client_id);
            }
        }
        Some(entry)
    }
}

/// Live connections of all bindings.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: RwLock<Inner>,
    next_instance: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve an instance number for a connection about to be added.
    ///
    /// The instance distinguishes a connection from a later one that reuses
    /// its key, so a late disconnect of the old one cannot remove the new one.
    pub fn next_instance(&self) -> u64 {
        self.next_instance.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Add a connection. An existing connection with the same key is replaced
    /// and closed.
    pub fn add_connection(&self, conn: Arc<dyn Connection>) -> u64 {
        let instance = self.next_instance();
        self.add_connection_instance(conn, instance);
        instance
    }

    /// Add a connection under a reserved instance number.
    pub fn add_connection_instance(&self, conn: Arc<dyn Connection>, instance: u64) {
        let info = conn.info().clone();
        let key = info.key();
        let replaced = {
            let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            let replaced = inner.remove(&key);
            inner
                .by_client
                .entry(info.client_id.clone())
                .or_default()
                .push(key.clone());
            inner.by_key.insert(key.clone(), Entry { conn, instance });
            replaced
        };
        if let Some(old) = replaced {
            warn!(
                "[{}] duplicate connection of '{}', closing the old one",
                info.connection_id, info.client_id
            );
            old.conn.disconnect();
        }
        info!(
            "[{}] connection added: client='{}' protocol={}",
            info.connection_id, info.client_id, info.protocol
        );
    }

    /// Remove a connection by key without closing it.
    pub fn remove_connection(&self, key: &str) -> Option<Arc<dyn Connection>> {
        let entry = self
            .inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)?;
        debug!("connection '{}' removed", key);
        Some(entry.conn)
    }

    /// Remove a connection only if the key still maps to the given instance.
    pub fn remove_instance(&self, key: &str, instance: u64) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        match inner.by_key.get(key) {
            Some(entry) if entry.instance == instance => {
                inner.remove(key);
                debug!("connection '{}' removed", key);
                true
            }
            _ => false,
        }
    }

    /// Look up by `clientID:connectionID`.
    pub fn get_connection(&self, key: &str) -> Option<Arc<dyn Connection>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_key
            .get(key)
            .map(|e| e.conn.clone())
    }

    /// Look up by connection ID alone.
    pub fn get_connection_by_connection_id(
        &self,
        connection_id: &str,
    ) -> Option<Arc<dyn Connection>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_key
            .values()
            .find(|e| e.conn.info().connection_id == connection_id)
            .map(|e| e.conn.clone())
    }

    /// First live connection of the client. Agents normally have one.
    pub fn get_connection_by_client_id(&self, client_id: &str) -> Option<Arc<dyn Connection>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .by_client
            .get(client_id)?
            .iter()
            .filter_map(|key| inner.by_key.get(key))
            .map(|e| e.conn.clone())
            .find(|c| c.is_connected())
    }

    /// All connections of the client.
    pub fn client_connections(&self, client_id: &str) -> Vec<Arc<dyn Connection>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .by_client
            .get(client_id)
            .map(|keys| {
                keys.iter()
                    .filter_map(|key| inner.by_key.get(key))
                    .map(|e| e.conn.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Invoke `f` on a snapshot of all connections.
    pub fn for_each_connection<F: FnMut(&Arc<dyn Connection>)>(&self, mut f: F) {
        let snapshot: Vec<Arc<dyn Connection>> = {
            let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            inner.by_key.values().map(|e| e.conn.clone()).collect()
        };
        snapshot.iter().for_each(|c| f(c));
    }

    /// Close and remove every connection of the client.
    pub fn close_all_client_connections(&self, client_id: &str) {
        let removed: Vec<Entry> = {
            let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            let keys = inner.by_client.get(client_id).cloned().unwrap_or_default();
            keys.iter().filter_map(|k| inner.remove(k)).collect()
        };
        if !removed.is_empty() {
            info!("closing {} connections of '{}'", removed.len(), client_id);
        }
        removed.iter().for_each(|e| e.conn.disconnect());
    }

    /// Close and remove every connection.
    pub fn close_all(&self) {
        let removed: Vec<Entry> = {
            let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            inner.by_client.clear();
            inner.by_key.drain().map(|(_, e)| e).collect()
        };
        if !removed.is_empty() {
            info!("closing all {} connections", removed.len());
        }
        removed.iter().for_each(|e| e.conn.disconnect());
    }

    /// Number of connections and number of distinct clients.
    pub fn count(&self) -> (usize, usize) {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        (inner.by_key.len(), inner.by_client.len())
    }
}
