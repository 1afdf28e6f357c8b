// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hiveot.net

//! Digital-twin store
//!
//! One [`DigitwinThing`] record per Thing, keyed by its digital-twin ID.
//! The in-memory cache is authoritative while the hub runs; changed records
//! are marked dirty and written to the bucket by [`DigitwinStore::save_changes`].

use crate::bucket::Bucket;
use crate::derive::derive_digitwin_td;
use crate::error::{Result, StoreError};
use hiveot_messaging::{
    directory, ActionStatus, AffordanceType, FormProvider, ThingDescription, ThingValue,
    ThingValueMap,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Bucket holding the digital-twin records.
pub const DIGITWIN_BUCKET: &str = "digitwin";

/// Persisted state of one Thing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DigitwinThing {
    #[serde(rename = "agentID")]
    pub agent_id: String,

    #[serde(rename = "nativeThingID")]
    pub native_thing_id: String,

    /// TD as published by the agent
    #[serde(rename = "agentTD")]
    pub agent_td: ThingDescription,

    /// TD as presented to consumers
    #[serde(rename = "digitwinTD")]
    pub digitwin_td: ThingDescription,

    #[serde(rename = "propValues", default)]
    pub prop_values: ThingValueMap,

    #[serde(rename = "eventValues", default)]
    pub event_values: ThingValueMap,

    #[serde(rename = "actionStatuses", default)]
    pub action_statuses: HashMap<String, ActionStatus>,
}

impl DigitwinThing {
    pub fn new(agent_id: &str, agent_td: ThingDescription, digitwin_td: ThingDescription) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            native_thing_id: agent_td.id.clone(),
            agent_td,
            digitwin_td,
            ..Default::default()
        }
    }
}

/// Cache, dirty set and bucket of the digital twins.
pub struct DigitwinStore {
    bucket: Arc<dyn Bucket>,
    /// Ordered by digital-twin ID so paging is stable.
    cache: RwLock<BTreeMap<String, DigitwinThing>>,
    dirty: Mutex<HashSet<String>>,
    /// Held while records are written to or deleted from the bucket.
    persist: Mutex<()>,
}

impl DigitwinStore {
    /// Create a store with an empty cache.
    pub fn new(bucket: Arc<dyn Bucket>) -> Self {
        Self {
            bucket,
            cache: RwLock::new(BTreeMap::new()),
            dirty: Mutex::new(HashSet::new()),
            persist: Mutex::new(()),
        }
    }

    /// Create a store and load every record of the bucket.
    pub fn open(bucket: Arc<dyn Bucket>) -> Result<Self> {
        let store = Self::new(bucket);
        store.load_cache_from_store()?;
        Ok(store)
    }

    /// Save pending changes, then replace the cache with the bucket content.
    ///
    /// Records that fail to parse are skipped. Returns the number loaded.
    pub fn load_cache_from_store(&self) -> Result<usize> {
        self.save_changes()?;
        let mut loaded = BTreeMap::new();
        for (key, raw) in self.bucket.entries()? {
            match serde_json::from_slice::<DigitwinThing>(&raw) {
                Ok(thing) => {
                    loaded.insert(key, thing);
                }
                Err(e) => warn!("skipping unreadable digital twin '{}': {}", key, e),
            }
        }
        let count = loaded.len();
        *self.cache.write().unwrap_or_else(PoisonError::into_inner) = loaded;
        info!(
            "loaded {} digital twins from bucket '{}'",
            count,
            self.bucket.name()
        );
        Ok(count)
    }

    /// Load a single record into the cache if it is not cached yet.
    ///
    /// Returns false if the bucket has no such record.
    pub fn load_thing(&self, dthing_id: &str) -> Result<bool> {
        if self.is_cached(dthing_id) {
            return Ok(true);
        }
        let Some(raw) = self.bucket.get(dthing_id)? else {
            return Ok(false);
        };
        let thing: DigitwinThing = serde_json::from_slice(&raw)?;
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(dthing_id.to_string())
            .or_insert(thing);
        debug!("loaded digital twin '{}' on demand", dthing_id);
        Ok(true)
    }

    /// Write every dirty record to the bucket.
    ///
    /// The dirty set is drained first and the records are snapshotted under
    /// the read lock; serialization and writes happen outside the lock.
    /// Records that fail to write are marked dirty again. A removal waits
    /// until the writes are done, so a removed Thing is never written back.
    pub fn save_changes(&self) -> Result<usize> {
        let _persist = self.persist.lock().unwrap_or_else(PoisonError::into_inner);
        let ids: Vec<String> = self
            .dirty
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }
        let snapshot: Vec<(String, DigitwinThing)> = {
            let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            ids.iter()
                .filter_map(|id| cache.get(id).map(|t| (id.clone(), t.clone())))
                .collect()
        };

        let mut saved = 0;
        let mut first_err = None;
        for (id, thing) in snapshot {
            let written = serde_json::to_vec(&thing)
                .map_err(StoreError::from)
                .and_then(|raw| self.bucket.set(&id, &raw).map_err(StoreError::from));
            match written {
                Ok(()) => saved += 1,
                Err(e) => {
                    warn!("saving digital twin '{}' failed: {}", id, e);
                    self.mark_dirty(&id);
                    first_err.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_err {
            return Err(e);
        }
        debug!("saved {} digital twins", saved);
        Ok(saved)
    }

    /// Number of records waiting to be saved.
    pub fn dirty_count(&self) -> usize {
        self.dirty.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn mark_dirty(&self, dthing_id: &str) {
        self.dirty
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(dthing_id.to_string());
    }

    fn is_cached(&self, dthing_id: &str) -> bool {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(dthing_id)
    }

    /// Run `f` on a cached record, loading it first if needed.
    fn with_thing<T>(&self, dthing_id: &str, f: impl FnOnce(&DigitwinThing) -> T) -> Result<T> {
        if !self.load_thing(dthing_id)? {
            return Err(StoreError::NotFound(format!("unknown thing '{}'", dthing_id)));
        }
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        cache
            .get(dthing_id)
            .map(f)
            .ok_or_else(|| StoreError::NotFound(format!("unknown thing '{}'", dthing_id)))
    }

    /// Run `f` on a cached record for modification and mark it dirty if `f`
    /// reports a change.
    fn with_thing_mut(
        &self,
        dthing_id: &str,
        f: impl FnOnce(&mut DigitwinThing) -> bool,
    ) -> Result<bool> {
        if !self.load_thing(dthing_id)? {
            return Err(StoreError::NotFound(format!("unknown thing '{}'", dthing_id)));
        }
        let changed = {
            let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
            let thing = cache
                .get_mut(dthing_id)
                .ok_or_else(|| StoreError::NotFound(format!("unknown thing '{}'", dthing_id)))?;
            f(thing)
        };
        if changed {
            self.mark_dirty(dthing_id);
        }
        Ok(changed)
    }

    // --- directory ---

    /// Store a TD published by an agent and derive its digital-twin TD.
    ///
    /// Existing values are kept. A Thing already owned by another agent is
    /// rejected with a conflict.
    pub fn update_td(
        &self,
        agent_id: &str,
        agent_td: ThingDescription,
        forms: &dyn FormProvider,
    ) -> Result<ThingDescription> {
        let dtd = derive_digitwin_td(agent_id, &agent_td, forms)?;
        let dthing_id = dtd.id.clone();
        self.load_thing(&dthing_id)?;
        {
            let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
            match cache.get_mut(&dthing_id) {
                Some(existing) if existing.agent_id != agent_id => {
                    return Err(StoreError::Conflict(format!(
                        "thing '{}' belongs to agent '{}'",
                        dthing_id, existing.agent_id
                    )));
                }
                Some(existing) => {
                    existing.agent_td = agent_td;
                    existing.digitwin_td = dtd.clone();
                }
                None => {
                    cache.insert(
                        dthing_id.clone(),
                        DigitwinThing::new(agent_id, agent_td, dtd.clone()),
                    );
                }
            }
        }
        self.mark_dirty(&dthing_id);
        debug!("updated TD of '{}' from agent '{}'", dthing_id, agent_id);
        Ok(dtd)
    }

    /// Remove a digital twin with its values and action statuses.
    pub fn remove_thing(&self, dthing_id: &str) -> Result<()> {
        let _persist = self.persist.lock().unwrap_or_else(PoisonError::into_inner);
        let cached = self
            .cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(dthing_id)
            .is_some();
        self.dirty
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(dthing_id);
        let stored = self.bucket.get(dthing_id)?.is_some();
        if !cached && !stored {
            return Err(StoreError::NotFound(format!("unknown thing '{}'", dthing_id)));
        }
        self.bucket.delete(dthing_id)?;
        info!("removed digital twin '{}'", dthing_id);
        Ok(())
    }

    /// Digital-twin TD of a Thing.
    pub fn read_dtd(&self, dthing_id: &str) -> Result<ThingDescription> {
        self.with_thing(dthing_id, |t| t.digitwin_td.clone())
    }

    /// Page of digital-twin TDs ordered by ID.
    ///
    /// A limit of 0 or above the directory limit is capped at the limit.
    pub fn read_all_dtds(&self, limit: usize, offset: usize) -> Vec<ThingDescription> {
        let limit = match limit {
            0 => directory::READ_DIR_LIMIT,
            n => n.min(directory::READ_DIR_LIMIT),
        };
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .skip(offset)
            .take(limit)
            .map(|t| t.digitwin_td.clone())
            .collect()
    }

    /// Agent that owns a Thing.
    pub fn thing_agent(&self, dthing_id: &str) -> Option<String> {
        self.with_thing(dthing_id, |t| t.agent_id.clone()).ok()
    }

    /// Number of cached digital twins.
    pub fn count(&self) -> usize {
        self.cache.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    // --- values ---

    /// Cache a property value. Values older than the cached one are dropped.
    ///
    /// Returns true if the value was stored.
    pub fn update_property_value(&self, value: ThingValue) -> Result<bool> {
        let thing_id = value.thing_id.clone();
        self.with_thing_mut(&thing_id, |t| store_latest(&mut t.prop_values, value))
    }

    /// Cache an event value. Values older than the cached one are dropped.
    pub fn update_event_value(&self, value: ThingValue) -> Result<bool> {
        let thing_id = value.thing_id.clone();
        self.with_thing_mut(&thing_id, |t| store_latest(&mut t.event_values, value))
    }

    /// Cache a map of property values sharing one timestamp.
    ///
    /// The values are applied under one lock. Returns the names of the
    /// values stored; stale ones are left out.
    pub fn update_property_values(
        &self,
        dthing_id: &str,
        values: &Map<String, Value>,
        timestamp: &str,
    ) -> Result<Vec<String>> {
        let mut stored = Vec::new();
        self.with_thing_mut(dthing_id, |t| {
            for (name, data) in values {
                let value = ThingValue::new(
                    AffordanceType::Property,
                    dthing_id,
                    name.as_str(),
                    data.clone(),
                    timestamp,
                );
                if store_latest(&mut t.prop_values, value) {
                    stored.push(name.clone());
                }
            }
            !stored.is_empty()
        })?;
        Ok(stored)
    }

    pub fn read_property(&self, dthing_id: &str, name: &str) -> Result<ThingValue> {
        self.with_thing(dthing_id, |t| t.prop_values.get(name).cloned())?
            .ok_or_else(|| {
                StoreError::NotFound(format!("no value for property '{}' of '{}'", name, dthing_id))
            })
    }

    pub fn read_all_properties(&self, dthing_id: &str) -> Result<ThingValueMap> {
        self.with_thing(dthing_id, |t| t.prop_values.clone())
    }

    pub fn read_event(&self, dthing_id: &str, name: &str) -> Result<ThingValue> {
        self.with_thing(dthing_id, |t| t.event_values.get(name).cloned())?
            .ok_or_else(|| {
                StoreError::NotFound(format!("no value for event '{}' of '{}'", name, dthing_id))
            })
    }

    pub fn read_all_events(&self, dthing_id: &str) -> Result<ThingValueMap> {
        self.with_thing(dthing_id, |t| t.event_values.clone())
    }

    // --- actions ---

    /// Record the status of an action invocation.
    ///
    /// Safe actions and actions missing from the TD are not recorded. A
    /// non-terminal status does not replace a terminal status of the same
    /// invocation. Returns true if the status was stored.
    pub fn record_action(&self, status: ActionStatus) -> Result<bool> {
        let thing_id = status.thing_id.clone();
        self.with_thing_mut(&thing_id, |t| {
            match t.digitwin_td.actions.get(&status.name) {
                Some(aff) if !aff.safe => {}
                _ => return false,
            }
            if let Some(current) = t.action_statuses.get(&status.name) {
                if current.action_id == status.action_id
                    && current.status.is_terminal()
                    && !status.status.is_terminal()
                {
                    return false;
                }
            }
            t.action_statuses.insert(status.name.clone(), status);
            true
        })
    }

    /// Latest status of an action.
    pub fn query_action(&self, dthing_id: &str, name: &str) -> Result<ActionStatus> {
        self.with_thing(dthing_id, |t| t.action_statuses.get(name).cloned())?
            .ok_or_else(|| {
                StoreError::NotFound(format!("no status for action '{}' of '{}'", name, dthing_id))
            })
    }

    /// Latest status of every action, one per action name.
    pub fn query_all_actions(&self, dthing_id: &str) -> Result<HashMap<String, ActionStatus>> {
        self.with_thing(dthing_id, |t| t.action_statuses.clone())
    }
}

/// Insert `value` unless the map holds a newer value for the same name.
fn store_latest(values: &mut ThingValueMap, value: ThingValue) -> bool {
    if let Some(current) = values.get(&value.name) {
        if value.is_older_than(current) {
            debug!(
                "dropping stale value of '{}/{}' at {}",
                value.thing_id, value.name, value.timestamp
            );
            return false;
        }
    }
    values.insert(value.name.clone(), value);
    true
}
