// Synced Dict - A map mirrored into one JSON value of the store
//
// Reads are served from the local copy. Every write flushes the whole map
// back, so the stored value is always the last writer's copy. Changes made
// through another handle only show up after `sync`.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use super::store::{Store, StoreError};

/// Subkey used when none is given
pub const SYNCED_SUBKEY: &str = "synced_object";

pub struct SyncedDict<S: Store, V> {
    store: Arc<S>,
    key: String,
    subkey: String,
    entries: BTreeMap<String, V>,
}

impl<S, V> SyncedDict<S, V>
where
    S: Store,
    V: Serialize + DeserializeOwned,
{
    /// Loads the map stored under (`key`, `subkey`), empty if there is none
    pub fn open(store: Arc<S>, key: &str, subkey: Option<&str>) -> Result<Self, StoreError> {
        let mut dict = Self {
            store,
            key: key.to_string(),
            subkey: subkey.unwrap_or(SYNCED_SUBKEY).to_string(),
            entries: BTreeMap::new(),
        };
        dict.sync()?;
        Ok(dict)
    }

    /// Reloads from the store, dropping local state
    pub fn sync(&mut self) -> Result<(), StoreError> {
        self.entries = self
            .store
            .get_json_value(&self.key, &self.subkey, None)?
            .unwrap_or_default();
        debug!(key = %self.key, subkey = %self.subkey, entries = self.entries.len(), "Synced dict");
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &V)> {
        self.entries.iter()
    }

    /// Inserts and flushes, returning the replaced value
    pub fn insert(&mut self, key: &str, value: V) -> Result<Option<V>, StoreError> {
        let previous = self.entries.insert(key.to_string(), value);
        self.flush()?;
        Ok(previous)
    }

    /// Removes and flushes. Nothing is written when `key` was not present.
    pub fn remove(&mut self, key: &str) -> Result<Option<V>, StoreError> {
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.flush()?;
        }
        Ok(removed)
    }

    /// Inserts every pair, then flushes once
    pub fn extend<I>(&mut self, entries: I) -> Result<(), StoreError>
    where
        I: IntoIterator<Item = (String, V)>,
    {
        self.entries.extend(entries);
        self.flush()
    }

    pub fn clear(&mut self) -> Result<(), StoreError> {
        self.entries.clear();
        self.flush()
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.store
            .set_json_value(&self.key, &self.subkey, &self.entries, None)
    }
}
