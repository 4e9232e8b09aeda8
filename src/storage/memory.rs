// Memory Engine - Process-local storage for tests and ephemeral deployments

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use super::engine::{apply_commands, group_mutations, Engine, Mutation, Record};
use super::store::StoreError;

#[derive(Default)]
struct MemoryState {
    records: HashMap<String, Record>,
    clock: u64,
}

/// Engine backed by a locked hash map
///
/// Commit validates and applies under one lock, so it is atomic with respect
/// to every other operation on the same engine.
#[derive(Default)]
pub struct MemoryEngine {
    state: Mutex<MemoryState>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live keys, tombstones excluded
    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self
            .lock()?
            .records
            .values()
            .filter(|r| !r.is_tombstone())
            .count())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|e| StoreError::Lock(e.to_string()))
    }
}

impl Engine for MemoryEngine {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn read(&self, full_key: &str) -> Result<Option<Record>, StoreError> {
        Ok(self.lock()?.records.get(full_key).cloned())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let state = self.lock()?;
        let mut keys: Vec<String> = state
            .records
            .iter()
            .filter(|(k, r)| k.starts_with(prefix) && !r.is_tombstone())
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn commit(
        &self,
        watched: &BTreeMap<String, u64>,
        mutations: &[Mutation],
    ) -> Result<bool, StoreError> {
        let mut state = self.lock()?;

        for (key, seen) in watched {
            let current = state.records.get(key).map_or(0, |r| r.version);
            if current != *seen {
                return Ok(false);
            }
        }
        if mutations.is_empty() {
            return Ok(true);
        }

        // Compute everything before touching the map so a failure leaves it untouched
        let mut staged = Vec::new();
        for (key, commands) in group_mutations(mutations) {
            let current = state.records.get(key).and_then(|r| r.value.clone());
            let existed = current.is_some();
            let value = apply_commands(key, current, commands)?;
            if existed || value.is_some() {
                staged.push((key, value));
            }
        }

        state.clock += 1;
        let version = state.clock;
        for (key, value) in staged {
            state.records.insert(key.to_string(), Record { version, value });
        }
        Ok(true)
    }
}
