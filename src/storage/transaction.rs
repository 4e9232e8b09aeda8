// Optimistic Transaction - Watched reads and buffered writes
//
// Reads go straight to the engine and record the version they saw. Writes
// are buffered until commit, which hands both sets to the engine in one call.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use super::engine::{Command, Engine, Mutation, StoredValue};
use super::store::{StoreError, Transaction};

pub struct OptimisticTransaction {
    name: String,
    engine: Arc<dyn Engine>,
    watched: BTreeMap<String, u64>,
    buffer: Vec<Mutation>,
}

impl OptimisticTransaction {
    pub fn new(name: &str, engine: Arc<dyn Engine>) -> Self {
        Self {
            name: name.to_string(),
            engine,
            watched: BTreeMap::new(),
            buffer: Vec::new(),
        }
    }

    /// Full keys read so far
    pub fn watched_keys(&self) -> impl Iterator<Item = &str> {
        self.watched.keys().map(String::as_str)
    }

    pub fn pending_writes(&self) -> usize {
        self.buffer.len()
    }

    /// Reads a key and adds it to the watch set.
    ///
    /// Reading a key after buffering a write to it is rejected: the read
    /// would not see the pending write.
    pub(crate) fn read(&mut self, full_key: &str) -> Result<Option<StoredValue>, StoreError> {
        if self.buffer.iter().any(|m| m.key == full_key) {
            return Err(StoreError::PendingWrite {
                key: full_key.to_string(),
                tx: self.to_string(),
            });
        }

        let record = self.engine.read(full_key)?;
        let version = record.as_ref().map_or(0, |r| r.version);
        // The first observation is the one the commit validates against
        self.watched.entry(full_key.to_string()).or_insert(version);
        Ok(record.and_then(|r| r.value))
    }

    /// Lists full keys under `prefix`. Only the keys returned are watched,
    /// not the prefix itself.
    pub(crate) fn scan(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.engine.scan_prefix(prefix)
    }

    pub(crate) fn buffer(&mut self, full_key: String, command: Command) {
        self.buffer.push(Mutation {
            key: full_key,
            command,
        });
    }
}

impl Transaction for OptimisticTransaction {
    fn name(&self) -> &str {
        &self.name
    }

    fn commit(&mut self) -> Result<bool, StoreError> {
        if !self.buffer.is_empty() {
            debug!(tx = %self, writes = self.buffer.len(), watched = self.watched.len(), "Committing");
        }

        let watched = std::mem::take(&mut self.watched);
        let buffer = std::mem::take(&mut self.buffer);
        let committed = self.engine.commit(&watched, &buffer)?;
        if !committed {
            debug!(tx = %self, "Watched key changed before commit");
        }
        Ok(committed)
    }
}

impl fmt::Display for OptimisticTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[TX {}]", self.name)
    }
}

impl fmt::Debug for OptimisticTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptimisticTransaction")
            .field("name", &self.name)
            .field("engine", &self.engine.name())
            .field("watched", &self.watched)
            .field("buffer", &self.buffer)
            .finish()
    }
}
