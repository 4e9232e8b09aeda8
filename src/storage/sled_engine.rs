// Sled Engine - Persistent storage using sled
//
// Records are postcard-encoded under their full key. Commits run as a sled
// transaction that re-reads every watched key before writing, so validation
// and application are one atomic step.

use sled::transaction::{ConflictableTransactionError, TransactionError};
use std::collections::BTreeMap;
use std::path::Path;

use super::engine::{apply_commands, group_mutations, Engine, Mutation, Record};
use super::store::StoreError;

/// Why a sled commit closure gave up
#[derive(Debug)]
enum CommitAbort {
    Conflict,
    Failed(StoreError),
}

fn abort(err: StoreError) -> ConflictableTransactionError<CommitAbort> {
    ConflictableTransactionError::Abort(CommitAbort::Failed(err))
}

/// Statistics about the database
#[derive(Clone, Debug)]
pub struct StorageStats {
    /// Stored records, tombstones included
    pub key_count: usize,
    pub disk_size_bytes: u64,
}

pub struct SledEngine {
    db: sled::Db,
}

impl SledEngine {
    /// Open or create a database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path)
            .map_err(|e| StoreError::Database(format!("Failed to open database: {}", e)))?;
        Ok(Self { db })
    }

    /// Database that is deleted when dropped
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    /// Flush all pending writes to disk
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    pub fn stats(&self) -> StorageStats {
        StorageStats {
            key_count: self.db.len(),
            disk_size_bytes: self.db.size_on_disk().unwrap_or(0),
        }
    }
}

impl Engine for SledEngine {
    fn name(&self) -> &'static str {
        "sled"
    }

    fn read(&self, full_key: &str) -> Result<Option<Record>, StoreError> {
        match self.db.get(full_key.as_bytes())? {
            Some(bytes) => Ok(Some(Record::from_bytes(full_key, &bytes)?)),
            None => Ok(None),
        }
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        for result in self.db.scan_prefix(prefix.as_bytes()) {
            let (key, bytes) = result?;
            let key = String::from_utf8_lossy(&key).into_owned();
            if !Record::from_bytes(&key, &bytes)?.is_tombstone() {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    fn commit(
        &self,
        watched: &BTreeMap<String, u64>,
        mutations: &[Mutation],
    ) -> Result<bool, StoreError> {
        // generate_id starts at 0, which is reserved for absent keys
        let version = if mutations.is_empty() {
            0
        } else {
            self.db.generate_id()? + 1
        };
        let grouped = group_mutations(mutations);

        let result = self.db.transaction(|tree| {
            for (key, seen) in watched {
                let current = match tree.get(key.as_bytes())? {
                    Some(bytes) => Record::from_bytes(key, &bytes).map_err(abort)?.version,
                    None => 0,
                };
                if current != *seen {
                    return Err(ConflictableTransactionError::Abort(CommitAbort::Conflict));
                }
            }

            for (key, commands) in &grouped {
                let current = match tree.get(key.as_bytes())? {
                    Some(bytes) => Record::from_bytes(key, &bytes).map_err(abort)?.value,
                    None => None,
                };
                let existed = current.is_some();
                let value = apply_commands(key, current, commands.iter().copied()).map_err(abort)?;
                // Deleting a key that was never there leaves no tombstone
                if existed || value.is_some() {
                    let bytes = Record { version, value }.to_bytes().map_err(abort)?;
                    tree.insert(key.as_bytes(), bytes)?;
                }
            }
            Ok(())
        });

        match result {
            Ok(()) => Ok(true),
            Err(TransactionError::Abort(CommitAbort::Conflict)) => Ok(false),
            Err(TransactionError::Abort(CommitAbort::Failed(err))) => Err(err),
            Err(TransactionError::Storage(err)) => Err(err.into()),
        }
    }
}
