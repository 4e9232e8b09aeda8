// Store - The storage contract shared by every engine
//
// Entries are addressed by (key, subkey). Every operation can be handed an
// existing transaction, or run on its own inside a fresh one.

use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Errors from storage operations
///
/// A commit conflict is not an error: `Transaction::commit` reports it as
/// `Ok(false)`. Everything here aborts the enclosing transaction without retry.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database operation failed: {0}")]
    Database(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Deserialization failed for {key}: {reason}")]
    Deserialization { key: String, reason: String },

    #[error("Type mismatch on {key}: {reason}")]
    TypeMismatch { key: String, reason: String },

    #[error("Value {value:?} at {key} is not an integer")]
    NotAnInteger { key: String, value: String },

    #[error("Key {key} already has a pending write in {tx}")]
    PendingWrite { key: String, tx: String },

    #[error("{name} aborted after {attempts} commit attempts")]
    CommitAborted { name: String, attempts: u32 },

    #[error("Unknown storage engine: {0}")]
    UnknownEngine(String),

    #[error("Lock poisoned: {0}")]
    Lock(String),
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

/// Builds the persisted key for (key, subkey)
pub fn full_key(key: &str, subkey: &str) -> String {
    format!("{}:{}", subkey, key)
}

// ============================================================================
// RETRY POLICY
// ============================================================================

/// How `run_in_transaction` retries conflicting commits
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay after the first conflict; doubles after each further conflict
    pub base_delay_ms: u64,
    /// Upper bound of the random delay added to every backoff
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            base_delay_ms: 200,
            jitter_ms: 0,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_base_delay_ms(mut self, ms: u64) -> Self {
        self.base_delay_ms = ms;
        self
    }

    pub fn with_jitter_ms(mut self, ms: u64) -> Self {
        self.jitter_ms = ms;
        self
    }

    /// Backoff to wait after `attempt` (1-based) failed to commit
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let backoff = self.base_delay_ms.saturating_mul(1u64 << shift);
        let jitter = if self.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.jitter_ms)
        } else {
            0
        };
        Duration::from_millis(backoff.saturating_add(jitter))
    }
}

// ============================================================================
// TRANSACTION / STORE TRAITS
// ============================================================================

/// A unit of work against a store
///
/// Transactions are not thread-safe; each one belongs to a single attempt of
/// a single logical operation.
pub trait Transaction: fmt::Display {
    /// Diagnostic name
    fn name(&self) -> &str;

    /// Atomically applies every buffered write, provided nothing this
    /// transaction read has changed since.
    ///
    /// `Ok(false)` means a conflict and is the retryable outcome. `Err` is
    /// reserved for failures a retry cannot fix.
    fn commit(&mut self) -> Result<bool, StoreError>;
}

/// Storage contract used by the bank and the bookie
pub trait Store: Send + Sync {
    type Tx: Transaction;

    /// Lowercase name of the backing engine
    fn engine(&self) -> &str;

    fn retry_policy(&self) -> &RetryPolicy;

    fn new_transaction(&self, name: &str) -> Self::Tx;

    /// Current value, or `None` when unset
    fn get_value(
        &self,
        key: &str,
        subkey: &str,
        tx: Option<&mut Self::Tx>,
    ) -> Result<Option<String>, StoreError>;

    /// Unconditional overwrite
    fn set_value(
        &self,
        key: &str,
        subkey: &str,
        value: &str,
        tx: Option<&mut Self::Tx>,
    ) -> Result<(), StoreError>;

    fn delete_value(
        &self,
        key: &str,
        subkey: &str,
        tx: Option<&mut Self::Tx>,
    ) -> Result<(), StoreError>;

    /// Every (key, value) pair stored under `subkey`. Not atomic across entries
    /// unless run inside a transaction.
    fn get_subkey(
        &self,
        subkey: &str,
        tx: Option<&mut Self::Tx>,
    ) -> Result<Vec<(String, String)>, StoreError>;

    /// Up to `num_past_values` values written by `prepend_value`, newest first
    fn get_historical_values<T: DeserializeOwned>(
        &self,
        key: &str,
        subkey: &str,
        num_past_values: usize,
        tx: Option<&mut Self::Tx>,
    ) -> Result<Vec<T>, StoreError>;

    /// Pushes `new_value` onto the head of a most-recent-first history,
    /// keeping at most `max_length` entries where the engine supports it.
    fn prepend_value<T: Serialize>(
        &self,
        key: &str,
        subkey: &str,
        new_value: &T,
        max_length: Option<usize>,
        tx: Option<&mut Self::Tx>,
    ) -> Result<(), StoreError>;

    /// Adds `delta` to the integer at (key, subkey), treating unset as 0.
    /// Returns the new value.
    fn update_value(
        &self,
        key: &str,
        subkey: &str,
        delta: i64,
        tx: Option<&mut Self::Tx>,
    ) -> Result<i64, StoreError> {
        let Some(tx) = tx else {
            let name = format!("{}/{} += {}", key, subkey, delta);
            return self.run_in_transaction(&name, |tx| {
                self.update_value(key, subkey, delta, Some(tx))
            });
        };

        let current = self.get_value(key, subkey, Some(&mut *tx))?;
        let current = match current.as_deref() {
            None | Some("") => 0,
            Some(raw) => raw.trim().parse::<i64>().map_err(|_| {
                error!(key, subkey, value = raw, "update_value on a non-integer");
                StoreError::NotAnInteger {
                    key: full_key(key, subkey),
                    value: raw.to_string(),
                }
            })?,
        };
        let updated = current.saturating_add(delta);
        self.set_value(key, subkey, &updated.to_string(), Some(tx))?;
        Ok(updated)
    }

    fn get_json_value<T: DeserializeOwned>(
        &self,
        key: &str,
        subkey: &str,
        tx: Option<&mut Self::Tx>,
    ) -> Result<Option<T>, StoreError> {
        match self.get_value(key, subkey, tx)? {
            Some(raw) if !raw.is_empty() => serde_json::from_str(&raw).map(Some).map_err(|e| {
                error!(key, subkey, "Error decoding JSON value: {}", e);
                StoreError::Deserialization {
                    key: full_key(key, subkey),
                    reason: e.to_string(),
                }
            }),
            _ => Ok(None),
        }
    }

    fn set_json_value<T: Serialize + ?Sized>(
        &self,
        key: &str,
        subkey: &str,
        value: &T,
        tx: Option<&mut Self::Tx>,
    ) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value).map_err(|e| {
            error!(key, subkey, "Error encoding JSON value: {}", e);
            StoreError::Serialization(e.to_string())
        })?;
        self.set_value(key, subkey, &raw, tx)
    }

    /// Loads the JSON value (or its default), evaluates `success` against it,
    /// applies `transform` in place and stores the result.
    ///
    /// Returns what `success` reported for the value as it was before the
    /// transform.
    fn update_json<T, F, P>(
        &self,
        key: &str,
        subkey: &str,
        mut transform: F,
        success: P,
        tx: Option<&mut Self::Tx>,
    ) -> Result<bool, StoreError>
    where
        T: Serialize + DeserializeOwned + Default,
        F: FnMut(&mut T),
        P: Fn(&T) -> bool,
    {
        match tx {
            Some(tx) => apply_json_update(self, key, subkey, &mut transform, &success, tx),
            None => {
                let name = format!("UpdateJson on {}/{}", key, subkey);
                self.run_in_transaction(&name, |tx| {
                    apply_json_update(self, key, subkey, &mut transform, &success, tx)
                })
            }
        }
    }

    /// `update_json` for a JSON array treated as a deduplicated set
    fn update_json_set<V, F, P>(
        &self,
        key: &str,
        subkey: &str,
        transform: F,
        success: P,
        tx: Option<&mut Self::Tx>,
    ) -> Result<bool, StoreError>
    where
        V: Ord + Serialize + DeserializeOwned,
        F: FnMut(&mut BTreeSet<V>),
        P: Fn(&BTreeSet<V>) -> bool,
    {
        self.update_json::<BTreeSet<V>, F, P>(key, subkey, transform, success, tx)
    }

    /// Runs `f` inside a transaction, retrying on commit conflicts.
    ///
    /// `f` may run several times and must only touch the store through the
    /// transaction it is handed. An error from `f` aborts immediately without
    /// retry. Running out of attempts yields `StoreError::CommitAborted`.
    fn run_in_transaction<T, E, F>(&self, name: &str, mut f: F) -> Result<T, E>
    where
        E: From<StoreError>,
        F: FnMut(&mut Self::Tx) -> Result<T, E>,
    {
        let policy = self.retry_policy().clone();
        let max_attempts = policy.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let mut tx = self.new_transaction(name);
            let value = match f(&mut tx) {
                Ok(value) => value,
                Err(err) => {
                    error!(tx = %tx, attempt, "Transaction body failed, aborting");
                    return Err(err);
                }
            };

            if tx.commit()? {
                if attempt > 1 {
                    debug!(tx = %tx, attempt, "Committed after retrying");
                }
                return Ok(value);
            }

            if attempt < max_attempts {
                let delay = policy.delay_for(attempt);
                debug!(tx = %tx, attempt, delay_ms = delay.as_millis() as u64, "Commit conflict, retrying");
                std::thread::sleep(delay);
            }
        }

        warn!(tx = name, attempts = max_attempts, "Transaction exhausted its retries");
        Err(StoreError::CommitAborted {
            name: name.to_string(),
            attempts: max_attempts,
        }
        .into())
    }
}

fn apply_json_update<S, T, F, P>(
    store: &S,
    key: &str,
    subkey: &str,
    transform: &mut F,
    success: &P,
    tx: &mut S::Tx,
) -> Result<bool, StoreError>
where
    S: Store + ?Sized,
    T: Serialize + DeserializeOwned + Default,
    F: FnMut(&mut T),
    P: Fn(&T) -> bool,
{
    let mut value: T = store
        .get_json_value(key, subkey, Some(&mut *tx))?
        .unwrap_or_default();
    let succeeded = success(&value);
    transform(&mut value);
    store.set_json_value(key, subkey, &value, Some(tx))?;
    Ok(succeeded)
}
