// Optimistic Store - The Store implementation over any Engine
//
// Maps the (key, subkey) operations onto scalar and list records and routes
// every read and write through an OptimisticTransaction.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

use super::engine::{Command, Engine, StoredValue};
use super::memory::MemoryEngine;
use super::store::{full_key, RetryPolicy, Store, StoreError};
use super::transaction::OptimisticTransaction;

#[derive(Clone)]
pub struct OptimisticStore {
    engine: Arc<dyn Engine>,
    retry: RetryPolicy,
}

impl OptimisticStore {
    pub fn new(engine: Arc<dyn Engine>, retry: RetryPolicy) -> Self {
        Self { engine, retry }
    }

    /// Fresh in-memory store with the default retry policy
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryEngine::new()), RetryPolicy::default())
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn get_in(
        &self,
        key: &str,
        subkey: &str,
        tx: &mut OptimisticTransaction,
    ) -> Result<Option<String>, StoreError> {
        Ok(match tx.read(&full_key(key, subkey))? {
            Some(StoredValue::Scalar(value)) => Some(value),
            Some(StoredValue::List(items)) => items.into_iter().next(),
            None => None,
        })
    }

    fn set_in(
        &self,
        key: &str,
        subkey: &str,
        value: &str,
        tx: &mut OptimisticTransaction,
    ) -> Result<(), StoreError> {
        let full = full_key(key, subkey);
        // Setting a history appends to it rather than replacing it
        let command = match tx.read(&full)? {
            Some(StoredValue::List(_)) => Command::Push(value.to_string()),
            _ => Command::Set(value.to_string()),
        };
        tx.buffer(full, command);
        Ok(())
    }

    fn delete_in(&self, key: &str, subkey: &str, tx: &mut OptimisticTransaction) {
        tx.buffer(full_key(key, subkey), Command::Delete);
    }

    fn subkey_in(
        &self,
        subkey: &str,
        tx: &mut OptimisticTransaction,
    ) -> Result<Vec<(String, String)>, StoreError> {
        let prefix = format!("{}:", subkey);
        let mut entries = Vec::new();
        for full in tx.scan(&prefix)? {
            let key = full[prefix.len()..].to_string();
            // Raced with a delete between the scan and the read
            if let Some(value) = self.get_in(&key, subkey, tx)? {
                entries.push((key, value));
            }
        }
        Ok(entries)
    }

    fn history_in<T: DeserializeOwned>(
        &self,
        key: &str,
        subkey: &str,
        num_past_values: usize,
        tx: &mut OptimisticTransaction,
    ) -> Result<Vec<T>, StoreError> {
        let full = full_key(key, subkey);
        let raw_values: Vec<String> = match tx.read(&full)? {
            Some(StoredValue::List(items)) => items.into_iter().take(num_past_values).collect(),
            Some(StoredValue::Scalar(value)) => vec![value],
            None => Vec::new(),
        };
        raw_values
            .iter()
            .map(|raw| {
                serde_json::from_str(raw).map_err(|e| StoreError::Deserialization {
                    key: full.clone(),
                    reason: e.to_string(),
                })
            })
            .collect()
    }

    fn prepend_in<T: Serialize>(
        &self,
        key: &str,
        subkey: &str,
        new_value: &T,
        max_length: Option<usize>,
        tx: &mut OptimisticTransaction,
    ) -> Result<(), StoreError> {
        let full = full_key(key, subkey);
        if let Some(StoredValue::Scalar(_)) = tx.read(&full)? {
            return Err(StoreError::TypeMismatch {
                key: full,
                reason: "cannot prepend to a scalar value".to_string(),
            });
        }
        let raw = serde_json::to_string(new_value)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        tx.buffer(full.clone(), Command::Push(raw));
        if let Some(max_length) = max_length {
            tx.buffer(full, Command::Trim(max_length));
        }
        Ok(())
    }
}

impl Store for OptimisticStore {
    type Tx = OptimisticTransaction;

    fn engine(&self) -> &str {
        self.engine.name()
    }

    fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    fn new_transaction(&self, name: &str) -> OptimisticTransaction {
        OptimisticTransaction::new(name, self.engine.clone())
    }

    fn get_value(
        &self,
        key: &str,
        subkey: &str,
        tx: Option<&mut OptimisticTransaction>,
    ) -> Result<Option<String>, StoreError> {
        match tx {
            Some(tx) => self.get_in(key, subkey, tx),
            None => self.run_in_transaction(&format!("GetValue {}/{}", key, subkey), |tx| {
                self.get_in(key, subkey, tx)
            }),
        }
    }

    fn set_value(
        &self,
        key: &str,
        subkey: &str,
        value: &str,
        tx: Option<&mut OptimisticTransaction>,
    ) -> Result<(), StoreError> {
        match tx {
            Some(tx) => self.set_in(key, subkey, value, tx),
            None => self.run_in_transaction(&format!("SetValue {}/{}", key, subkey), |tx| {
                self.set_in(key, subkey, value, tx)
            }),
        }
    }

    fn delete_value(
        &self,
        key: &str,
        subkey: &str,
        tx: Option<&mut OptimisticTransaction>,
    ) -> Result<(), StoreError> {
        match tx {
            Some(tx) => {
                self.delete_in(key, subkey, tx);
                Ok(())
            }
            None => self.run_in_transaction(&format!("DeleteValue {}/{}", key, subkey), |tx| {
                self.delete_in(key, subkey, tx);
                Ok(())
            }),
        }
    }

    fn get_subkey(
        &self,
        subkey: &str,
        tx: Option<&mut OptimisticTransaction>,
    ) -> Result<Vec<(String, String)>, StoreError> {
        match tx {
            Some(tx) => self.subkey_in(subkey, tx),
            None => self.run_in_transaction(&format!("GetSubkey {}", subkey), |tx| {
                self.subkey_in(subkey, tx)
            }),
        }
    }

    fn get_historical_values<T: DeserializeOwned>(
        &self,
        key: &str,
        subkey: &str,
        num_past_values: usize,
        tx: Option<&mut OptimisticTransaction>,
    ) -> Result<Vec<T>, StoreError> {
        match tx {
            Some(tx) => self.history_in(key, subkey, num_past_values, tx),
            None => self.run_in_transaction(&format!("GetHistory {}/{}", key, subkey), |tx| {
                self.history_in(key, subkey, num_past_values, tx)
            }),
        }
    }

    fn prepend_value<T: Serialize>(
        &self,
        key: &str,
        subkey: &str,
        new_value: &T,
        max_length: Option<usize>,
        tx: Option<&mut OptimisticTransaction>,
    ) -> Result<(), StoreError> {
        match tx {
            Some(tx) => self.prepend_in(key, subkey, new_value, max_length, tx),
            None => self.run_in_transaction(&format!("PrependValue {}/{}", key, subkey), |tx| {
                self.prepend_in(key, subkey, new_value, max_length, tx)
            }),
        }
    }
}
