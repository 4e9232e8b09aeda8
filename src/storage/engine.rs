// Engine - Versioned records and the backend contract
//
// Every stored key carries a version stamped by the commit that last wrote
// it. A transaction remembers the versions it observed; an engine only
// applies its writes if all of them are still current.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::store::StoreError;

/// Payload of a stored key
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoredValue {
    Scalar(String),
    /// Most recent entry first
    List(Vec<String>),
}

impl StoredValue {
    pub fn kind(&self) -> &'static str {
        match self {
            StoredValue::Scalar(_) => "scalar",
            StoredValue::List(_) => "list",
        }
    }
}

/// A stored value together with the version of the commit that wrote it.
///
/// A deleted key stays behind as a tombstone (`value: None`) carrying the
/// version of the deleting commit, so a transaction that watched the key
/// while it was absent still notices a create followed by a delete.
/// Version 0 is reserved for keys that were never written.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub version: u64,
    pub value: Option<StoredValue>,
}

impl Record {
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, StoreError> {
        postcard::to_allocvec(self).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    pub fn from_bytes(key: &str, bytes: &[u8]) -> Result<Self, StoreError> {
        postcard::from_bytes(bytes).map_err(|e| StoreError::Deserialization {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }
}

/// A buffered write against one key
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Replace with a scalar
    Set(String),
    /// Push onto the head of a list, creating it if absent
    Push(String),
    /// Keep only the first n list entries
    Trim(usize),
    Delete,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mutation {
    pub key: String,
    pub command: Command,
}

/// Applies `commands` in order to the current value of `key`.
/// `None` in and out means the key is absent.
pub fn apply_commands<'a, I>(
    key: &str,
    mut value: Option<StoredValue>,
    commands: I,
) -> Result<Option<StoredValue>, StoreError>
where
    I: IntoIterator<Item = &'a Command>,
{
    for command in commands {
        value = match (command, value) {
            (Command::Set(raw), _) => Some(StoredValue::Scalar(raw.clone())),
            (Command::Push(raw), None) => Some(StoredValue::List(vec![raw.clone()])),
            (Command::Push(raw), Some(StoredValue::List(mut items))) => {
                items.insert(0, raw.clone());
                Some(StoredValue::List(items))
            }
            (Command::Push(_), Some(StoredValue::Scalar(_))) => {
                return Err(StoreError::TypeMismatch {
                    key: key.to_string(),
                    reason: "cannot push onto a scalar".to_string(),
                });
            }
            (Command::Trim(len), Some(StoredValue::List(mut items))) => {
                items.truncate(*len);
                // Empty lists do not exist
                (!items.is_empty()).then_some(StoredValue::List(items))
            }
            (Command::Trim(_), other) => other,
            (Command::Delete, _) => None,
        };
    }
    Ok(value)
}

/// Groups mutations by key, keeping each key's commands in buffer order
pub fn group_mutations(mutations: &[Mutation]) -> BTreeMap<&str, Vec<&Command>> {
    let mut grouped: BTreeMap<&str, Vec<&Command>> = BTreeMap::new();
    for mutation in mutations {
        grouped
            .entry(mutation.key.as_str())
            .or_default()
            .push(&mutation.command);
    }
    grouped
}

/// Backend behind `OptimisticStore`
///
/// Keys are full keys (`subkey:key`). `commit` must be atomic: it either
/// applies every mutation under one fresh version, or applies nothing and
/// returns `Ok(false)` because a watched version moved.
pub trait Engine: Send + Sync {
    fn name(&self) -> &'static str;

    /// The record under `full_key`, tombstones included
    fn read(&self, full_key: &str) -> Result<Option<Record>, StoreError>;

    /// Live full keys starting with `prefix`, in ascending order
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// `watched` maps full keys to the version observed (0 for absent)
    fn commit(
        &self,
        watched: &BTreeMap<String, u64>,
        mutations: &[Mutation],
    ) -> Result<bool, StoreError>;
}
