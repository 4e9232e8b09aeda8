// Storage module - PERSISTENCE
// Transactional key-value storage with optimistic concurrency over
// pluggable engines (in-memory or sled)

mod engine;
mod flaky;
mod memory;
mod optimistic;
mod queue;
mod registry;
mod sled_engine;
mod store;
mod synced;
mod transaction;

pub use engine::{apply_commands, Command, Engine, Mutation, Record, StoredValue};
pub use flaky::FlakyEngine;
pub use memory::MemoryEngine;
pub use optimistic::OptimisticStore;
pub use queue::{DurableQueue, QUEUE_SUBKEY};
pub use registry::{engine_names, lookup_engine, open_engine, open_store, EngineFactory, ENGINES};
pub use sled_engine::{SledEngine, StorageStats};
pub use store::{full_key, RetryPolicy, Store, StoreError, Transaction};
pub use synced::{SyncedDict, SYNCED_SUBKEY};
pub use transaction::OptimisticTransaction;
