// Engine Registry - Compile-time table of storage backends

use std::sync::Arc;
use tracing::info;

use super::engine::Engine;
use super::memory::MemoryEngine;
use super::optimistic::OptimisticStore;
use super::sled_engine::SledEngine;
use super::store::StoreError;
use crate::config::StorageConfig;

pub type EngineFactory = fn(&StorageConfig) -> Result<Arc<dyn Engine>, StoreError>;

/// Every engine that can be selected by name
pub const ENGINES: &[(&str, EngineFactory)] = &[("memory", open_memory), ("sled", open_sled)];

fn open_memory(_config: &StorageConfig) -> Result<Arc<dyn Engine>, StoreError> {
    Ok(Arc::new(MemoryEngine::new()))
}

fn open_sled(config: &StorageConfig) -> Result<Arc<dyn Engine>, StoreError> {
    Ok(Arc::new(SledEngine::open(&config.path)?))
}

pub fn engine_names() -> impl Iterator<Item = &'static str> {
    ENGINES.iter().map(|(name, _)| *name)
}

/// Looks up an engine by name, ignoring case
pub fn lookup_engine(name: &str) -> Option<EngineFactory> {
    let name = name.to_ascii_lowercase();
    ENGINES
        .iter()
        .find(|(candidate, _)| *candidate == name)
        .map(|(_, factory)| *factory)
}

pub fn open_engine(config: &StorageConfig) -> Result<Arc<dyn Engine>, StoreError> {
    let factory =
        lookup_engine(&config.engine).ok_or_else(|| StoreError::UnknownEngine(config.engine.clone()))?;
    let engine = factory(config)?;
    info!(engine = engine.name(), path = %config.path.display(), "Opened storage engine");
    Ok(engine)
}

/// Opens the configured engine wrapped in a store
pub fn open_store(config: &StorageConfig) -> Result<OptimisticStore, StoreError> {
    Ok(OptimisticStore::new(open_engine(config)?, config.retry.clone()))
}
