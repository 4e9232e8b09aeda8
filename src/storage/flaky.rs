// Flaky Engine - Wraps an engine and sabotages its first commits
//
// Used to exercise retry paths: the first N commits either report a
// conflict or fail outright, later ones reach the wrapped engine.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::engine::{Engine, Mutation, Record};
use super::memory::MemoryEngine;
use super::store::StoreError;

pub struct FlakyEngine {
    inner: Box<dyn Engine>,
    failures_remaining: AtomicUsize,
    fail_with_error: bool,
    commit_calls: AtomicUsize,
}

impl FlakyEngine {
    /// In-memory engine whose first `conflicts` commits report a conflict
    pub fn new(conflicts: usize) -> Self {
        Self::wrap(Box::new(MemoryEngine::new()), conflicts)
    }

    pub fn wrap(inner: Box<dyn Engine>, conflicts: usize) -> Self {
        Self {
            inner,
            failures_remaining: AtomicUsize::new(conflicts),
            fail_with_error: false,
            commit_calls: AtomicUsize::new(0),
        }
    }

    /// Fail with a database error instead of a conflict
    pub fn with_errors(mut self) -> Self {
        self.fail_with_error = true;
        self
    }

    /// Commits attempted so far, sabotaged or not
    pub fn commit_calls(&self) -> usize {
        self.commit_calls.load(Ordering::SeqCst)
    }

    /// Sabotage the next `failures` commits
    pub fn fail_next(&self, failures: usize) {
        self.failures_remaining.store(failures, Ordering::SeqCst);
    }
}

impl Engine for FlakyEngine {
    fn name(&self) -> &'static str {
        "flaky"
    }

    fn read(&self, full_key: &str) -> Result<Option<Record>, StoreError> {
        self.inner.read(full_key)
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.inner.scan_prefix(prefix)
    }

    fn commit(
        &self,
        watched: &BTreeMap<String, u64>,
        mutations: &[Mutation],
    ) -> Result<bool, StoreError> {
        self.commit_calls.fetch_add(1, Ordering::SeqCst);
        let sabotaged = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !sabotaged {
            return self.inner.commit(watched, mutations);
        }
        if self.fail_with_error {
            Err(StoreError::Database("injected commit failure".to_string()))
        } else {
            Ok(false)
        }
    }
}
