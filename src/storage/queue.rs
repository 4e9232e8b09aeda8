// Durable Queue - A named FIFO of JSON payloads kept in the store
//
// The whole queue lives as one JSON array, so enqueue and process are
// ordinary transactions and can join a caller's transaction.

use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, TryLockError};
use tracing::{debug, info};

use super::store::{Store, StoreError};

/// Subkey every queue is stored under
pub const QUEUE_SUBKEY: &str = "hype_queue";

pub struct DurableQueue<S: Store> {
    store: Arc<S>,
    key: String,
    process_lock: Mutex<()>,
}

impl<S: Store> DurableQueue<S> {
    pub fn new(store: Arc<S>, name: &str) -> Self {
        Self {
            store,
            key: format!("{}-queue", name),
            process_lock: Mutex::new(()),
        }
    }

    /// Storage key of the queue
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Appends `payload` to the tail
    pub fn enqueue(&self, payload: Value, tx: Option<&mut S::Tx>) -> Result<(), StoreError> {
        match tx {
            Some(tx) => self.enqueue_in(&payload, tx),
            None => self
                .store
                .run_in_transaction(&format!("Enqueue {}", self.key), |tx| {
                    self.enqueue_in(&payload, tx)
                }),
        }
    }

    fn enqueue_in(&self, payload: &Value, tx: &mut S::Tx) -> Result<(), StoreError> {
        let mut queue: Vec<Value> = self
            .store
            .get_json_value(&self.key, QUEUE_SUBKEY, Some(&mut *tx))?
            .unwrap_or_default();
        queue.push(payload.clone());
        self.store.set_json_value(&self.key, QUEUE_SUBKEY, &queue, Some(tx))
    }

    /// Payloads currently waiting, head first
    pub fn pending(&self) -> Result<Vec<Value>, StoreError> {
        Ok(self
            .store
            .get_json_value(&self.key, QUEUE_SUBKEY, None)?
            .unwrap_or_default())
    }

    /// Hands up to `batch_size` payloads from the head to `process_fn`,
    /// together with the transaction that will dequeue them.
    ///
    /// Payloads it acknowledges with `true` are removed, the rest move to the
    /// tail. An error leaves the queue as it was. Returns `false` without doing
    /// anything when another call is already processing this queue.
    ///
    /// `process_fn` runs again for the same payloads if the queue changes
    /// before the batch commits, so any work it commits on its own must be
    /// idempotent. Writes made through the handed transaction commit together
    /// with the dequeue.
    pub fn process<E, F>(&self, batch_size: usize, mut process_fn: F) -> Result<bool, E>
    where
        E: From<StoreError>,
        F: FnMut(&Value, &mut S::Tx) -> Result<bool, E>,
    {
        let _guard = match self.process_lock.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => {
                debug!(queue = %self.key, "Queue is already being processed");
                return Ok(false);
            }
            Err(TryLockError::Poisoned(e)) => return Err(StoreError::Lock(e.to_string()).into()),
        };

        let name = format!("ProcessQueue {}", self.key);
        let (acked, requeued) = self.store.run_in_transaction::<_, E, _>(&name, |tx| {
            let mut queue: VecDeque<Value> = self
                .store
                .get_json_value(&self.key, QUEUE_SUBKEY, Some(&mut *tx))?
                .unwrap_or_default();
            let batch = batch_size.min(queue.len());
            if batch == 0 {
                return Ok((0, 0));
            }

            let mut requeue = Vec::new();
            for payload in queue.drain(..batch).collect::<Vec<_>>() {
                if !process_fn(&payload, &mut *tx)? {
                    requeue.push(payload);
                }
            }
            let requeued = requeue.len();
            queue.extend(requeue);
            self.store
                .set_json_value(&self.key, QUEUE_SUBKEY, &queue, Some(tx))?;
            Ok((batch - requeued, requeued))
        })?;

        if acked + requeued > 0 {
            info!(queue = %self.key, acked, requeued, "Processed queue batch");
        }
        Ok(true)
    }
}
