//! Commit-order serialization of ordering-sensitive batches
//!
//! Batches that require application ordering register with
//! [`ApplicationOrdering`] when the log hands them their coordinates. The
//! key is the append index, so keys grow in log order even for later chunks
//! of a transaction that carry an older transaction id. Before applying, a
//! batch waits until no lower key is pending; after applying (or on close,
//! if it never applied) it deregisters.
//!
//! Batches that do not require ordering never register and apply freely in
//! parallel.

use parking_lot::{Condvar, Mutex};
use std::collections::BTreeSet;

/// Append index of a registered batch.
pub type OrderingKey = u64;

/// Tracks ordering-sensitive batches that are appended but not yet applied.
#[derive(Debug, Default)]
pub struct ApplicationOrdering {
    pending: Mutex<BTreeSet<OrderingKey>>,
    turn: Condvar,
}

impl ApplicationOrdering {
    /// Create an empty ordering.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a batch. Must be called in append order.
    pub fn register(&self, key: OrderingKey) {
        let inserted = self.pending.lock().insert(key);
        debug_assert!(inserted, "batch {:?} registered twice", key);
    }

    /// Block until every lower registered key has completed.
    pub fn await_turn(&self, key: OrderingKey) {
        let mut pending = self.pending.lock();
        while pending.first().is_some_and(|first| *first < key) {
            self.turn.wait(&mut pending);
        }
    }

    /// Deregister a batch and wake waiters.
    ///
    /// Returns false if the key was not registered.
    pub fn complete(&self, key: OrderingKey) -> bool {
        let removed = self.pending.lock().remove(&key);
        if removed {
            self.turn.notify_all();
        }
        removed
    }

    /// Number of registered batches.
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }
}
