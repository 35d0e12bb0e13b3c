//! Pooled transaction slot
//!
//! A slot is the reusable part of a transaction: lock client, inner
//! transaction handler, the allocated [`TransactionState`] and the
//! termination flag. Every use stamps the slot with the user transaction id
//! of its occupant. Handles remember the stamp they saw, so a handle taken
//! before the slot was reused reports the transaction as closed.
//!
//! The termination lock covers activation and the termination side effects
//! on the lock client, so a termination aimed at an earlier occupant can
//! never stop the locks of the next one. The inner handler is stamped with
//! the occupant and ignores terminations for anyone else.

use crate::locks::LockClient;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tessera_concurrency::InnerTransactionHandler;
use tessera_core::Status;
use tessera_storage::TransactionState;
use tracing::debug;

#[derive(Debug, Default)]
struct Termination {
    reason: Option<Status>,
    terminable: bool,
}

pub(crate) struct TransactionSlot {
    index: usize,
    sequence: AtomicU64,
    open: AtomicBool,
    start_time: AtomicU64,
    timeout_ms: AtomicU64,
    termination: Mutex<Termination>,
    locks: Arc<dyn LockClient>,
    inner: InnerTransactionHandler,
    state: Mutex<TransactionState>,
}

impl TransactionSlot {
    pub(crate) fn new(
        index: usize,
        locks: Arc<dyn LockClient>,
        inner: InnerTransactionHandler,
    ) -> Self {
        TransactionSlot {
            index,
            sequence: AtomicU64::new(0),
            open: AtomicBool::new(false),
            start_time: AtomicU64::new(0),
            timeout_ms: AtomicU64::new(0),
            termination: Mutex::new(Termination::default()),
            locks,
            inner,
            state: Mutex::new(TransactionState::new()),
        }
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    /// Stamp the slot for a new occupant. Caller holds the pool lock.
    pub(crate) fn activate(&self, sequence: u64, start_time: u64, timeout: Option<Duration>) {
        let mut termination = self.termination.lock();
        self.locks.reset();
        self.inner.reset_for(sequence);
        termination.reason = None;
        termination.terminable = true;
        self.start_time.store(start_time, Ordering::Release);
        self.timeout_ms.store(timeout_millis(timeout), Ordering::Release);
        self.sequence.store(sequence, Ordering::Release);
        self.open.store(true, Ordering::Release);
    }

    /// End the current occupancy. Clears the termination reason.
    pub(crate) fn deactivate(&self) {
        let mut termination = self.termination.lock();
        termination.reason = None;
        termination.terminable = false;
        self.open.store(false, Ordering::Release);
    }

    pub(crate) fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Whether the occupant stamped `sequence` is still in the slot.
    pub(crate) fn is_open_for(&self, sequence: u64) -> bool {
        self.is_open() && self.sequence() == sequence
    }

    pub(crate) fn start_time(&self) -> u64 {
        self.start_time.load(Ordering::Acquire)
    }

    pub(crate) fn timeout(&self) -> Option<Duration> {
        match self.timeout_ms.load(Ordering::Acquire) {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub(crate) fn locks(&self) -> &Arc<dyn LockClient> {
        &self.locks
    }

    pub(crate) fn inner(&self) -> &InnerTransactionHandler {
        &self.inner
    }

    /// Hand the pooled state to the new occupant.
    pub(crate) fn take_state(&self) -> TransactionState {
        std::mem::take(&mut *self.state.lock())
    }

    /// Return a cleared state for the next occupant.
    pub(crate) fn return_state(&self, mut state: TransactionState) {
        state.clear();
        *self.state.lock() = state;
    }

    /// Termination reason of occupant `sequence`.
    pub(crate) fn termination_reason(&self, sequence: u64) -> Option<Status> {
        let termination = self.termination.lock();
        if self.sequence() != sequence {
            return None;
        }
        termination.reason
    }

    /// Mark occupant `sequence` for termination.
    ///
    /// Returns false when the occupant changed, already committed or closed,
    /// or was already marked. The first reason wins.
    pub(crate) fn mark_for_termination(&self, sequence: u64, reason: Status) -> bool {
        {
            let mut termination = self.termination.lock();
            if self.sequence() != sequence || !self.is_open() || !termination.terminable {
                return false;
            }
            if termination.reason.is_some() {
                return false;
            }
            termination.reason = Some(reason);
            self.locks.stop();
        }
        debug!(target: "tessera::txn", tx_id = sequence, %reason, "Transaction marked for termination");
        // Outside the lock: the terminator reaches other slots.
        self.inner.terminate_inner_transactions_of(sequence, reason);
        true
    }

    /// Last termination checkpoint before commit. Once passed, the
    /// occupant can no longer be terminated.
    pub(crate) fn begin_commit(&self) -> Result<(), Status> {
        let mut termination = self.termination.lock();
        if let Some(reason) = termination.reason {
            return Err(reason);
        }
        termination.terminable = false;
        Ok(())
    }
}

/// Timeout as stored in a slot: 0 for none, otherwise whole millis rounded up.
pub(crate) fn timeout_millis(timeout: Option<Duration>) -> u64 {
    match timeout {
        Some(t) if !t.is_zero() => {
            u64::try_from((t.as_nanos() + 999_999) / 1_000_000).unwrap_or(u64::MAX)
        }
        _ => 0,
    }
}

impl std::fmt::Debug for TransactionSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionSlot")
            .field("index", &self.index)
            .field("sequence", &self.sequence())
            .field("open", &self.is_open())
            .finish()
    }
}
