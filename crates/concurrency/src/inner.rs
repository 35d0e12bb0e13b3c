//! Inner transactions of an outer transaction
//!
//! An outer transaction may spawn inner transactions. Terminating the outer
//! one must terminate every inner one, including inner transactions that
//! register concurrently with the termination. Registration and
//! termination therefore meet under one lock: whichever runs second sees
//! what the first did. The terminator is called after the lock is
//! released.
//!
//! A pooled handler serves one outer transaction after another. Each use is
//! stamped with its occupant, and a termination aimed at an earlier occupant
//! is ignored.

use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use std::sync::Arc;
use tessera_core::Status;
use tracing::debug;

/// Marks transactions for termination by user transaction id.
pub trait TransactionTerminator: Send + Sync {
    /// Mark the transaction `user_transaction_id` for termination.
    fn terminate(&self, user_transaction_id: u64, reason: Status);
}

#[derive(Debug, Default)]
struct InnerState {
    occupant: u64,
    ids: FxHashSet<u64>,
    terminated: Option<Status>,
}

/// Registry of the inner transactions of one outer transaction.
pub struct InnerTransactionHandler {
    state: Mutex<InnerState>,
    terminator: Arc<dyn TransactionTerminator>,
}

impl InnerTransactionHandler {
    /// Handler terminating through `terminator`.
    pub fn new(terminator: Arc<dyn TransactionTerminator>) -> Self {
        InnerTransactionHandler {
            state: Mutex::new(InnerState::default()),
            terminator,
        }
    }

    /// Register an inner transaction. Terminated immediately if the outer
    /// transaction already was.
    pub fn register_inner_transaction(&self, user_transaction_id: u64) {
        let terminated = {
            let mut state = self.state.lock();
            state.ids.insert(user_transaction_id);
            state.terminated
        };
        if let Some(reason) = terminated {
            debug!(
                target: "tessera::txn",
                tx_id = user_transaction_id,
                %reason,
                "Inner transaction registered after termination"
            );
            self.terminator.terminate(user_transaction_id, reason);
        }
    }

    /// Forget a finished inner transaction.
    pub fn remove_inner_transaction(&self, user_transaction_id: u64) {
        self.state.lock().ids.remove(&user_transaction_id);
    }

    /// Terminate every registered inner transaction, and every one
    /// registered from now on.
    pub fn terminate_inner_transactions(&self, reason: Status) {
        let ids: Vec<u64> = {
            let mut state = self.state.lock();
            Self::mark_terminated(&mut state, reason)
        };
        self.terminate_all(ids, reason);
    }

    /// Like [`terminate_inner_transactions`](Self::terminate_inner_transactions),
    /// but only while `occupant` is the outer transaction served.
    ///
    /// Returns false, doing nothing, once the handler moved on.
    pub fn terminate_inner_transactions_of(&self, occupant: u64, reason: Status) -> bool {
        let ids: Vec<u64> = {
            let mut state = self.state.lock();
            if state.occupant != occupant {
                return false;
            }
            Self::mark_terminated(&mut state, reason)
        };
        self.terminate_all(ids, reason);
        true
    }

    fn mark_terminated(state: &mut InnerState, reason: Status) -> Vec<u64> {
        if state.terminated.is_none() {
            state.terminated = Some(reason);
        }
        state.ids.iter().copied().collect()
    }

    fn terminate_all(&self, ids: Vec<u64>, reason: Status) {
        for id in ids {
            self.terminator.terminate(id, reason);
        }
    }

    /// Whether any inner transaction is registered.
    pub fn has_inner_transactions(&self) -> bool {
        !self.state.lock().ids.is_empty()
    }

    /// Reason of the termination, if it happened.
    pub fn termination_reason(&self) -> Option<Status> {
        self.state.lock().terminated
    }

    /// Clear state so the handler can serve the next transaction.
    pub fn reset(&self) {
        self.reset_for(0);
    }

    /// Clear state and serve outer transaction `occupant`.
    pub fn reset_for(&self, occupant: u64) {
        let mut state = self.state.lock();
        state.occupant = occupant;
        state.ids.clear();
        state.terminated = None;
    }
}

impl std::fmt::Debug for InnerTransactionHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("InnerTransactionHandler")
            .field("inner", &state.ids.len())
            .field("terminated", &state.terminated)
            .finish()
    }
}
