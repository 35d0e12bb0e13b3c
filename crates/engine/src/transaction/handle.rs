//! Handles on running transactions

use super::slot::TransactionSlot;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tessera_core::Status;

/// A view of one transaction, safe to keep after the transaction closes.
///
/// The handle remembers the user transaction id the slot carried when the
/// handle was taken. Once the slot is reused the ids differ and the handle
/// reports the transaction as not open; marking it for termination then
/// does nothing.
#[derive(Clone)]
pub struct KernelTransactionHandle {
    slot: Arc<TransactionSlot>,
    user_transaction_id: u64,
}

impl KernelTransactionHandle {
    pub(crate) fn new(slot: Arc<TransactionSlot>) -> Self {
        let user_transaction_id = slot.sequence();
        KernelTransactionHandle {
            slot,
            user_transaction_id,
        }
    }

    /// Id of the transaction this handle was taken for.
    pub fn user_transaction_id(&self) -> u64 {
        self.user_transaction_id
    }

    /// Whether that transaction is still running.
    pub fn is_open(&self) -> bool {
        self.slot.is_open_for(self.user_transaction_id)
    }

    /// Start time in milliseconds since the epoch.
    pub fn start_time(&self) -> u64 {
        self.slot.start_time()
    }

    /// Timeout of the transaction, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.slot.timeout()
    }

    /// Reason the transaction was marked for termination.
    pub fn termination_reason(&self) -> Option<Status> {
        self.slot.termination_reason(self.user_transaction_id)
    }

    /// Mark the transaction for termination. Returns whether it was marked.
    pub fn mark_for_termination(&self, reason: Status) -> bool {
        self.slot
            .mark_for_termination(self.user_transaction_id, reason)
    }

    /// Whether the transaction has inner transactions.
    pub fn has_inner_transactions(&self) -> bool {
        self.is_open() && self.slot.inner().has_inner_transactions()
    }
}

impl PartialEq for KernelTransactionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.user_transaction_id == other.user_transaction_id
    }
}

impl Eq for KernelTransactionHandle {}

impl Hash for KernelTransactionHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.user_transaction_id.hash(state);
    }
}

impl std::fmt::Debug for KernelTransactionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelTransactionHandle")
            .field("user_transaction_id", &self.user_transaction_id)
            .field("slot", &self.slot.index())
            .field("open", &self.is_open())
            .finish()
    }
}
