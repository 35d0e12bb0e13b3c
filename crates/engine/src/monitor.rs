//! Transaction timeout monitor

use crate::transaction::KernelTransactions;
use std::sync::Arc;
use tessera_core::{Clock, Status};
use tracing::warn;

/// Marks transactions that ran past their timeout.
pub struct TransactionTimeoutMonitor {
    transactions: Arc<KernelTransactions>,
    clock: Arc<dyn Clock>,
}

impl TransactionTimeoutMonitor {
    /// Monitor for `transactions`, measuring time with `clock`.
    pub fn new(transactions: Arc<KernelTransactions>, clock: Arc<dyn Clock>) -> Self {
        TransactionTimeoutMonitor {
            transactions,
            clock,
        }
    }

    /// Check every running transaction once. Returns how many were marked.
    pub fn run(&self) -> usize {
        let now = self.clock.millis();
        let mut marked = 0;
        for handle in self.transactions.active_transactions() {
            let Some(timeout) = handle.timeout() else {
                continue;
            };
            let elapsed = now.saturating_sub(handle.start_time());
            if elapsed >= timeout.as_millis() as u64
                && handle.mark_for_termination(Status::TransactionTimedOut)
            {
                warn!(
                    target: "tessera::monitor",
                    tx_id = handle.user_transaction_id(),
                    elapsed_ms = elapsed,
                    timeout_ms = timeout.as_millis() as u64,
                    "Transaction timed out"
                );
                marked += 1;
            }
        }
        marked
    }
}

impl std::fmt::Debug for TransactionTimeoutMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionTimeoutMonitor").finish()
    }
}
