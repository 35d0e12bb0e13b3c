//! Transaction queue
//!
//! Collects small transactions into one batch chain and hands the chain to
//! an [`Applier`] once `batch_size` batches are queued. Amortizes apply
//! overhead for frequent, tiny transactions such as those streamed in from
//! an external source.

use crate::commit::CommitProcess;
use std::sync::Arc;
use tessera_core::{Result, TransactionApplicationMode};
use tessera_storage::{BatchChain, CommandBatchToApply, StorageEngine};
use tracing::trace;

/// Applies a full chain of queued batches.
pub trait Applier: Send {
    /// Apply every batch in `chain`.
    fn apply(&mut self, chain: &mut BatchChain) -> Result<()>;
}

/// Batches queued transactions and applies them in groups.
pub struct TransactionQueue<A: Applier> {
    max_size: usize,
    applier: A,
    chain: BatchChain,
}

impl<A: Applier> TransactionQueue<A> {
    /// Queue flushing to `applier` every `max_size` batches.
    ///
    /// # Panics
    ///
    /// Panics if `max_size` is zero.
    pub fn new(max_size: usize, applier: A) -> Self {
        assert!(max_size > 0, "queue size must be at least 1");
        TransactionQueue {
            max_size,
            applier,
            chain: BatchChain::new(),
        }
    }

    /// Queue `batch` behind the previously queued one. Applies the queue
    /// when it is full.
    pub fn queue(&mut self, batch: CommandBatchToApply) -> Result<()> {
        self.chain.push(batch);
        if self.chain.len() >= self.max_size {
            self.apply_transactions()?;
        }
        Ok(())
    }

    /// Apply whatever is queued, even a partial batch.
    ///
    /// The queue is empty afterwards whatever the outcome; every batch that
    /// was queued is closed.
    pub fn apply_transactions(&mut self) -> Result<()> {
        if self.chain.is_empty() {
            return Ok(());
        }
        let mut chain = self.chain.take();
        trace!(target: "tessera::commit", batches = chain.len(), "Applying queued transactions");
        let result = self.applier.apply(&mut chain);
        chain.close();
        result
    }

    /// Number of queued batches.
    pub fn len(&self) -> usize {
        self.chain.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    /// The applier.
    pub fn applier(&self) -> &A {
        &self.applier
    }
}

impl<A: Applier> std::fmt::Debug for TransactionQueue<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionQueue")
            .field("max_size", &self.max_size)
            .field("queued", &self.chain.len())
            .finish()
    }
}

/// Applies queued chains straight to the store, bypassing the log.
///
/// Used when the batches are already durable, as in recovery.
pub struct StorageApplier {
    storage: Arc<dyn StorageEngine>,
    mode: TransactionApplicationMode,
}

impl StorageApplier {
    /// Apply to `storage` in `mode`.
    pub fn new(storage: Arc<dyn StorageEngine>, mode: TransactionApplicationMode) -> Self {
        StorageApplier { storage, mode }
    }
}

impl Applier for StorageApplier {
    fn apply(&mut self, chain: &mut BatchChain) -> Result<()> {
        self.storage.apply(chain, self.mode)
    }
}

/// Commits queued chains through the full commit process.
pub struct CommitProcessApplier {
    process: Arc<CommitProcess>,
    mode: TransactionApplicationMode,
    last_transaction_id: u64,
}

impl CommitProcessApplier {
    /// Commit through `process` in `mode`.
    pub fn new(process: Arc<CommitProcess>, mode: TransactionApplicationMode) -> Self {
        CommitProcessApplier {
            process,
            mode,
            last_transaction_id: 0,
        }
    }

    /// Id of the last transaction committed through this applier.
    pub fn last_transaction_id(&self) -> u64 {
        self.last_transaction_id
    }
}

impl Applier for CommitProcessApplier {
    fn apply(&mut self, chain: &mut BatchChain) -> Result<()> {
        self.last_transaction_id = self.process.commit(chain, self.mode)?;
        Ok(())
    }
}
