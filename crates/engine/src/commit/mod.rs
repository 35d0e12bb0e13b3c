//! Commit process
//!
//! Drives one batch chain from commands to a closed transaction:
//!
//! ```text
//! CREATED → COMMANDS_CREATED → APPENDED → COMMITTED → APPLIED → CLOSED
//!                  └──────────────┴───────────┴──────────┴──→ FAILED
//! ```
//!
//! 1. Pre-allocate log space for the chain (when enabled)
//! 2. Append to the log; the appender assigns commit ids
//! 3. Publish the chain as committed
//! 4. Apply the chain to the store in the requested mode
//! 5. Close the chain, publishing it as closed
//!
//! Every id that was handed out is closed on every path, so the closed
//! watermark never stalls behind a failed transaction. A failure after an
//! id was assigned leaves the store behind the log, which panics the
//! database health.

pub mod listeners;

pub use listeners::{CommitListener, CommitListeners};

use crate::health::DatabaseHealth;
use std::fmt;
use std::sync::Arc;
use tessera_core::{
    KernelError, KernelVersion, Result, Status, TransactionApplicationMode, TransactionId,
    TransactionIdStore, UNKNOWN_CONSENSUS_INDEX, UNKNOWN_TX_COMMIT_TIMESTAMP, UNKNOWN_TX_ID,
};
use tessera_concurrency::TransactionCommitment;
use tessera_durability::{estimated_size, LogAppender};
use tessera_storage::{BatchChain, CommandBatch, CommandBatchToApply, CursorContext, StorageEngine};
use tracing::{debug, error, trace, warn};

/// Step a commit has reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommitPhase {
    /// Nothing done yet
    Created,
    /// Commands built into a chain
    CommandsCreated,
    /// Chain written to the log
    Appended,
    /// Chain published as committed
    Committed,
    /// Chain applied to the store
    Applied,
    /// Chain closed
    Closed,
    /// A step failed
    Failed,
}

impl CommitPhase {
    /// Whether `next` may follow this phase.
    pub fn can_transition_to(self, next: CommitPhase) -> bool {
        use CommitPhase::*;
        matches!(
            (self, next),
            (Created, CommandsCreated)
                | (CommandsCreated, Appended)
                | (Appended, Committed)
                | (Committed, Applied)
                | (Applied, Closed)
                | (CommandsCreated | Appended | Committed | Applied, Failed)
        )
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, CommitPhase::Closed | CommitPhase::Failed)
    }
}

impl fmt::Display for CommitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommitPhase::Created => "CREATED",
            CommitPhase::CommandsCreated => "COMMANDS_CREATED",
            CommitPhase::Appended => "APPENDED",
            CommitPhase::Committed => "COMMITTED",
            CommitPhase::Applied => "APPLIED",
            CommitPhase::Closed => "CLOSED",
            CommitPhase::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

struct PhaseTracker {
    phase: CommitPhase,
}

impl PhaseTracker {
    fn new() -> Self {
        PhaseTracker {
            phase: CommitPhase::Created,
        }
    }

    fn advance(&mut self, next: CommitPhase) {
        assert!(
            self.phase.can_transition_to(next),
            "illegal commit transition {} -> {}",
            self.phase,
            next
        );
        trace!(target: "tessera::commit", from = %self.phase, to = %next, "Commit phase");
        self.phase = next;
    }
}

/// Orchestrates append, publish and apply of batch chains.
pub struct CommitProcess {
    appender: Arc<dyn LogAppender>,
    storage: Arc<dyn StorageEngine>,
    id_store: Arc<dyn TransactionIdStore>,
    health: Arc<DatabaseHealth>,
    listeners: CommitListeners,
    preallocate: bool,
}

impl CommitProcess {
    /// Commit process over the given collaborators.
    pub fn new(
        appender: Arc<dyn LogAppender>,
        storage: Arc<dyn StorageEngine>,
        id_store: Arc<dyn TransactionIdStore>,
        health: Arc<DatabaseHealth>,
        preallocate: bool,
    ) -> Self {
        CommitProcess {
            appender,
            storage,
            id_store,
            health,
            listeners: CommitListeners::new(),
            preallocate,
        }
    }

    /// Listeners told about every outcome.
    pub fn listeners(&self) -> &CommitListeners {
        &self.listeners
    }

    /// The storage engine batches are applied to.
    pub fn storage(&self) -> &Arc<dyn StorageEngine> {
        &self.storage
    }

    /// Wrap `batch` for this process: a commitment reporting to the id
    /// store, cursors on the store and the store's application ordering.
    pub fn prepare(&self, batch: CommandBatch, tag: &'static str) -> CommandBatchToApply {
        CommandBatchToApply::new(
            batch,
            Box::new(TransactionCommitment::new(Arc::clone(&self.id_store))),
            CursorContext::new(tag),
            self.storage.create_store_cursors(),
        )
        .with_application_ordering(self.storage.application_ordering())
    }

    /// Commit `chain` in `mode`. Returns the id of its last transaction.
    ///
    /// The chain is closed on return, whatever the outcome.
    pub fn commit(&self, chain: &mut BatchChain, mode: TransactionApplicationMode) -> Result<u64> {
        let mut tracker = PhaseTracker::new();
        tracker.advance(CommitPhase::CommandsCreated);

        let result = self.run(chain, mode, &mut tracker);
        chain.close();

        match result {
            Ok(transaction_id) => {
                tracker.advance(CommitPhase::Closed);
                for e in self.listeners.notify_success(chain, transaction_id) {
                    warn!(
                        target: "tessera::commit",
                        tx_id = transaction_id,
                        error = %e,
                        "Commit listener failed on success"
                    );
                }
                debug!(
                    target: "tessera::commit",
                    tx_id = transaction_id,
                    batches = chain.len(),
                    %mode,
                    "Transaction committed"
                );
                Ok(transaction_id)
            }
            Err(e) => {
                let failed_at = tracker.phase;
                tracker.advance(CommitPhase::Failed);
                warn!(
                    target: "tessera::commit",
                    phase = %failed_at,
                    %mode,
                    error = %e,
                    "Commit failed"
                );
                let suppressed = self.listeners.notify_failure(chain, &e);
                Err(suppressed
                    .into_iter()
                    .fold(e, |primary, secondary| primary.with_suppressed(secondary)))
            }
        }
    }

    fn run(
        &self,
        chain: &mut BatchChain,
        mode: TransactionApplicationMode,
        tracker: &mut PhaseTracker,
    ) -> Result<u64> {
        self.health.assert_healthy()?;

        if self.preallocate {
            self.appender
                .preallocate(estimated_size(chain))
                .map_err(|e| {
                    let status = match e.status() {
                        Status::OutOfDiskSpace => Status::OutOfDiskSpace,
                        _ => Status::TransactionLogError,
                    };
                    KernelError::transaction_failure(
                        status,
                        "Could not pre-allocate disk space for the transaction log",
                        e,
                    )
                })?;
        }

        let preset: Vec<u64> = chain
            .iter()
            .map(|batch| batch.transaction_id())
            .filter(|id| *id != UNKNOWN_TX_ID)
            .collect();
        let transaction_id = match self.appender.append(chain) {
            Ok(id) => id,
            Err(e) => {
                self.close_after_failed_append(chain, &preset, &e);
                return Err(KernelError::transaction_failure(
                    Status::TransactionLogError,
                    "Could not append transaction to the log",
                    e,
                ));
            }
        };
        tracker.advance(CommitPhase::Appended);

        chain.commit();
        tracker.advance(CommitPhase::Committed);

        if let Err(e) = self.storage.apply(chain, mode) {
            let failure = KernelError::transaction_failure(
                Status::TransactionCommitFailed,
                format!(
                    "Could not apply transaction {} to the store after it was written to the log",
                    transaction_id
                ),
                e,
            );
            self.health.panic(&failure);
            let orphaned = Self::ids_without_last_batch(chain);
            self.report_never_published(&orphaned, &failure);
            return Err(failure);
        }
        tracker.advance(CommitPhase::Applied);
        Ok(transaction_id)
    }

    /// Keep the watermarks moving after an append failed part way.
    ///
    /// Appended batches are durable and get published as committed. Ids the
    /// log assigned to batches never written are reported committed and
    /// closed directly, then the database panics. Ids in `preset` were
    /// known before the append; their owner finishes them.
    fn close_after_failed_append(
        &self,
        chain: &mut BatchChain,
        preset: &[u64],
        cause: &KernelError,
    ) {
        let mut unwritten: Vec<u64> = Vec::new();
        for index in chain.link_order() {
            let Some(batch) = chain.get_mut(index) else {
                continue;
            };
            if batch.is_appended() {
                batch.commit();
            } else if batch.transaction_id() != UNKNOWN_TX_ID
                && !preset.contains(&batch.transaction_id())
                && !unwritten.contains(&batch.transaction_id())
            {
                unwritten.push(batch.transaction_id());
            }
        }
        if unwritten.is_empty() {
            return;
        }
        self.report_never_published(&unwritten, cause);
        self.health.panic(&KernelError::transaction_failure(
            Status::TransactionLogError,
            format!("Log append failed after assigning transaction ids {:?}", unwritten),
            KernelError::Storage(cause.to_string()),
        ));
    }

    /// Ids of appended batches whose transaction has no last chunk in
    /// `chain`. Their commitments never publish.
    fn ids_without_last_batch(chain: &BatchChain) -> Vec<u64> {
        let mut ids: Vec<u64> = Vec::new();
        for batch in chain.iter() {
            let id = batch.transaction_id();
            if !batch.is_appended() || ids.contains(&id) {
                continue;
            }
            let has_last = chain
                .iter()
                .any(|other| other.transaction_id() == id && other.batch().is_last());
            if !has_last {
                ids.push(id);
            }
        }
        ids
    }

    /// Report `ids` committed and closed with unknown metadata.
    fn report_never_published(&self, ids: &[u64], cause: &KernelError) {
        if ids.is_empty() {
            return;
        }
        let position = self.id_store.last_batch().log_position_after;
        for id in ids {
            let transaction = TransactionId::new(
                *id,
                0,
                KernelVersion::LATEST,
                0,
                UNKNOWN_TX_COMMIT_TIMESTAMP,
                UNKNOWN_CONSENSUS_INDEX,
            );
            self.id_store.transaction_committed(transaction);
            self.id_store.transaction_closed(transaction, position);
            error!(
                target: "tessera::commit",
                tx_id = *id,
                error = %cause,
                "Closing transaction that will never be published"
            );
        }
    }
}

impl fmt::Debug for CommitProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommitProcess")
            .field("preallocate", &self.preallocate)
            .field("listeners", &self.listeners)
            .finish()
    }
}
