//! Log replay at startup
//!
//! ## Procedure
//!
//! 1. Read the log from the last checkpoint (or the log start)
//! 2. Cut the log at the first unreadable entry
//! 3. Undo the tail in reverse order (REVERSE_RECOVERY)
//! 4. Replay complete transactions forward (RECOVERY)
//! 5. Reset the id store to the last logged transaction
//!
//! Transactions whose last logged batch is a rollback chunk, and
//! transactions with no last chunk in the log, are undone but not replayed.
//! Undoing restores core-store before-images and takes back the count
//! deltas the store already counted, so an unfinished chunked transaction
//! leaves no counts behind in a live store.

use rustc_hash::FxHashMap;
use tessera_core::{
    KernelError, LogPosition, NoCommitment, Result, TransactionApplicationMode, TransactionId,
    TransactionIdStore,
};
use tessera_durability::{InMemoryTransactionLog, PositionedEntry};
use tessera_storage::{
    BatchChain, CommandBatch, CommandBatchToApply, CursorContext, NoStoreCursors,
    RecordCommandReaderFactory, StorageEngine,
};
use tracing::{debug, info, warn};

/// Statistics from one recovery run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Log entries read after the checkpoint
    pub entries_read: usize,
    /// Transactions replayed forward
    pub transactions_replayed: usize,
    /// Transactions with no last chunk in the log
    pub incomplete_transactions: usize,
    /// Transactions ended by a rollback chunk
    pub rolled_back_transactions: usize,
    /// Where the log was cut, if an unreadable entry was found
    pub truncated_at: Option<LogPosition>,
    /// Transaction the id store was reset to
    pub last_transaction: Option<TransactionId>,
    /// Whether reading started at a checkpoint
    pub from_checkpoint: bool,
}

impl RecoveryStats {
    /// Transactions seen after the checkpoint.
    pub fn total_transactions(&self) -> usize {
        self.transactions_replayed + self.incomplete_transactions + self.rolled_back_transactions
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Complete,
    RolledBack,
    Incomplete,
}

/// Replays the transaction log into a storage engine.
pub struct Recovery<'a> {
    log: &'a InMemoryTransactionLog,
    storage: &'a dyn StorageEngine,
    id_store: &'a dyn TransactionIdStore,
    readers: RecordCommandReaderFactory,
}

impl<'a> Recovery<'a> {
    /// Recovery of `storage` and `id_store` from `log`.
    pub fn new(
        log: &'a InMemoryTransactionLog,
        storage: &'a dyn StorageEngine,
        id_store: &'a dyn TransactionIdStore,
    ) -> Self {
        Recovery {
            log,
            storage,
            id_store,
            readers: RecordCommandReaderFactory::new(),
        }
    }

    /// Run recovery.
    ///
    /// # Errors
    ///
    /// Fails if a readable entry holds commands no reader understands, or
    /// if the storage engine rejects a replayed batch.
    pub fn recover(&self) -> Result<RecoveryStats> {
        let checkpoint = self.log.last_checkpoint();
        let start = checkpoint.map(|c| c.position).unwrap_or(LogPosition::START);
        let mut stats = RecoveryStats {
            from_checkpoint: checkpoint.is_some(),
            ..RecoveryStats::default()
        };
        info!(target: "tessera::recovery", %start, "Starting recovery");

        let scan = self.log.read_from(start);
        if let Some((position, error)) = &scan.corruption {
            warn!(
                target: "tessera::recovery",
                %position,
                error = %error,
                "Truncating log at unreadable entry"
            );
            self.log.truncate(*position);
            stats.truncated_at = Some(*position);
        }
        let entries = scan.entries;
        stats.entries_read = entries.len();

        let batches = entries
            .iter()
            .map(|positioned| positioned.entry.to_batch(&self.readers))
            .collect::<Result<Vec<CommandBatch>>>()?;

        let outcomes = classify(&entries);
        for outcome in outcomes.values() {
            match outcome {
                Outcome::Complete => stats.transactions_replayed += 1,
                Outcome::RolledBack => stats.rolled_back_transactions += 1,
                Outcome::Incomplete => stats.incomplete_transactions += 1,
            }
        }

        for (positioned, batch) in entries.iter().zip(&batches).rev() {
            self.apply(positioned, batch.clone(), TransactionApplicationMode::ReverseRecovery)?;
        }

        for (positioned, batch) in entries.iter().zip(batches) {
            let tx_id = positioned.entry.transaction_id;
            if outcomes.get(&tx_id) == Some(&Outcome::Complete) {
                self.apply(positioned, batch, TransactionApplicationMode::Recovery)?;
            } else {
                debug!(
                    target: "tessera::recovery",
                    tx_id,
                    chunk_id = positioned.entry.chunk_id,
                    "Skipping batch of unfinished transaction"
                );
            }
        }

        let checkpointed = checkpoint.map(|c| (c.transaction_id, c.position));
        stats.last_transaction = self.reset_id_store(&entries, checkpointed)?;

        info!(
            target: "tessera::recovery",
            entries = stats.entries_read,
            replayed = stats.transactions_replayed,
            incomplete = stats.incomplete_transactions,
            rolled_back = stats.rolled_back_transactions,
            last_tx_id = stats.last_transaction.map(|t| t.id).unwrap_or(0),
            "Recovery complete"
        );
        Ok(stats)
    }

    fn apply(
        &self,
        positioned: &PositionedEntry,
        batch: CommandBatch,
        mode: TransactionApplicationMode,
    ) -> Result<()> {
        let entry = &positioned.entry;
        let mut chain = BatchChain::single(
            CommandBatchToApply::new(
                batch,
                Box::new(NoCommitment),
                CursorContext::new("recovery"),
                Box::new(NoStoreCursors),
            )
            .with_transaction_id(entry.transaction_id)
            .with_chunk(entry.chunk_id, entry.previous_batch_position),
        );
        let result = self.storage.apply(&mut chain, mode);
        chain.close();
        result
    }

    fn reset_id_store(
        &self,
        entries: &[PositionedEntry],
        checkpoint: Option<(TransactionId, LogPosition)>,
    ) -> Result<Option<TransactionId>> {
        // A later chunk of a transaction may be logged after higher ids.
        let highest = entries
            .iter()
            .max_by_key(|positioned| (positioned.entry.transaction_id, positioned.entry.append_index));
        let (transaction, position) = match (highest, entries.last(), checkpoint) {
            (Some(highest), Some(last), _) => {
                let entry = &highest.entry;
                let transaction = TransactionId::new(
                    entry.transaction_id,
                    entry.append_index,
                    entry.kernel_version,
                    highest.checksum,
                    entry.metadata.time_committed,
                    entry.metadata.consensus_index,
                );
                self.log.set_last_append_index(last.entry.append_index);
                (transaction, last.position_after)
            }
            (_, _, Some(checkpoint)) => checkpoint,
            _ => return Ok(None),
        };

        if transaction.id < self.id_store.last_committed_transaction_id() {
            return Err(KernelError::CorruptedLog(format!(
                "log ends at transaction {} but the id store is already at {}",
                transaction.id,
                self.id_store.last_committed_transaction_id()
            )));
        }
        self.id_store
            .set_last_committed_and_closed_transaction_id(transaction, position);
        if let Some(last) = entries.last() {
            self.id_store
                .append_batch(last.entry.append_index, last.position_after);
        }
        Ok(Some(transaction))
    }
}

impl std::fmt::Debug for Recovery<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recovery").finish()
    }
}

/// Outcome of every transaction in `entries`, decided by its last entry.
fn classify(entries: &[PositionedEntry]) -> FxHashMap<u64, Outcome> {
    let mut outcomes = FxHashMap::default();
    for positioned in entries {
        let entry = &positioned.entry;
        let outcome = if entry.is_rollback() {
            Outcome::RolledBack
        } else if entry.is_last() {
            Outcome::Complete
        } else {
            Outcome::Incomplete
        };
        outcomes.insert(entry.transaction_id, outcome);
    }
    outcomes
}
