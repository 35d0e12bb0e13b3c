//! A running kernel transaction
//!
//! Writes accumulate in a pooled [`TransactionState`]. Commit turns them
//! into commands and hands them to the commit process:
//!
//! 1. Termination checkpoint
//! 2. Exclusive locks on every touched node, in id order
//! 3. Commands created by the storage engine
//! 4. Last termination checkpoint; past it the transaction can no longer
//!    be terminated
//! 5. Commit process in INTERNAL mode
//!
//! Closing returns the slot to the pool. A transaction that is dropped
//! without being closed closes itself.

use super::registry::RegistryShared;
use super::slot::TransactionSlot;
use std::sync::Arc;
use std::time::Duration;
use tessera_concurrency::InnerTransactionHandler;
use tessera_core::{
    KernelError, KernelVersion, LogPosition, NoCommitment, Result, Status,
    TransactionApplicationMode, READ_ONLY_ID, UNKNOWN_TX_ID,
};
use tessera_storage::{
    BatchChain, BatchMetadata, Command, CommandBatch, CommandBatchToApply, CursorContext,
    NoStoreCursors, StorageEngine, StorageReader, TransactionState,
};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Open,
    Committed,
    RolledBack,
}

/// One transaction, backed by a pooled slot.
pub struct KernelTransaction {
    slot: Arc<TransactionSlot>,
    registry: Arc<RegistryShared>,
    user_transaction_id: u64,
    latest_committed_when_started: u64,
    state: TransactionState,
    phase: Phase,
    was_terminated: bool,
    closed: bool,
}

impl KernelTransaction {
    pub(crate) fn new(
        slot: Arc<TransactionSlot>,
        registry: Arc<RegistryShared>,
        user_transaction_id: u64,
        latest_committed_when_started: u64,
    ) -> Self {
        let state = slot.take_state();
        KernelTransaction {
            slot,
            registry,
            user_transaction_id,
            latest_committed_when_started,
            state,
            phase: Phase::Open,
            was_terminated: false,
            closed: false,
        }
    }

    /// Id of this transaction, unique for the lifetime of the registry.
    pub fn user_transaction_id(&self) -> u64 {
        self.user_transaction_id
    }

    /// Start time in milliseconds since the epoch.
    pub fn start_time(&self) -> u64 {
        self.slot.start_time()
    }

    /// Timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.slot.timeout()
    }

    /// Whether neither commit nor rollback has happened.
    pub fn is_open(&self) -> bool {
        self.phase == Phase::Open && !self.closed
    }

    /// Reason this transaction was marked for termination.
    pub fn termination_reason(&self) -> Option<Status> {
        self.slot.termination_reason(self.user_transaction_id)
    }

    /// Mark for termination. The first reason wins; ignored once the
    /// transaction passed its last commit checkpoint or closed.
    pub fn mark_for_termination(&self, reason: Status) -> bool {
        self.slot
            .mark_for_termination(self.user_transaction_id, reason)
    }

    /// Mark for termination if this is transaction `user_transaction_id`.
    pub fn mark_for_termination_if(&self, user_transaction_id: u64, reason: Status) -> bool {
        user_transaction_id == self.user_transaction_id && self.mark_for_termination(reason)
    }

    /// Inner transactions of this transaction.
    pub fn inner_transaction_handler(&self) -> &InnerTransactionHandler {
        self.slot.inner()
    }

    /// Pending changes.
    pub fn state(&self) -> &TransactionState {
        &self.state
    }

    fn storage(&self) -> &Arc<dyn StorageEngine> {
        self.registry.process.storage()
    }

    fn assert_open(&self) -> Result<()> {
        match self.phase {
            Phase::Committed => {
                return Err(KernelError::NotInTransaction(
                    "the transaction has been committed".to_string(),
                ))
            }
            Phase::RolledBack => {
                return Err(KernelError::NotInTransaction(
                    "the transaction has been rolled back".to_string(),
                ))
            }
            Phase::Open => {}
        }
        if let Some(reason) = self.termination_reason() {
            return Err(KernelError::TransactionTerminated(reason));
        }
        Ok(())
    }

    /// Create a node. Returns its id.
    pub fn create_node(&mut self) -> Result<u64> {
        self.assert_open()?;
        let id = self.storage().reserve_node_id();
        self.state.node_created(id);
        Ok(id)
    }

    /// Delete a node.
    pub fn delete_node(&mut self, id: u64) -> Result<()> {
        self.assert_open()?;
        self.state.node_deleted(id);
        Ok(())
    }

    /// Add a label to a node.
    pub fn add_label(&mut self, node: u64, label: u32) -> Result<()> {
        self.assert_open()?;
        self.state.label_added(node, label);
        Ok(())
    }

    /// Set a property on a node.
    pub fn set_property(&mut self, node: u64, key: u32, value: i64) -> Result<()> {
        self.assert_open()?;
        self.state.property_set(node, key, value);
        Ok(())
    }

    /// Remove a property from a node.
    pub fn remove_property(&mut self, node: u64, key: u32) -> Result<()> {
        self.assert_open()?;
        self.state.property_removed(node, key);
        Ok(())
    }

    /// Commit. Returns the commit id, or [`READ_ONLY_ID`] when there was
    /// nothing to write.
    pub fn commit(&mut self) -> Result<u64> {
        let commands = match self.prepare_commit()? {
            Some(commands) => commands,
            None => return Ok(READ_ONLY_ID),
        };

        let batch = CommandBatch::complete(commands, self.metadata());
        let mut chain = BatchChain::single(self.registry.process.prepare(batch, "commit"));
        let result = self
            .registry
            .process
            .commit(&mut chain, TransactionApplicationMode::Internal);
        self.finish_commit(result)
    }

    /// Commit in chunks of at most `chunk_size` commands, all sharing one
    /// commit id.
    ///
    /// If a chunk fails, chunks already applied are undone in MVCC_ROLLBACK
    /// mode and a rollback chunk is written for the transaction.
    pub fn commit_chunked(&mut self, chunk_size: usize) -> Result<u64> {
        assert!(chunk_size > 0, "chunk size must be at least 1");
        let commands = match self.prepare_commit()? {
            Some(commands) => commands,
            None => return Ok(READ_ONLY_ID),
        };

        let chunks: Vec<Vec<Command>> = if commands.is_empty() {
            vec![Vec::new()]
        } else {
            commands.chunks(chunk_size).map(|c| c.to_vec()).collect()
        };
        let last = chunks.len() - 1;
        let metadata = self.metadata();
        let process = Arc::clone(&self.registry.process);

        let mut transaction_id = UNKNOWN_TX_ID;
        let mut previous_position = LogPosition::UNSPECIFIED;
        let mut applied: Vec<CommandBatch> = Vec::new();

        for (index, chunk) in chunks.into_iter().enumerate() {
            let chunk_id = index as u64 + 1;
            let batch = CommandBatch::chunk(chunk, metadata.clone(), index == 0, index == last);
            let mut to_apply = process
                .prepare(batch.clone(), "chunk")
                .with_chunk(chunk_id, previous_position);
            if transaction_id != UNKNOWN_TX_ID {
                to_apply = to_apply.with_transaction_id(transaction_id);
            }
            let mut chain = BatchChain::single(to_apply);

            match process.commit(&mut chain, TransactionApplicationMode::Internal) {
                Ok(id) => {
                    transaction_id = id;
                    previous_position = chain
                        .head()
                        .and_then(|b| b.log_position_after())
                        .unwrap_or(previous_position);
                    // Keep the appended copy: undoing it needs its append index.
                    applied.push(chain.head().map(|b| b.batch().clone()).unwrap_or(batch));
                }
                Err(e) => {
                    if transaction_id == UNKNOWN_TX_ID {
                        transaction_id = chain
                            .head()
                            .map(|b| b.transaction_id())
                            .unwrap_or(UNKNOWN_TX_ID);
                    }
                    let e = self.roll_back_chunks(
                        e,
                        &applied,
                        transaction_id,
                        chunk_id,
                        previous_position,
                        &metadata,
                    );
                    return self.finish_commit(Err(e));
                }
            }
        }
        self.finish_commit(Ok(transaction_id))
    }

    /// Undo `applied` chunks and write a rollback chunk. Secondary failures
    /// are attached to `cause`.
    fn roll_back_chunks(
        &self,
        cause: KernelError,
        applied: &[CommandBatch],
        transaction_id: u64,
        failed_chunk_id: u64,
        previous_position: LogPosition,
        metadata: &BatchMetadata,
    ) -> KernelError {
        let mut error = cause;
        let process = &self.registry.process;

        if !applied.is_empty() {
            let mut undo = BatchChain::new();
            for (index, batch) in applied.iter().enumerate() {
                undo.push(
                    CommandBatchToApply::new(
                        batch.clone(),
                        Box::new(NoCommitment),
                        CursorContext::new("rollback"),
                        Box::new(NoStoreCursors),
                    )
                    .with_transaction_id(transaction_id)
                    .with_chunk(index as u64 + 1, LogPosition::UNSPECIFIED),
                );
            }
            if let Err(e) = self
                .storage()
                .apply(&mut undo, TransactionApplicationMode::MvccRollback)
            {
                error = error.with_suppressed(e);
            }
            undo.close();
        }

        // Without an id nothing reached the log. A panicked database has
        // already closed the id.
        if transaction_id == UNKNOWN_TX_ID || applied.is_empty() {
            return error;
        }
        let rollback = process
            .prepare(CommandBatch::rollback_chunk(metadata.clone()), "rollback")
            .with_transaction_id(transaction_id)
            .with_chunk(failed_chunk_id, previous_position);
        let mut chain = BatchChain::single(rollback);
        match process.commit(&mut chain, TransactionApplicationMode::MvccRollback) {
            Ok(_) => debug!(
                target: "tessera::txn",
                tx_id = transaction_id,
                chunks = applied.len(),
                "Chunked transaction rolled back"
            ),
            Err(e) => error = error.with_suppressed(e),
        }
        error
    }

    fn metadata(&self) -> BatchMetadata {
        BatchMetadata {
            time_started: self.start_time(),
            time_committed: self.registry.clock.millis(),
            latest_committed_tx_when_started: self.latest_committed_when_started,
            kernel_version: KernelVersion::LATEST,
            ..BatchMetadata::default()
        }
    }

    /// Checkpoints, locks and command creation. `None` for read-only.
    fn prepare_commit(&mut self) -> Result<Option<Vec<Command>>> {
        match self.phase {
            Phase::Open => {}
            _ => {
                return Err(KernelError::NotInTransaction(
                    "the transaction has already been committed or rolled back".to_string(),
                ))
            }
        }
        self.fail_if_terminated()?;

        if !self.state.has_changes() {
            self.storage().release_node_ids(self.state.discarded_nodes());
            self.phase = Phase::Committed;
            self.registry.counters.transaction_committed();
            return Ok(None);
        }

        if let Err(e) = self.acquire_locks() {
            return Err(self.abort(e));
        }
        self.fail_if_terminated()?;

        let mut context = CursorContext::new("create-commands");
        let commands = match self.storage().create_commands(&self.state, &mut context) {
            Ok(commands) => commands,
            Err(e) => return Err(self.abort(e)),
        };

        if let Err(reason) = self.slot.begin_commit() {
            return Err(self.abort(KernelError::TransactionTerminated(reason)));
        }
        Ok(Some(commands))
    }

    fn fail_if_terminated(&mut self) -> Result<()> {
        match self.termination_reason() {
            Some(reason) => Err(self.abort(KernelError::TransactionTerminated(reason))),
            None => Ok(()),
        }
    }

    /// Roll back and return `error`, turning lock failures caused by
    /// termination into the termination error.
    fn abort(&mut self, error: KernelError) -> KernelError {
        let terminated = if matches!(error, KernelError::LockAcquisition(_)) {
            self.termination_reason()
        } else {
            None
        };
        let error = match terminated {
            Some(reason) => KernelError::TransactionTerminated(reason),
            None => error,
        };
        self.roll_back_state();
        error
    }

    fn acquire_locks(&self) -> Result<()> {
        let mut nodes: Vec<u64> = Vec::new();
        nodes.extend_from_slice(self.state.created_nodes());
        nodes.extend_from_slice(self.state.deleted_nodes());
        nodes.extend(self.state.nodes_with_added_labels());
        nodes.extend(
            self.state
                .sorted_property_changes()
                .into_iter()
                .map(|((entity, _), _)| entity),
        );
        nodes.sort_unstable();
        nodes.dedup();

        let tracer = self.registry.lock_tracer();
        let locks = self.slot.locks();
        for node in nodes {
            locks.acquire_exclusive(tracer.as_ref(), node)?;
        }
        Ok(())
    }

    fn finish_commit(&mut self, result: Result<u64>) -> Result<u64> {
        match result {
            Ok(transaction_id) => {
                self.storage().release_node_ids(self.state.discarded_nodes());
                self.phase = Phase::Committed;
                self.registry.counters.transaction_committed();
                debug!(
                    target: "tessera::txn",
                    user_tx_id = self.user_transaction_id,
                    tx_id = transaction_id,
                    "Transaction committed"
                );
                Ok(transaction_id)
            }
            Err(e) => {
                // Ids of nodes that never made it into the store go back.
                let storage = Arc::clone(self.storage());
                let unused: Vec<u64> = self
                    .state
                    .created_nodes()
                    .iter()
                    .copied()
                    .filter(|id| storage.node(*id).map_or(true, |node| !node.in_use))
                    .collect();
                storage.release_node_ids(&unused);
                storage.release_node_ids(self.state.discarded_nodes());
                self.phase = Phase::RolledBack;
                self.registry.counters.transaction_rolled_back();
                warn!(
                    target: "tessera::txn",
                    user_tx_id = self.user_transaction_id,
                    error = %e,
                    "Transaction commit failed"
                );
                Err(e)
            }
        }
    }

    fn roll_back_state(&mut self) {
        if self.phase != Phase::Open {
            return;
        }
        let storage = self.storage();
        storage.release_node_ids(self.state.created_nodes());
        storage.release_node_ids(self.state.discarded_nodes());
        self.phase = Phase::RolledBack;
        self.registry.counters.transaction_rolled_back();
    }

    /// Roll back. Rolling back twice is a no-op; rolling back a committed
    /// transaction fails.
    pub fn rollback(&mut self) -> Result<()> {
        match self.phase {
            Phase::Open => {
                self.roll_back_state();
                Ok(())
            }
            Phase::RolledBack => Ok(()),
            Phase::Committed => Err(KernelError::NotInTransaction(
                "the transaction has been committed".to_string(),
            )),
        }
    }

    /// Close, rolling back if still open, and return the slot to the pool.
    ///
    /// Fails when the locks cannot be released; the slot is then disposed
    /// instead of reused.
    pub fn close(mut self) -> Result<()> {
        self.close_internal()
    }

    fn close_internal(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.was_terminated = self.termination_reason().is_some();
        self.roll_back_state();

        let released = self.slot.locks().release_all();
        self.slot.deactivate();
        self.slot.return_state(std::mem::take(&mut self.state));
        self.registry.release(&self.slot, released.is_err());

        if self.was_terminated {
            self.registry.counters.transaction_terminated();
        }
        if let Err(e) = &released {
            warn!(
                target: "tessera::txn",
                user_tx_id = self.user_transaction_id,
                error = %e,
                "Could not release locks, disposing transaction"
            );
        }
        released
    }
}

impl Drop for KernelTransaction {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.close_internal();
        }
    }
}

impl std::fmt::Debug for KernelTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelTransaction")
            .field("user_transaction_id", &self.user_transaction_id)
            .field("phase", &self.phase)
            .field("closed", &self.closed)
            .finish()
    }
}
