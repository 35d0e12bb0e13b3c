//! Per-transaction commitment
//!
//! A [`TransactionCommitment`] remembers the durable coordinates the log
//! hands back for one batch and later reports them to the id store, first
//! as committed and then as closed. Only the last batch of a transaction
//! reports: earlier chunks share its id and must not move the watermarks
//! before the whole transaction is in.

use std::sync::Arc;
use tessera_core::{
    Commitment, KernelVersion, LogPosition, TransactionId, TransactionIdStore,
    UNKNOWN_TX_COMMIT_TIMESTAMP, UNKNOWN_TX_ID,
};

/// [`Commitment`] reporting to a [`TransactionIdStore`].
pub struct TransactionCommitment {
    id_store: Arc<dyn TransactionIdStore>,
    committed: bool,
    transaction_id: u64,
    append_index: u64,
    kernel_version: KernelVersion,
    checksum: u32,
    consensus_index: i64,
    last_batch: bool,
    position_after: LogPosition,
    commit_timestamp: u64,
    published_committed: bool,
    published_closed: bool,
}

impl TransactionCommitment {
    /// Commitment reporting to `id_store`.
    pub fn new(id_store: Arc<dyn TransactionIdStore>) -> Self {
        TransactionCommitment {
            id_store,
            committed: false,
            transaction_id: UNKNOWN_TX_ID,
            append_index: 0,
            kernel_version: KernelVersion::LATEST,
            checksum: 0,
            consensus_index: 0,
            last_batch: false,
            position_after: LogPosition::UNSPECIFIED,
            commit_timestamp: UNKNOWN_TX_COMMIT_TIMESTAMP,
            published_committed: false,
            published_closed: false,
        }
    }

    fn transaction(&self) -> TransactionId {
        TransactionId::new(
            self.transaction_id,
            self.append_index,
            self.kernel_version,
            self.checksum,
            self.commit_timestamp,
            self.consensus_index,
        )
    }

    /// Whether the committed fact has been reported.
    pub fn is_published_as_committed(&self) -> bool {
        self.published_committed
    }

    /// Whether the closed fact has been reported.
    pub fn is_published_as_closed(&self) -> bool {
        self.published_closed
    }
}

impl Commitment for TransactionCommitment {
    fn commit(
        &mut self,
        transaction_id: u64,
        append_index: u64,
        _first_batch: bool,
        last_batch: bool,
        kernel_version: KernelVersion,
        _position_before: LogPosition,
        position_after: LogPosition,
        checksum: u32,
        consensus_index: i64,
    ) {
        assert!(!self.committed, "commitment for transaction {} committed twice", transaction_id);
        self.committed = true;
        self.transaction_id = transaction_id;
        self.append_index = append_index;
        self.kernel_version = kernel_version;
        self.checksum = checksum;
        self.consensus_index = consensus_index;
        self.last_batch = last_batch;
        self.position_after = position_after;
    }

    fn publish_as_committed(&mut self, commit_timestamp: u64) {
        if self.committed && self.last_batch && !self.published_committed {
            self.commit_timestamp = commit_timestamp;
            self.published_committed = true;
            self.id_store.transaction_committed(self.transaction());
        }
    }

    fn publish_as_closed(&mut self) {
        if self.committed && self.last_batch && !self.published_closed {
            self.published_closed = true;
            self.id_store
                .transaction_closed(self.transaction(), self.position_after);
        }
    }

    fn is_committed(&self) -> bool {
        self.committed
    }
}

impl std::fmt::Debug for TransactionCommitment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionCommitment")
            .field("transaction_id", &self.transaction_id)
            .field("committed", &self.committed)
            .field("last_batch", &self.last_batch)
            .finish()
    }
}
