//! Commit id sequencing
//!
//! [`SequencingTransactionIdStore`] hands out commit ids from one atomic
//! counter and tracks two gap-free watermarks over them: committed and
//! closed. Both are [`OutOfOrderSequence`]s, so committing threads report
//! completion in whatever order they finish and never wait for each other.
//!
//! Only the most recently appended batch is tracked under a lock; it is
//! written once per append, under the appender's own lock.

use crate::sequence::{OutOfOrderSequence, DEFAULT_CAPACITY};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tessera_core::{
    AppendBatchInfo, ClosedTransactionMetadata, ClosedTransactionSnapshot, KernelVersion,
    LogPosition, TransactionId, TransactionIdStore,
};
use tracing::debug;

const COMMITTED_META: usize = 5;
const CLOSED_META: usize = 7;

fn committed_meta(transaction: &TransactionId) -> [u64; COMMITTED_META] {
    [
        transaction.append_index,
        transaction.kernel_version.as_byte() as u64,
        transaction.checksum as u64,
        transaction.commit_timestamp,
        transaction.consensus_index as u64,
    ]
}

fn closed_meta(transaction: &TransactionId, position: LogPosition) -> [u64; CLOSED_META] {
    let [append_index, version, checksum, timestamp, consensus] = committed_meta(transaction);
    [
        append_index,
        version,
        checksum,
        timestamp,
        consensus,
        position.log_version,
        position.byte_offset,
    ]
}

fn transaction_from(id: u64, meta: &[u64]) -> TransactionId {
    TransactionId::new(
        id,
        meta[0],
        KernelVersion::from_byte(meta[1] as u8).unwrap_or_default(),
        meta[2] as u32,
        meta[3],
        meta[4] as i64,
    )
}

/// Thread-safe [`TransactionIdStore`] backed by atomics.
pub struct SequencingTransactionIdStore {
    committing: AtomicU64,
    committed: OutOfOrderSequence<COMMITTED_META>,
    closed: OutOfOrderSequence<CLOSED_META>,
    last_batch: Mutex<AppendBatchInfo>,
}

impl SequencingTransactionIdStore {
    /// Store whose last committed and closed transaction is `last` at
    /// `position`, with out-of-order rings of `capacity` slots.
    pub fn new(last: TransactionId, position: LogPosition, capacity: usize) -> Self {
        SequencingTransactionIdStore {
            committing: AtomicU64::new(last.id),
            committed: OutOfOrderSequence::new(last.id, committed_meta(&last), capacity),
            closed: OutOfOrderSequence::new(last.id, closed_meta(&last, position), capacity),
            last_batch: Mutex::new(AppendBatchInfo::new(last.append_index, position)),
        }
    }

    /// Store of an empty database.
    pub fn empty() -> Self {
        Self::new(TransactionId::BASE, LogPosition::START, DEFAULT_CAPACITY)
    }
}

impl Default for SequencingTransactionIdStore {
    fn default() -> Self {
        Self::empty()
    }
}

impl TransactionIdStore for SequencingTransactionIdStore {
    fn next_committing_transaction_id(&self) -> u64 {
        self.committing.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn committing_transaction_id(&self) -> u64 {
        self.committing.load(Ordering::SeqCst)
    }

    fn transaction_committed(&self, transaction: TransactionId) {
        assert!(
            transaction.id <= self.committing_transaction_id(),
            "transaction {} committed but never issued",
            transaction.id
        );
        self.committed
            .offer(transaction.id, committed_meta(&transaction));
    }

    fn last_committed_transaction_id(&self) -> u64 {
        self.committed.highest_gapless()
    }

    fn last_committed_transaction(&self) -> TransactionId {
        let (id, meta) = self.committed.get();
        transaction_from(id, &meta)
    }

    fn transaction_closed(&self, transaction: TransactionId, position: LogPosition) {
        assert!(
            transaction.id <= self.committing_transaction_id(),
            "transaction {} closed but never issued",
            transaction.id
        );
        self.closed
            .offer(transaction.id, closed_meta(&transaction, position));
    }

    fn last_closed_transaction_id(&self) -> u64 {
        self.closed.highest_gapless()
    }

    fn last_closed_transaction(&self) -> ClosedTransactionMetadata {
        let (id, meta) = self.closed.get();
        ClosedTransactionMetadata::new(
            transaction_from(id, &meta),
            LogPosition::new(meta[5], meta[6]),
        )
    }

    fn closed_transaction_snapshot(&self) -> ClosedTransactionSnapshot {
        let snapshot = self.closed.snapshot();
        ClosedTransactionSnapshot {
            last_closed: ClosedTransactionMetadata::new(
                transaction_from(snapshot.highest, &snapshot.meta),
                LogPosition::new(snapshot.meta[5], snapshot.meta[6]),
            ),
            ids_closed_out_of_order: snapshot.out_of_order,
        }
    }

    fn set_last_committed_and_closed_transaction_id(
        &self,
        transaction: TransactionId,
        position: LogPosition,
    ) {
        self.committing.store(transaction.id, Ordering::SeqCst);
        self.committed.set(transaction.id, committed_meta(&transaction));
        self.closed
            .set(transaction.id, closed_meta(&transaction, position));
        *self.last_batch.lock() = AppendBatchInfo::new(transaction.append_index, position);
        debug!(
            target: "tessera::txn",
            tx_id = transaction.id,
            %position,
            "Reset committed and closed transaction"
        );
    }

    fn reset_last_closed_transaction(&self, transaction: TransactionId, position: LogPosition) {
        self.closed
            .set(transaction.id, closed_meta(&transaction, position));
    }

    fn append_batch(&self, append_index: u64, position_after: LogPosition) {
        *self.last_batch.lock() = AppendBatchInfo::new(append_index, position_after);
    }

    fn last_batch(&self) -> AppendBatchInfo {
        *self.last_batch.lock()
    }
}

impl std::fmt::Debug for SequencingTransactionIdStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequencingTransactionIdStore")
            .field("committing", &self.committing_transaction_id())
            .field("committed", &self.last_committed_transaction_id())
            .field("closed", &self.last_closed_transaction_id())
            .finish()
    }
}
