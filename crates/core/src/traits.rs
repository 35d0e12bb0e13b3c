//! Collaborator traits for id sequencing and commitment
//!
//! These traits are the seams between the commit process and the services
//! it feeds. Implementations live in `tessera-concurrency`; the engine only
//! sees the traits.

use crate::ids::{AppendBatchInfo, ClosedTransactionMetadata, ClosedTransactionSnapshot, LogPosition, TransactionId};
use crate::version::KernelVersion;

/// Assigns commit ids and tracks the committed and closed watermarks.
///
/// Thread safety: every method may be called concurrently from many
/// committing threads. None of them fail under normal operation; calling
/// them out of contract (e.g. committing an id never issued) is a
/// programming error and asserts.
pub trait TransactionIdStore: Send + Sync {
    /// Reserve a fresh commit id. The id is not visible anywhere else yet.
    fn next_committing_transaction_id(&self) -> u64;

    /// Highest id handed out so far.
    fn committing_transaction_id(&self) -> u64;

    /// Report `transaction` as committed. May be called out of order.
    fn transaction_committed(&self, transaction: TransactionId);

    /// Highest id `X` such that every id up to `X` has committed.
    fn last_committed_transaction_id(&self) -> u64;

    /// Full metadata of the last committed transaction.
    fn last_committed_transaction(&self) -> TransactionId;

    /// Report `transaction` as closed (applied). May be called out of order.
    fn transaction_closed(&self, transaction: TransactionId, position: LogPosition);

    /// Highest id `X` such that every id up to `X` has closed.
    fn last_closed_transaction_id(&self) -> u64;

    /// Metadata of the last closed transaction.
    fn last_closed_transaction(&self) -> ClosedTransactionMetadata;

    /// Closed watermark together with ids closed above it.
    fn closed_transaction_snapshot(&self) -> ClosedTransactionSnapshot;

    /// Overwrite both watermarks. Initialization and recovery only.
    fn set_last_committed_and_closed_transaction_id(
        &self,
        transaction: TransactionId,
        position: LogPosition,
    );

    /// Overwrite the closed watermark. Initialization and recovery only.
    fn reset_last_closed_transaction(&self, transaction: TransactionId, position: LogPosition);

    /// Record the most recently appended batch.
    fn append_batch(&self, append_index: u64, position_after: LogPosition);

    /// Most recently appended batch.
    fn last_batch(&self) -> AppendBatchInfo;
}

/// Publishes the committed and closed facts of one transaction.
///
/// `commit` runs once right after the log append. The two publish calls
/// each run at most once, and may be skipped entirely for the no-op
/// implementation.
pub trait Commitment: Send {
    /// Record the durable coordinates handed back by the log.
    #[allow(clippy::too_many_arguments)]
    fn commit(
        &mut self,
        transaction_id: u64,
        append_index: u64,
        first_batch: bool,
        last_batch: bool,
        kernel_version: KernelVersion,
        position_before: LogPosition,
        position_after: LogPosition,
        checksum: u32,
        consensus_index: i64,
    );

    /// Make the transaction visible as committed.
    fn publish_as_committed(&mut self, commit_timestamp: u64);

    /// Make the transaction visible as closed.
    fn publish_as_closed(&mut self);

    /// Whether `commit` has been called.
    fn is_committed(&self) -> bool;
}

/// Commitment for batches with nothing to publish.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCommitment;

impl Commitment for NoCommitment {
    fn commit(
        &mut self,
        _transaction_id: u64,
        _append_index: u64,
        _first_batch: bool,
        _last_batch: bool,
        _kernel_version: KernelVersion,
        _position_before: LogPosition,
        _position_after: LogPosition,
        _checksum: u32,
        _consensus_index: i64,
    ) {
    }

    fn publish_as_committed(&mut self, _commit_timestamp: u64) {}

    fn publish_as_closed(&mut self) {}

    fn is_committed(&self) -> bool {
        false
    }
}
