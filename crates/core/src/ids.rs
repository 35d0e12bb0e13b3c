//! Transaction identity and log coordinates
//!
//! A [`TransactionId`] is the immutable record of one committed
//! transaction: its id plus everything the log layer handed back when the
//! batch became durable. [`LogPosition`] locates a byte in the log and
//! [`ClosedTransactionMetadata`] pairs the two once a transaction closes.

use crate::version::KernelVersion;
use std::fmt;

/// Id reserved for "no transaction known".
pub const UNKNOWN_TX_ID: u64 = 0;

/// Id of the implicit base transaction of an empty store.
pub const BASE_TX_ID: u64 = 1;

/// Checksum of the base transaction.
pub const BASE_TX_CHECKSUM: u32 = 0;

/// Commit timestamp of the base transaction.
pub const BASE_TX_COMMIT_TIMESTAMP: u64 = 0;

/// Commit timestamp used when the real one could not be determined.
pub const UNKNOWN_TX_COMMIT_TIMESTAMP: u64 = 1;

/// Consensus index of transactions committed outside any consensus layer.
pub const UNKNOWN_CONSENSUS_INDEX: i64 = -1;

/// Append index of the base transaction.
pub const BASE_APPEND_INDEX: u64 = 1;

/// Chunk id of the first chunk of every transaction.
pub const BASE_CHUNK_ID: u64 = 1;

/// Id returned by commits of read-only transactions.
pub const READ_ONLY_ID: u64 = 0;

/// Log version of the first log file.
pub const INITIAL_LOG_VERSION: u64 = 0;

/// Byte offset of the first entry in a log file, past its header.
pub const LOG_HEADER_SIZE: u64 = 64;

/// Immutable description of a committed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId {
    /// Commit id, assigned by the id sequencer
    pub id: u64,
    /// Append index of the batch that committed this id
    pub append_index: u64,
    /// Kernel version the batch was written with
    pub kernel_version: KernelVersion,
    /// Checksum of the appended bytes
    pub checksum: u32,
    /// Wall-clock commit time in milliseconds
    pub commit_timestamp: u64,
    /// Opaque consensus ordering token
    pub consensus_index: i64,
}

impl TransactionId {
    /// Sentinel for "no transaction".
    pub const UNKNOWN: TransactionId = TransactionId {
        id: UNKNOWN_TX_ID,
        append_index: 0,
        kernel_version: KernelVersion::LATEST,
        checksum: BASE_TX_CHECKSUM,
        commit_timestamp: UNKNOWN_TX_COMMIT_TIMESTAMP,
        consensus_index: UNKNOWN_CONSENSUS_INDEX,
    };

    /// The base transaction every empty store starts from.
    pub const BASE: TransactionId = TransactionId {
        id: BASE_TX_ID,
        append_index: BASE_APPEND_INDEX,
        kernel_version: KernelVersion::LATEST,
        checksum: BASE_TX_CHECKSUM,
        commit_timestamp: BASE_TX_COMMIT_TIMESTAMP,
        consensus_index: UNKNOWN_CONSENSUS_INDEX,
    };

    /// Create a new transaction id.
    pub fn new(
        id: u64,
        append_index: u64,
        kernel_version: KernelVersion,
        checksum: u32,
        commit_timestamp: u64,
        consensus_index: i64,
    ) -> Self {
        TransactionId {
            id,
            append_index,
            kernel_version,
            checksum,
            commit_timestamp,
            consensus_index,
        }
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TransactionId{{id={}, appendIndex={}, kernelVersion={}, checksum={}, commitTimestamp={}, consensusIndex={}}}",
            self.id,
            self.append_index,
            self.kernel_version,
            self.checksum,
            self.commit_timestamp,
            self.consensus_index
        )
    }
}

/// Position of a byte in the transaction log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogPosition {
    /// Version (file number) of the log
    pub log_version: u64,
    /// Byte offset inside that log version
    pub byte_offset: u64,
}

impl LogPosition {
    /// Position of the first entry of the first log file.
    pub const START: LogPosition = LogPosition {
        log_version: INITIAL_LOG_VERSION,
        byte_offset: LOG_HEADER_SIZE,
    };

    /// Position that is known to be unset.
    pub const UNSPECIFIED: LogPosition = LogPosition {
        log_version: u64::MAX,
        byte_offset: u64::MAX,
    };

    /// Create a new log position.
    pub fn new(log_version: u64, byte_offset: u64) -> Self {
        LogPosition {
            log_version,
            byte_offset,
        }
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LogPosition{{{}:{}}}", self.log_version, self.byte_offset)
    }
}

/// Metadata of the last closed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClosedTransactionMetadata {
    /// The closed transaction
    pub transaction_id: TransactionId,
    /// Log position right after the transaction's last batch
    pub log_position: LogPosition,
}

impl ClosedTransactionMetadata {
    /// Create closed metadata.
    pub fn new(transaction_id: TransactionId, log_position: LogPosition) -> Self {
        ClosedTransactionMetadata {
            transaction_id,
            log_position,
        }
    }
}

/// Append index and log position of the most recently appended batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendBatchInfo {
    /// Append index of the batch
    pub append_index: u64,
    /// Log position right after the batch
    pub log_position_after: LogPosition,
}

impl AppendBatchInfo {
    /// Create append info.
    pub fn new(append_index: u64, log_position_after: LogPosition) -> Self {
        AppendBatchInfo {
            append_index,
            log_position_after,
        }
    }
}

/// Snapshot of the closed-transaction sequence.
///
/// `last_closed` is the gap-free watermark; `ids_closed_out_of_order` are
/// ids above it whose close was already reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedTransactionSnapshot {
    /// Gap-free closed watermark
    pub last_closed: ClosedTransactionMetadata,
    /// Ids closed above the watermark, ascending
    pub ids_closed_out_of_order: Vec<u64>,
}
