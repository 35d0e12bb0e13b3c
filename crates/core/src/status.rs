//! Status codes attached to kernel errors and termination reasons
//!
//! Every failure that leaves the kernel carries a [`Status`], and every
//! status belongs to one [`Classification`]. Callers decide whether to
//! retry, report or give up based on the classification alone.
//!
//! Termination reasons are statuses too: a transaction marked for
//! termination remembers the status it was marked with, and the error its
//! own thread later observes carries that same status.

use std::fmt;

/// Broad category of a status, used for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    /// The caller did something wrong; retrying unchanged will fail again.
    ClientError,
    /// A temporary condition; the operation may succeed if retried.
    TransientError,
    /// The database is in a state that needs operator attention.
    DatabaseError,
}

/// Status code of a kernel error or a transaction termination reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    // ========================================================================
    // Transaction
    // ========================================================================
    /// Explicitly terminated by a user or another transaction.
    Terminated,
    /// Terminated because it ran past its configured timeout.
    TransactionTimedOut,
    /// Terminated because the data it started from is no longer valid.
    Outdated,
    /// The lock client of the transaction was stopped.
    LockClientStopped,
    /// The log append of a commit failed.
    TransactionLogError,
    /// Applying a committed batch to the store failed.
    TransactionCommitFailed,
    /// A transaction could not be started.
    TransactionStartFailed,
    /// Too many transactions are already running.
    MaximumTransactionLimitReached,
    /// An operation was attempted on a transaction that is not open.
    TransactionNotOpen,
    /// The lease attached to the transaction is no longer valid.
    LeaseExpired,

    // ========================================================================
    // General
    // ========================================================================
    /// The database is shutting down or has panicked.
    DatabaseUnavailable,
    /// Disk space ran out while preparing the log.
    OutOfDiskSpace,
    /// A storage-level I/O operation failed.
    StorageError,
    /// Data read back did not match what was written.
    CorruptedData,
    /// A component was used in a state that does not permit the operation.
    InvalidState,
    /// Anything else.
    UnknownError,
}

impl Status {
    /// Classification of this status.
    pub fn classification(&self) -> Classification {
        match self {
            Status::Terminated
            | Status::TransactionTimedOut
            | Status::Outdated
            | Status::LockClientStopped
            | Status::MaximumTransactionLimitReached
            | Status::LeaseExpired => Classification::TransientError,
            Status::TransactionNotOpen | Status::InvalidState => Classification::ClientError,
            Status::TransactionLogError
            | Status::TransactionCommitFailed
            | Status::TransactionStartFailed
            | Status::DatabaseUnavailable
            | Status::OutOfDiskSpace
            | Status::StorageError
            | Status::CorruptedData
            | Status::UnknownError => Classification::DatabaseError,
        }
    }

    /// Stable dotted code for this status.
    pub fn code(&self) -> &'static str {
        match self {
            Status::Terminated => "Transaction.Terminated",
            Status::TransactionTimedOut => "Transaction.TransactionTimedOut",
            Status::Outdated => "Transaction.Outdated",
            Status::LockClientStopped => "Transaction.LockClientStopped",
            Status::TransactionLogError => "Transaction.TransactionLogError",
            Status::TransactionCommitFailed => "Transaction.TransactionCommitFailed",
            Status::TransactionStartFailed => "Transaction.TransactionStartFailed",
            Status::MaximumTransactionLimitReached => "Transaction.MaximumTransactionLimitReached",
            Status::TransactionNotOpen => "Transaction.TransactionNotOpen",
            Status::LeaseExpired => "Transaction.LeaseExpired",
            Status::DatabaseUnavailable => "General.DatabaseUnavailable",
            Status::OutOfDiskSpace => "General.OutOfDiskSpace",
            Status::StorageError => "General.StorageError",
            Status::CorruptedData => "General.CorruptedData",
            Status::InvalidState => "General.InvalidState",
            Status::UnknownError => "General.UnknownError",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}
