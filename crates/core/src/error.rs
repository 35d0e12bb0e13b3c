//! Error types for the transactional kernel
//!
//! This module defines the error taxonomy shared by every crate in the
//! workspace. We use `thiserror` for automatic `Display` and `Error` trait
//! implementations.
//!
//! Each variant maps to a [`Status`] through [`KernelError::status`], which
//! in turn carries the [`Classification`](crate::status::Classification)
//! callers use to decide between retrying and giving up.

use crate::status::{Classification, Status};
use std::io;
use thiserror::Error;

/// Result type alias for kernel operations
pub type Result<T> = std::result::Result<T, KernelError>;

/// Error types for the transactional kernel
#[derive(Debug, Error)]
pub enum KernelError {
    /// The transaction was marked for termination and observed it
    #[error("The transaction has been terminated. Retry your operation in a new transaction. Reason: {0}")]
    TransactionTerminated(Status),

    /// Operation on a transaction that was already committed or rolled back
    #[error("Not in transaction: {0}")]
    NotInTransaction(String),

    /// Starting a transaction would exceed the configured limit
    #[error("Unable to start new transaction since limit of concurrently executed transactions is reached ({max})")]
    MaximumTransactionLimitExceeded {
        /// The limit in effect when the start was refused
        max: usize,
    },

    /// The database has been shut down
    #[error("This database is shutdown")]
    DatabaseShutdown,

    /// The database cannot serve requests (e.g. it panicked)
    #[error("Database unavailable: {0}")]
    DatabaseUnavailable(String),

    /// Component used in a state that does not permit the operation
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// Disk space ran out, distinct from generic I/O failure
    #[error("Out of disk space: {message}")]
    OutOfDiskSpace {
        /// Human-readable description of what was being prepared
        message: String,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// I/O error (file operations, pre-allocation, ...)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A commit failed at some step of the commit process
    ///
    /// The primary cause is chained as the error source. Secondary failures
    /// that happened while cleaning up are kept in `suppressed` so they
    /// never replace the primary cause.
    #[error("{message}")]
    TransactionFailure {
        /// Status describing the failed step
        status: Status,
        /// Human-readable message
        message: String,
        /// Primary cause
        #[source]
        source: Option<Box<KernelError>>,
        /// Secondary failures observed after the primary one
        suppressed: Vec<KernelError>,
    },

    /// A serialized command started with a type byte no reader knows
    #[error("Unknown command type: {0}")]
    UnknownCommandType(u8),

    /// No command reader or layout exists for a kernel version byte
    #[error("Unsupported kernel version: {0}")]
    UnsupportedKernelVersion(u8),

    /// A command could not be decoded
    #[error("Malformed command: {0}")]
    MalformedCommand(String),

    /// Serialized data failed its checksum
    #[error("Checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Checksum recorded with the data
        expected: u32,
        /// Checksum computed from the data
        actual: u32,
    },

    /// The transaction log holds bytes that cannot be read back
    #[error("Corrupted log: {0}")]
    CorruptedLog(String),

    /// A store identity could not be encoded or decoded
    #[error("Invalid store id: {0}")]
    InvalidStoreId(String),

    /// A lock could not be acquired
    #[error("Lock acquisition failed: {0}")]
    LockAcquisition(String),

    /// Configuration could not be parsed or validated
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Storage layer error
    #[error("Storage error: {0}")]
    Storage(String),
}

impl KernelError {
    /// Build a transaction failure with a primary cause.
    pub fn transaction_failure(
        status: Status,
        message: impl Into<String>,
        source: KernelError,
    ) -> Self {
        KernelError::TransactionFailure {
            status,
            message: message.into(),
            source: Some(Box::new(source)),
            suppressed: Vec::new(),
        }
    }

    /// Attach a secondary failure without replacing the primary cause.
    ///
    /// For variants other than `TransactionFailure` the error is wrapped
    /// first, keeping `self` as the primary cause.
    pub fn with_suppressed(self, suppressed: KernelError) -> Self {
        match self {
            KernelError::TransactionFailure {
                status,
                message,
                source,
                suppressed: mut list,
            } => {
                list.push(suppressed);
                KernelError::TransactionFailure {
                    status,
                    message,
                    source,
                    suppressed: list,
                }
            }
            primary => {
                let status = primary.status();
                let message = primary.to_string();
                KernelError::TransactionFailure {
                    status,
                    message,
                    source: Some(Box::new(primary)),
                    suppressed: vec![suppressed],
                }
            }
        }
    }

    /// Secondary failures carried by this error.
    pub fn suppressed(&self) -> &[KernelError] {
        match self {
            KernelError::TransactionFailure { suppressed, .. } => suppressed,
            _ => &[],
        }
    }

    /// Status code of this error.
    pub fn status(&self) -> Status {
        match self {
            KernelError::TransactionTerminated(reason) => *reason,
            KernelError::NotInTransaction(_) => Status::TransactionNotOpen,
            KernelError::MaximumTransactionLimitExceeded { .. } => {
                Status::MaximumTransactionLimitReached
            }
            KernelError::DatabaseShutdown | KernelError::DatabaseUnavailable(_) => {
                Status::DatabaseUnavailable
            }
            KernelError::IllegalState(_) | KernelError::InvalidConfig(_) => Status::InvalidState,
            KernelError::OutOfDiskSpace { .. } => Status::OutOfDiskSpace,
            KernelError::Io(_) | KernelError::Storage(_) => Status::StorageError,
            KernelError::TransactionFailure { status, .. } => *status,
            KernelError::UnknownCommandType(_)
            | KernelError::UnsupportedKernelVersion(_)
            | KernelError::MalformedCommand(_)
            | KernelError::ChecksumMismatch { .. }
            | KernelError::CorruptedLog(_)
            | KernelError::InvalidStoreId(_) => Status::CorruptedData,
            KernelError::LockAcquisition(_) => Status::LockClientStopped,
        }
    }

    /// Classification of this error's status.
    pub fn classification(&self) -> Classification {
        self.status().classification()
    }

    /// Whether this error reports a terminated transaction.
    pub fn is_termination(&self) -> bool {
        matches!(self, KernelError::TransactionTerminated(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_display_terminated() {
        let err = KernelError::TransactionTerminated(Status::TransactionTimedOut);
        let msg = err.to_string();
        assert!(msg.contains("terminated"));
        assert!(msg.contains("Transaction.TransactionTimedOut"));
    }

    #[test]
    fn test_error_display_limit() {
        let err = KernelError::MaximumTransactionLimitExceeded { max: 2 };
        assert!(err.to_string().contains("(2)"));
        assert_eq!(err.status(), Status::MaximumTransactionLimitReached);
    }

    #[test]
    fn test_out_of_disk_space_has_own_status() {
        let err = KernelError::OutOfDiskSpace {
            message: "pre-allocating log".to_string(),
            source: io::Error::new(io::ErrorKind::Other, "No space left on device"),
        };
        assert_eq!(err.status(), Status::OutOfDiskSpace);

        let generic = KernelError::Io(io::Error::new(io::ErrorKind::Other, "boom"));
        assert_eq!(generic.status(), Status::StorageError);
    }

    #[test]
    fn test_transaction_failure_chains_source() {
        let cause = KernelError::Storage("apply failed".to_string());
        let err = KernelError::transaction_failure(
            Status::TransactionCommitFailed,
            "Could not apply transaction 7",
            cause,
        );

        let source = err.source().expect("source should be chained");
        assert!(source.to_string().contains("apply failed"));
        assert_eq!(err.status(), Status::TransactionCommitFailed);
    }

    #[test]
    fn test_suppressed_never_replaces_primary() {
        let primary = KernelError::transaction_failure(
            Status::TransactionLogError,
            "append failed",
            KernelError::Storage("disk".to_string()),
        );
        let err = primary.with_suppressed(KernelError::Storage("listener".to_string()));

        assert_eq!(err.status(), Status::TransactionLogError);
        assert_eq!(err.suppressed().len(), 1);
        assert!(err.to_string().contains("append failed"));
    }

    #[test]
    fn test_suppressed_wraps_plain_error() {
        let err = KernelError::TransactionTerminated(Status::Terminated)
            .with_suppressed(KernelError::LockAcquisition("close".to_string()));

        assert_eq!(err.status(), Status::Terminated);
        assert_eq!(err.suppressed().len(), 1);
        assert!(matches!(
            err.source().and_then(|s| s.downcast_ref::<KernelError>()),
            Some(KernelError::TransactionTerminated(Status::Terminated))
        ));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err: KernelError = io_err.into();
        assert!(matches!(err, KernelError::Io(_)));
    }
}
