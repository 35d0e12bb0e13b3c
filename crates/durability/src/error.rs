//! Error types for the transaction log

use std::io;
use tessera_core::KernelError;
use thiserror::Error;

/// Raw OS error for "no space left on device" on Unix.
pub const ENOSPC: i32 = 28;
/// Windows `ERROR_HANDLE_DISK_FULL`.
pub const ERROR_HANDLE_DISK_FULL: i32 = 39;
/// Windows `ERROR_DISK_FULL`.
pub const ERROR_DISK_FULL: i32 = 112;

/// Raw OS error a full device reports on this platform.
#[cfg(windows)]
pub const DISK_FULL: i32 = ERROR_DISK_FULL;
/// Raw OS error a full device reports on this platform.
#[cfg(not(windows))]
pub const DISK_FULL: i32 = ENOSPC;

/// Result type for log operations
pub type LogResult<T> = std::result::Result<T, LogError>;

/// Errors raised by the transaction log
#[derive(Debug, Error)]
pub enum LogError {
    /// I/O failure other than running out of space
    #[error("Log I/O error: {0}")]
    Io(#[from] io::Error),

    /// The device ran out of space
    #[error("Out of disk space while {action}")]
    OutOfDiskSpace {
        /// What the log was doing
        action: String,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Bytes in the log cannot be decoded
    #[error("Corrupted log entry at offset {offset}: {reason}")]
    Corrupted {
        /// Byte offset of the entry
        offset: u64,
        /// What was wrong
        reason: String,
    },

    /// Entry bytes do not match their checksum
    #[error("Checksum mismatch at offset {offset}: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Byte offset of the entry
        offset: u64,
        /// Stored checksum
        expected: u32,
        /// Computed checksum
        actual: u32,
    },

    /// Entry written by a kernel version this build cannot read
    #[error("Unsupported kernel version {0} in log entry")]
    UnsupportedVersion(u8),

    /// An append failure injected for testing
    #[error("Injected append failure: {0}")]
    Injected(String),
}

impl LogError {
    /// Classify an I/O error, separating "out of space" from the rest.
    pub fn from_io(action: impl Into<String>, error: io::Error) -> Self {
        if is_out_of_disk_space(&error) {
            LogError::OutOfDiskSpace {
                action: action.into(),
                source: error,
            }
        } else {
            LogError::Io(error)
        }
    }

    /// Whether reading should stop here and treat the rest as a torn tail.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            LogError::Corrupted { .. } | LogError::ChecksumMismatch { .. }
        )
    }
}

/// Whether `error` reports a full device.
#[cfg(windows)]
pub fn is_out_of_disk_space(error: &io::Error) -> bool {
    matches!(
        error.raw_os_error(),
        Some(ERROR_HANDLE_DISK_FULL) | Some(ERROR_DISK_FULL)
    )
}

/// Whether `error` reports a full device.
#[cfg(not(windows))]
pub fn is_out_of_disk_space(error: &io::Error) -> bool {
    error.raw_os_error() == Some(ENOSPC)
}

impl From<LogError> for KernelError {
    fn from(e: LogError) -> Self {
        match e {
            LogError::Io(source) => KernelError::Io(source),
            LogError::OutOfDiskSpace { action, source } => KernelError::OutOfDiskSpace {
                message: action,
                source,
            },
            LogError::ChecksumMismatch {
                expected, actual, ..
            } => KernelError::ChecksumMismatch { expected, actual },
            LogError::UnsupportedVersion(version) => KernelError::UnsupportedKernelVersion(version),
            LogError::Corrupted { .. } => KernelError::CorruptedLog(e.to_string()),
            LogError::Injected(message) => KernelError::Storage(message),
        }
    }
}
