//! Durability layer for Tessera
//!
//! This crate handles everything between a committed batch and the log:
//!
//! - Log entries: checksummed envelopes carrying one batch each
//! - Transaction log: the in-memory log with checkpoints and tail scanning
//! - Appender: commit id assignment and ordered appends
//! - Pre-allocation: growing the log file ahead of appends, with
//!   out-of-disk-space classification

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod appender;
pub mod entry;
pub mod error;
pub mod log;
pub mod preallocate;

pub use appender::{estimated_size, AppendFault, LogAppender, TransactionLogAppender};
pub use entry::{compute_crc, LogEntry, FLAG_FIRST, FLAG_LAST, FLAG_ROLLBACK};
pub use error::{is_out_of_disk_space, LogError, LogResult};
pub use log::{Checkpoint, InMemoryTransactionLog, LogScan, PositionedEntry};
pub use preallocate::LogFilePreallocator;
