//! Core types and traits for Tessera
//!
//! This crate defines the foundational types shared by the transactional
//! kernel:
//! - TransactionId, LogPosition, ClosedTransactionMetadata: commit metadata
//! - KernelVersion: version byte of the command layout
//! - StoreId: fixed 64-byte store identity
//! - TransactionApplicationMode: how a batch is applied
//! - Status / KernelError: error taxonomy
//! - Traits: TransactionIdStore, Commitment, StorageCommand, CommandReaderFactory
//! - Clock: wall-clock abstraction

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod command;
pub mod error;
pub mod ids;
pub mod mode;
pub mod status;
pub mod store_id;
pub mod traits;
pub mod version;

pub use clock::{Clock, FakeClock, SystemClock};
pub use command::{CommandReader, CommandReaderFactory, StorageCommand, NONE_COMMAND_TYPE};
pub use error::{KernelError, Result};
pub use ids::{
    AppendBatchInfo, ClosedTransactionMetadata, ClosedTransactionSnapshot, LogPosition,
    TransactionId, BASE_APPEND_INDEX, BASE_CHUNK_ID, BASE_TX_CHECKSUM, BASE_TX_COMMIT_TIMESTAMP,
    BASE_TX_ID, INITIAL_LOG_VERSION, LOG_HEADER_SIZE, READ_ONLY_ID, UNKNOWN_CONSENSUS_INDEX,
    UNKNOWN_TX_COMMIT_TIMESTAMP, UNKNOWN_TX_ID,
};
pub use mode::{ApplyDirection, TransactionApplicationMode};
pub use status::{Classification, Status};
pub use store_id::{StoreId, STORE_ID_SIZE};
pub use traits::{Commitment, NoCommitment, TransactionIdStore};
pub use version::KernelVersion;
