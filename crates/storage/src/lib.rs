//! Storage layer for the transactional kernel
//!
//! This crate implements the storage side of the commit pipeline:
//! - Command: node, property and counts commands with a versioned wire format
//! - CommandBatch: the unit of change of one transaction or chunk
//! - CommandBatchToApply / BatchChain: application envelope and owned chain
//! - ApplicationOrdering: commit-order serialization of ordering-sensitive batches
//! - TransactionState: logical changes of an open transaction
//! - StorageEngine: contract consumed by the commit process
//! - MemoryStorageEngine: in-memory reference engine

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod batch;
pub mod chain;
pub mod command;
pub mod engine;
pub mod memory;
pub mod ordering;
pub mod state;
pub mod stores;

pub use batch::{BatchMetadata, CommandBatch, NO_LEASE};
pub use chain::{
    BatchChain, CommandBatchToApply, CommandsToApply, CursorContext, NoStoreCursors, StoreCursors,
};
pub use command::{
    serialize_commands, Command, Labels, NodeRecord, RecordCommandReaderFactory,
    VersionedCommandReader, COUNTS_COMMAND, NODE_COMMAND, PROPERTY_COMMAND,
};
pub use engine::{IndexUpdate, IndexUpdateListener, StorageEngine, StorageReader};
pub use memory::{MemoryStorageEngine, StoreImage};
pub use ordering::{ApplicationOrdering, OrderingKey};
pub use state::TransactionState;
pub use stores::{CountsStore, IdGenerator};
