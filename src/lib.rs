//! Tessera - transactional core of an embedded graph database kernel
//!
//! Tessera turns the logical changes of a transaction into storage
//! commands, appends them to a transaction log under a gap-free commit id,
//! applies them to the store and tracks which transactions are committed
//! and closed, so recovery always knows where to resume.
//!
//! # Quick Start
//!
//! ```ignore
//! use tessera::Kernel;
//!
//! let kernel = Kernel::builder().open()?;
//!
//! let mut tx = kernel.begin_transaction()?;
//! let node = tx.create_node()?;
//! tx.add_label(node, 1)?;
//! tx.set_property(node, 7, 42)?;
//! let tx_id = tx.commit()?;
//! tx.close()?;
//! ```
//!
//! # Architecture
//!
//! - `tessera-core`: ids, store identity, application modes, errors
//! - `tessera-storage`: commands, batches, batch chains, storage engine
//! - `tessera-durability`: log entries, the transaction log, the appender
//! - `tessera-concurrency`: id sequencing, commitments, quiescence gate
//! - `tessera-engine`: commit process, transactions, recovery, the kernel

pub use tessera_engine::*;

pub use tessera_core::{
    Classification, Clock, FakeClock, KernelError, Result, Status, StoreId, SystemClock,
    TransactionApplicationMode, TransactionId, TransactionIdStore,
};
pub use tessera_storage::{BatchMetadata, Command, CommandBatch, NodeRecord, StorageReader};

/// Lower layers, for callers that wire components by hand.
pub mod layers {
    pub use tessera_concurrency as concurrency;
    pub use tessera_core as core;
    pub use tessera_durability as durability;
    pub use tessera_storage as storage;
}
