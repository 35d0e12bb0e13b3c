//! Transactional kernel for Tessera
//!
//! This crate orchestrates all lower layers:
//! - Kernel: open, recover, begin transactions, shut down
//! - CommitProcess: append, publish and apply of batch chains
//! - KernelTransactions: pooled transaction registry with termination
//! - TransactionQueue: batched application of externally committed batches
//! - Recovery: log replay at startup
//! - Background jobs: the transaction timeout monitor
//!
//! The engine is the only component that knows about:
//! - Cross-layer coordination (storage + log + id sequencing)
//! - Transaction lifecycle and locking
//! - Kernel health

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod background;
pub mod commit;
pub mod config;
pub mod health;
pub mod kernel;
pub mod locks;
pub mod monitor;
pub mod queue;
pub mod recovery;
pub mod transaction;

#[cfg(test)]
mod testing;

pub use background::{JobHandle, JobScheduler, ThreadJobScheduler};
pub use commit::{CommitListener, CommitListeners, CommitPhase, CommitProcess};
pub use config::{KernelConfig, CONFIG_FILE_NAME};
pub use health::DatabaseHealth;
pub use kernel::{Kernel, KernelBuilder, LOG_FILE_NAME};
pub use locks::{InMemoryLockService, LockClient, LockService, LockTracer, NoopLockTracer};
pub use monitor::TransactionTimeoutMonitor;
pub use queue::{Applier, CommitProcessApplier, StorageApplier, TransactionQueue};
pub use recovery::{Recovery, RecoveryStats};
pub use transaction::{
    KernelTransaction, KernelTransactionHandle, KernelTransactions, TransactionCounters,
    TransactionsSnapshot,
};
