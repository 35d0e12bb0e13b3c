//! Kernel transactions and their registry
//!
//! This module provides:
//! - [`KernelTransaction`]: a running transaction that records writes and
//!   commits them through the commit process
//! - [`KernelTransactions`]: pool and registry handing transactions out
//! - [`KernelTransactionHandle`]: a view of a running transaction that
//!   stays safe after the transaction closes
//!
//! # Architecture
//!
//! Transactions are backed by pooled slots:
//! - Each slot owns a lock client, an inner transaction handler and a
//!   transaction state that keeps its capacity across reuse
//! - A slot is stamped with the user transaction id of its occupant; a
//!   handle holding an older stamp sees the transaction as closed
//! - Slots whose locks cannot be released are disposed, not reused

mod handle;
mod kernel_transaction;
mod registry;
mod slot;

pub use handle::KernelTransactionHandle;
pub use kernel_transaction::KernelTransaction;
pub use registry::{KernelTransactions, TransactionCounters, TransactionsSnapshot};
