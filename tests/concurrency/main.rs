//! Concurrency Integration Tests
//!
//! Commit id sequencing, parallel commits, quiescence, pooled transaction
//! reuse and inner transaction termination under real threads.

#[path = "../common/mod.rs"]
mod common;

mod id_sequencing;
mod inner_transactions;
mod parallel_commits;
mod quiescence;
mod transaction_pool;
