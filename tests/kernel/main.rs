//! Kernel Integration Tests
//!
//! End-to-end tests through the public kernel: transaction lifecycle,
//! the commit pipeline, recovery and store identity.

#[path = "../common/mod.rs"]
mod common;

mod commit_pipeline;
mod recovery;
mod store_id;
mod transaction_lifecycle;
