//! Shared test utilities for all integration test suites.
//!
//! Import via `#[path = "../common/mod.rs"] mod common;` from a suite's main.rs.

#![allow(dead_code)]
#![allow(unused_imports)]

use std::sync::Arc;
use std::time::{Duration, Instant};
pub use tessera::layers::core::{LogPosition, READ_ONLY_ID};
pub use tessera::layers::durability::InMemoryTransactionLog;
pub use tessera::layers::storage::MemoryStorageEngine;
pub use tessera::{
    FakeClock, Kernel, KernelConfig, KernelError, KernelTransaction, Status, StorageReader,
    TransactionIdStore,
};

/// Kernel with the default configuration.
pub fn open_kernel() -> Kernel {
    Kernel::builder().open().expect("Failed to open kernel")
}

/// Kernel with `config`.
pub fn open_kernel_with(config: KernelConfig) -> Kernel {
    Kernel::builder()
        .config(config)
        .open()
        .expect("Failed to open kernel")
}

/// Kernel whose time only moves when the returned clock is advanced.
pub fn open_kernel_with_fake_clock(start_millis: u64) -> (Kernel, Arc<FakeClock>) {
    let clock = Arc::new(FakeClock::new(start_millis));
    let kernel = Kernel::builder()
        .clock(clock.clone())
        .open()
        .expect("Failed to open kernel");
    (kernel, clock)
}

/// Shut `kernel` down and open a new one over its log and a fresh store,
/// as after a restart.
pub fn restart(kernel: Kernel) -> Kernel {
    let log = Arc::clone(kernel.log());
    kernel.shutdown();
    drop(kernel);
    Kernel::builder()
        .log(log)
        .open()
        .expect("Failed to reopen kernel")
}

/// Commit one labelled node. Returns (node id, commit id).
pub fn commit_node(kernel: &Kernel, label: u32) -> (u64, u64) {
    let mut tx = kernel.begin_transaction().expect("begin");
    let node = tx.create_node().expect("create node");
    tx.add_label(node, label).expect("add label");
    let tx_id = tx.commit().expect("commit");
    tx.close().expect("close");
    (node, tx_id)
}

/// Spin until `condition` holds, failing after five seconds.
pub fn wait_until(condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(1));
    }
}
