//! Transaction Lifecycle Tests
//!
//! Begin, write, commit, roll back, terminate and time out transactions
//! through the kernel.

use crate::common::*;
use std::time::Duration;

// ============================================================================
// Commit and Rollback
// ============================================================================

#[test]
fn commit_ids_follow_each_other() {
    let kernel = open_kernel();
    let (_, first) = commit_node(&kernel, 1);
    let (_, second) = commit_node(&kernel, 1);
    assert_eq!(first, 2);
    assert_eq!(second, 3);
    assert_eq!(kernel.id_store().last_committed_transaction_id(), 3);
    assert_eq!(kernel.id_store().last_closed_transaction_id(), 3);
}

#[test]
fn committed_writes_are_visible() {
    let kernel = open_kernel();
    let mut tx = kernel.begin_transaction().unwrap();
    let node = tx.create_node().unwrap();
    tx.add_label(node, 4).unwrap();
    tx.set_property(node, 10, 99).unwrap();
    tx.commit().unwrap();
    tx.close().unwrap();

    let storage = kernel.storage();
    assert!(storage.node(node).unwrap().labels.contains(&4));
    assert_eq!(storage.property(node, 10), Some(99));
    assert_eq!(storage.node_count(4), 1);
}

#[test]
fn delete_removes_node_and_properties() {
    let kernel = open_kernel();
    let mut tx = kernel.begin_transaction().unwrap();
    let node = tx.create_node().unwrap();
    tx.add_label(node, 2).unwrap();
    tx.set_property(node, 1, 5).unwrap();
    tx.commit().unwrap();
    tx.close().unwrap();

    let mut tx = kernel.begin_transaction().unwrap();
    tx.delete_node(node).unwrap();
    tx.commit().unwrap();
    tx.close().unwrap();

    let storage = kernel.storage();
    assert!(storage.node(node).is_none());
    assert_eq!(storage.property(node, 1), None);
    assert_eq!(storage.node_count(2), 0);
}

#[test]
fn read_only_transaction_does_not_consume_an_id() {
    let kernel = open_kernel();
    let mut tx = kernel.begin_transaction().unwrap();
    assert_eq!(tx.commit().unwrap(), READ_ONLY_ID);
    tx.close().unwrap();
    assert_eq!(kernel.id_store().committing_transaction_id(), 1);
    assert_eq!(kernel.log().end_position(), LogPosition::START);
}

#[test]
fn rollback_discards_writes() {
    let kernel = open_kernel();
    let mut tx = kernel.begin_transaction().unwrap();
    let node = tx.create_node().unwrap();
    tx.rollback().unwrap();
    tx.rollback().unwrap();
    assert!(matches!(tx.commit(), Err(KernelError::NotInTransaction(_))));
    tx.close().unwrap();

    assert!(kernel.storage().node(node).is_none());
    assert_eq!(kernel.transactions().counters().rolled_back(), 1);
}

#[test]
fn dropping_an_open_transaction_rolls_back() {
    let kernel = open_kernel();
    {
        let mut tx = kernel.begin_transaction().unwrap();
        tx.create_node().unwrap();
    }
    assert_eq!(kernel.transactions().number_of_active_transactions(), 0);
    assert_eq!(kernel.id_store().last_committed_transaction_id(), 1);
}

#[test]
fn chunked_commit_uses_one_id_for_all_chunks() {
    let kernel = open_kernel();
    let mut tx = kernel.begin_transaction().unwrap();
    let nodes: Vec<u64> = (0..5).map(|_| tx.create_node().unwrap()).collect();
    let tx_id = tx.commit_chunked(2).unwrap();
    tx.close().unwrap();

    assert_eq!(tx_id, 2);
    assert_eq!(kernel.log().last_append_index(), 3);
    assert_eq!(kernel.id_store().last_closed_transaction_id(), 2);
    for node in nodes {
        assert!(kernel.storage().node(node).is_some());
    }
}

// ============================================================================
// Termination
// ============================================================================

#[test]
fn terminated_transaction_cannot_commit() {
    let kernel = open_kernel();
    let mut tx = kernel.begin_transaction().unwrap();
    tx.create_node().unwrap();

    let handle = kernel
        .transactions()
        .active_transactions()
        .into_iter()
        .next()
        .unwrap();
    assert!(handle.mark_for_termination(Status::Terminated));
    assert!(!handle.mark_for_termination(Status::TransactionTimedOut));

    assert!(matches!(
        tx.commit(),
        Err(KernelError::TransactionTerminated(Status::Terminated))
    ));
    tx.close().unwrap();
    assert_eq!(kernel.transactions().counters().terminated(), 1);
    assert_eq!(kernel.id_store().last_committed_transaction_id(), 1);
}

#[test]
fn concurrency_limit_fails_fast() {
    let kernel = open_kernel_with(KernelConfig {
        max_concurrent_transactions: 2,
        ..KernelConfig::default()
    });
    let first = kernel.begin_transaction().unwrap();
    let _second = kernel.begin_transaction().unwrap();
    assert!(matches!(
        kernel.begin_transaction(),
        Err(KernelError::MaximumTransactionLimitExceeded { max: 2 })
    ));
    first.close().unwrap();
    assert!(kernel.begin_transaction().is_ok());
}

#[test]
fn timeout_monitor_terminates_expired_transactions() {
    let (kernel, clock) = open_kernel_with_fake_clock(50_000);
    let mut expiring = kernel
        .begin_transaction_with_timeout(Some(Duration::from_millis(500)))
        .unwrap();
    let mut unbounded = kernel.begin_transaction_with_timeout(None).unwrap();
    expiring.create_node().unwrap();

    clock.advance(Duration::from_millis(499));
    assert_eq!(kernel.check_timeouts(), 0);
    clock.advance(Duration::from_millis(1));
    assert_eq!(kernel.check_timeouts(), 1);

    assert!(matches!(
        expiring.commit(),
        Err(KernelError::TransactionTerminated(Status::TransactionTimedOut))
    ));
    unbounded.create_node().unwrap();
    assert!(unbounded.commit().is_ok());
}

#[test]
fn configured_default_timeout_applies() {
    let clock = std::sync::Arc::new(FakeClock::new(0));
    let kernel = Kernel::builder()
        .config(KernelConfig {
            transaction_timeout_ms: 100,
            ..KernelConfig::default()
        })
        .clock(clock.clone())
        .open()
        .unwrap();
    let tx = kernel.begin_transaction().unwrap();
    assert_eq!(tx.timeout(), Some(Duration::from_millis(100)));
    clock.advance(Duration::from_millis(100));
    assert_eq!(kernel.check_timeouts(), 1);
    assert_eq!(tx.termination_reason(), Some(Status::TransactionTimedOut));
}

#[test]
fn background_monitor_runs_on_its_own() {
    let clock = std::sync::Arc::new(FakeClock::new(0));
    let kernel = Kernel::builder()
        .config(KernelConfig {
            timeout_monitor_interval_ms: 1,
            ..KernelConfig::default()
        })
        .clock(clock.clone())
        .open()
        .unwrap();
    let tx = kernel
        .begin_transaction_with_timeout(Some(Duration::from_millis(10)))
        .unwrap();
    clock.advance(Duration::from_millis(10));
    wait_until(|| tx.termination_reason() == Some(Status::TransactionTimedOut));
}

#[test]
fn shutdown_terminates_running_transactions() {
    let kernel = open_kernel();
    let mut tx = kernel.begin_transaction().unwrap();
    tx.create_node().unwrap();
    kernel.shutdown();

    assert!(matches!(
        tx.commit(),
        Err(KernelError::TransactionTerminated(Status::DatabaseUnavailable))
    ));
    assert!(matches!(
        kernel.begin_transaction(),
        Err(KernelError::DatabaseShutdown)
    ));
}
