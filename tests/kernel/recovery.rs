//! Recovery Tests
//!
//! Restart the kernel over its log and check what comes back.

use crate::common::*;
use std::sync::Arc;

#[test]
fn restart_restores_committed_state() {
    let kernel = open_kernel();
    let mut tx = kernel.begin_transaction().unwrap();
    let node = tx.create_node().unwrap();
    tx.add_label(node, 8).unwrap();
    tx.set_property(node, 3, -17).unwrap();
    tx.commit().unwrap();
    tx.close().unwrap();
    let (other, _) = commit_node(&kernel, 8);

    let kernel = restart(kernel);
    let storage = kernel.storage();
    assert_eq!(kernel.recovery_stats().transactions_replayed, 2);
    assert!(storage.node(node).unwrap().labels.contains(&8));
    assert!(storage.node(other).is_some());
    assert_eq!(storage.property(node, 3), Some(-17));
    assert_eq!(storage.node_count(8), 2);
}

#[test]
fn restart_continues_the_id_sequence() {
    let kernel = open_kernel();
    commit_node(&kernel, 1);
    commit_node(&kernel, 1);

    let kernel = restart(kernel);
    assert_eq!(kernel.id_store().last_committed_transaction_id(), 3);
    assert_eq!(kernel.id_store().last_closed_transaction_id(), 3);

    let (node, tx_id) = commit_node(&kernel, 1);
    assert_eq!(tx_id, 4);
    assert!(kernel.storage().node(node).is_some());
}

#[test]
fn restart_replays_deletes() {
    let kernel = open_kernel();
    let (node, _) = commit_node(&kernel, 5);
    let mut tx = kernel.begin_transaction().unwrap();
    tx.delete_node(node).unwrap();
    tx.commit().unwrap();
    tx.close().unwrap();

    let kernel = restart(kernel);
    assert!(kernel.storage().node(node).is_none());
    assert_eq!(kernel.storage().node_count(5), 0);
}

#[test]
fn restart_replays_chunked_transactions() {
    let kernel = open_kernel();
    let mut tx = kernel.begin_transaction().unwrap();
    let nodes: Vec<u64> = (0..7).map(|_| tx.create_node().unwrap()).collect();
    tx.commit_chunked(3).unwrap();
    tx.close().unwrap();

    let kernel = restart(kernel);
    assert_eq!(kernel.recovery_stats().entries_read, 3);
    assert_eq!(kernel.recovery_stats().transactions_replayed, 1);
    for node in nodes {
        assert!(kernel.storage().node(node).is_some());
    }
}

#[test]
fn corrupt_tail_is_cut_and_the_log_stays_usable() {
    let kernel = open_kernel();
    let (kept, _) = commit_node(&kernel, 1);
    let cut = kernel.log().end_position();
    let (lost, _) = commit_node(&kernel, 1);
    kernel.log().corrupt_byte(kernel.log().end_position().byte_offset - 1);

    let kernel = restart(kernel);
    assert_eq!(kernel.recovery_stats().truncated_at, Some(cut));
    assert!(kernel.storage().node(kept).is_some());
    assert!(kernel.storage().node(lost).is_none());
    assert_eq!(kernel.id_store().last_committed_transaction_id(), 2);

    let (_, tx_id) = commit_node(&kernel, 1);
    assert_eq!(tx_id, 3);
    let kernel = restart(kernel);
    assert_eq!(kernel.recovery_stats().truncated_at, None);
    assert_eq!(kernel.recovery_stats().transactions_replayed, 2);
}

#[test]
fn replay_over_the_live_store_keeps_counts() {
    let kernel = open_kernel();
    commit_node(&kernel, 6);
    commit_node(&kernel, 6);

    let log = Arc::clone(kernel.log());
    let storage = Arc::clone(kernel.storage());
    kernel.shutdown();
    drop(kernel);

    let kernel = tessera::Kernel::builder()
        .log(log)
        .storage(storage)
        .open()
        .unwrap();
    assert_eq!(kernel.recovery_stats().transactions_replayed, 2);
    assert_eq!(kernel.storage().node_count(6), 2);
}

#[test]
fn unfinished_chunked_transaction_leaves_no_counts_in_live_store() {
    let kernel = open_kernel();
    let mut tx = kernel.begin_transaction().unwrap();
    let a = tx.create_node().unwrap();
    tx.add_label(a, 1).unwrap();
    let b = tx.create_node().unwrap();
    tx.add_label(b, 2).unwrap();
    tx.commit_chunked(1).unwrap();
    tx.close().unwrap();
    assert_eq!(kernel.storage().node_count(1), 1);

    // Drop the last chunk, as if the process died before logging it.
    let last = kernel
        .log()
        .read_from(LogPosition::START)
        .entries
        .last()
        .map(|positioned| (positioned.position, positioned.entry.is_last()))
        .unwrap();
    assert!(last.1);
    kernel.log().truncate(last.0);

    let log = Arc::clone(kernel.log());
    let storage = Arc::clone(kernel.storage());
    kernel.shutdown();
    drop(kernel);

    let kernel = tessera::Kernel::builder()
        .log(log)
        .storage(storage)
        .open()
        .unwrap();
    assert_eq!(kernel.recovery_stats().incomplete_transactions, 1);
    assert!(kernel.storage().node(a).is_none());
    assert!(kernel.storage().node(b).is_none());
    assert_eq!(kernel.storage().node_count(1), 0);
}

#[test]
fn checkpoint_limits_what_is_read() {
    let kernel = open_kernel();
    commit_node(&kernel, 1);
    assert_eq!(kernel.checkpoint().id, 2);
    commit_node(&kernel, 1);

    let log = Arc::clone(kernel.log());
    let storage = Arc::clone(kernel.storage());
    kernel.shutdown();
    drop(kernel);

    let kernel = tessera::Kernel::builder()
        .log(log)
        .storage(storage)
        .open()
        .unwrap();
    let stats = kernel.recovery_stats();
    assert!(stats.from_checkpoint);
    assert_eq!(stats.entries_read, 1);
    assert_eq!(kernel.storage().node_count(1), 2);
    assert_eq!(kernel.id_store().last_committed_transaction_id(), 3);
}

#[test]
fn empty_log_recovers_to_base() {
    let kernel = restart(open_kernel());
    assert_eq!(kernel.recovery_stats().total_transactions(), 0);
    assert_eq!(kernel.id_store().last_committed_transaction_id(), 1);
}
