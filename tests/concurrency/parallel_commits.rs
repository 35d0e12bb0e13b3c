//! Parallel Commit Tests
//!
//! Many threads committing through one kernel.

use crate::common::*;
use std::collections::BTreeSet;
use std::sync::{Arc, Barrier};
use std::thread;

const THREADS: usize = 8;
const COMMITS_PER_THREAD: usize = 25;

#[test]
fn parallel_commits_get_gap_free_ids() {
    let kernel = Arc::new(open_kernel());
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let kernel = Arc::clone(&kernel);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                (0..COMMITS_PER_THREAD)
                    .map(|_| commit_node(&kernel, 1).1)
                    .collect::<Vec<u64>>()
            })
        })
        .collect();

    let ids: BTreeSet<u64> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    let total = (THREADS * COMMITS_PER_THREAD) as u64;
    assert_eq!(ids, (2..2 + total).collect::<BTreeSet<u64>>());

    assert_eq!(kernel.id_store().last_committed_transaction_id(), 1 + total);
    assert_eq!(kernel.id_store().last_closed_transaction_id(), 1 + total);
    assert_eq!(kernel.storage().node_count(1), total as i64);
    assert!(kernel.health().is_healthy());
}

#[test]
fn parallel_commits_replay_to_the_same_state() {
    let kernel = Arc::new(open_kernel());
    let handles: Vec<_> = (0..4u32)
        .map(|label| {
            let kernel = Arc::clone(&kernel);
            thread::spawn(move || {
                for _ in 0..10 {
                    let mut tx = kernel.begin_transaction().unwrap();
                    let node = tx.create_node().unwrap();
                    tx.add_label(node, label).unwrap();
                    tx.set_property(node, label, i64::from(label)).unwrap();
                    tx.commit().unwrap();
                    tx.close().unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let before = kernel.storage().image();
    let kernel = Arc::try_unwrap(kernel).unwrap();
    let kernel = restart(kernel);
    assert_eq!(kernel.storage().image(), before);
    for label in 0..4 {
        assert_eq!(kernel.storage().node_count(label), 10);
    }
}

#[test]
fn parallel_chunked_commits_do_not_interleave_ids() {
    let kernel = Arc::new(open_kernel());
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let kernel = Arc::clone(&kernel);
            thread::spawn(move || {
                let mut tx = kernel.begin_transaction().unwrap();
                let nodes: Vec<u64> = (0..6).map(|_| tx.create_node().unwrap()).collect();
                let tx_id = tx.commit_chunked(2).unwrap();
                tx.close().unwrap();
                (tx_id, nodes)
            })
        })
        .collect();

    let mut ids = BTreeSet::new();
    for handle in handles {
        let (tx_id, nodes) = handle.join().unwrap();
        assert!(ids.insert(tx_id));
        for node in nodes {
            assert!(kernel.storage().node(node).is_some());
        }
    }
    assert_eq!(ids, (2..6).collect::<BTreeSet<u64>>());
    assert_eq!(kernel.id_store().last_closed_transaction_id(), 5);
    assert_eq!(kernel.log().last_append_index(), 12);
}
