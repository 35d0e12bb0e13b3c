//! Transaction Pool Tests
//!
//! Pooled slots are reused across transactions; handles to an earlier
//! occupant must not reach the later one. Node locks are held from commit
//! until close.

use crate::common::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn stale_handle_cannot_touch_the_next_occupant() {
    let kernel = open_kernel();
    let first = kernel.begin_transaction().unwrap();
    let stale = kernel.transactions().active_transactions().remove(0);
    first.close().unwrap();
    assert_eq!(kernel.transactions().idle_slots(), 1);

    let mut second = kernel.begin_transaction().unwrap();
    assert_eq!(kernel.transactions().idle_slots(), 0);
    assert!(!stale.is_open());
    assert!(!stale.mark_for_termination(Status::Terminated));

    second.create_node().unwrap();
    assert!(second.commit().is_ok());
    assert_ne!(stale.user_transaction_id(), second.user_transaction_id());
}

#[test]
fn snapshot_becomes_eligible_once_its_transactions_close() {
    let kernel = open_kernel();
    let a = kernel.begin_transaction().unwrap();
    let b = kernel.begin_transaction().unwrap();
    let snapshot = kernel.transactions().snapshot();
    assert_eq!(snapshot.handles().len(), 2);

    a.close().unwrap();
    assert!(!kernel.transactions().eligible_for_freeing(&snapshot));
    let _late = kernel.begin_transaction().unwrap();
    b.close().unwrap();
    assert!(kernel.transactions().eligible_for_freeing(&snapshot));
}

#[test]
fn slots_are_reused_under_churn() {
    let kernel = Arc::new(open_kernel());
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let kernel = Arc::clone(&kernel);
            thread::spawn(move || {
                for _ in 0..50 {
                    let mut tx = kernel.begin_transaction().unwrap();
                    tx.create_node().unwrap();
                    tx.rollback().unwrap();
                    tx.close().unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert!(kernel.transactions().idle_slots() <= 4);
    assert_eq!(kernel.transactions().number_of_active_transactions(), 0);
    assert_eq!(kernel.transactions().counters().started(), 200);
}

#[test]
fn conflicting_commit_waits_for_lock_holder_to_close() {
    let kernel = Arc::new(open_kernel());
    let (node, _) = commit_node(&kernel, 1);

    let mut holder = kernel.begin_transaction().unwrap();
    holder.add_label(node, 2).unwrap();
    holder.commit().unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let waiter = {
        let kernel = Arc::clone(&kernel);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut tx = kernel.begin_transaction().unwrap();
            tx.add_label(node, 3).unwrap();
            let result = tx.commit();
            done.store(true, Ordering::SeqCst);
            tx.close().unwrap();
            result
        })
    };

    thread::sleep(Duration::from_millis(50));
    assert!(!done.load(Ordering::SeqCst));

    holder.close().unwrap();
    assert!(waiter.join().unwrap().is_ok());
    let labels = kernel.storage().node(node).unwrap().labels;
    assert!(labels.contains(&1) && labels.contains(&2) && labels.contains(&3));
}

#[test]
fn terminating_a_lock_waiter_wakes_it() {
    let kernel = Arc::new(open_kernel());
    let (node, _) = commit_node(&kernel, 1);

    let mut holder = kernel.begin_transaction().unwrap();
    holder.set_property(node, 1, 1).unwrap();
    holder.commit().unwrap();
    let holder_id = holder.user_transaction_id();

    let waiter = {
        let kernel = Arc::clone(&kernel);
        thread::spawn(move || {
            let mut tx = kernel.begin_transaction().unwrap();
            tx.set_property(node, 1, 2).and_then(|_| tx.commit())
        })
    };

    let waiter_handle = loop {
        let found = kernel
            .transactions()
            .active_transactions()
            .into_iter()
            .find(|h| h.user_transaction_id() != holder_id);
        if let Some(handle) = found {
            break handle;
        }
        thread::yield_now();
    };
    thread::sleep(Duration::from_millis(20));
    assert!(waiter_handle.mark_for_termination(Status::Terminated));

    assert!(matches!(
        waiter.join().unwrap(),
        Err(KernelError::TransactionTerminated(Status::Terminated))
    ));
    holder.close().unwrap();
    assert_eq!(kernel.storage().property(node, 1), Some(1));
}
