//! Quiescence Tests
//!
//! Blocking new transactions parks every other starter until the blocking
//! thread unblocks.

use crate::common::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn blocked_starts_wait_for_unblock() {
    let kernel = Arc::new(open_kernel());
    kernel.transactions().block_new_transactions().unwrap();

    let started = Arc::new(AtomicBool::new(false));
    let starter = {
        let kernel = Arc::clone(&kernel);
        let started = Arc::clone(&started);
        thread::spawn(move || {
            let tx = kernel.begin_transaction().unwrap();
            started.store(true, Ordering::SeqCst);
            tx.close().unwrap();
        })
    };

    thread::sleep(Duration::from_millis(50));
    assert!(!started.load(Ordering::SeqCst));

    let intruder = {
        let kernel = Arc::clone(&kernel);
        thread::spawn(move || kernel.transactions().unblock_new_transactions())
    };
    assert!(matches!(
        intruder.join().unwrap(),
        Err(KernelError::IllegalState(_))
    ));
    thread::sleep(Duration::from_millis(20));
    assert!(!started.load(Ordering::SeqCst));

    kernel.transactions().unblock_new_transactions().unwrap();
    starter.join().unwrap();
    assert!(started.load(Ordering::SeqCst));
}

#[test]
fn blocking_thread_cannot_start_transactions() {
    let kernel = open_kernel();
    kernel.transactions().block_new_transactions().unwrap();
    assert!(matches!(
        kernel.begin_transaction(),
        Err(KernelError::IllegalState(_))
    ));
    kernel.transactions().unblock_new_transactions().unwrap();
    assert!(kernel.begin_transaction().is_ok());
}

#[test]
fn only_the_blocking_thread_may_unblock() {
    let kernel = Arc::new(open_kernel());
    kernel.transactions().block_new_transactions().unwrap();

    let other = {
        let kernel = Arc::clone(&kernel);
        thread::spawn(move || kernel.transactions().unblock_new_transactions())
    };
    assert!(matches!(
        other.join().unwrap(),
        Err(KernelError::IllegalState(_))
    ));

    kernel.transactions().unblock_new_transactions().unwrap();
}

#[test]
fn shutdown_releases_parked_starters() {
    let kernel = Arc::new(open_kernel());
    kernel.transactions().block_new_transactions().unwrap();

    let starter = {
        let kernel = Arc::clone(&kernel);
        thread::spawn(move || kernel.begin_transaction().map(|_| ()))
    };
    thread::sleep(Duration::from_millis(20));
    kernel.shutdown();

    assert!(matches!(
        starter.join().unwrap(),
        Err(KernelError::DatabaseShutdown)
    ));
}

#[test]
fn running_transactions_continue_while_blocked() {
    let kernel = open_kernel();
    let mut tx = kernel.begin_transaction().unwrap();
    kernel.transactions().block_new_transactions().unwrap();

    tx.create_node().unwrap();
    assert_eq!(tx.commit().unwrap(), 2);
    tx.close().unwrap();

    kernel.transactions().unblock_new_transactions().unwrap();
}
