//! Inner Transaction Tests
//!
//! Terminating an outer transaction terminates its inner transactions,
//! including ones that register while the termination is running.

use crate::common::*;
use parking_lot::Mutex;
use std::sync::{Arc, Barrier};
use std::thread;
use tessera::layers::concurrency::{InnerTransactionHandler, TransactionTerminator};

#[derive(Default)]
struct RecordingTerminator {
    terminated: Mutex<Vec<(u64, Status)>>,
}

impl TransactionTerminator for RecordingTerminator {
    fn terminate(&self, user_transaction_id: u64, reason: Status) {
        self.terminated.lock().push((user_transaction_id, reason));
    }
}

#[test]
fn registration_racing_termination_is_never_missed() {
    for _ in 0..200 {
        let terminator = Arc::new(RecordingTerminator::default());
        let handler = Arc::new(InnerTransactionHandler::new(terminator.clone()));
        let barrier = Arc::new(Barrier::new(4));

        let mut threads = Vec::new();
        {
            let handler = Arc::clone(&handler);
            let barrier = Arc::clone(&barrier);
            threads.push(thread::spawn(move || {
                barrier.wait();
                handler.register_inner_transaction(7);
            }));
        }
        for _ in 0..3 {
            let handler = Arc::clone(&handler);
            let barrier = Arc::clone(&barrier);
            threads.push(thread::spawn(move || {
                barrier.wait();
                handler.terminate_inner_transactions(Status::Terminated);
            }));
        }
        for thread in threads {
            thread.join().unwrap();
        }

        let terminated = terminator.terminated.lock();
        assert!(terminated.contains(&(7, Status::Terminated)));
        assert_eq!(handler.termination_reason(), Some(Status::Terminated));
    }
}

#[test]
fn terminating_outer_terminates_inner_through_the_kernel() {
    let kernel = open_kernel();
    let outer = kernel.begin_transaction().unwrap();
    let mut inner = kernel.begin_transaction().unwrap();
    outer
        .inner_transaction_handler()
        .register_inner_transaction(inner.user_transaction_id());

    assert!(outer.mark_for_termination(Status::Terminated));
    assert_eq!(inner.termination_reason(), Some(Status::Terminated));
    assert!(inner.create_node().is_err());
}

#[test]
fn inner_registered_after_termination_is_terminated_at_once() {
    let kernel = open_kernel();
    let outer = kernel.begin_transaction().unwrap();
    outer.mark_for_termination(Status::TransactionTimedOut);

    let inner = kernel.begin_transaction().unwrap();
    outer
        .inner_transaction_handler()
        .register_inner_transaction(inner.user_transaction_id());
    assert_eq!(
        inner.termination_reason(),
        Some(Status::TransactionTimedOut)
    );
}

#[test]
fn finished_inner_transactions_are_not_terminated() {
    let kernel = open_kernel();
    let outer = kernel.begin_transaction().unwrap();
    let inner = kernel.begin_transaction().unwrap();
    let inner_id = inner.user_transaction_id();
    let handler = outer.inner_transaction_handler();
    handler.register_inner_transaction(inner_id);
    handler.remove_inner_transaction(inner_id);
    assert!(!handler.has_inner_transactions());

    outer.mark_for_termination(Status::Terminated);
    assert_eq!(inner.termination_reason(), None);
}
