//! Id Sequencing Tests
//!
//! Commit ids handed out to many threads and reported back out of order
//! must leave gap-free committed and closed watermarks.

use proptest::prelude::*;
use rand::seq::SliceRandom;
use std::sync::{Arc, Barrier};
use std::thread;
use tessera::layers::concurrency::{OutOfOrderSequence, SequencingTransactionIdStore};
use tessera::layers::core::{KernelVersion, LogPosition, TransactionId};
use tessera::TransactionIdStore;

fn transaction(id: u64) -> TransactionId {
    TransactionId::new(id, id, KernelVersion::LATEST, id as u32, id * 10, -1)
}

#[test]
fn ids_are_unique_across_threads() {
    let store = Arc::new(SequencingTransactionIdStore::empty());
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                (0..500)
                    .map(|_| store.next_committing_transaction_id())
                    .collect::<Vec<u64>>()
            })
        })
        .collect();

    let mut all: Vec<u64> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    all.sort_unstable();
    let expected: Vec<u64> = (2..2 + 4000).collect();
    assert_eq!(all, expected);
}

#[test]
fn watermarks_wait_for_gaps_to_fill() {
    let store = SequencingTransactionIdStore::empty();
    for _ in 0..3 {
        store.next_committing_transaction_id();
    }

    store.transaction_committed(transaction(4));
    store.transaction_committed(transaction(3));
    assert_eq!(store.last_committed_transaction_id(), 1);
    store.transaction_committed(transaction(2));
    assert_eq!(store.last_committed_transaction_id(), 4);
    assert_eq!(store.last_committed_transaction().checksum, 4);

    store.transaction_closed(transaction(3), LogPosition::new(0, 300));
    assert_eq!(store.last_closed_transaction_id(), 1);
    store.transaction_closed(transaction(2), LogPosition::new(0, 200));
    assert_eq!(store.last_closed_transaction_id(), 3);
    assert_eq!(
        store.last_closed_transaction().log_position,
        LogPosition::new(0, 300)
    );
}

#[test]
fn concurrent_out_of_order_reports_converge() {
    // Ring larger than the id count, so no report waits on another thread.
    let store = Arc::new(SequencingTransactionIdStore::new(
        TransactionId::BASE,
        LogPosition::START,
        4096,
    ));
    let mut ids: Vec<u64> = (0..2000)
        .map(|_| store.next_committing_transaction_id())
        .collect();
    ids.shuffle(&mut rand::thread_rng());

    let chunks: Vec<Vec<u64>> = ids.chunks(250).map(|c| c.to_vec()).collect();
    let handles: Vec<_> = chunks
        .into_iter()
        .map(|chunk| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for id in chunk {
                    store.transaction_committed(transaction(id));
                    store.transaction_closed(transaction(id), LogPosition::new(0, id * 100));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(store.last_committed_transaction_id(), 2001);
    assert_eq!(store.last_closed_transaction_id(), 2001);
    assert_eq!(
        store.last_closed_transaction().log_position,
        LogPosition::new(0, 200_100)
    );
}

proptest! {
    #[test]
    fn sequence_watermark_is_highest_gap_free(order in Just((1u64..=64).collect::<Vec<_>>()).prop_shuffle()) {
        let sequence: OutOfOrderSequence<1> = OutOfOrderSequence::new(0, [0], 128);
        let mut offered = std::collections::BTreeSet::new();
        for number in order {
            sequence.offer(number, [number]);
            offered.insert(number);
            let mut expected = 0;
            while offered.contains(&(expected + 1)) {
                expected += 1;
            }
            prop_assert_eq!(sequence.highest_gapless(), expected);
        }
        prop_assert_eq!(sequence.get(), (64, [64]));
    }
}
