//! Commit Pipeline Tests
//!
//! Listeners, index updates, externally committed batches and failures
//! during apply, observed through the kernel.

use crate::common::*;
use parking_lot::Mutex;
use std::sync::Arc;
use tessera::layers::storage::{BatchChain, IndexUpdate, IndexUpdateListener};
use tessera::{BatchMetadata, Command, CommandBatch, CommitListener, NodeRecord, Result, TransactionApplicationMode};

#[derive(Default)]
struct RecordingListener {
    successes: Mutex<Vec<u64>>,
    failures: Mutex<Vec<String>>,
}

impl CommitListener for RecordingListener {
    fn register_success(&self, _chain: &BatchChain, transaction_id: u64) -> Result<()> {
        self.successes.lock().push(transaction_id);
        Ok(())
    }

    fn register_failure(&self, _chain: &BatchChain, error: &KernelError) -> Result<()> {
        self.failures.lock().push(error.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct RecordingIndex {
    updates: Mutex<Vec<(IndexUpdate, TransactionApplicationMode)>>,
}

impl IndexUpdateListener for RecordingIndex {
    fn apply_updates(&self, updates: &[IndexUpdate], mode: TransactionApplicationMode) -> Result<()> {
        let mut recorded = self.updates.lock();
        recorded.extend(updates.iter().map(|u| (*u, mode)));
        Ok(())
    }
}

fn node_batch(id: u64) -> CommandBatch {
    CommandBatch::complete(
        vec![Command::Node {
            id,
            before: NodeRecord::unused(),
            after: NodeRecord::in_use(Default::default()),
        }],
        BatchMetadata::default(),
    )
}

// ============================================================================
// Listeners
// ============================================================================

#[test]
fn listeners_see_every_commit() {
    let kernel = open_kernel();
    let listener = Arc::new(RecordingListener::default());
    kernel.commit_process().listeners().add(listener.clone());

    commit_node(&kernel, 1);
    commit_node(&kernel, 1);

    assert_eq!(*listener.successes.lock(), vec![2, 3]);
    assert!(listener.failures.lock().is_empty());
}

#[test]
fn index_listener_gets_property_changes() {
    let kernel = open_kernel();
    let index = Arc::new(RecordingIndex::default());
    kernel.storage().set_index_update_listener(index.clone());

    let mut tx = kernel.begin_transaction().unwrap();
    let node = tx.create_node().unwrap();
    tx.set_property(node, 2, 40).unwrap();
    tx.commit().unwrap();
    tx.close().unwrap();

    let mut tx = kernel.begin_transaction().unwrap();
    tx.remove_property(node, 2).unwrap();
    tx.commit().unwrap();
    tx.close().unwrap();

    let updates = index.updates.lock();
    assert_eq!(updates.len(), 2);
    assert_eq!(updates[0].0.after, Some(40));
    assert_eq!(updates[0].1, TransactionApplicationMode::Internal);
    assert_eq!(updates[1].0.before, Some(40));
    assert_eq!(updates[1].0.after, None);
}

// ============================================================================
// External Batches
// ============================================================================

#[test]
fn external_batches_are_logged_and_applied() {
    let kernel = open_kernel_with(KernelConfig {
        queue_batch_size: 3,
        ..KernelConfig::default()
    });
    let batches = (100..107).map(node_batch).collect();
    assert_eq!(kernel.apply_external(batches).unwrap(), 8);

    for id in 100..107 {
        assert!(kernel.storage().node(id).is_some());
    }
    assert_eq!(kernel.id_store().last_closed_transaction_id(), 8);

    // External nodes are tracked as used, so local creates skip them.
    let mut tx = kernel.begin_transaction().unwrap();
    let local = tx.create_node().unwrap();
    assert!(local >= 107);
    tx.rollback().unwrap();

    let kernel = restart(kernel);
    assert_eq!(kernel.recovery_stats().transactions_replayed, 7);
    assert!(kernel.storage().node(106).is_some());
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn apply_failure_panics_health_but_closes_the_id() {
    let kernel = open_kernel();
    let listener = Arc::new(RecordingListener::default());
    kernel.commit_process().listeners().add(listener.clone());

    kernel.storage().fail_next_apply();
    let mut tx = kernel.begin_transaction().unwrap();
    let node = tx.create_node().unwrap();
    assert!(tx.commit().is_err());
    tx.close().unwrap();

    assert!(!kernel.health().is_healthy());
    assert_eq!(listener.failures.lock().len(), 1);
    assert!(kernel.storage().node(node).is_none());
    assert_eq!(kernel.id_store().last_closed_transaction_id(), 2);
    assert!(matches!(
        kernel.begin_transaction(),
        Err(KernelError::DatabaseUnavailable(_))
    ));

    kernel.health().heal();
    let (_, tx_id) = commit_node(&kernel, 1);
    assert_eq!(tx_id, 3);
}

#[test]
fn restart_repairs_a_store_behind_the_log() {
    let kernel = open_kernel();
    kernel.storage().fail_next_apply();
    let mut tx = kernel.begin_transaction().unwrap();
    let node = tx.create_node().unwrap();
    assert!(tx.commit().is_err());
    tx.close().unwrap();

    let kernel = restart(kernel);
    assert!(kernel.health().is_healthy());
    assert!(kernel.storage().node(node).is_some());
}
