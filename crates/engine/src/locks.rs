//! Entity locks
//!
//! Transactions take exclusive locks on the nodes they change before their
//! commands are created. Only the contract matters to the kernel: a
//! [`LockService`] hands out one [`LockClient`] per transaction, the client
//! acquires and releases per entity id and can be stopped from any thread,
//! which fails pending and future acquisitions.
//!
//! [`InMemoryLockService`] is a plain exclusive-lock table.

use parking_lot::{Condvar, Mutex};
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tessera_core::{KernelError, Result};
use tracing::trace;

/// Observes lock acquisition.
pub trait LockTracer: Send + Sync {
    /// `client` is about to wait for `resource`.
    fn wait_for_lock(&self, client: u64, resource: u64);

    /// `client` holds `resource`.
    fn lock_acquired(&self, client: u64, resource: u64);
}

/// Tracer that records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLockTracer;

impl LockTracer for NoopLockTracer {
    fn wait_for_lock(&self, _client: u64, _resource: u64) {}

    fn lock_acquired(&self, _client: u64, _resource: u64) {}
}

/// Locks held on behalf of one transaction.
pub trait LockClient: Send + Sync {
    /// Id of this client.
    fn id(&self) -> u64;

    /// Take an exclusive lock on `resource`, waiting for other holders.
    ///
    /// Fails with [`KernelError::LockAcquisition`] once the client is stopped.
    fn acquire_exclusive(&self, tracer: &dyn LockTracer, resource: u64) -> Result<()>;

    /// Release one lock.
    fn release_exclusive(&self, resource: u64);

    /// Release every lock this client holds.
    fn release_all(&self) -> Result<()>;

    /// Fail pending and future acquisitions.
    fn stop(&self);

    /// Clear the stopped flag so the client can be reused.
    fn reset(&self);

    /// Number of locks held.
    fn lock_count(&self) -> usize;
}

/// Source of lock clients.
pub trait LockService: Send + Sync {
    /// A fresh client with no locks.
    fn new_client(&self) -> Arc<dyn LockClient>;
}

#[derive(Default)]
struct LockTable {
    owners: Mutex<FxHashMap<u64, u64>>,
    released: Condvar,
}

/// Exclusive lock table kept in memory.
#[derive(Default)]
pub struct InMemoryLockService {
    table: Arc<LockTable>,
    next_client: AtomicU64,
    fail_next_release: Arc<AtomicBool>,
}

impl InMemoryLockService {
    /// Empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `release_all` of any client fail.
    pub fn fail_next_release(&self) {
        self.fail_next_release.store(true, Ordering::SeqCst);
    }

    /// Number of locked resources.
    pub fn locked(&self) -> usize {
        self.table.owners.lock().len()
    }
}

impl LockService for InMemoryLockService {
    fn new_client(&self) -> Arc<dyn LockClient> {
        Arc::new(InMemoryLockClient {
            id: self.next_client.fetch_add(1, Ordering::Relaxed) + 1,
            table: Arc::clone(&self.table),
            held: Mutex::new(FxHashSet::default()),
            stopped: AtomicBool::new(false),
            fail_next_release: Arc::clone(&self.fail_next_release),
        })
    }
}

impl std::fmt::Debug for InMemoryLockService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryLockService")
            .field("locked", &self.locked())
            .finish()
    }
}

const STOP_POLL: Duration = Duration::from_millis(10);

struct InMemoryLockClient {
    id: u64,
    table: Arc<LockTable>,
    held: Mutex<FxHashSet<u64>>,
    stopped: AtomicBool,
    fail_next_release: Arc<AtomicBool>,
}

impl InMemoryLockClient {
    fn check_stopped(&self, resource: u64) -> Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(KernelError::LockAcquisition(format!(
                "lock client {} stopped while acquiring lock on {}",
                self.id, resource
            )));
        }
        Ok(())
    }
}

impl LockClient for InMemoryLockClient {
    fn id(&self) -> u64 {
        self.id
    }

    fn acquire_exclusive(&self, tracer: &dyn LockTracer, resource: u64) -> Result<()> {
        self.check_stopped(resource)?;
        let mut owners = self.table.owners.lock();
        let mut traced = false;
        loop {
            match owners.get(&resource) {
                None => {
                    owners.insert(resource, self.id);
                    break;
                }
                Some(owner) if *owner == self.id => break,
                Some(_) => {
                    if !traced {
                        tracer.wait_for_lock(self.id, resource);
                        traced = true;
                    }
                    // Stop is signalled without the table lock, so poll.
                    self.table.released.wait_for(&mut owners, STOP_POLL);
                    self.check_stopped(resource)?;
                }
            }
        }
        drop(owners);
        self.held.lock().insert(resource);
        tracer.lock_acquired(self.id, resource);
        trace!(target: "tessera::txn", client = self.id, resource, "Lock acquired");
        Ok(())
    }

    fn release_exclusive(&self, resource: u64) {
        if self.held.lock().remove(&resource) {
            let mut owners = self.table.owners.lock();
            if owners.get(&resource) == Some(&self.id) {
                owners.remove(&resource);
            }
            self.table.released.notify_all();
        }
    }

    fn release_all(&self) -> Result<()> {
        let held: Vec<u64> = self.held.lock().drain().collect();
        {
            let mut owners = self.table.owners.lock();
            for resource in &held {
                if owners.get(resource) == Some(&self.id) {
                    owners.remove(resource);
                }
            }
        }
        self.table.released.notify_all();
        if self.fail_next_release.swap(false, Ordering::SeqCst) {
            return Err(KernelError::LockAcquisition(format!(
                "lock client {} failed to release its locks",
                self.id
            )));
        }
        Ok(())
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.table.released.notify_all();
    }

    fn reset(&self) {
        self.stopped.store(false, Ordering::SeqCst);
    }

    fn lock_count(&self) -> usize {
        self.held.lock().len()
    }
}
