//! Registry of kernel transactions
//!
//! Hands out [`KernelTransaction`]s from a pool of reusable slots. The pool
//! is an arena of slots with a list of idle indexes; a closed transaction
//! returns its slot to the idle list unless the slot had to be disposed.
//!
//! Starting a transaction passes the quiescence gate first: while another
//! thread has new transactions blocked, starts park until unblocked or
//! shut down. Exceeding the concurrency limit fails fast.

use super::handle::KernelTransactionHandle;
use super::slot::{timeout_millis, TransactionSlot};
use super::KernelTransaction;
use crate::commit::CommitProcess;
use crate::locks::{LockService, LockTracer, NoopLockTracer};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tessera_concurrency::{InnerTransactionHandler, TransactionGate, TransactionTerminator};
use tessera_core::{Clock, KernelError, Result, Status, TransactionIdStore};
use tracing::{debug, info};

/// Running totals of transaction outcomes.
#[derive(Debug, Default)]
pub struct TransactionCounters {
    started: AtomicU64,
    committed: AtomicU64,
    rolled_back: AtomicU64,
    terminated: AtomicU64,
}

impl TransactionCounters {
    /// Transactions started.
    pub fn started(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }

    /// Transactions committed, read-only ones included.
    pub fn committed(&self) -> u64 {
        self.committed.load(Ordering::Relaxed)
    }

    /// Transactions rolled back, failed commits included.
    pub fn rolled_back(&self) -> u64 {
        self.rolled_back.load(Ordering::Relaxed)
    }

    /// Transactions that closed after being marked for termination.
    pub fn terminated(&self) -> u64 {
        self.terminated.load(Ordering::Relaxed)
    }

    pub(crate) fn transaction_committed(&self) {
        self.committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn transaction_rolled_back(&self) {
        self.rolled_back.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn transaction_terminated(&self) {
        self.terminated.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Stopped,
    Started,
    Shutdown,
}

#[derive(Default)]
struct Pool {
    slots: Vec<Option<Arc<TransactionSlot>>>,
    idle: Vec<usize>,
    vacant: Vec<usize>,
    active: usize,
}

/// Transactions visible at one point in time.
#[derive(Debug, Clone, Default)]
pub struct TransactionsSnapshot {
    handles: Vec<KernelTransactionHandle>,
}

impl TransactionsSnapshot {
    /// Handles in the snapshot.
    pub fn handles(&self) -> &[KernelTransactionHandle] {
        &self.handles
    }

    /// Whether every transaction in the snapshot has since closed.
    pub fn is_eligible_for_freeing(&self) -> bool {
        self.handles.iter().all(|handle| !handle.is_open())
    }
}

/// State shared by the registry and the transactions it hands out.
pub(crate) struct RegistryShared {
    pub(crate) process: Arc<CommitProcess>,
    pub(crate) id_store: Arc<dyn TransactionIdStore>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) counters: TransactionCounters,
    lock_service: Arc<dyn LockService>,
    lock_tracer: RwLock<Arc<dyn LockTracer>>,
    gate: TransactionGate,
    pool: Mutex<Pool>,
    lifecycle: Mutex<Lifecycle>,
    max_concurrent: AtomicUsize,
    default_timeout_ms: AtomicU64,
    next_user_transaction_id: AtomicU64,
    weak_self: Weak<RegistryShared>,
}

impl RegistryShared {
    pub(crate) fn lock_tracer(&self) -> Arc<dyn LockTracer> {
        Arc::clone(&self.lock_tracer.read())
    }

    fn allocate(&self, pool: &mut Pool) -> Arc<TransactionSlot> {
        let index = pool.vacant.pop().unwrap_or(pool.slots.len());
        let terminator: Arc<dyn TransactionTerminator> = Arc::new(RegistryTerminator {
            registry: self.weak_self.clone(),
        });
        let slot = Arc::new(TransactionSlot::new(
            index,
            self.lock_service.new_client(),
            InnerTransactionHandler::new(terminator),
        ));
        if index == pool.slots.len() {
            pool.slots.push(Some(Arc::clone(&slot)));
        } else {
            pool.slots[index] = Some(Arc::clone(&slot));
        }
        debug!(target: "tessera::txn", slot = index, "Allocated transaction slot");
        slot
    }

    fn acquire(&self, user_transaction_id: u64, timeout: Option<Duration>) -> Result<Arc<TransactionSlot>> {
        let mut pool = self.pool.lock();
        let max = self.max_concurrent.load(Ordering::Acquire);
        if max > 0 && pool.active >= max {
            return Err(KernelError::MaximumTransactionLimitExceeded { max });
        }
        let reused = loop {
            match pool.idle.pop() {
                Some(index) => {
                    if let Some(slot) = pool.slots.get(index).and_then(|s| s.clone()) {
                        break Some(slot);
                    }
                }
                None => break None,
            }
        };
        let slot = match reused {
            Some(slot) => slot,
            None => self.allocate(&mut pool),
        };
        pool.active += 1;
        slot.activate(user_transaction_id, self.clock.millis(), timeout);
        Ok(slot)
    }

    /// Take `slot` back. Disposed slots are dropped from the arena.
    pub(crate) fn release(&self, slot: &Arc<TransactionSlot>, dispose: bool) {
        let mut pool = self.pool.lock();
        pool.active = pool.active.saturating_sub(1);
        let index = slot.index();
        let pooled = matches!(pool.slots.get(index), Some(Some(s)) if Arc::ptr_eq(s, slot));
        if !pooled {
            return;
        }
        if dispose {
            pool.slots[index] = None;
            pool.vacant.push(index);
            debug!(target: "tessera::txn", slot = index, "Disposed transaction slot");
        } else {
            pool.idle.push(index);
        }
    }

    fn active_transactions(&self) -> Vec<KernelTransactionHandle> {
        let pool = self.pool.lock();
        pool.slots
            .iter()
            .flatten()
            .filter(|slot| slot.is_open())
            .map(|slot| KernelTransactionHandle::new(Arc::clone(slot)))
            .collect()
    }

    fn terminate(&self, user_transaction_id: u64, reason: Status) -> bool {
        self.active_transactions()
            .into_iter()
            .find(|handle| handle.user_transaction_id() == user_transaction_id)
            .map(|handle| handle.mark_for_termination(reason))
            .unwrap_or(false)
    }
}

struct RegistryTerminator {
    registry: Weak<RegistryShared>,
}

impl TransactionTerminator for RegistryTerminator {
    fn terminate(&self, user_transaction_id: u64, reason: Status) {
        if let Some(registry) = self.registry.upgrade() {
            registry.terminate(user_transaction_id, reason);
        }
    }
}

/// Pool and registry of kernel transactions.
pub struct KernelTransactions {
    shared: Arc<RegistryShared>,
}

impl KernelTransactions {
    /// Registry committing through `process`, stopped until [`start`](Self::start).
    pub fn new(
        process: Arc<CommitProcess>,
        id_store: Arc<dyn TransactionIdStore>,
        lock_service: Arc<dyn LockService>,
        clock: Arc<dyn Clock>,
        max_concurrent_transactions: usize,
        default_timeout: Option<Duration>,
    ) -> Self {
        let shared = Arc::new_cyclic(|weak_self| RegistryShared {
            process,
            id_store,
            clock,
            counters: TransactionCounters::default(),
            lock_service,
            lock_tracer: RwLock::new(Arc::new(NoopLockTracer)),
            gate: TransactionGate::new(),
            pool: Mutex::new(Pool::default()),
            lifecycle: Mutex::new(Lifecycle::Stopped),
            max_concurrent: AtomicUsize::new(max_concurrent_transactions),
            default_timeout_ms: AtomicU64::new(
                timeout_millis(default_timeout),
            ),
            next_user_transaction_id: AtomicU64::new(1),
            weak_self: weak_self.clone(),
        });
        KernelTransactions { shared }
    }

    /// Trace lock waits of transactions started from now on.
    pub fn set_lock_tracer(&self, tracer: Arc<dyn LockTracer>) {
        *self.shared.lock_tracer.write() = tracer;
    }

    /// Accept new transactions. Reopens a shut down registry.
    pub fn start(&self) {
        let mut lifecycle = self.shared.lifecycle.lock();
        if *lifecycle == Lifecycle::Shutdown {
            self.shared.gate.reopen();
        }
        *lifecycle = Lifecycle::Started;
        info!(target: "tessera::txn", "Kernel transactions started");
    }

    /// Refuse new transactions with an illegal-state error.
    pub fn stop(&self) {
        *self.shared.lifecycle.lock() = Lifecycle::Stopped;
        info!(target: "tessera::txn", "Kernel transactions stopped");
    }

    /// Refuse new transactions with a shutdown error, release parked
    /// starts and terminate running transactions.
    pub fn shutdown(&self) {
        *self.shared.lifecycle.lock() = Lifecycle::Shutdown;
        self.shared.gate.shutdown();
        self.dispose_all();
        info!(target: "tessera::txn", "Kernel transactions shut down");
    }

    /// Start a transaction with the default timeout.
    pub fn new_instance(&self) -> Result<KernelTransaction> {
        let timeout = match self.shared.default_timeout_ms.load(Ordering::Acquire) {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };
        self.new_instance_with_timeout(timeout)
    }

    /// Start a transaction with its own timeout.
    ///
    /// Parks while another thread has new transactions blocked. Fails with
    /// [`KernelError::IllegalState`] when stopped or when called by the
    /// blocking thread, [`KernelError::DatabaseShutdown`] after shutdown and
    /// [`KernelError::MaximumTransactionLimitExceeded`] at the limit.
    pub fn new_instance_with_timeout(&self, timeout: Option<Duration>) -> Result<KernelTransaction> {
        let _pass = self.shared.gate.enter()?;
        match *self.shared.lifecycle.lock() {
            Lifecycle::Started => {}
            Lifecycle::Stopped => {
                return Err(KernelError::IllegalState(
                    "kernel transactions are not started".to_string(),
                ))
            }
            Lifecycle::Shutdown => return Err(KernelError::DatabaseShutdown),
        }

        let user_transaction_id = self
            .shared
            .next_user_transaction_id
            .fetch_add(1, Ordering::SeqCst);
        let slot = self.shared.acquire(user_transaction_id, timeout)?;
        self.shared.counters.started.fetch_add(1, Ordering::Relaxed);
        let latest_committed = self.shared.id_store.last_committed_transaction_id();
        Ok(KernelTransaction::new(
            slot,
            Arc::clone(&self.shared),
            user_transaction_id,
            latest_committed,
        ))
    }

    /// Park new transactions until [`unblock_new_transactions`](Self::unblock_new_transactions).
    pub fn block_new_transactions(&self) -> Result<()> {
        self.shared.gate.block()
    }

    /// Let new transactions start again. Only the blocking thread may call this.
    pub fn unblock_new_transactions(&self) -> Result<()> {
        self.shared.gate.unblock()
    }

    /// Handles of every running transaction.
    pub fn active_transactions(&self) -> Vec<KernelTransactionHandle> {
        self.shared.active_transactions()
    }

    /// Number of running transactions.
    pub fn number_of_active_transactions(&self) -> usize {
        self.shared.pool.lock().active
    }

    /// Number of pooled slots waiting for reuse.
    pub fn idle_slots(&self) -> usize {
        self.shared.pool.lock().idle.len()
    }

    /// Terminate every running transaction as unavailable and drop the
    /// idle slots, so later starts allocate fresh ones.
    pub fn dispose_all(&self) {
        for handle in self.shared.active_transactions() {
            handle.mark_for_termination(Status::DatabaseUnavailable);
        }
        let mut pool = self.shared.pool.lock();
        let idle = std::mem::take(&mut pool.idle);
        for index in idle {
            pool.slots[index] = None;
            pool.vacant.push(index);
        }
    }

    /// Current running transactions.
    pub fn snapshot(&self) -> TransactionsSnapshot {
        TransactionsSnapshot {
            handles: self.active_transactions(),
        }
    }

    /// Whether every transaction in `snapshot` has closed since.
    pub fn eligible_for_freeing(&self, snapshot: &TransactionsSnapshot) -> bool {
        snapshot.is_eligible_for_freeing()
    }

    /// Change the concurrency limit. `0` means unbounded.
    pub fn set_max_concurrent_transactions(&self, max: usize) {
        self.shared.max_concurrent.store(max, Ordering::Release);
    }

    /// Current concurrency limit.
    pub fn max_concurrent_transactions(&self) -> usize {
        self.shared.max_concurrent.load(Ordering::Acquire)
    }

    /// Outcome totals.
    pub fn counters(&self) -> &TransactionCounters {
        &self.shared.counters
    }

    /// Clock transactions are stamped with.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.shared.clock
    }
}

impl TransactionTerminator for KernelTransactions {
    fn terminate(&self, user_transaction_id: u64, reason: Status) {
        self.shared.terminate(user_transaction_id, reason);
    }
}

impl std::fmt::Debug for KernelTransactions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelTransactions")
            .field("active", &self.number_of_active_transactions())
            .field("max", &self.max_concurrent_transactions())
            .finish()
    }
}
