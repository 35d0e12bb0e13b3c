//! The transactional kernel: every component wired together
//!
//! # Opening
//!
//! ```ignore
//! use tessera_engine::Kernel;
//!
//! // In memory, default configuration
//! let kernel = Kernel::builder().open()?;
//!
//! // With a data directory: reads tessera.toml and pre-allocates the log file
//! let kernel = Kernel::builder().data_dir("/data/tessera").open()?;
//!
//! let mut tx = kernel.begin_transaction()?;
//! let node = tx.create_node()?;
//! tx.commit()?;
//! tx.close()?;
//! ```
//!
//! Opening runs recovery over the log before any transaction can start.

use crate::background::{JobScheduler, ThreadJobScheduler};
use crate::commit::CommitProcess;
use crate::config::{KernelConfig, CONFIG_FILE_NAME};
use crate::health::DatabaseHealth;
use crate::locks::{InMemoryLockService, LockService};
use crate::monitor::TransactionTimeoutMonitor;
use crate::queue::{CommitProcessApplier, TransactionQueue};
use crate::recovery::{Recovery, RecoveryStats};
use crate::transaction::{KernelTransaction, KernelTransactions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tessera_concurrency::SequencingTransactionIdStore;
use tessera_core::{
    Clock, LogPosition, Result, StoreId, SystemClock, TransactionApplicationMode, TransactionId,
    TransactionIdStore,
};
use tessera_durability::{InMemoryTransactionLog, LogFilePreallocator, TransactionLogAppender};
use tessera_storage::{CommandBatch, MemoryStorageEngine};
use tracing::info;

/// File name of the pre-allocated log inside the data directory.
pub const LOG_FILE_NAME: &str = "tessera.log";

/// Storage engine name written into generated store ids.
pub const STORAGE_ENGINE_NAME: &str = "memory";

/// Record format name written into generated store ids.
pub const FORMAT_NAME: &str = "standard";

/// Builder for [`Kernel`].
#[derive(Default)]
pub struct KernelBuilder {
    config: Option<KernelConfig>,
    data_dir: Option<PathBuf>,
    clock: Option<Arc<dyn Clock>>,
    log: Option<Arc<InMemoryTransactionLog>>,
    storage: Option<Arc<MemoryStorageEngine>>,
    lock_service: Option<Arc<dyn LockService>>,
}

impl KernelBuilder {
    /// Builder with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `config` instead of reading it from the data directory.
    pub fn config(mut self, config: KernelConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Directory holding the configuration file and the log file.
    pub fn data_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.data_dir = Some(path.into());
        self
    }

    /// Clock used for transaction start times and timeouts.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Recover from and append to an existing log.
    pub fn log(mut self, log: Arc<InMemoryTransactionLog>) -> Self {
        self.log = Some(log);
        self
    }

    /// Apply to an existing storage engine.
    pub fn storage(mut self, storage: Arc<MemoryStorageEngine>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Lock service handing out per-transaction lock clients.
    pub fn lock_service(mut self, lock_service: Arc<dyn LockService>) -> Self {
        self.lock_service = Some(lock_service);
        self
    }

    /// Recover and start the kernel.
    ///
    /// # Errors
    ///
    /// Fails on an invalid configuration, an unreadable configuration
    /// file, a log file that cannot be created, or a failed recovery.
    pub fn open(self) -> Result<Kernel> {
        let config = match (self.config, &self.data_dir) {
            (Some(config), _) => config,
            (None, Some(dir)) => load_config(dir)?,
            (None, None) => KernelConfig::default(),
        };
        config.validate()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let log = match self.log {
            Some(log) => log,
            None => Arc::new(InMemoryTransactionLog::new(StoreId::generate(
                STORAGE_ENGINE_NAME,
                FORMAT_NAME,
                1,
                0,
            )?)?),
        };
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStorageEngine::new()));
        let id_store = Arc::new(SequencingTransactionIdStore::new(
            TransactionId::BASE,
            LogPosition::START,
            config.out_of_order_capacity,
        ));

        let recovery_stats = Recovery::new(&log, storage.as_ref(), id_store.as_ref()).recover()?;

        let mut appender = TransactionLogAppender::new(Arc::clone(&log), id_store.clone());
        let preallocate = config.preallocate_logs && self.data_dir.is_some();
        if let (true, Some(dir)) = (preallocate, &self.data_dir) {
            appender = appender.with_preallocator(LogFilePreallocator::open(
                dir.join(LOG_FILE_NAME),
                config.preallocation_chunk_bytes,
            )?);
        }

        let health = Arc::new(DatabaseHealth::new());
        let process = Arc::new(CommitProcess::new(
            Arc::new(appender),
            storage.clone(),
            id_store.clone(),
            Arc::clone(&health),
            preallocate,
        ));
        let transactions = Arc::new(KernelTransactions::new(
            Arc::clone(&process),
            id_store.clone(),
            self.lock_service
                .unwrap_or_else(|| Arc::new(InMemoryLockService::new())),
            Arc::clone(&clock),
            config.max_concurrent_transactions,
            config.transaction_timeout(),
        ));

        let scheduler = ThreadJobScheduler::new();
        let monitor = Arc::new(TransactionTimeoutMonitor::new(
            Arc::clone(&transactions),
            Arc::clone(&clock),
        ));
        let job_monitor = Arc::clone(&monitor);
        scheduler.schedule_recurring(
            "timeout-monitor",
            config.timeout_monitor_interval(),
            Box::new(move || {
                job_monitor.run();
            }),
        )?;

        transactions.start();
        info!(
            target: "tessera::txn",
            last_tx_id = id_store.last_committed_transaction_id(),
            replayed = recovery_stats.transactions_replayed,
            "Kernel started"
        );

        Ok(Kernel {
            config,
            log,
            storage,
            id_store,
            health,
            process,
            transactions,
            monitor,
            scheduler,
            recovery_stats,
            shut_down: AtomicBool::new(false),
        })
    }
}

fn load_config(dir: &Path) -> Result<KernelConfig> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(CONFIG_FILE_NAME);
    KernelConfig::write_default_if_missing(&path)?;
    KernelConfig::from_file(&path)
}

/// A running transactional kernel.
pub struct Kernel {
    config: KernelConfig,
    log: Arc<InMemoryTransactionLog>,
    storage: Arc<MemoryStorageEngine>,
    id_store: Arc<SequencingTransactionIdStore>,
    health: Arc<DatabaseHealth>,
    process: Arc<CommitProcess>,
    transactions: Arc<KernelTransactions>,
    monitor: Arc<TransactionTimeoutMonitor>,
    scheduler: ThreadJobScheduler,
    recovery_stats: RecoveryStats,
    shut_down: AtomicBool,
}

impl Kernel {
    /// Builder for a kernel.
    pub fn builder() -> KernelBuilder {
        KernelBuilder::new()
    }

    /// Start a transaction with the configured default timeout.
    ///
    /// # Errors
    ///
    /// Fails when the kernel is unhealthy, shut down, or at its
    /// transaction limit.
    pub fn begin_transaction(&self) -> Result<KernelTransaction> {
        self.health.assert_healthy()?;
        self.transactions.new_instance()
    }

    /// Start a transaction with its own timeout.
    pub fn begin_transaction_with_timeout(
        &self,
        timeout: Option<Duration>,
    ) -> Result<KernelTransaction> {
        self.health.assert_healthy()?;
        self.transactions.new_instance_with_timeout(timeout)
    }

    /// Apply batches that were committed elsewhere, in order.
    ///
    /// Batches are appended and applied in EXTERNAL mode in groups of the
    /// configured queue size. Returns the id of the last transaction.
    pub fn apply_external(&self, batches: Vec<CommandBatch>) -> Result<u64> {
        self.health.assert_healthy()?;
        let mut queue = TransactionQueue::new(
            self.config.queue_batch_size,
            CommitProcessApplier::new(Arc::clone(&self.process), TransactionApplicationMode::External),
        );
        for batch in batches {
            queue.queue(self.process.prepare(batch, "external"))?;
        }
        queue.apply_transactions()?;
        Ok(queue.applier().last_transaction_id())
    }

    /// Mark every transaction past its timeout. Returns how many were marked.
    ///
    /// Also runs on a background thread every configured interval.
    pub fn check_timeouts(&self) -> usize {
        self.monitor.run()
    }

    /// Checkpoint at the last closed transaction. Recovery starts there.
    pub fn checkpoint(&self) -> TransactionId {
        let closed = self.id_store.last_closed_transaction();
        self.log
            .checkpoint(closed.transaction_id, closed.log_position);
        closed.transaction_id
    }

    /// Registry of running transactions.
    pub fn transactions(&self) -> &Arc<KernelTransactions> {
        &self.transactions
    }

    /// Storage engine transactions are applied to.
    pub fn storage(&self) -> &Arc<MemoryStorageEngine> {
        &self.storage
    }

    /// The transaction log.
    pub fn log(&self) -> &Arc<InMemoryTransactionLog> {
        &self.log
    }

    /// Commit id sequencer and watermarks.
    pub fn id_store(&self) -> &Arc<SequencingTransactionIdStore> {
        &self.id_store
    }

    /// Commit process shared by all transactions.
    pub fn commit_process(&self) -> &Arc<CommitProcess> {
        &self.process
    }

    /// Kernel health.
    pub fn health(&self) -> &Arc<DatabaseHealth> {
        &self.health
    }

    /// Configuration the kernel was opened with.
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// What recovery did at open.
    pub fn recovery_stats(&self) -> &RecoveryStats {
        &self.recovery_stats
    }

    /// Identity of the store behind the log.
    pub fn store_id(&self) -> &StoreId {
        self.log.store_id()
    }

    /// Stop background jobs and dispose every transaction.
    ///
    /// Running transactions are terminated. Safe to call more than once.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.scheduler.shutdown();
        self.transactions.shutdown();
        info!(
            target: "tessera::txn",
            last_tx_id = self.id_store.last_committed_transaction_id(),
            "Kernel shut down"
        );
    }

    /// Whether [`shutdown`](Self::shutdown) was called.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

impl Drop for Kernel {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("config", &self.config)
            .field("id_store", &self.id_store)
            .field("healthy", &self.health.is_healthy())
            .finish()
    }
}
