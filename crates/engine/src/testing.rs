//! Wiring shared by the engine's unit tests

use crate::commit::CommitProcess;
use crate::health::DatabaseHealth;
use std::sync::Arc;
use tempfile::TempDir;
use tessera_concurrency::SequencingTransactionIdStore;
use tessera_core::StoreId;
use tessera_durability::{InMemoryTransactionLog, LogFilePreallocator, TransactionLogAppender};
use tessera_storage::{BatchChain, CommandBatch, MemoryStorageEngine};

pub(crate) struct TestKernelParts {
    pub id_store: Arc<SequencingTransactionIdStore>,
    pub log: Arc<InMemoryTransactionLog>,
    pub appender: Arc<TransactionLogAppender>,
    pub storage: Arc<MemoryStorageEngine>,
    pub health: Arc<DatabaseHealth>,
    pub process: Arc<CommitProcess>,
    _dir: Option<TempDir>,
}

impl TestKernelParts {
    pub fn new() -> Self {
        Self::build(None)
    }

    pub fn with_disk_limit(limit: u64) -> Self {
        Self::build(Some(limit))
    }

    fn build(disk_limit: Option<u64>) -> Self {
        let id_store = Arc::new(SequencingTransactionIdStore::empty());
        let log = Arc::new(
            InMemoryTransactionLog::new(StoreId::new(1, 2, "memory", "standard", 1, 0).unwrap())
                .unwrap(),
        );
        let mut appender = TransactionLogAppender::new(log.clone(), id_store.clone());
        let dir = match disk_limit {
            Some(limit) => {
                let dir = TempDir::new().unwrap();
                let preallocator = LogFilePreallocator::open(dir.path().join("log.0"), limit)
                    .unwrap()
                    .with_limit(limit);
                appender = appender.with_preallocator(preallocator);
                Some(dir)
            }
            None => None,
        };
        let appender = Arc::new(appender);
        let storage = Arc::new(MemoryStorageEngine::new());
        let health = Arc::new(DatabaseHealth::new());
        let process = Arc::new(CommitProcess::new(
            appender.clone(),
            storage.clone(),
            id_store.clone(),
            health.clone(),
            disk_limit.is_some(),
        ));
        TestKernelParts {
            id_store,
            log,
            appender,
            storage,
            health,
            process,
            _dir: dir,
        }
    }

    pub fn chain(&self, batch: CommandBatch) -> BatchChain {
        BatchChain::single(self.process.prepare(batch, "test"))
    }
}
