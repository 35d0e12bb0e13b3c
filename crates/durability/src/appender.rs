//! Log appender
//!
//! The appender is the seam between the commit process and the log. Under a
//! single append lock it assigns commit ids to the batches of a chain,
//! writes each batch as a checksummed [`LogEntry`], records the batch with
//! the id store and hands the durable coordinates back through
//! [`CommandBatchToApply::batch_appended`].
//!
//! Assigning ids under the same lock that orders the writes keeps commit ids
//! and append indexes in the same order, which the application ordering of
//! counts batches relies on.

use crate::entry::LogEntry;
use crate::error::LogError;
use crate::log::InMemoryTransactionLog;
use crate::preallocate::LogFilePreallocator;
use parking_lot::Mutex;
use std::sync::Arc;
use tessera_core::{Result, TransactionIdStore, UNKNOWN_TX_ID};
use tessera_storage::{BatchChain, CommandBatchToApply};
use tracing::{debug, warn};

/// Envelope overhead added to the serialized commands of a batch.
const ENTRY_OVERHEAD: u64 = 128;

/// Appends batches to the transaction log.
pub trait LogAppender: Send + Sync {
    /// Make room for `bytes` more bytes. No-op unless pre-allocation is on.
    fn preallocate(&self, _bytes: u64) -> Result<()> {
        Ok(())
    }

    /// Append every batch of `chain` in link order.
    ///
    /// Batches without a transaction id get one assigned here. Returns the
    /// transaction id of the last batch appended.
    fn append(&self, chain: &mut BatchChain) -> Result<u64>;
}

/// Where an injected append failure strikes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendFault {
    /// Fail before the batch has a transaction id
    BeforeIdAssignment,
    /// Fail after the batch got its transaction id, before it is written
    AfterIdAssignment,
}

/// Appender writing to an [`InMemoryTransactionLog`].
pub struct TransactionLogAppender {
    log: Arc<InMemoryTransactionLog>,
    id_store: Arc<dyn TransactionIdStore>,
    preallocator: Option<LogFilePreallocator>,
    append_lock: Mutex<()>,
    fault: Mutex<Option<AppendFault>>,
}

impl TransactionLogAppender {
    /// Appender for `log`, drawing commit ids from `id_store`.
    pub fn new(log: Arc<InMemoryTransactionLog>, id_store: Arc<dyn TransactionIdStore>) -> Self {
        TransactionLogAppender {
            log,
            id_store,
            preallocator: None,
            append_lock: Mutex::new(()),
            fault: Mutex::new(None),
        }
    }

    /// Pre-allocate disk space through `preallocator` before appends.
    pub fn with_preallocator(mut self, preallocator: LogFilePreallocator) -> Self {
        self.preallocator = Some(preallocator);
        self
    }

    /// The log appended to.
    pub fn log(&self) -> &Arc<InMemoryTransactionLog> {
        &self.log
    }

    /// Make the next append fail at `fault`.
    pub fn fail_next_append(&self, fault: AppendFault) {
        *self.fault.lock() = Some(fault);
    }

    fn take_fault(&self, wanted: AppendFault) -> Option<AppendFault> {
        let mut fault = self.fault.lock();
        if *fault == Some(wanted) {
            fault.take()
        } else {
            None
        }
    }

    fn append_one(&self, batch: &mut CommandBatchToApply, previous_id: u64) -> Result<u64> {
        if self.take_fault(AppendFault::BeforeIdAssignment).is_some() {
            return Err(LogError::Injected("append failed before id assignment".into()).into());
        }

        if batch.transaction_id() == UNKNOWN_TX_ID {
            let id = if !batch.batch().is_first() && previous_id != UNKNOWN_TX_ID {
                previous_id
            } else {
                self.id_store.next_committing_transaction_id()
            };
            batch.set_transaction_id(id);
        }
        let transaction_id = batch.transaction_id();

        if self.take_fault(AppendFault::AfterIdAssignment).is_some() {
            return Err(LogError::Injected(format!(
                "append of transaction {} failed after id assignment",
                transaction_id
            ))
            .into());
        }

        let append_index = self.log.last_append_index() + 1;
        let entry = LogEntry::for_batch(batch, append_index)?;
        let (bytes, checksum) = entry.to_bytes()?;
        let (before, after) = self.log.write(&bytes, append_index);
        if let Some(preallocator) = &self.preallocator {
            preallocator.consumed(bytes.len() as u64);
        }
        self.id_store.append_batch(append_index, after);
        batch.batch_appended(append_index, before, after, checksum);

        debug!(
            target: "tessera::log",
            tx_id = transaction_id,
            chunk_id = batch.chunk_id(),
            append_index,
            %after,
            "Appended batch"
        );
        Ok(transaction_id)
    }
}

impl LogAppender for TransactionLogAppender {
    fn preallocate(&self, bytes: u64) -> Result<()> {
        match &self.preallocator {
            Some(preallocator) => preallocator.ensure(bytes).map_err(|e| {
                warn!(target: "tessera::log", bytes, error = %e, "Pre-allocation failed");
                e.into()
            }),
            None => Ok(()),
        }
    }

    fn append(&self, chain: &mut BatchChain) -> Result<u64> {
        let _guard = self.append_lock.lock();
        let mut last_id = UNKNOWN_TX_ID;
        for index in chain.link_order() {
            let Some(batch) = chain.get_mut(index) else {
                continue;
            };
            last_id = self.append_one(batch, last_id)?;
        }
        Ok(last_id)
    }
}

/// Rough number of log bytes `chain` will take.
pub fn estimated_size(chain: &BatchChain) -> u64 {
    chain
        .iter()
        .map(|batch| {
            let commands: u64 = batch
                .batch()
                .commands()
                .iter()
                .map(|command| command.estimated_size() as u64)
                .sum();
            commands + batch.batch().subject().len() as u64 + ENTRY_OVERHEAD
        })
        .sum()
}
