//! Application envelope of command batches and the per-transaction chain
//!
//! [`CommandBatchToApply`] wraps one [`CommandBatch`] with everything the
//! commit pipeline needs to apply it: the transaction and chunk ids, the
//! store cursors it reads through, and the [`Commitment`] that publishes its
//! committed and closed facts.
//!
//! A [`BatchChain`] owns the envelopes of one unit of application. Nodes
//! live in an arena and link to each other by index, so closing the chain
//! is a single pass over the arena: every node is closed exactly once on
//! every exit path, including when the chain is dropped without an explicit
//! close.

use crate::batch::CommandBatch;
use crate::command::Command;
use crate::ordering::{ApplicationOrdering, OrderingKey};
use std::fmt;
use std::sync::Arc;
use tessera_core::{Commitment, LogPosition, BASE_CHUNK_ID, UNKNOWN_TX_ID};

/// Read and write accounting of the cursors a batch touched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CursorContext {
    tag: &'static str,
    reads: u64,
    writes: u64,
}

impl CursorContext {
    /// Context labelled with the operation it serves.
    pub fn new(tag: &'static str) -> Self {
        CursorContext {
            tag,
            reads: 0,
            writes: 0,
        }
    }

    /// Label of the operation.
    pub fn tag(&self) -> &'static str {
        self.tag
    }

    /// Count one record read.
    pub fn record_read(&mut self) {
        self.reads += 1;
    }

    /// Count one record write.
    pub fn record_write(&mut self) {
        self.writes += 1;
    }

    /// Records read.
    pub fn reads(&self) -> u64 {
        self.reads
    }

    /// Records written.
    pub fn writes(&self) -> u64 {
        self.writes
    }
}

/// Cursors a batch holds open on the store while it is applied.
pub trait StoreCursors: Send {
    /// Release the cursors. Called exactly once.
    fn close(&mut self);
}

/// Store cursors holding nothing.
#[derive(Debug, Default)]
pub struct NoStoreCursors;

impl StoreCursors for NoStoreCursors {
    fn close(&mut self) {}
}

/// View of a batch that the store applier works on.
pub trait CommandsToApply {
    /// Commit id of the transaction.
    fn transaction_id(&self) -> u64;

    /// Chunk id within the transaction.
    fn chunk_id(&self) -> u64;

    /// Commands in apply order.
    fn commands(&self) -> &[Command];

    /// Whether this batch must be applied in commit order.
    fn requires_application_ordering(&self) -> bool;
}

/// One batch plus its application envelope.
pub struct CommandBatchToApply {
    transaction_id: u64,
    chunk_id: u64,
    previous_batch_log_position: LogPosition,
    batch: CommandBatch,
    cursor_context: CursorContext,
    store_cursors: Box<dyn StoreCursors>,
    commitment: Box<dyn Commitment>,
    ordering: Option<Arc<ApplicationOrdering>>,
    ordering_registered: bool,
    log_position_after: Option<LogPosition>,
    closed: bool,
}

impl CommandBatchToApply {
    /// Wrap `batch` for application. The transaction id is assigned later
    /// by the log unless set with [`with_transaction_id`](Self::with_transaction_id).
    pub fn new(
        batch: CommandBatch,
        commitment: Box<dyn Commitment>,
        cursor_context: CursorContext,
        store_cursors: Box<dyn StoreCursors>,
    ) -> Self {
        CommandBatchToApply {
            transaction_id: UNKNOWN_TX_ID,
            chunk_id: BASE_CHUNK_ID,
            previous_batch_log_position: LogPosition::UNSPECIFIED,
            batch,
            cursor_context,
            store_cursors,
            commitment,
            ordering: None,
            ordering_registered: false,
            log_position_after: None,
            closed: false,
        }
    }

    /// Use an already known transaction id.
    pub fn with_transaction_id(mut self, transaction_id: u64) -> Self {
        self.transaction_id = transaction_id;
        self
    }

    /// Mark this batch as chunk `chunk_id`, following a chunk that ended at
    /// `previous_batch_log_position`.
    pub fn with_chunk(mut self, chunk_id: u64, previous_batch_log_position: LogPosition) -> Self {
        self.chunk_id = chunk_id;
        self.previous_batch_log_position = previous_batch_log_position;
        self
    }

    /// Serialize application with other ordering-sensitive batches.
    pub fn with_application_ordering(mut self, ordering: Arc<ApplicationOrdering>) -> Self {
        self.ordering = Some(ordering);
        self
    }

    /// Commit id, or `UNKNOWN_TX_ID` before the log assigned one.
    pub fn transaction_id(&self) -> u64 {
        self.transaction_id
    }

    /// Assign the commit id.
    ///
    /// # Panics
    ///
    /// Panics if a different id was already assigned.
    pub fn set_transaction_id(&mut self, transaction_id: u64) {
        assert!(
            self.transaction_id == UNKNOWN_TX_ID || self.transaction_id == transaction_id,
            "batch already belongs to transaction {}, cannot move it to {}",
            self.transaction_id,
            transaction_id
        );
        self.transaction_id = transaction_id;
    }

    /// Chunk id.
    pub fn chunk_id(&self) -> u64 {
        self.chunk_id
    }

    /// Log position where the previous chunk ended.
    pub fn previous_batch_log_position(&self) -> LogPosition {
        self.previous_batch_log_position
    }

    /// Wrapped batch.
    pub fn batch(&self) -> &CommandBatch {
        &self.batch
    }

    /// Cursor accounting.
    pub fn cursor_context(&self) -> &CursorContext {
        &self.cursor_context
    }

    /// Mutable cursor accounting.
    pub fn cursor_context_mut(&mut self) -> &mut CursorContext {
        &mut self.cursor_context
    }

    /// Log position right after this batch, once appended.
    pub fn log_position_after(&self) -> Option<LogPosition> {
        self.log_position_after
    }

    /// Whether the log has appended this batch.
    pub fn is_appended(&self) -> bool {
        self.log_position_after.is_some()
    }

    /// Ordering key of this batch: its append index, 0 before it is appended.
    pub fn ordering_key(&self) -> OrderingKey {
        self.batch.append_index().unwrap_or(0)
    }

    /// Called by the log once the batch is durable.
    ///
    /// Records the append index, hands the durable coordinates to the
    /// commitment and, for ordering-sensitive batches, registers with the
    /// application ordering. Must be called in append order.
    pub fn batch_appended(
        &mut self,
        append_index: u64,
        position_before: LogPosition,
        position_after: LogPosition,
        checksum: u32,
    ) {
        assert_ne!(
            self.transaction_id, UNKNOWN_TX_ID,
            "batch appended before a transaction id was assigned"
        );
        self.batch.set_append_index(append_index);
        self.log_position_after = Some(position_after);
        self.commitment.commit(
            self.transaction_id,
            append_index,
            self.batch.is_first(),
            self.batch.is_last(),
            self.batch.kernel_version(),
            position_before,
            position_after,
            checksum,
            self.batch.consensus_index(),
        );
        if self.batch.requires_application_ordering() {
            if let Some(ordering) = &self.ordering {
                ordering.register(self.ordering_key());
                self.ordering_registered = true;
            }
        }
    }

    /// Publish the batch as committed.
    pub fn commit(&mut self) {
        self.commitment.publish_as_committed(self.batch.time_committed());
    }

    /// Block until every lower ordering-sensitive batch has applied.
    pub fn await_application_turn(&self) {
        if self.ordering_registered {
            if let Some(ordering) = &self.ordering {
                ordering.await_turn(self.ordering_key());
            }
        }
    }

    /// Release this batch's place in the application ordering.
    pub fn application_done(&mut self) {
        if self.ordering_registered {
            if let Some(ordering) = &self.ordering {
                ordering.complete(self.ordering_key());
            }
            self.ordering_registered = false;
        }
    }

    /// Whether the batch has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Publish the batch as closed and release its resources. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.application_done();
        self.commitment.publish_as_closed();
        self.store_cursors.close();
    }
}

impl CommandsToApply for CommandBatchToApply {
    fn transaction_id(&self) -> u64 {
        self.transaction_id
    }

    fn chunk_id(&self) -> u64 {
        self.chunk_id
    }

    fn commands(&self) -> &[Command] {
        self.batch.commands()
    }

    fn requires_application_ordering(&self) -> bool {
        self.batch.requires_application_ordering()
    }
}

impl fmt::Debug for CommandBatchToApply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandBatchToApply")
            .field("transaction_id", &self.transaction_id)
            .field("chunk_id", &self.chunk_id)
            .field("commands", &self.batch.command_count())
            .field("closed", &self.closed)
            .finish()
    }
}

struct Link {
    batch: CommandBatchToApply,
    next: Option<usize>,
}

/// Owned, singly linked chain of batches applied together.
#[derive(Default)]
pub struct BatchChain {
    links: Vec<Link>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl BatchChain {
    /// Empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Chain of a single batch.
    pub fn single(batch: CommandBatchToApply) -> Self {
        let mut chain = Self::new();
        chain.push(batch);
        chain
    }

    /// Link `batch` after the current tail.
    pub fn push(&mut self, batch: CommandBatchToApply) {
        let index = self.links.len();
        self.links.push(Link { batch, next: None });
        match self.tail {
            Some(tail) => self.links[tail].next = Some(index),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
    }

    /// Number of batches.
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Whether the chain has no batches.
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// First batch.
    pub fn head(&self) -> Option<&CommandBatchToApply> {
        self.head.map(|index| &self.links[index].batch)
    }

    /// Arena indices in link order.
    pub fn link_order(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.links.len());
        let mut cursor = self.head;
        while let Some(index) = cursor {
            order.push(index);
            cursor = self.links[index].next;
        }
        order
    }

    /// Batch at an arena index.
    pub fn get(&self, index: usize) -> Option<&CommandBatchToApply> {
        self.links.get(index).map(|link| &link.batch)
    }

    /// Mutable batch at an arena index.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut CommandBatchToApply> {
        self.links.get_mut(index).map(|link| &mut link.batch)
    }

    /// Iterate batches in link order.
    pub fn iter(&self) -> ChainIter<'_> {
        ChainIter {
            chain: self,
            cursor: self.head,
        }
    }

    /// Publish every batch as committed.
    pub fn commit(&mut self) {
        for index in self.link_order() {
            self.links[index].batch.commit();
        }
    }

    /// Close every batch exactly once. Idempotent.
    pub fn close(&mut self) {
        for link in &mut self.links {
            link.batch.close();
        }
    }

    /// Whether every batch is closed.
    pub fn is_closed(&self) -> bool {
        self.links.iter().all(|link| link.batch.is_closed())
    }

    /// Move the batches out, leaving this chain empty.
    pub fn take(&mut self) -> BatchChain {
        std::mem::take(self)
    }
}

impl Drop for BatchChain {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for BatchChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Iterator over a chain in link order.
pub struct ChainIter<'a> {
    chain: &'a BatchChain,
    cursor: Option<usize>,
}

impl<'a> Iterator for ChainIter<'a> {
    type Item = &'a CommandBatchToApply;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.cursor?;
        let link = &self.chain.links[index];
        self.cursor = link.next;
        Some(&link.batch)
    }
}
