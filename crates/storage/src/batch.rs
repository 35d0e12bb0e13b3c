//! The unit of change handed to the log and the store
//!
//! A [`CommandBatch`] is an ordered list of commands plus the metadata of the
//! transaction (or transaction chunk) that produced it. It is mutated only
//! while being built and once more when the log assigns its append index.

use crate::command::{serialize_commands, Command};
use tessera_core::{KernelVersion, Result, UNKNOWN_CONSENSUS_INDEX};

/// Lease id of batches committed without a lease.
pub const NO_LEASE: i32 = -1;

/// Transaction-level metadata carried by every batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchMetadata {
    /// Opaque consensus ordering token
    pub consensus_index: i64,
    /// Lease the batch was committed under
    pub lease_id: i32,
    /// Name of the subject that ran the transaction
    pub subject: String,
    /// Transaction start time in milliseconds
    pub time_started: u64,
    /// Commit time in milliseconds
    pub time_committed: u64,
    /// Last committed transaction id when the transaction started
    pub latest_committed_tx_when_started: u64,
    /// Layout version used to serialize the commands
    pub kernel_version: KernelVersion,
}

impl Default for BatchMetadata {
    fn default() -> Self {
        BatchMetadata {
            consensus_index: UNKNOWN_CONSENSUS_INDEX,
            lease_id: NO_LEASE,
            subject: String::new(),
            time_started: 0,
            time_committed: 0,
            latest_committed_tx_when_started: 0,
            kernel_version: KernelVersion::LATEST,
        }
    }
}

/// Ordered storage commands of one transaction or one chunk of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBatch {
    commands: Vec<Command>,
    metadata: BatchMetadata,
    first: bool,
    last: bool,
    rollback: bool,
    append_index: Option<u64>,
}

impl CommandBatch {
    /// Batch holding a whole transaction.
    pub fn complete(commands: Vec<Command>, metadata: BatchMetadata) -> Self {
        Self::chunk(commands, metadata, true, true)
    }

    /// One chunk of a transaction split into several batches.
    pub fn chunk(commands: Vec<Command>, metadata: BatchMetadata, first: bool, last: bool) -> Self {
        CommandBatch {
            commands,
            metadata,
            first,
            last,
            rollback: false,
            append_index: None,
        }
    }

    /// Final chunk marking a partially committed transaction as undone.
    pub fn rollback_chunk(metadata: BatchMetadata) -> Self {
        CommandBatch {
            commands: Vec::new(),
            metadata,
            first: false,
            last: true,
            rollback: true,
            append_index: None,
        }
    }

    /// Rebuild a batch read back from the log.
    pub fn from_log(
        commands: Vec<Command>,
        metadata: BatchMetadata,
        first: bool,
        last: bool,
        rollback: bool,
        append_index: u64,
    ) -> Self {
        CommandBatch {
            commands,
            metadata,
            first,
            last,
            rollback,
            append_index: Some(append_index),
        }
    }

    /// Commands in apply order.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Number of commands.
    pub fn command_count(&self) -> usize {
        self.commands.len()
    }

    /// Transaction metadata.
    pub fn metadata(&self) -> &BatchMetadata {
        &self.metadata
    }

    /// Consensus index.
    pub fn consensus_index(&self) -> i64 {
        self.metadata.consensus_index
    }

    /// Lease id.
    pub fn lease_id(&self) -> i32 {
        self.metadata.lease_id
    }

    /// Subject that ran the transaction.
    pub fn subject(&self) -> &str {
        &self.metadata.subject
    }

    /// Start time in milliseconds.
    pub fn time_started(&self) -> u64 {
        self.metadata.time_started
    }

    /// Commit time in milliseconds.
    pub fn time_committed(&self) -> u64 {
        self.metadata.time_committed
    }

    /// Last committed id when the transaction started.
    pub fn latest_committed_tx_when_started(&self) -> u64 {
        self.metadata.latest_committed_tx_when_started
    }

    /// Kernel version of the batch.
    pub fn kernel_version(&self) -> KernelVersion {
        self.metadata.kernel_version
    }

    /// Whether this is the first chunk of its transaction.
    pub fn is_first(&self) -> bool {
        self.first
    }

    /// Whether this is the last chunk of its transaction.
    pub fn is_last(&self) -> bool {
        self.last
    }

    /// Whether this chunk undoes a partially committed transaction.
    pub fn is_rollback(&self) -> bool {
        self.rollback
    }

    /// Append index, once the log assigned one.
    pub fn append_index(&self) -> Option<u64> {
        self.append_index
    }

    /// Record the append index assigned by the log.
    ///
    /// # Panics
    ///
    /// Panics if an append index was already set.
    pub fn set_append_index(&mut self, append_index: u64) {
        assert!(
            self.append_index.is_none(),
            "append index already set to {:?}",
            self.append_index
        );
        self.append_index = Some(append_index);
    }

    /// Whether any command must be applied in commit order.
    pub fn requires_application_ordering(&self) -> bool {
        self.commands
            .iter()
            .any(Command::requires_application_ordering)
    }

    /// Serialize the commands in this batch's kernel version.
    pub fn serialize_commands(&self) -> Result<Vec<u8>> {
        serialize_commands(&self.commands, self.metadata.kernel_version)
    }
}
