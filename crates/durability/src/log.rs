//! In-memory transaction log
//!
//! The log is one byte buffer laid out like a log file: a 64-byte header
//! holding the [`StoreId`], followed by [`LogEntry`] envelopes. Positions
//! handed out are real byte offsets into that buffer, so readers can seek to
//! a checkpoint and detect torn or corrupted tails by checksum.

use crate::entry::LogEntry;
use crate::error::{LogError, LogResult};
use parking_lot::RwLock;
use tessera_core::{LogPosition, StoreId, TransactionId, INITIAL_LOG_VERSION};
use tracing::{info, warn};

/// A checkpoint: every transaction up to `transaction_id` is in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    /// Last transaction covered by the checkpoint
    pub transaction_id: TransactionId,
    /// Log position right after that transaction
    pub position: LogPosition,
}

/// An entry read back with its location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionedEntry {
    /// Position of the first byte of the entry
    pub position: LogPosition,
    /// Position right after the entry
    pub position_after: LogPosition,
    /// Checksum of the entry
    pub checksum: u32,
    /// The entry
    pub entry: LogEntry,
}

/// Result of scanning the log.
#[derive(Debug)]
pub struct LogScan {
    /// Entries read, in log order
    pub entries: Vec<PositionedEntry>,
    /// Where reading stopped because of corruption, and why
    pub corruption: Option<(LogPosition, LogError)>,
}

#[derive(Debug)]
struct LogState {
    bytes: Vec<u8>,
    last_append_index: u64,
    checkpoint: Option<Checkpoint>,
}

/// Transaction log kept in memory.
#[derive(Debug)]
pub struct InMemoryTransactionLog {
    store_id: StoreId,
    state: RwLock<LogState>,
}

impl InMemoryTransactionLog {
    /// Empty log for the store `store_id`.
    pub fn new(store_id: StoreId) -> LogResult<Self> {
        let header = store_id.serialize().map_err(|e| LogError::Corrupted {
            offset: 0,
            reason: e.to_string(),
        })?;
        Ok(InMemoryTransactionLog {
            store_id,
            state: RwLock::new(LogState {
                bytes: header.to_vec(),
                last_append_index: 0,
                checkpoint: None,
            }),
        })
    }

    /// Identity of the store this log belongs to.
    pub fn store_id(&self) -> &StoreId {
        &self.store_id
    }

    /// Position right after the last entry.
    pub fn end_position(&self) -> LogPosition {
        LogPosition::new(INITIAL_LOG_VERSION, self.state.read().bytes.len() as u64)
    }

    /// Append index of the last entry.
    pub fn last_append_index(&self) -> u64 {
        self.state.read().last_append_index
    }

    /// Write encoded entry bytes. Returns positions before and after.
    pub(crate) fn write(&self, bytes: &[u8], append_index: u64) -> (LogPosition, LogPosition) {
        let mut state = self.state.write();
        let before = LogPosition::new(INITIAL_LOG_VERSION, state.bytes.len() as u64);
        state.bytes.extend_from_slice(bytes);
        state.last_append_index = append_index;
        let after = LogPosition::new(INITIAL_LOG_VERSION, state.bytes.len() as u64);
        (before, after)
    }

    /// Record a checkpoint.
    pub fn checkpoint(&self, transaction_id: TransactionId, position: LogPosition) {
        self.state.write().checkpoint = Some(Checkpoint {
            transaction_id,
            position,
        });
        info!(
            target: "tessera::log",
            tx_id = transaction_id.id,
            %position,
            "Checkpoint written"
        );
    }

    /// Last checkpoint, if any.
    pub fn last_checkpoint(&self) -> Option<Checkpoint> {
        self.state.read().checkpoint
    }

    /// Read every entry from `from` to the end of the log.
    ///
    /// Reading stops at the first entry that cannot be decoded; that
    /// position and error are reported in [`LogScan::corruption`].
    pub fn read_from(&self, from: LogPosition) -> LogScan {
        let state = self.state.read();
        let mut entries = Vec::new();
        let mut offset = from.byte_offset as usize;

        while offset < state.bytes.len() {
            match LogEntry::from_bytes(&state.bytes[offset..], offset as u64) {
                Ok((entry, checksum, consumed)) => {
                    let position = LogPosition::new(INITIAL_LOG_VERSION, offset as u64);
                    offset += consumed;
                    entries.push(PositionedEntry {
                        position,
                        position_after: LogPosition::new(INITIAL_LOG_VERSION, offset as u64),
                        checksum,
                        entry,
                    });
                }
                Err(e) => {
                    let position = LogPosition::new(INITIAL_LOG_VERSION, offset as u64);
                    warn!(
                        target: "tessera::log",
                        %position,
                        error = %e,
                        "Stopped reading log at unreadable entry"
                    );
                    return LogScan {
                        entries,
                        corruption: Some((position, e)),
                    };
                }
            }
        }

        LogScan {
            entries,
            corruption: None,
        }
    }

    /// Cut the log at `position`, dropping everything after it.
    pub fn truncate(&self, position: LogPosition) {
        let mut state = self.state.write();
        let at = (position.byte_offset as usize).min(state.bytes.len());
        state.bytes.truncate(at);
    }

    /// Set the append index the next append continues from.
    pub fn set_last_append_index(&self, append_index: u64) {
        self.state.write().last_append_index = append_index;
    }

    /// Flip the bits of one byte, simulating media corruption.
    pub fn corrupt_byte(&self, offset: u64) {
        let mut state = self.state.write();
        if let Some(byte) = state.bytes.get_mut(offset as usize) {
            *byte ^= 0xFF;
        }
    }
}
