//! Log entry envelope
//!
//! # Layout
//!
//! ```text
//! ┌─────────────────┬────────────────────────────────────────────┬──────────┐
//! │ Length (4 bytes)│ Payload (variable)                         │ CRC32 (4)│
//! └─────────────────┴────────────────────────────────────────────┴──────────┘
//!
//! Payload:
//! [kernel version 1][flags 1][tx id 8][chunk id 8][append index 8]
//! [consensus index 8][lease id 4][time started 8][time committed 8]
//! [latest committed when started 8][previous chunk position 8+8]
//! [subject len 2][subject][commands len 4][commands]
//! ```
//!
//! Length covers payload plus CRC. The CRC covers the payload and doubles
//! as the checksum of the committed transaction.

use crate::error::{LogError, LogResult};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher;
use std::io::Read;
use tessera_core::{CommandReader, CommandReaderFactory, KernelVersion, LogPosition, Result};
use tessera_storage::{BatchMetadata, Command, CommandBatch, CommandBatchToApply};

/// Entry is the first chunk of its transaction.
pub const FLAG_FIRST: u8 = 0x01;
/// Entry is the last chunk of its transaction.
pub const FLAG_LAST: u8 = 0x02;
/// Entry undoes a partially committed transaction.
pub const FLAG_ROLLBACK: u8 = 0x04;

const LENGTH_SIZE: usize = 4;
const CRC_SIZE: usize = 4;
const FIXED_PAYLOAD: usize = 1 + 1 + 8 + 8 + 8 + 8 + 4 + 8 + 8 + 8 + 16 + 2 + 4;

/// One appended batch as stored in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Kernel version the commands were written with
    pub kernel_version: KernelVersion,
    /// First / last / rollback flags
    pub flags: u8,
    /// Commit id
    pub transaction_id: u64,
    /// Chunk id within the transaction
    pub chunk_id: u64,
    /// Append index assigned by the log
    pub append_index: u64,
    /// Batch metadata
    pub metadata: BatchMetadata,
    /// Where the previous chunk ended
    pub previous_batch_position: LogPosition,
    /// Serialized commands
    pub commands: Vec<u8>,
}

impl LogEntry {
    /// Envelope for `batch` about to be appended at `append_index`.
    pub fn for_batch(batch: &CommandBatchToApply, append_index: u64) -> Result<Self> {
        let inner = batch.batch();
        let mut flags = 0;
        if inner.is_first() {
            flags |= FLAG_FIRST;
        }
        if inner.is_last() {
            flags |= FLAG_LAST;
        }
        if inner.is_rollback() {
            flags |= FLAG_ROLLBACK;
        }
        Ok(LogEntry {
            kernel_version: inner.kernel_version(),
            flags,
            transaction_id: batch.transaction_id(),
            chunk_id: batch.chunk_id(),
            append_index,
            metadata: inner.metadata().clone(),
            previous_batch_position: batch.previous_batch_log_position(),
            commands: inner.serialize_commands()?,
        })
    }

    /// Whether this is the first chunk.
    pub fn is_first(&self) -> bool {
        self.flags & FLAG_FIRST != 0
    }

    /// Whether this is the last chunk.
    pub fn is_last(&self) -> bool {
        self.flags & FLAG_LAST != 0
    }

    /// Whether this chunk undoes its transaction.
    pub fn is_rollback(&self) -> bool {
        self.flags & FLAG_ROLLBACK != 0
    }

    fn payload(&self) -> LogResult<Vec<u8>> {
        let subject = self.metadata.subject.as_bytes();
        let subject_len = u16::try_from(subject.len()).map_err(|_| LogError::Corrupted {
            offset: 0,
            reason: format!("subject of {} bytes is too long", subject.len()),
        })?;

        let mut payload = Vec::with_capacity(FIXED_PAYLOAD + subject.len() + self.commands.len());
        payload.write_u8(self.kernel_version.as_byte())?;
        payload.write_u8(self.flags)?;
        payload.write_u64::<BigEndian>(self.transaction_id)?;
        payload.write_u64::<BigEndian>(self.chunk_id)?;
        payload.write_u64::<BigEndian>(self.append_index)?;
        payload.write_i64::<BigEndian>(self.metadata.consensus_index)?;
        payload.write_i32::<BigEndian>(self.metadata.lease_id)?;
        payload.write_u64::<BigEndian>(self.metadata.time_started)?;
        payload.write_u64::<BigEndian>(self.metadata.time_committed)?;
        payload.write_u64::<BigEndian>(self.metadata.latest_committed_tx_when_started)?;
        payload.write_u64::<BigEndian>(self.previous_batch_position.log_version)?;
        payload.write_u64::<BigEndian>(self.previous_batch_position.byte_offset)?;
        payload.write_u16::<BigEndian>(subject_len)?;
        payload.extend_from_slice(subject);
        payload.write_u32::<BigEndian>(self.commands.len() as u32)?;
        payload.extend_from_slice(&self.commands);
        Ok(payload)
    }

    /// Serialize to bytes. Returns the bytes and the payload checksum.
    pub fn to_bytes(&self) -> LogResult<(Vec<u8>, u32)> {
        let payload = self.payload()?;
        let crc = compute_crc(&payload);

        let mut bytes = Vec::with_capacity(LENGTH_SIZE + payload.len() + CRC_SIZE);
        bytes.write_u32::<BigEndian>((payload.len() + CRC_SIZE) as u32)?;
        bytes.extend_from_slice(&payload);
        bytes.write_u32::<BigEndian>(crc)?;
        Ok((bytes, crc))
    }

    /// Decode the entry starting at `bytes[0]`, located at `offset`.
    ///
    /// Returns the entry, its checksum and the number of bytes consumed.
    pub fn from_bytes(bytes: &[u8], offset: u64) -> LogResult<(Self, u32, usize)> {
        let corrupted = |reason: String| LogError::Corrupted { offset, reason };

        if bytes.len() < LENGTH_SIZE {
            return Err(corrupted("truncated length".to_string()));
        }
        let length = (&bytes[..LENGTH_SIZE]).read_u32::<BigEndian>()? as usize;
        if length < FIXED_PAYLOAD + CRC_SIZE {
            return Err(corrupted(format!("length {} below minimum", length)));
        }
        if bytes.len() < LENGTH_SIZE + length {
            return Err(corrupted(format!(
                "entry of {} bytes runs past end of log",
                length
            )));
        }

        let payload = &bytes[LENGTH_SIZE..LENGTH_SIZE + length - CRC_SIZE];
        let expected = (&bytes[LENGTH_SIZE + length - CRC_SIZE..LENGTH_SIZE + length])
            .read_u32::<BigEndian>()?;
        let actual = compute_crc(payload);
        if expected != actual {
            return Err(LogError::ChecksumMismatch {
                offset,
                expected,
                actual,
            });
        }

        let entry = Self::decode_payload(payload).map_err(|e| match e {
            LogError::Io(io) => corrupted(io.to_string()),
            other => other,
        })?;
        Ok((entry, actual, LENGTH_SIZE + length))
    }

    fn decode_payload(mut payload: &[u8]) -> LogResult<Self> {
        let version_byte = payload.read_u8()?;
        let kernel_version =
            KernelVersion::from_byte(version_byte).map_err(|_| LogError::UnsupportedVersion(version_byte))?;
        let flags = payload.read_u8()?;
        let transaction_id = payload.read_u64::<BigEndian>()?;
        let chunk_id = payload.read_u64::<BigEndian>()?;
        let append_index = payload.read_u64::<BigEndian>()?;
        let consensus_index = payload.read_i64::<BigEndian>()?;
        let lease_id = payload.read_i32::<BigEndian>()?;
        let time_started = payload.read_u64::<BigEndian>()?;
        let time_committed = payload.read_u64::<BigEndian>()?;
        let latest_committed_tx_when_started = payload.read_u64::<BigEndian>()?;
        let previous_batch_position = LogPosition::new(
            payload.read_u64::<BigEndian>()?,
            payload.read_u64::<BigEndian>()?,
        );

        let subject_len = payload.read_u16::<BigEndian>()? as usize;
        let mut subject = vec![0u8; subject_len];
        payload.read_exact(&mut subject)?;
        let subject = String::from_utf8(subject).map_err(|e| LogError::Corrupted {
            offset: 0,
            reason: e.to_string(),
        })?;

        let commands_len = payload.read_u32::<BigEndian>()? as usize;
        let mut commands = vec![0u8; commands_len];
        payload.read_exact(&mut commands)?;

        Ok(LogEntry {
            kernel_version,
            flags,
            transaction_id,
            chunk_id,
            append_index,
            metadata: BatchMetadata {
                consensus_index,
                lease_id,
                subject,
                time_started,
                time_committed,
                latest_committed_tx_when_started,
                kernel_version,
            },
            previous_batch_position,
            commands,
        })
    }

    /// Rebuild the command batch, decoding commands with the reader for
    /// this entry's kernel version.
    pub fn to_batch<F>(&self, readers: &F) -> Result<CommandBatch>
    where
        F: CommandReaderFactory,
        F::Reader: CommandReader<Command = Command>,
    {
        let commands = readers.get(self.kernel_version)?.read_all(&self.commands)?;
        Ok(CommandBatch::from_log(
            commands,
            self.metadata.clone(),
            self.is_first(),
            self.is_last(),
            self.is_rollback(),
            self.append_index,
        ))
    }
}

/// CRC32 of `data`.
pub fn compute_crc(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}
