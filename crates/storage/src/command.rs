//! Storage commands and their versioned wire format
//!
//! # Format
//!
//! ```text
//! Node:     [type=1][id u64][before record][after record]
//! Property: [type=2][entity u64][key u32][before opt i64][after opt i64]
//! Counts:   [type=3][label u32][delta i32 (V1) | i64 (V2)]
//!
//! record:   [in_use u8][label count u8][labels u32...]
//! opt i64:  [present u8][value i64 if present]
//! ```
//!
//! All integers are big-endian. A type byte of `0` is padding and is
//! skipped by readers.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use smallvec::SmallVec;
use std::io;
use tessera_core::{
    CommandReader, CommandReaderFactory, KernelError, KernelVersion, Result, StorageCommand,
    NONE_COMMAND_TYPE,
};

/// Type byte of node commands.
pub const NODE_COMMAND: u8 = 1;
/// Type byte of property commands.
pub const PROPERTY_COMMAND: u8 = 2;
/// Type byte of counts commands.
pub const COUNTS_COMMAND: u8 = 3;

/// Most labels a node record can carry.
pub const MAX_LABELS: usize = u8::MAX as usize;

/// Label set of a node. Most nodes carry few labels.
pub type Labels = SmallVec<[u32; 4]>;

/// Image of a node record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeRecord {
    /// Whether the record holds a live node
    pub in_use: bool,
    /// Labels of the node, sorted
    pub labels: Labels,
}

impl NodeRecord {
    /// Record of a live node.
    pub fn in_use(labels: Labels) -> Self {
        NodeRecord {
            in_use: true,
            labels,
        }
    }

    /// Record of an unused slot.
    pub fn unused() -> Self {
        NodeRecord::default()
    }
}

/// A single storage mutation.
///
/// Node and property commands carry absolute before and after images.
/// Counts commands carry a delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Change of a node record
    Node {
        /// Node id
        id: u64,
        /// Record before the change
        before: NodeRecord,
        /// Record after the change
        after: NodeRecord,
    },
    /// Change of one property of a node
    Property {
        /// Owning node id
        entity: u64,
        /// Property key token
        key: u32,
        /// Value before the change, `None` if absent
        before: Option<i64>,
        /// Value after the change, `None` if removed
        after: Option<i64>,
    },
    /// Change of the node count of a label
    Counts {
        /// Label token
        label: u32,
        /// Change of the count
        delta: i64,
    },
}

impl Command {
    /// Whether applying this command must follow commit order.
    pub fn requires_application_ordering(&self) -> bool {
        matches!(self, Command::Counts { .. })
    }

    /// Upper bound of the serialized size in bytes.
    pub fn estimated_size(&self) -> usize {
        match self {
            Command::Node { before, after, .. } => {
                1 + 8 + 2 * 2 + 4 * (before.labels.len() + after.labels.len())
            }
            Command::Property { .. } => 1 + 8 + 4 + 2 * 9,
            Command::Counts { .. } => 1 + 4 + 8,
        }
    }
}

impl StorageCommand for Command {
    fn command_type(&self) -> u8 {
        match self {
            Command::Node { .. } => NODE_COMMAND,
            Command::Property { .. } => PROPERTY_COMMAND,
            Command::Counts { .. } => COUNTS_COMMAND,
        }
    }

    fn serialize(&self, channel: &mut Vec<u8>, version: KernelVersion) -> Result<()> {
        channel.write_u8(self.command_type())?;
        match self {
            Command::Node { id, before, after } => {
                channel.write_u64::<BigEndian>(*id)?;
                write_record(channel, before)?;
                write_record(channel, after)?;
            }
            Command::Property {
                entity,
                key,
                before,
                after,
            } => {
                channel.write_u64::<BigEndian>(*entity)?;
                channel.write_u32::<BigEndian>(*key)?;
                write_optional(channel, *before)?;
                write_optional(channel, *after)?;
            }
            Command::Counts { label, delta } => {
                channel.write_u32::<BigEndian>(*label)?;
                if version.is_at_least(KernelVersion::V2) {
                    channel.write_i64::<BigEndian>(*delta)?;
                } else {
                    let narrow = i32::try_from(*delta).map_err(|_| {
                        KernelError::MalformedCommand(format!(
                            "counts delta {} does not fit kernel version {}",
                            delta, version
                        ))
                    })?;
                    channel.write_i32::<BigEndian>(narrow)?;
                }
            }
        }
        Ok(())
    }
}

fn write_record(channel: &mut Vec<u8>, record: &NodeRecord) -> Result<()> {
    if record.labels.len() > MAX_LABELS {
        return Err(KernelError::MalformedCommand(format!(
            "node record has {} labels, at most {} fit",
            record.labels.len(),
            MAX_LABELS
        )));
    }
    channel.write_u8(record.in_use as u8)?;
    channel.write_u8(record.labels.len() as u8)?;
    for label in &record.labels {
        channel.write_u32::<BigEndian>(*label)?;
    }
    Ok(())
}

fn write_optional(channel: &mut Vec<u8>, value: Option<i64>) -> Result<()> {
    match value {
        Some(v) => {
            channel.write_u8(1)?;
            channel.write_i64::<BigEndian>(v)?;
        }
        None => channel.write_u8(0)?,
    }
    Ok(())
}

/// Serialize a sequence of commands.
pub fn serialize_commands(commands: &[Command], version: KernelVersion) -> Result<Vec<u8>> {
    let mut channel = Vec::with_capacity(commands.len() * 32);
    for command in commands {
        command.serialize(&mut channel, version)?;
    }
    Ok(channel)
}

/// Reader of the command layout of one kernel version.
#[derive(Debug, Clone, Copy)]
pub struct VersionedCommandReader {
    version: KernelVersion,
}

impl VersionedCommandReader {
    /// Reader for `version`.
    pub fn new(version: KernelVersion) -> Self {
        VersionedCommandReader { version }
    }

    fn read_record(&self, channel: &mut &[u8]) -> io::Result<NodeRecord> {
        let in_use = channel.read_u8()? != 0;
        let count = channel.read_u8()? as usize;
        let mut labels = Labels::with_capacity(count);
        for _ in 0..count {
            labels.push(channel.read_u32::<BigEndian>()?);
        }
        Ok(NodeRecord { in_use, labels })
    }

    fn read_optional(&self, channel: &mut &[u8]) -> io::Result<Option<i64>> {
        match channel.read_u8()? {
            0 => Ok(None),
            _ => Ok(Some(channel.read_i64::<BigEndian>()?)),
        }
    }

    fn read_body(&self, command_type: u8, channel: &mut &[u8]) -> Result<Command> {
        let truncated = |e: io::Error| {
            KernelError::MalformedCommand(format!(
                "command of type {} is truncated: {}",
                command_type, e
            ))
        };
        match command_type {
            NODE_COMMAND => {
                let id = channel.read_u64::<BigEndian>().map_err(truncated)?;
                let before = self.read_record(channel).map_err(truncated)?;
                let after = self.read_record(channel).map_err(truncated)?;
                Ok(Command::Node { id, before, after })
            }
            PROPERTY_COMMAND => {
                let entity = channel.read_u64::<BigEndian>().map_err(truncated)?;
                let key = channel.read_u32::<BigEndian>().map_err(truncated)?;
                let before = self.read_optional(channel).map_err(truncated)?;
                let after = self.read_optional(channel).map_err(truncated)?;
                Ok(Command::Property {
                    entity,
                    key,
                    before,
                    after,
                })
            }
            COUNTS_COMMAND => {
                let label = channel.read_u32::<BigEndian>().map_err(truncated)?;
                let delta = if self.version.is_at_least(KernelVersion::V2) {
                    channel.read_i64::<BigEndian>().map_err(truncated)?
                } else {
                    channel.read_i32::<BigEndian>().map_err(truncated)? as i64
                };
                Ok(Command::Counts { label, delta })
            }
            other => Err(KernelError::UnknownCommandType(other)),
        }
    }
}

impl CommandReader for VersionedCommandReader {
    type Command = Command;

    fn kernel_version(&self) -> KernelVersion {
        self.version
    }

    fn read(&self, channel: &mut &[u8]) -> Result<Option<Command>> {
        loop {
            let Some((&command_type, rest)) = channel.split_first() else {
                return Ok(None);
            };
            *channel = rest;
            if command_type == NONE_COMMAND_TYPE {
                continue;
            }
            return self.read_body(command_type, channel).map(Some);
        }
    }
}

/// Readers for every kernel version this build supports.
#[derive(Debug, Clone)]
pub struct RecordCommandReaderFactory {
    v1: VersionedCommandReader,
    v2: VersionedCommandReader,
}

impl RecordCommandReaderFactory {
    /// Create the factory.
    pub fn new() -> Self {
        RecordCommandReaderFactory {
            v1: VersionedCommandReader::new(KernelVersion::V1),
            v2: VersionedCommandReader::new(KernelVersion::V2),
        }
    }
}

impl Default for RecordCommandReaderFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandReaderFactory for RecordCommandReaderFactory {
    type Reader = VersionedCommandReader;

    fn get(&self, version: KernelVersion) -> Result<&VersionedCommandReader> {
        if version == KernelVersion::V1 {
            Ok(&self.v1)
        } else if version == KernelVersion::V2 {
            Ok(&self.v2)
        } else {
            Err(KernelError::UnsupportedKernelVersion(version.as_byte()))
        }
    }
}
