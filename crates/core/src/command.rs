//! Storage command wire contract
//!
//! Each serialized command starts with a one-byte command type. Readers are
//! versioned: a [`CommandReaderFactory`] hands out the reader for the kernel
//! version byte found in the enclosing log entry. Type
//! [`NONE_COMMAND_TYPE`] means "no command" and is skipped by readers.

use crate::error::Result;
use crate::version::KernelVersion;
use std::fmt;

/// Reserved command type byte meaning "no command here".
pub const NONE_COMMAND_TYPE: u8 = 0;

/// A single storage mutation that can be written to the log.
pub trait StorageCommand: fmt::Debug + Send + Sync {
    /// Type byte written first by [`serialize`](StorageCommand::serialize).
    fn command_type(&self) -> u8;

    /// Append the serialized form, type byte first, to `channel`.
    fn serialize(&self, channel: &mut Vec<u8>, version: KernelVersion) -> Result<()>;
}

/// Decodes commands written by one kernel version.
pub trait CommandReader: Send + Sync {
    /// Command type produced by this reader
    type Command;

    /// Version this reader decodes.
    fn kernel_version(&self) -> KernelVersion;

    /// Read the next command, advancing `channel`.
    ///
    /// Returns `Ok(None)` once the channel is exhausted. Bytes of type
    /// [`NONE_COMMAND_TYPE`] are skipped.
    fn read(&self, channel: &mut &[u8]) -> Result<Option<Self::Command>>;

    /// Read every command in `channel`.
    fn read_all(&self, mut channel: &[u8]) -> Result<Vec<Self::Command>> {
        let mut commands = Vec::new();
        while let Some(command) = self.read(&mut channel)? {
            commands.push(command);
        }
        Ok(commands)
    }
}

/// Looks up the reader for a kernel version byte.
pub trait CommandReaderFactory: Send + Sync {
    /// Reader type handed out
    type Reader: CommandReader;

    /// Reader for `version`.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedKernelVersion` when no reader exists.
    fn get(&self, version: KernelVersion) -> Result<&Self::Reader>;

    /// Reader for a raw version byte.
    fn get_for_byte(&self, version: u8) -> Result<&Self::Reader> {
        self.get(KernelVersion::from_byte(version)?)
    }
}
