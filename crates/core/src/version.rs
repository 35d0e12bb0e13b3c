//! Kernel version byte
//!
//! Every log entry carries the kernel version it was written with. Readers
//! pick the command layout for that version; versions this build does not
//! know are rejected rather than guessed.

use crate::error::{KernelError, Result};
use std::fmt;

/// Version of the command layout written into the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KernelVersion(u8);

impl KernelVersion {
    /// First layout. Counts deltas are 32 bits wide.
    pub const V1: KernelVersion = KernelVersion(1);
    /// Current layout. Counts deltas are 64 bits wide.
    pub const V2: KernelVersion = KernelVersion(2);
    /// Version new batches are written with.
    pub const LATEST: KernelVersion = KernelVersion::V2;

    const KNOWN: [KernelVersion; 2] = [KernelVersion::V1, KernelVersion::V2];

    /// Version for a raw byte, if this build knows it.
    pub fn from_byte(byte: u8) -> Result<Self> {
        let version = KernelVersion(byte);
        if version.is_supported() {
            Ok(version)
        } else {
            Err(KernelError::UnsupportedKernelVersion(byte))
        }
    }

    /// Raw version byte.
    pub fn as_byte(&self) -> u8 {
        self.0
    }

    /// Whether this build can read and write this version.
    pub fn is_supported(&self) -> bool {
        Self::KNOWN.contains(self)
    }

    /// Whether this version is at least `other`.
    pub fn is_at_least(&self, other: KernelVersion) -> bool {
        self.0 >= other.0
    }
}

impl Default for KernelVersion {
    fn default() -> Self {
        KernelVersion::LATEST
    }
}

impl fmt::Display for KernelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "V{}", self.0)
    }
}
