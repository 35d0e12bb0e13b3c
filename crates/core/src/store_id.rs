//! Store identity with a fixed 64-byte layout
//!
//! ```text
//! [1B format version][8B creation time][8B random]
//! [1B engine name len][engine name][1B format name len][format name]
//! [1B major version (signed, beta = negative)][1B minor version]
//! zero padding up to 64 bytes
//! ```
//!
//! All integers are big-endian.

use crate::error::{KernelError, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use chrono::Utc;
use std::io::{Cursor, Read};

/// Serialized size of a store id.
pub const STORE_ID_SIZE: usize = 64;

/// Layout version written as the first byte.
pub const STORE_ID_FORMAT_VERSION: u8 = 1;

/// Bytes of the layout taken by everything except the two names.
const FIXED_BYTES: usize = 1 + 8 + 8 + 1 + 1 + 1 + 1;

/// Combined length budget for engine name and format name.
pub const MAX_NAME_BYTES: usize = STORE_ID_SIZE - FIXED_BYTES;

/// Identity of one store: who created it, when, and in which format.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreId {
    /// Creation time in milliseconds since the epoch
    pub creation_time: u64,
    /// Random discriminator
    pub random: u64,
    /// Name of the storage engine that owns the store
    pub storage_engine_name: String,
    /// Name of the store format
    pub format_name: String,
    /// Major format version; negative for beta formats
    pub major_version: i8,
    /// Minor format version
    pub minor_version: u8,
}

impl StoreId {
    /// Create a store id, checking that it fits the layout.
    pub fn new(
        creation_time: u64,
        random: u64,
        storage_engine_name: impl Into<String>,
        format_name: impl Into<String>,
        major_version: i8,
        minor_version: u8,
    ) -> Result<Self> {
        let id = StoreId {
            creation_time,
            random,
            storage_engine_name: storage_engine_name.into(),
            format_name: format_name.into(),
            major_version,
            minor_version,
        };
        id.check_names()?;
        Ok(id)
    }

    /// Generate a fresh store id stamped with the current time.
    pub fn generate(
        storage_engine_name: &str,
        format_name: &str,
        major_version: i8,
        minor_version: u8,
    ) -> Result<Self> {
        let creation_time = Utc::now().timestamp_millis().max(0) as u64;
        Self::new(
            creation_time,
            rand::random::<u64>(),
            storage_engine_name,
            format_name,
            major_version,
            minor_version,
        )
    }

    /// Whether the format is a beta format.
    pub fn is_beta(&self) -> bool {
        self.major_version < 0
    }

    fn check_names(&self) -> Result<()> {
        let total = self.storage_engine_name.len() + self.format_name.len();
        if total > MAX_NAME_BYTES {
            return Err(KernelError::InvalidStoreId(format!(
                "engine and format names take {} bytes, at most {} fit",
                total, MAX_NAME_BYTES
            )));
        }
        Ok(())
    }

    /// Serialize into exactly [`STORE_ID_SIZE`] bytes.
    pub fn serialize(&self) -> Result<[u8; STORE_ID_SIZE]> {
        self.check_names()?;

        let mut buf = Vec::with_capacity(STORE_ID_SIZE);
        buf.write_u8(STORE_ID_FORMAT_VERSION)?;
        buf.write_u64::<BigEndian>(self.creation_time)?;
        buf.write_u64::<BigEndian>(self.random)?;
        buf.write_u8(self.storage_engine_name.len() as u8)?;
        buf.extend_from_slice(self.storage_engine_name.as_bytes());
        buf.write_u8(self.format_name.len() as u8)?;
        buf.extend_from_slice(self.format_name.as_bytes());
        buf.write_i8(self.major_version)?;
        buf.write_u8(self.minor_version)?;

        let mut out = [0u8; STORE_ID_SIZE];
        out[..buf.len()].copy_from_slice(&buf);
        Ok(out)
    }

    /// Deserialize from a 64-byte buffer.
    ///
    /// # Errors
    ///
    /// Fails on short input, an unknown format version byte, name lengths
    /// running past the layout, or names that are not UTF-8.
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < STORE_ID_SIZE {
            return Err(KernelError::InvalidStoreId(format!(
                "expected {} bytes, got {}",
                STORE_ID_SIZE,
                bytes.len()
            )));
        }

        let mut cursor = Cursor::new(&bytes[..STORE_ID_SIZE]);
        let format_version = cursor.read_u8()?;
        if format_version != STORE_ID_FORMAT_VERSION {
            return Err(KernelError::InvalidStoreId(format!(
                "unknown format version {}",
                format_version
            )));
        }

        let creation_time = cursor.read_u64::<BigEndian>()?;
        let random = cursor.read_u64::<BigEndian>()?;
        let storage_engine_name = read_name(&mut cursor)?;
        let format_name = read_name(&mut cursor)?;
        let major_version = cursor.read_i8()?;
        let minor_version = cursor.read_u8()?;

        StoreId::new(
            creation_time,
            random,
            storage_engine_name,
            format_name,
            major_version,
            minor_version,
        )
    }
}

fn read_name(cursor: &mut Cursor<&[u8]>) -> Result<String> {
    let len = cursor.read_u8()? as usize;
    let mut raw = vec![0u8; len];
    cursor
        .read_exact(&mut raw)
        .map_err(|_| KernelError::InvalidStoreId(format!("name of {} bytes overruns layout", len)))?;
    String::from_utf8(raw).map_err(|e| KernelError::InvalidStoreId(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_serialize_is_64_bytes_and_zero_padded() {
        let id = StoreId::new(1000, 42, "record", "aligned", 5, 1).unwrap();
        let bytes = id.serialize().unwrap();
        assert_eq!(bytes.len(), STORE_ID_SIZE);
        assert_eq!(bytes[0], STORE_ID_FORMAT_VERSION);
        assert_eq!(bytes[STORE_ID_SIZE - 1], 0);
    }

    #[test]
    fn test_round_trip() {
        let id = StoreId::new(1_700_000_000_000, 7, "record", "aligned", -2, 3).unwrap();
        let decoded = StoreId::deserialize(&id.serialize().unwrap()).unwrap();
        assert_eq!(decoded, id);
        assert!(decoded.is_beta());
    }

    #[test]
    fn test_rejects_foreign_version_byte() {
        let id = StoreId::new(1, 2, "record", "standard", 1, 0).unwrap();
        let mut bytes = id.serialize().unwrap();
        bytes[0] = 9;
        let err = StoreId::deserialize(&bytes).unwrap_err();
        assert!(err.to_string().contains("unknown format version"));
    }

    #[test]
    fn test_rejects_short_buffer() {
        assert!(StoreId::deserialize(&[STORE_ID_FORMAT_VERSION; 10]).is_err());
    }

    #[test]
    fn test_rejects_names_too_long() {
        let long = "x".repeat(MAX_NAME_BYTES);
        assert!(StoreId::new(0, 0, long, "f", 1, 0).is_err());
    }

    #[test]
    fn test_rejects_overrunning_name_length() {
        let mut bytes = [0u8; STORE_ID_SIZE];
        bytes[0] = STORE_ID_FORMAT_VERSION;
        bytes[17] = 200;
        assert!(StoreId::deserialize(&bytes).is_err());
    }

    #[test]
    fn test_generate() {
        let id = StoreId::generate("record", "aligned", 1, 0).unwrap();
        assert!(id.creation_time > 0);
        assert_eq!(id.storage_engine_name, "record");
    }

    proptest! {
        #[test]
        fn prop_round_trip(
            creation_time in any::<u64>(),
            random in any::<u64>(),
            engine in "[a-z]{0,20}",
            format in "[a-z]{0,23}",
            major in any::<i8>(),
            minor in any::<u8>(),
        ) {
            let id = StoreId::new(creation_time, random, engine, format, major, minor).unwrap();
            let decoded = StoreId::deserialize(&id.serialize().unwrap()).unwrap();
            prop_assert_eq!(decoded, id);
        }
    }
}
