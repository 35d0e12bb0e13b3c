//! Disk space pre-allocation for the log file
//!
//! Before appending, the commit process asks for room for the batch. The
//! preallocator grows the backing file in whole chunks so a full device is
//! reported before any bytes of the batch are written, and reported as
//! [`LogError::OutOfDiskSpace`] rather than a generic I/O error.

use crate::error::{LogError, LogResult, DISK_FULL};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug)]
struct Allocation {
    file: File,
    used: u64,
    allocated: u64,
}

/// Grows a log file ahead of appends.
#[derive(Debug)]
pub struct LogFilePreallocator {
    path: PathBuf,
    chunk_bytes: u64,
    limit_bytes: Option<u64>,
    state: Mutex<Allocation>,
}

impl LogFilePreallocator {
    /// Open (or create) `path` and pre-allocate in chunks of `chunk_bytes`.
    pub fn open(path: impl AsRef<Path>, chunk_bytes: u64) -> LogResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| LogError::from_io(format!("opening {}", path.display()), e))?;
        let allocated = file.metadata()?.len();
        Ok(LogFilePreallocator {
            path,
            chunk_bytes: chunk_bytes.max(1),
            limit_bytes: None,
            state: Mutex::new(Allocation {
                file,
                used: 0,
                allocated,
            }),
        })
    }

    /// Refuse to grow past `limit_bytes`, as a device of that size would.
    pub fn with_limit(mut self, limit_bytes: u64) -> Self {
        self.limit_bytes = Some(limit_bytes);
        self
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes currently reserved on disk.
    pub fn allocated(&self) -> u64 {
        self.state.lock().allocated
    }

    /// Make sure `bytes` more bytes fit, growing the file if needed.
    pub fn ensure(&self, bytes: u64) -> LogResult<()> {
        let mut state = self.state.lock();
        let needed = state.used + bytes;
        if needed <= state.allocated {
            return Ok(());
        }

        let missing = needed - state.allocated;
        let chunks = (missing + self.chunk_bytes - 1) / self.chunk_bytes;
        let target = state.allocated + chunks * self.chunk_bytes;
        if let Some(limit) = self.limit_bytes {
            if target > limit {
                return Err(LogError::from_io(
                    format!("pre-allocating {} bytes for the transaction log", target),
                    io::Error::from_raw_os_error(DISK_FULL),
                ));
            }
        }

        state.file.set_len(target).map_err(|e| {
            LogError::from_io(
                format!("pre-allocating {} bytes for the transaction log", target),
                e,
            )
        })?;
        debug!(
            target: "tessera::log",
            path = %self.path.display(),
            from = state.allocated,
            to = target,
            "Pre-allocated log file"
        );
        state.allocated = target;
        Ok(())
    }

    /// Record that `bytes` of the reserved space were used.
    pub fn consumed(&self, bytes: u64) {
        self.state.lock().used += bytes;
    }
}
