//! Database health
//!
//! Some failures leave the kernel unable to vouch for its own state, e.g. a
//! log append that failed after a commit id was handed out. The kernel then
//! panics its health: every later commit is refused until restart.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tessera_core::{KernelError, Result, Status};
use tracing::error;

#[derive(Debug, Clone)]
struct PanicCause {
    status: Status,
    message: String,
}

/// Health of one database instance.
#[derive(Debug)]
pub struct DatabaseHealth {
    healthy: AtomicBool,
    cause: RwLock<Option<PanicCause>>,
}

impl Default for DatabaseHealth {
    fn default() -> Self {
        DatabaseHealth {
            healthy: AtomicBool::new(true),
            cause: RwLock::new(None),
        }
    }
}

impl DatabaseHealth {
    /// Healthy database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `cause` and mark the database unhealthy. The first cause wins.
    pub fn panic(&self, cause: &KernelError) {
        let mut slot = self.cause.write();
        if slot.is_none() {
            error!(
                target: "tessera::commit",
                status = %cause.status(),
                error = %cause,
                "Database panicked"
            );
            *slot = Some(PanicCause {
                status: cause.status(),
                message: cause.to_string(),
            });
        }
        self.healthy.store(false, Ordering::SeqCst);
    }

    /// Whether no panic has been recorded.
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    /// Status of the recorded cause, if any.
    pub fn cause_status(&self) -> Option<Status> {
        self.cause.read().as_ref().map(|cause| cause.status)
    }

    /// Fail with [`KernelError::DatabaseUnavailable`] when unhealthy.
    pub fn assert_healthy(&self) -> Result<()> {
        if self.is_healthy() {
            return Ok(());
        }
        let message = self
            .cause
            .read()
            .as_ref()
            .map(|cause| format!("database panicked: {}", cause.message))
            .unwrap_or_else(|| "database panicked".to_string());
        Err(KernelError::DatabaseUnavailable(message))
    }

    /// Clear the panic, as a restart does.
    pub fn heal(&self) {
        *self.cause.write() = None;
        self.healthy.store(true, Ordering::SeqCst);
    }
}
