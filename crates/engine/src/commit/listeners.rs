//! Commit listeners
//!
//! Listeners hear about every batch chain the commit process finishes:
//! success with the transaction id, or failure with the error. Each chain
//! is reported exactly once. Listener errors are collected by the caller,
//! never propagated in place of the commit's own outcome.

use parking_lot::RwLock;
use std::sync::Arc;
use tessera_core::{KernelError, Result};
use tessera_storage::BatchChain;

/// Hears the outcome of commits.
pub trait CommitListener: Send + Sync {
    /// `chain` committed as `transaction_id`.
    fn register_success(&self, chain: &BatchChain, transaction_id: u64) -> Result<()>;

    /// `chain` failed with `error`.
    fn register_failure(&self, chain: &BatchChain, error: &KernelError) -> Result<()>;
}

/// Registered listeners, called in registration order.
#[derive(Default)]
pub struct CommitListeners {
    listeners: RwLock<Vec<Arc<dyn CommitListener>>>,
}

impl CommitListeners {
    /// No listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `listener`.
    pub fn add(&self, listener: Arc<dyn CommitListener>) {
        self.listeners.write().push(listener);
    }

    /// Number of listeners.
    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    /// Whether no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Report success to every listener. Returns the listeners' errors.
    pub fn notify_success(&self, chain: &BatchChain, transaction_id: u64) -> Vec<KernelError> {
        let listeners = self.listeners.read().clone();
        listeners
            .iter()
            .filter_map(|listener| listener.register_success(chain, transaction_id).err())
            .collect()
    }

    /// Report failure to every listener. Returns the listeners' errors.
    pub fn notify_failure(&self, chain: &BatchChain, error: &KernelError) -> Vec<KernelError> {
        let listeners = self.listeners.read().clone();
        listeners
            .iter()
            .filter_map(|listener| listener.register_failure(chain, error).err())
            .collect()
    }
}

impl std::fmt::Debug for CommitListeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitListeners")
            .field("listeners", &self.len())
            .finish()
    }
}
