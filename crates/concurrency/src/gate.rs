//! Quiescence gate for new transactions
//!
//! While one thread holds the gate blocked, every other thread asking to
//! start a transaction parks until the gate is unblocked or the database
//! shuts down. Only the blocking thread may unblock. Blocking waits for the
//! starts already past the gate to finish, so once `block` returns no new
//! transaction is being set up.

use parking_lot::{Condvar, Mutex};
use std::thread::{self, ThreadId};
use tessera_core::{KernelError, Result};
use tracing::debug;

#[derive(Debug, Default)]
struct GateState {
    blocker: Option<ThreadId>,
    shutdown: bool,
    in_flight: usize,
}

/// Gate in front of transaction starts.
#[derive(Debug, Default)]
pub struct TransactionGate {
    state: Mutex<GateState>,
    changed: Condvar,
}

/// Proof of having passed the gate. Dropping it ends the start.
#[must_use = "the start counts as in flight until the pass is dropped"]
#[derive(Debug)]
pub struct GatePass<'a> {
    gate: &'a TransactionGate,
}

impl Drop for GatePass<'_> {
    fn drop(&mut self) {
        let mut state = self.gate.state.lock();
        state.in_flight -= 1;
        if state.in_flight == 0 {
            self.gate.changed.notify_all();
        }
    }
}

impl TransactionGate {
    /// Open gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pass the gate, parking while another thread holds it blocked.
    ///
    /// Fails with [`KernelError::DatabaseShutdown`] once shut down, and with
    /// [`KernelError::IllegalState`] when the caller is the blocking thread.
    pub fn enter(&self) -> Result<GatePass<'_>> {
        let current = thread::current().id();
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return Err(KernelError::DatabaseShutdown);
            }
            match state.blocker {
                None => {
                    state.in_flight += 1;
                    return Ok(GatePass { gate: self });
                }
                Some(blocker) if blocker == current => {
                    return Err(KernelError::IllegalState(
                        "this thread blocked new transactions and cannot start one".to_string(),
                    ));
                }
                Some(_) => self.changed.wait(&mut state),
            }
        }
    }

    /// Block new transactions. Waits for another blocker to unblock first,
    /// then for starts already in flight to finish.
    pub fn block(&self) -> Result<()> {
        let current = thread::current().id();
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return Err(KernelError::DatabaseShutdown);
            }
            match state.blocker {
                None => break,
                Some(blocker) if blocker == current => {
                    return Err(KernelError::IllegalState(
                        "new transactions are already blocked by this thread".to_string(),
                    ));
                }
                Some(_) => self.changed.wait(&mut state),
            }
        }
        state.blocker = Some(current);
        while state.in_flight > 0 {
            self.changed.wait(&mut state);
        }
        debug!(target: "tessera::txn", "New transactions blocked");
        Ok(())
    }

    /// Unblock new transactions. Only the blocking thread may do this.
    pub fn unblock(&self) -> Result<()> {
        let current = thread::current().id();
        let mut state = self.state.lock();
        match state.blocker {
            Some(blocker) if blocker == current => {
                state.blocker = None;
                self.changed.notify_all();
                debug!(target: "tessera::txn", "New transactions unblocked");
                Ok(())
            }
            Some(_) => Err(KernelError::IllegalState(
                "new transactions can only be unblocked by the thread that blocked them"
                    .to_string(),
            )),
            None => Err(KernelError::IllegalState(
                "new transactions are not blocked".to_string(),
            )),
        }
    }

    /// Whether some thread holds the gate blocked.
    pub fn is_blocked(&self) -> bool {
        self.state.lock().blocker.is_some()
    }

    /// Fail every parked and future caller with a shutdown error.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        state.blocker = None;
        self.changed.notify_all();
    }

    /// Open the gate again after a shutdown.
    pub fn reopen(&self) {
        let mut state = self.state.lock();
        state.shutdown = false;
        self.changed.notify_all();
    }
}
