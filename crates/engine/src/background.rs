//! Recurring background jobs
//!
//! Each job runs on its own named thread and parks on a condition variable
//! between runs, so shutdown wakes it immediately instead of waiting out
//! the interval. A panicking run is logged and the job keeps its schedule.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tessera_core::{KernelError, Result};
use tracing::{debug, error};

/// Schedules recurring work.
pub trait JobScheduler: Send + Sync {
    /// Run `task` every `interval` until the returned handle is cancelled
    /// or the scheduler shuts down.
    fn schedule_recurring(
        &self,
        name: &str,
        interval: Duration,
        task: Box<dyn Fn() + Send + Sync>,
    ) -> Result<JobHandle>;
}

struct JobState {
    cancelled: Mutex<bool>,
    wake: Condvar,
    runs: AtomicU64,
}

impl JobState {
    fn cancel(&self) {
        *self.cancelled.lock() = true;
        self.wake.notify_all();
    }
}

/// Handle on a scheduled job.
#[derive(Clone)]
pub struct JobHandle {
    name: Arc<str>,
    state: Arc<JobState>,
}

impl JobHandle {
    /// Name the job was scheduled with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Completed runs, panicked ones included.
    pub fn runs(&self) -> u64 {
        self.state.runs.load(Ordering::Acquire)
    }

    /// Stop the job after its current run.
    pub fn cancel(&self) {
        self.state.cancel();
    }

    /// Whether the job was cancelled.
    pub fn is_cancelled(&self) -> bool {
        *self.state.cancelled.lock()
    }
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("name", &self.name)
            .field("runs", &self.runs())
            .finish()
    }
}

/// [`JobScheduler`] backed by one thread per job.
#[derive(Default)]
pub struct ThreadJobScheduler {
    jobs: Mutex<Vec<(JobHandle, JoinHandle<()>)>>,
    shutdown: AtomicBool,
}

impl ThreadJobScheduler {
    /// Scheduler with no jobs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of jobs scheduled and not yet joined.
    pub fn job_count(&self) -> usize {
        self.jobs.lock().len()
    }

    /// Cancel every job and join its thread.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        let jobs: Vec<(JobHandle, JoinHandle<()>)> = std::mem::take(&mut *self.jobs.lock());
        for (handle, _) in &jobs {
            handle.cancel();
        }
        for (handle, thread) in jobs {
            if thread.join().is_err() {
                error!(target: "tessera::monitor", job = handle.name(), "Job thread panicked");
            }
        }
        debug!(target: "tessera::monitor", "Job scheduler shut down");
    }
}

impl JobScheduler for ThreadJobScheduler {
    fn schedule_recurring(
        &self,
        name: &str,
        interval: Duration,
        task: Box<dyn Fn() + Send + Sync>,
    ) -> Result<JobHandle> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(KernelError::IllegalState(format!(
                "cannot schedule job '{}' after shutdown",
                name
            )));
        }
        let handle = JobHandle {
            name: Arc::from(name),
            state: Arc::new(JobState {
                cancelled: Mutex::new(false),
                wake: Condvar::new(),
                runs: AtomicU64::new(0),
            }),
        };
        let worker = handle.clone();
        let thread = std::thread::Builder::new()
            .name(format!("tessera-job-{}", name))
            .spawn(move || job_loop(&worker, interval, task.as_ref()))?;
        self.jobs.lock().push((handle.clone(), thread));
        debug!(target: "tessera::monitor", job = name, interval_ms = interval.as_millis() as u64, "Scheduled recurring job");
        Ok(handle)
    }
}

impl Drop for ThreadJobScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ThreadJobScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadJobScheduler")
            .field("jobs", &self.job_count())
            .finish()
    }
}

fn job_loop(handle: &JobHandle, interval: Duration, task: &(dyn Fn() + Send + Sync)) {
    loop {
        {
            let mut cancelled = handle.state.cancelled.lock();
            if !*cancelled {
                handle.state.wake.wait_for(&mut cancelled, interval);
            }
            if *cancelled {
                return;
            }
        }

        if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(task)) {
            error!(
                target: "tessera::monitor",
                job = handle.name(),
                "Job panicked: {}",
                e.downcast_ref::<&str>().copied().unwrap_or("(non-string panic)")
            );
        }
        handle.state.runs.fetch_add(1, Ordering::Release);
    }
}
