//! Serial worker queue.
//!
//! One dedicated worker thread runs submitted jobs in FIFO order. The queue
//! is created by the caller; the observation core only submits to it.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};

use crate::error::{WatchError, WatchResult};

use super::{Executor, Job};

enum QueueMsg {
    Run(Job),
    Barrier(Sender<()>),
}

/// FIFO execution queue backed by a single worker thread.
#[derive(Debug)]
pub struct SerialQueue {
    name: String,
    tx: Mutex<Option<Sender<QueueMsg>>>,
    panicked_jobs: Arc<AtomicU64>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for QueueMsg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Run(_) => write!(f, "Run(..)"),
            Self::Barrier(_) => write!(f, "Barrier"),
        }
    }
}

impl SerialQueue {
    /// Spawn the worker thread.
    ///
    /// # Errors
    /// Returns an internal error if the OS refuses to spawn the thread.
    pub fn new(name: impl Into<String>) -> WatchResult<Self> {
        let name = name.into();
        let (tx, rx) = unbounded::<QueueMsg>();
        let panicked_jobs = Arc::new(AtomicU64::new(0));

        let thread_panics = Arc::clone(&panicked_jobs);
        let thread_name = name.clone();
        let join = thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker_loop(&thread_name, &rx, &thread_panics))
            .map_err(|e| WatchError::internal(format!("failed to spawn queue worker '{name}': {e}")))?;

        Ok(Self {
            name,
            tx: Mutex::new(Some(tx)),
            panicked_jobs,
            join: Mutex::new(Some(join)),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of jobs that panicked. The worker survives them.
    #[must_use]
    pub fn panicked_jobs(&self) -> u64 {
        self.panicked_jobs.load(Ordering::Relaxed)
    }

    /// Block until every job submitted before this call has run.
    ///
    /// Returns false on timeout or if the queue is shut down.
    pub fn barrier(&self, timeout: Duration) -> bool {
        let (done_tx, done_rx) = bounded::<()>(1);
        if !self.send(QueueMsg::Barrier(done_tx)) {
            return false;
        }
        done_rx.recv_timeout(timeout).is_ok()
    }

    /// Stop accepting jobs and wait for queued ones to finish.
    ///
    /// Must not be called from a job running on this queue.
    pub fn shutdown(&self) {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
        let handle = self.join.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }

    fn send(&self, msg: QueueMsg) -> bool {
        let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(tx) => tx.send(msg).is_ok(),
            None => false,
        }
    }
}

impl Executor for SerialQueue {
    fn execute(&self, job: Job) {
        if !self.send(QueueMsg::Run(job)) {
            tracing::warn!(queue = %self.name, "job submitted to a shut down queue was dropped");
        }
    }
}

impl Drop for SerialQueue {
    fn drop(&mut self) {
        // Close the channel so the worker exits once drained. Do not join:
        // the last reference may be released from a job on this very queue.
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
        drop(self.join.lock().unwrap_or_else(PoisonError::into_inner).take());
    }
}

fn worker_loop(name: &str, rx: &Receiver<QueueMsg>, panicked_jobs: &AtomicU64) {
    while let Ok(msg) = rx.recv() {
        match msg {
            QueueMsg::Run(job) => {
                if catch_unwind(AssertUnwindSafe(job)).is_err() {
                    panicked_jobs.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(queue = %name, "observation callback panicked");
                }
            }
            QueueMsg::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }
}
