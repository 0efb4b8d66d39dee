//! Execution contexts for observation callbacks.
//!
//! The observation core never spawns threads of its own. A callback runs
//! either inline on the triggering call path or on an execution context the
//! caller created and attached to the observation.

/// Caller-drained job queue.
pub mod manual;
/// Single-worker FIFO queue.
pub mod serial;

use std::fmt;
use std::sync::Arc;

pub use manual::ManualQueue;
pub use serial::SerialQueue;

/// A unit of deferred work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Something that can run jobs later, somewhere else.
///
/// Implementations that run jobs one at a time in submission order keep the
/// per-observation FIFO guarantee intact.
///
/// `execute` is called with the observation's state lock held. It must only
/// enqueue: running the job on the calling thread deadlocks.
pub trait Executor: Send + Sync {
    /// Schedule `job` to run.
    fn execute(&self, job: Job);
}

/// Where an observation's callback runs.
#[derive(Clone, Default)]
pub enum DispatchTarget {
    /// Inline, on whatever thread triggered the observation.
    #[default]
    Caller,
    /// On a serial worker queue.
    Queue(Arc<SerialQueue>),
    /// On any other executor.
    Executor(Arc<dyn Executor>),
}

impl DispatchTarget {
    /// Run `job` on this target. Returns the job back when the target is
    /// `Caller`, leaving it to the caller to run inline.
    pub(crate) fn schedule(&self, job: Job) -> Option<Job> {
        match self {
            Self::Caller => Some(job),
            Self::Queue(queue) => {
                queue.execute(job);
                None
            }
            Self::Executor(executor) => {
                executor.execute(job);
                None
            }
        }
    }
}

impl fmt::Debug for DispatchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Caller => write!(f, "Caller"),
            Self::Queue(q) => f.debug_tuple("Queue").field(&q.name()).finish(),
            Self::Executor(_) => write!(f, "Executor(..)"),
        }
    }
}

impl From<Arc<SerialQueue>> for DispatchTarget {
    fn from(queue: Arc<SerialQueue>) -> Self {
        Self::Queue(queue)
    }
}

impl From<Arc<ManualQueue>> for DispatchTarget {
    fn from(queue: Arc<ManualQueue>) -> Self {
        Self::Executor(queue)
    }
}
