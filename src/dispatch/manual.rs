//! A queue the caller drains explicitly.
//!
//! Useful for run loops that already own a thread (a UI loop, a test) and
//! want callbacks to run at a point of their choosing.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use super::{Executor, Job};

/// FIFO job queue drained by [`ManualQueue::run_pending`].
#[derive(Default)]
pub struct ManualQueue {
    jobs: Mutex<VecDeque<Job>>,
}

impl ManualQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run queued jobs, including ones queued while running, until empty.
    /// Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            // Pop under the lock, run outside it: jobs may enqueue more work.
            let next = self.jobs.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
            let Some(job) = next else {
                return ran;
            };
            job();
            ran += 1;
        }
    }
}

impl Executor for ManualQueue {
    fn execute(&self, job: Job) {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(job);
    }
}

impl std::fmt::Debug for ManualQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualQueue").field("pending", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_runs_nested_jobs_in_order() {
        let queue = Arc::new(ManualQueue::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let q = Arc::clone(&queue);
        let s = Arc::clone(&seen);
        queue.execute(Box::new(move || {
            s.lock().unwrap().push(1);
            let s2 = Arc::clone(&s);
            q.execute(Box::new(move || s2.lock().unwrap().push(3)));
        }));
        let s = Arc::clone(&seen);
        queue.execute(Box::new(move || s.lock().unwrap().push(2)));

        assert_eq!(queue.run_pending(), 3);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
        assert!(queue.is_empty());
    }
}
