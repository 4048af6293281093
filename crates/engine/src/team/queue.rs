//! FIFO task queue shared by a team's workers

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::job::BoxedJob;

/// Thread-safe FIFO of pending jobs
///
/// A single mutex/condvar pair guards the queue. Ordering is global FIFO
/// across all producers; re-queued jobs go to the tail.
pub struct TaskQueue {
    jobs: Mutex<VecDeque<BoxedJob>>,
    available: Condvar,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    /// Append a job and wake one waiting worker
    pub fn enqueue(&self, job: BoxedJob) {
        self.jobs.lock().push_back(job);
        self.available.notify_one();
    }

    /// Take the head of the queue without blocking
    pub fn dequeue(&self) -> Option<BoxedJob> {
        self.jobs.lock().pop_front()
    }

    /// Take the head of the queue, waiting up to `timeout` for one to arrive
    ///
    /// Returns early (possibly with `None`) when [`wake_all`](Self::wake_all)
    /// is called.
    pub fn dequeue_timeout(&self, timeout: Duration) -> Option<BoxedJob> {
        let mut jobs = self.jobs.lock();
        if jobs.is_empty() {
            self.available.wait_for(&mut jobs, timeout);
        }
        jobs.pop_front()
    }

    /// Wake every worker blocked in [`dequeue_timeout`](Self::dequeue_timeout)
    pub fn wake_all(&self) {
        let _jobs = self.jobs.lock();
        self.available.notify_all();
    }

    /// Number of queued jobs
    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("len", &self.len())
            .finish()
    }
}
