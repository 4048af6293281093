//! Jobs executed by teams
//!
//! This module provides:
//! - [`Job`] - A resumable unit of work
//! - [`JobOutcome`] - Whether a pass finished the job
//! - [`JobContext`] - Per-pass view handed to the job
//!
//! A team calls [`Job::do_job`] once per pass. A job answering
//! [`JobOutcome::Continue`] is handed back to its team and run again after the
//! jobs already waiting; a job answering [`JobOutcome::Complete`] is dropped.
//!
//! # Example
//!
//! ```
//! use teamwork_engine::job::{job_fn, JobOutcome};
//!
//! let mut remaining = 3;
//! let job = job_fn(move |_context| {
//!     remaining -= 1;
//!     if remaining == 0 {
//!         JobOutcome::Complete
//!     } else {
//!         JobOutcome::Continue
//!     }
//! });
//! # drop(job);
//! ```

mod context;

pub use context::JobContext;

use uuid::Uuid;

/// Identifier of a process (every flow started by a single invocation)
pub type ProcessId = Uuid;

/// Owned, type-erased job as held by teams and queues
pub type BoxedJob = Box<dyn Job>;

/// Result of a single pass of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// The job is finished and may be dropped
    Complete,

    /// The job needs another pass
    Continue,
}

impl JobOutcome {
    /// Check if the job is finished
    pub fn is_complete(self) -> bool {
        matches!(self, Self::Complete)
    }
}

impl From<bool> for JobOutcome {
    fn from(complete: bool) -> Self {
        if complete {
            Self::Complete
        } else {
            Self::Continue
        }
    }
}

/// A unit of work executed by a [`Team`](crate::team::Team)
///
/// A job instance is only ever executed by one thread at a time: whichever
/// team currently holds it.
pub trait Job: Send {
    /// Run one pass of the job
    fn do_job(&mut self, context: &JobContext<'_>) -> JobOutcome;

    /// Process owning this job, used by teams that route on process identity
    fn process_id(&self) -> Option<ProcessId> {
        None
    }
}

/// Job backed by a closure, see [`job_fn`]
pub struct FnJob<F> {
    function: F,
}

impl<F> Job for FnJob<F>
where
    F: FnMut(&JobContext<'_>) -> JobOutcome + Send,
{
    fn do_job(&mut self, context: &JobContext<'_>) -> JobOutcome {
        (self.function)(context)
    }
}

/// Box a closure as a job
pub fn job_fn<F>(function: F) -> BoxedJob
where
    F: FnMut(&JobContext<'_>) -> JobOutcome + Send + 'static,
{
    Box::new(FnJob { function })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::team::TeamLifecycle;

    #[test]
    fn test_outcome_from_bool() {
        assert_eq!(JobOutcome::from(true), JobOutcome::Complete);
        assert_eq!(JobOutcome::from(false), JobOutcome::Continue);
        assert!(JobOutcome::Complete.is_complete());
        assert!(!JobOutcome::Continue.is_complete());
    }

    #[test]
    fn test_job_fn_runs_closure() {
        let lifecycle = TeamLifecycle::new();
        lifecycle.start();

        let mut passes = 0;
        let mut job = job_fn(move |_| {
            passes += 1;
            JobOutcome::from(passes == 2)
        });

        let context = JobContext::new("test", &lifecycle);
        assert_eq!(job.do_job(&context), JobOutcome::Continue);
        assert_eq!(job.do_job(&context), JobOutcome::Complete);
        assert!(job.process_id().is_none());
    }
}
