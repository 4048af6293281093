//! Worker plumbing shared by the team variants
//!
//! Every pass runs inside [`execute_pass`], which contains panics to the job
//! that raised them: the job is discarded, the panic is logged and the worker
//! carries on with the next job.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, warn};

use crate::job::{BoxedJob, JobContext, JobOutcome};

/// Working/stopping flag of a team
///
/// Uses atomic operations so jobs can poll it on every pass without locking.
#[derive(Debug, Default)]
pub struct TeamLifecycle {
    working: AtomicBool,
}

impl TeamLifecycle {
    /// Create a lifecycle in the stopped state
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag the team as working, returning `false` if it already was
    pub fn start(&self) -> bool {
        !self.working.swap(true, Ordering::AcqRel)
    }

    /// Flag the team as stopping, returning `false` if it already was
    pub fn stop(&self) -> bool {
        self.working.swap(false, Ordering::AcqRel)
    }

    /// Check if the team is working
    pub fn is_working(&self) -> bool {
        self.working.load(Ordering::Acquire)
    }
}

/// Run one pass of `job`, returning it if it must be re-queued
///
/// A job answering `Continue` after the team started stopping has been told to
/// finish and is dropped instead.
pub(crate) fn execute_pass(
    team: &str,
    lifecycle: &TeamLifecycle,
    mut job: BoxedJob,
) -> Option<BoxedJob> {
    let context = JobContext::new(team, lifecycle);

    match panic::catch_unwind(AssertUnwindSafe(|| job.do_job(&context))) {
        Ok(JobOutcome::Complete) => None,
        Ok(JobOutcome::Continue) if lifecycle.is_working() => Some(job),
        Ok(JobOutcome::Continue) => {
            warn!(team, "Team stopping, dropping incomplete job");
            None
        }
        Err(payload) => {
            error!(
                team,
                panic = %panic_message(payload.as_ref()),
                "Job panicked, discarding it"
            );
            None
        }
    }
}

/// Run `job` on the current thread until it completes or the team stops
pub(crate) fn run_to_completion(team: &str, lifecycle: &TeamLifecycle, job: BoxedJob) {
    let mut pending = Some(job);
    while let Some(job) = pending.take() {
        pending = execute_pass(team, lifecycle, job);
        if pending.is_some() {
            thread::yield_now();
        }
    }
}

/// Join a worker thread, unless it is the calling thread
pub(crate) fn join_worker(team: &str, handle: JoinHandle<()>) {
    if handle.thread().id() == thread::current().id() {
        debug!(team, "Worker stopping its own team, not joining itself");
        return;
    }

    if handle.join().is_err() {
        error!(team, "Worker thread terminated abnormally");
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
