//! Team running jobs on the assigning thread
//!
//! Jobs assigned while the thread is already running inline work (a job
//! assigning a job) are deferred to the outermost inline loop instead of
//! recursing, so chains of millions of inline assignments run at constant
//! stack depth.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::Arc;

use tracing::info;

use super::worker::{run_to_completion, TeamLifecycle};
use super::{Team, TeamError};
use crate::job::BoxedJob;

/// Name and lifecycle of a team executing inline
#[derive(Debug)]
pub(crate) struct InlineTeam {
    pub(crate) name: String,
    pub(crate) lifecycle: TeamLifecycle,
}

impl InlineTeam {
    pub(crate) fn new(name: String) -> Arc<Self> {
        Arc::new(Self {
            name,
            lifecycle: TeamLifecycle::new(),
        })
    }
}

#[derive(Default)]
struct InlineState {
    active: bool,
    deferred: VecDeque<(Arc<InlineTeam>, BoxedJob)>,
}

thread_local! {
    static INLINE: RefCell<InlineState> = RefCell::new(InlineState::default());
}

/// Run `job` to completion on this thread, deferring it if inline work is
/// already running further up the stack
pub(crate) fn run_inline(team: &Arc<InlineTeam>, job: BoxedJob) {
    let mut job = Some(job);
    let outermost = INLINE.with(|state| {
        let mut state = state.borrow_mut();
        if state.active {
            if let Some(job) = job.take() {
                state.deferred.push_back((Arc::clone(team), job));
            }
            false
        } else {
            state.active = true;
            true
        }
    });
    if !outermost {
        return;
    }

    let mut next = job.map(|job| (Arc::clone(team), job));
    while let Some((team, job)) = next {
        run_to_completion(&team.name, &team.lifecycle, job);
        next = INLINE.with(|state| state.borrow_mut().deferred.pop_front());
    }

    INLINE.with(|state| state.borrow_mut().active = false);
}

/// Team without threads of its own
///
/// `assign_job` runs the job on the caller's thread until it completes or the
/// team stops, yielding between passes.
#[derive(Debug)]
pub struct PassiveTeam {
    inline: Arc<InlineTeam>,
}

impl PassiveTeam {
    /// Create a team
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inline: InlineTeam::new(name.into()),
        }
    }
}

impl Team for PassiveTeam {
    fn name(&self) -> &str {
        &self.inline.name
    }

    fn start_working(&self) -> Result<(), TeamError> {
        if self.inline.lifecycle.start() {
            info!(team = %self.inline.name, "Team started working");
        }
        Ok(())
    }

    fn assign_job(&self, job: BoxedJob) -> Result<(), TeamError> {
        if !self.inline.lifecycle.is_working() {
            return Err(TeamError::NotWorking(self.inline.name.clone()));
        }
        run_inline(&self.inline, job);
        Ok(())
    }

    fn stop_working(&self) {
        if self.inline.lifecycle.stop() {
            info!(team = %self.inline.name, "Team stopped working");
        }
    }

    fn is_working(&self) -> bool {
        self.inline.lifecycle.is_working()
    }
}
