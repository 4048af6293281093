//! Job carrying a thread-state through teams

use std::sync::Arc;

use tracing::warn;

use super::thread::ThreadState;
use crate::job::{Job, JobContext, JobOutcome, ProcessId};

/// Runs the steps of one thread-state on the team holding it
///
/// Each pass runs at most `max_steps_per_pass` steps. A step requiring
/// another team hands the thread-state over to that team and completes this
/// job.
#[derive(Debug)]
pub(crate) struct FlowJob {
    thread: Option<ThreadState>,
    process: ProcessId,
}

impl FlowJob {
    pub(crate) fn new(thread: ThreadState) -> Self {
        Self {
            process: thread.process().id(),
            thread: Some(thread),
        }
    }
}

impl Job for FlowJob {
    fn do_job(&mut self, context: &JobContext<'_>) -> JobOutcome {
        let Some(engine) = self
            .thread
            .as_ref()
            .map(|thread| Arc::clone(thread.process().engine()))
        else {
            return JobOutcome::Complete;
        };

        for _ in 0..engine.config.max_steps_per_pass.max(1) {
            let Some(thread) = self.thread.as_mut() else {
                return JobOutcome::Complete;
            };

            match thread.next_team() {
                None => {
                    if let Some(thread) = self.thread.take() {
                        thread.complete();
                    }
                    return JobOutcome::Complete;
                }
                Some(Some(team)) if engine.teams[team].name() != context.team_name() => {
                    if let Some(thread) = self.thread.take() {
                        if let Err(error) = engine.dispatch(thread) {
                            warn!(
                                process = %self.process,
                                team = %engine.teams[team].name(),
                                error = %error,
                                "Failed to hand thread-state to team"
                            );
                        }
                    }
                    return JobOutcome::Complete;
                }
                Some(_) => thread.run_step(context),
            }
        }

        JobOutcome::Continue
    }

    fn process_id(&self) -> Option<ProcessId> {
        Some(self.process)
    }
}
