//! Per-pass job execution context

use std::cell::OnceCell;

use chrono::{DateTime, Utc};

use crate::team::TeamLifecycle;

/// Context provided to a job for a single pass
///
/// The context provides:
/// - The current time, read from the clock at most once per pass
/// - The name of the team executing the pass
/// - Shutdown detection through [`continue_execution`](Self::continue_execution)
#[derive(Debug)]
pub struct JobContext<'a> {
    team: &'a str,
    lifecycle: &'a TeamLifecycle,
    time: OnceCell<DateTime<Utc>>,
}

impl<'a> JobContext<'a> {
    /// Create a context for one pass on the named team
    pub fn new(team: &'a str, lifecycle: &'a TeamLifecycle) -> Self {
        Self {
            team,
            lifecycle,
            time: OnceCell::new(),
        }
    }

    /// Current time, cached for the remainder of the pass
    pub fn time(&self) -> DateTime<Utc> {
        *self.time.get_or_init(Utc::now)
    }

    /// Name of the team executing this pass
    pub fn team_name(&self) -> &str {
        self.team
    }

    /// Whether the team is still working
    ///
    /// Once this returns `false` the job should finish up and answer
    /// [`JobOutcome::Complete`](super::JobOutcome::Complete).
    pub fn continue_execution(&self) -> bool {
        self.lifecycle.is_working()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_is_cached_for_the_pass() {
        let lifecycle = TeamLifecycle::new();
        let context = JobContext::new("team", &lifecycle);

        let first = context.time();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(context.time(), first);

        let next_pass = JobContext::new("team", &lifecycle);
        assert!(next_pass.time() > first);
    }

    #[test]
    fn test_continue_execution_follows_lifecycle() {
        let lifecycle = TeamLifecycle::new();
        let context = JobContext::new("team", &lifecycle);
        assert_eq!(context.team_name(), "team");
        assert!(!context.continue_execution());

        lifecycle.start();
        assert!(context.continue_execution());

        lifecycle.stop();
        assert!(!context.continue_execution());
    }
}
