//! Team of a single dedicated worker thread

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, instrument};

use super::queue::TaskQueue;
use super::worker::{execute_pass, join_worker, TeamLifecycle};
use super::{Team, TeamError};
use crate::job::BoxedJob;

struct Shared {
    name: String,
    queue: TaskQueue,
    lifecycle: TeamLifecycle,
    poll_interval: Duration,
}

/// Team with one worker thread polling a [`TaskQueue`]
///
/// Jobs run strictly one at a time in FIFO order.
pub struct OnePersonTeam {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl OnePersonTeam {
    /// Create a team whose idle worker re-checks for shutdown every `poll_interval`
    pub fn new(name: impl Into<String>, poll_interval: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                queue: TaskQueue::new(),
                lifecycle: TeamLifecycle::new(),
                poll_interval,
            }),
            worker: Mutex::new(None),
        }
    }

    /// Number of jobs waiting for the worker
    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }
}

fn work(shared: &Shared) {
    loop {
        let job = if shared.lifecycle.is_working() {
            shared.queue.dequeue_timeout(shared.poll_interval)
        } else {
            shared.queue.dequeue()
        };

        match job {
            Some(job) => {
                if let Some(job) = execute_pass(&shared.name, &shared.lifecycle, job) {
                    shared.queue.enqueue(job);
                }
            }
            None if !shared.lifecycle.is_working() => break,
            None => {}
        }
    }
    debug!(team = %shared.name, "Worker exited");
}

impl Team for OnePersonTeam {
    fn name(&self) -> &str {
        &self.shared.name
    }

    #[instrument(skip(self), fields(team = %self.shared.name))]
    fn start_working(&self) -> Result<(), TeamError> {
        let mut worker = self.worker.lock();
        if !self.shared.lifecycle.start() {
            return Ok(());
        }

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(format!("{}-worker", self.shared.name))
            .spawn(move || work(&shared))
            .map_err(|source| {
                self.shared.lifecycle.stop();
                TeamError::Spawn {
                    team: self.shared.name.clone(),
                    source,
                }
            })?;
        *worker = Some(handle);

        info!(team = %self.shared.name, "Team started working");
        Ok(())
    }

    fn assign_job(&self, job: BoxedJob) -> Result<(), TeamError> {
        if !self.shared.lifecycle.is_working() {
            return Err(TeamError::NotWorking(self.shared.name.clone()));
        }
        self.shared.queue.enqueue(job);
        Ok(())
    }

    #[instrument(skip(self), fields(team = %self.shared.name))]
    fn stop_working(&self) {
        let handle = {
            let mut worker = self.worker.lock();
            if !self.shared.lifecycle.stop() {
                return;
            }
            worker.take()
        };

        self.shared.queue.wake_all();
        if let Some(handle) = handle {
            join_worker(&self.shared.name, handle);
        }

        info!(
            team = %self.shared.name,
            abandoned = self.shared.queue.len(),
            "Team stopped working"
        );
        // Queued jobs never ran; dropping them lets their owners observe abandonment
        while self.shared.queue.dequeue().is_some() {}
    }

    fn is_working(&self) -> bool {
        self.shared.lifecycle.is_working()
    }
}

impl Drop for OnePersonTeam {
    fn drop(&mut self) {
        self.stop_working();
    }
}
