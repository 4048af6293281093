//! Team spawning a thread for every job

use std::collections::HashSet;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, instrument};

use super::worker::{run_to_completion, TeamLifecycle};
use super::{Team, TeamError};
use crate::job::BoxedJob;

/// Job threads still running
#[derive(Default)]
struct Tasks {
    active: usize,
    threads: HashSet<ThreadId>,
}

struct Shared {
    name: String,
    lifecycle: TeamLifecycle,
    tasks: Mutex<Tasks>,
    idle: Condvar,
}

impl Shared {
    fn started(&self) {
        self.tasks.lock().threads.insert(thread::current().id());
    }

    fn finished(&self, thread: Option<ThreadId>) {
        let mut tasks = self.tasks.lock();
        tasks.active -= 1;
        if let Some(thread) = thread {
            tasks.threads.remove(&thread);
        }
        self.idle.notify_all();
    }
}

/// Team running each assigned job on its own new thread
///
/// The thread loops over the job until it completes or the team stops.
pub struct WorkerPerTaskTeam {
    shared: Arc<Shared>,
}

impl WorkerPerTaskTeam {
    /// Create a team
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                lifecycle: TeamLifecycle::new(),
                tasks: Mutex::new(Tasks::default()),
                idle: Condvar::new(),
            }),
        }
    }

    /// Number of job threads still running
    pub fn active(&self) -> usize {
        self.shared.tasks.lock().active
    }
}

impl Team for WorkerPerTaskTeam {
    fn name(&self) -> &str {
        &self.shared.name
    }

    #[instrument(skip(self), fields(team = %self.shared.name))]
    fn start_working(&self) -> Result<(), TeamError> {
        if self.shared.lifecycle.start() {
            info!(team = %self.shared.name, "Team started working");
        }
        Ok(())
    }

    fn assign_job(&self, job: BoxedJob) -> Result<(), TeamError> {
        if !self.shared.lifecycle.is_working() {
            return Err(TeamError::NotWorking(self.shared.name.clone()));
        }

        self.shared.tasks.lock().active += 1;
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(format!("{}-task", self.shared.name))
            .spawn(move || {
                shared.started();
                run_to_completion(&shared.name, &shared.lifecycle, job);
                shared.finished(Some(thread::current().id()));
            });

        match spawned {
            Ok(_detached) => Ok(()),
            Err(source) => {
                self.shared.finished(None);
                Err(TeamError::Spawn {
                    team: self.shared.name.clone(),
                    source,
                })
            }
        }
    }

    #[instrument(skip(self), fields(team = %self.shared.name))]
    fn stop_working(&self) {
        if !self.shared.lifecycle.stop() {
            return;
        }

        let mut tasks = self.shared.tasks.lock();
        let own = usize::from(tasks.threads.contains(&thread::current().id()));
        if own > 0 {
            debug!(
                team = %self.shared.name,
                "Job thread stopping its own team, not waiting for itself"
            );
        }
        while tasks.active > own {
            self.shared.idle.wait(&mut tasks);
        }
        info!(team = %self.shared.name, "Team stopped working");
    }

    fn is_working(&self) -> bool {
        self.shared.lifecycle.is_working()
    }
}

impl Drop for WorkerPerTaskTeam {
    fn drop(&mut self) {
        self.stop_working();
    }
}
