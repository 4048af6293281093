//! Leader/follower team
//!
//! Only the current leader polls the [`TaskQueue`]. Having taken a job, the
//! leader promotes the most recently parked follower before running it, so a
//! single thread is ever blocked on the queue and an enqueue wakes exactly
//! one worker.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, instrument};

use super::queue::TaskQueue;
use super::worker::{execute_pass, join_worker, TeamLifecycle};
use super::{Team, TeamError};
use crate::job::BoxedJob;

#[derive(Debug, Default)]
struct StackState {
    leader: Option<usize>,
    followers: Vec<usize>,
}

/// LIFO stack of parked followers plus the identity of the current leader
///
/// Invariant: at most one member is leader at any instant. Ordering fairness
/// among followers is not guaranteed.
pub struct TeamMemberStack {
    state: Mutex<StackState>,
    members: Box<[Condvar]>,
}

impl TeamMemberStack {
    /// Create a stack for members `0..team_size`
    pub fn new(team_size: usize) -> Self {
        Self {
            state: Mutex::new(StackState::default()),
            members: (0..team_size).map(|_| Condvar::new()).collect(),
        }
    }

    /// Block until `member` is leader
    ///
    /// Returns `false` without leadership once `lifecycle` is no longer
    /// working.
    pub fn wait_to_be_leader(&self, member: usize, lifecycle: &TeamLifecycle) -> bool {
        let mut state = self.state.lock();

        if state.leader == Some(member) {
            return true;
        }
        if state.leader.is_none() && lifecycle.is_working() {
            state.leader = Some(member);
            return true;
        }

        debug_assert!(
            !state.followers.contains(&member),
            "member {member} parked twice"
        );
        state.followers.push(member);
        loop {
            if state.leader == Some(member) {
                return true;
            }
            if !lifecycle.is_working() {
                state.followers.retain(|&follower| follower != member);
                return false;
            }
            self.members[member].wait(&mut state);
        }
    }

    /// Give up leadership held by `member`, handing it to the top follower
    pub fn promote_leader(&self, member: usize) {
        let mut state = self.state.lock();
        if state.leader != Some(member) {
            return;
        }

        state.leader = state.followers.pop();
        if let Some(next) = state.leader {
            self.members[next].notify_one();
        }
    }

    /// Wake every parked follower so it can observe shutdown
    pub fn wake_all(&self) {
        let _state = self.state.lock();
        for member in self.members.iter() {
            member.notify_all();
        }
    }

    /// Current leader, if any
    pub fn leader(&self) -> Option<usize> {
        self.state.lock().leader
    }

    /// Number of parked followers
    pub fn follower_count(&self) -> usize {
        self.state.lock().followers.len()
    }
}

impl std::fmt::Debug for TeamMemberStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TeamMemberStack")
            .field("leader", &state.leader)
            .field("followers", &state.followers)
            .finish()
    }
}

struct Shared {
    name: String,
    queue: TaskQueue,
    stack: TeamMemberStack,
    lifecycle: TeamLifecycle,
    poll_interval: Duration,
}

/// Team of `team_size` workers coordinated through a [`TeamMemberStack`]
pub struct LeaderFollowerTeam {
    shared: Arc<Shared>,
    team_size: usize,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl LeaderFollowerTeam {
    /// Create a team of `team_size` workers (at least one)
    pub fn new(name: impl Into<String>, team_size: usize, poll_interval: Duration) -> Self {
        let team_size = team_size.max(1);
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                queue: TaskQueue::new(),
                stack: TeamMemberStack::new(team_size),
                lifecycle: TeamLifecycle::new(),
                poll_interval,
            }),
            team_size,
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Number of worker threads
    pub fn team_size(&self) -> usize {
        self.team_size
    }

    /// Number of jobs waiting for a leader
    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }
}

fn work(shared: &Shared, member: usize) {
    while shared.stack.wait_to_be_leader(member, &shared.lifecycle) {
        let job = if shared.lifecycle.is_working() {
            shared.queue.dequeue_timeout(shared.poll_interval)
        } else {
            shared.queue.dequeue()
        };

        match job {
            Some(job) => {
                shared.stack.promote_leader(member);
                if let Some(job) = execute_pass(&shared.name, &shared.lifecycle, job) {
                    shared.queue.enqueue(job);
                }
            }
            None if !shared.lifecycle.is_working() => {
                shared.stack.promote_leader(member);
                break;
            }
            // Still leader, poll again
            None => {}
        }
    }
    debug!(team = %shared.name, member, "Worker exited");
}

impl Team for LeaderFollowerTeam {
    fn name(&self) -> &str {
        &self.shared.name
    }

    #[instrument(skip(self), fields(team = %self.shared.name, team_size = self.team_size))]
    fn start_working(&self) -> Result<(), TeamError> {
        let mut workers = self.workers.lock();
        if !self.shared.lifecycle.start() {
            return Ok(());
        }

        for member in 0..self.team_size {
            let shared = Arc::clone(&self.shared);
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", self.shared.name, member))
                .spawn(move || work(&shared, member));

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(source) => {
                    self.shared.lifecycle.stop();
                    self.shared.stack.wake_all();
                    self.shared.queue.wake_all();
                    for handle in workers.drain(..) {
                        join_worker(&self.shared.name, handle);
                    }
                    return Err(TeamError::Spawn {
                        team: self.shared.name.clone(),
                        source,
                    });
                }
            }
        }

        info!(team = %self.shared.name, team_size = self.team_size, "Team started working");
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
        let handles = {
            let mut workers = self.workers.lock();
            if !self.shared.lifecycle.stop() {
                return;
            }
            std::mem::take(&mut *workers)
        };

        self.shared.stack.wake_all();
        self.shared.queue.wake_all();
        for handle in handles {
            join_worker(&self.shared.name, handle);
        }

        while self.shared.queue.dequeue().is_some() {}
        info!(team = %self.shared.name, "Team stopped working");
    }

    fn is_working(&self) -> bool {
        self.shared.lifecycle.is_working()
    }
}

impl Drop for LeaderFollowerTeam {
    fn drop(&mut self) {
        self.stop_working();
    }
}
