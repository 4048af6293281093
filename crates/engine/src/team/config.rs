//! Serializable team configuration

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{
    LeaderFollowerTeam, OnePersonTeam, PassiveTeam, ProcessContextTeam, Team, WorkerPerTaskTeam,
};

/// Kind of team and its variant-specific settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TeamKind {
    /// One dedicated worker thread
    OnePerson,

    /// A fixed set of workers where only the leader polls for jobs
    LeaderFollower {
        /// Number of worker threads
        team_size: usize,
    },

    /// A new thread for every assigned job
    WorkerPerTask,

    /// Jobs run on the assigning thread
    Passive,

    /// Jobs run on the thread that created their process
    ProcessContext,
}

impl std::fmt::Display for TeamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OnePerson => write!(f, "one_person"),
            Self::LeaderFollower { team_size } => write!(f, "leader_follower({team_size})"),
            Self::WorkerPerTask => write!(f, "worker_per_task"),
            Self::Passive => write!(f, "passive"),
            Self::ProcessContext => write!(f, "process_context"),
        }
    }
}

/// Team configuration errors
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum TeamConfigError {
    /// Team has no name
    #[error("team must have a name")]
    MissingName,

    /// Leader/follower team without members
    #[error("team '{0}' must have at least one member")]
    EmptyTeam(String),
}

/// Team configuration
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use teamwork_engine::team::TeamConfig;
///
/// let config = TeamConfig::leader_follower("workers", 8)
///     .with_poll_interval(Duration::from_millis(50));
/// let team = config.build().unwrap();
/// assert_eq!(team.name(), "workers");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TeamConfig {
    /// Unique team name
    pub name: String,

    /// Team variant
    pub kind: TeamKind,

    /// How long an idle worker waits on the queue before re-checking for shutdown
    #[serde(with = "duration_millis", default = "default_poll_interval")]
    pub poll_interval: Duration,
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(100)
}

impl TeamConfig {
    /// Create a team configuration
    pub fn new(name: impl Into<String>, kind: TeamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            poll_interval: default_poll_interval(),
        }
    }

    /// One dedicated worker thread
    pub fn one_person(name: impl Into<String>) -> Self {
        Self::new(name, TeamKind::OnePerson)
    }

    /// Leader/follower team of `team_size` workers
    pub fn leader_follower(name: impl Into<String>, team_size: usize) -> Self {
        Self::new(name, TeamKind::LeaderFollower { team_size })
    }

    /// New thread per job
    pub fn worker_per_task(name: impl Into<String>) -> Self {
        Self::new(name, TeamKind::WorkerPerTask)
    }

    /// Inline execution on the assigning thread
    pub fn passive(name: impl Into<String>) -> Self {
        Self::new(name, TeamKind::Passive)
    }

    /// Execution on the thread that created the job's process
    pub fn process_context(name: impl Into<String>) -> Self {
        Self::new(name, TeamKind::ProcessContext)
    }

    /// Set the idle poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), TeamConfigError> {
        if self.name.trim().is_empty() {
            return Err(TeamConfigError::MissingName);
        }
        if let TeamKind::LeaderFollower { team_size: 0 } = self.kind {
            return Err(TeamConfigError::EmptyTeam(self.name.clone()));
        }
        Ok(())
    }

    /// Create the configured team (not yet working)
    pub fn build(&self) -> Result<Arc<dyn Team>, TeamConfigError> {
        self.validate()?;

        let name = self.name.clone();
        let team: Arc<dyn Team> = match self.kind {
            TeamKind::OnePerson => Arc::new(OnePersonTeam::new(name, self.poll_interval)),
            TeamKind::LeaderFollower { team_size } => Arc::new(LeaderFollowerTeam::new(
                name,
                team_size,
                self.poll_interval,
            )),
            TeamKind::WorkerPerTask => Arc::new(WorkerPerTaskTeam::new(name)),
            TeamKind::Passive => Arc::new(PassiveTeam::new(name)),
            TeamKind::ProcessContext => {
                Arc::new(ProcessContextTeam::new(name, self.poll_interval))
            }
        };
        Ok(team)
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
