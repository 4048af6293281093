//! Engine configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::team::TeamConfig;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Steps a thread-state may run in one pass before yielding its team
    pub max_steps_per_pass: usize,

    /// Team for jobs and duties configured without one
    pub default_team: TeamConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps_per_pass: 64,
            default_team: TeamConfig::passive("default"),
        }
    }
}

impl EngineConfig {
    /// Create configuration from environment variables
    ///
    /// - `ENGINE_MAX_STEPS_PER_PASS` - steps per pass (default 64)
    /// - `ENGINE_POLL_INTERVAL_MS` - idle poll interval of the default team
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let max_steps_per_pass = std::env::var("ENGINE_MAX_STEPS_PER_PASS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_steps_per_pass);

        let mut default_team = defaults.default_team;
        if let Some(millis) = std::env::var("ENGINE_POLL_INTERVAL_MS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            default_team = default_team.with_poll_interval(Duration::from_millis(millis));
        }

        Self {
            default_team,
            ..Self::default()
        }
        .with_max_steps_per_pass(max_steps_per_pass)
    }

    /// Set the steps per pass (at least one)
    pub fn with_max_steps_per_pass(mut self, steps: usize) -> Self {
        self.max_steps_per_pass = steps.max(1);
        self
    }

    /// Set the default team
    pub fn with_default_team(mut self, team: TeamConfig) -> Self {
        self.default_team = team;
        self
    }
}
