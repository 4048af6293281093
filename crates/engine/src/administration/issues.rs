//! Configuration issue reporting

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Kind of configured asset an issue is raised against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    Engine,
    Team,
    ManagedObject,
    Governance,
    Administration,
    Job,
}

impl std::fmt::Display for AssetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Engine => "engine",
            Self::Team => "team",
            Self::ManagedObject => "managed_object",
            Self::Governance => "governance",
            Self::Administration => "administration",
            Self::Job => "job",
        };
        f.write_str(name)
    }
}

/// Configuration problem found while constructing the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub asset_type: AssetType,
    pub asset_name: String,
    pub message: String,
}

/// Sink for configuration issues
///
/// Construction reports every problem here and carries on, so one pass
/// surfaces all issues together.
pub trait Issues {
    /// Record an issue against the named asset
    fn add_issue(&mut self, asset_type: AssetType, asset_name: &str, message: String);
}

/// [`Issues`] sink keeping every issue in memory
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct IssueCollector {
    issues: Vec<Issue>,
}

impl IssueCollector {
    /// Create an empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded issues, in the order they were raised
    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    /// Recorded messages, in the order they were raised
    pub fn messages(&self) -> Vec<&str> {
        self.issues
            .iter()
            .map(|issue| issue.message.as_str())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }
}

impl Issues for IssueCollector {
    fn add_issue(&mut self, asset_type: AssetType, asset_name: &str, message: String) {
        warn!(%asset_type, asset_name, %message, "Configuration issue");
        self.issues.push(Issue {
            asset_type,
            asset_name: asset_name.to_string(),
            message,
        });
    }
}
