use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum BuildPhase {
    #[default]
    New,
    Pending,
    Running,
    Complete,
    Failed,
    Cancelled,
}

impl std::fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildPhase::New => write!(f, "New"),
            BuildPhase::Pending => write!(f, "Pending"),
            BuildPhase::Running => write!(f, "Running"),
            BuildPhase::Complete => write!(f, "Complete"),
            BuildPhase::Failed => write!(f, "Failed"),
            BuildPhase::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// An image build running inside a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Build {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub phase: BuildPhase,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Build {
    /// Builds that have not reached a terminal phase.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self.phase,
            BuildPhase::New | BuildPhase::Pending | BuildPhase::Running
        )
    }
}
