use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::kind::ResourceKind;

// --- Resource requirements ---

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ResourceRequirements {
    /// Memory request in bytes, summed across containers
    #[serde(default)]
    pub memory_request_bytes: u64,
    /// Memory limit in bytes, summed across containers
    #[serde(default)]
    pub memory_limit_bytes: u64,
}

// --- Pod phase ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PodPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl std::fmt::Display for PodPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PodPhase::Pending => write!(f, "Pending"),
            PodPhase::Running => write!(f, "Running"),
            PodPhase::Succeeded => write!(f, "Succeeded"),
            PodPhase::Failed => write!(f, "Failed"),
            PodPhase::Unknown => write!(f, "Unknown"),
        }
    }
}

// --- Owner reference ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OwnerReference {
    pub kind: ResourceKind,
    pub name: String,
}

// --- Pod ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pod {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub phase: PodPhase,
    #[serde(default)]
    pub resources: ResourceRequirements,
    /// Set on run-to-completion pods; such pods count against the terminating quota
    #[serde(default)]
    pub active_deadline_seconds: Option<u64>,
    /// Controller or build that created this pod
    #[serde(default)]
    pub owner: Option<OwnerReference>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// When the pod's containers started running
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Pod {
    pub fn is_running(&self) -> bool {
        self.phase == PodPhase::Running
    }

    pub fn is_terminating(&self) -> bool {
        self.active_deadline_seconds.is_some()
            || self
                .owner
                .as_ref()
                .is_some_and(|o| o.kind == ResourceKind::Build)
    }

    /// Memory charged to quota: the request, or the limit when no request is set.
    pub fn memory_bytes(&self) -> u64 {
        if self.resources.memory_request_bytes > 0 {
            self.resources.memory_request_bytes
        } else {
            self.resources.memory_limit_bytes
        }
    }

    /// True when the pod is not managed by any scalable controller.
    pub fn is_standalone(&self) -> bool {
        !self.owner.as_ref().is_some_and(|o| o.kind.is_scalable())
    }
}
