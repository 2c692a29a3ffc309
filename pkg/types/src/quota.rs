use chrono::{DateTime, Utc};
use pkg_constants::annotations::FORCE_SLEEP_QUOTA_NAME;
use serde::{Deserialize, Serialize};

/// Which pods a quota constrains.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum QuotaScope {
    /// Run-to-completion pods (builds, jobs)
    Terminating,
    /// Long-running pods
    NotTerminating,
}

/// Resource quota for a namespace: limits pod count and memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceQuota {
    pub name: String,
    pub namespace: String,
    /// `None` applies the quota to every pod
    #[serde(default)]
    pub scope: Option<QuotaScope>,
    pub hard: QuotaLimits,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuotaLimits {
    /// Maximum number of pods allowed
    #[serde(default)]
    pub max_pods: Option<u32>,
    /// Maximum total memory in bytes
    #[serde(default)]
    pub max_memory_bytes: Option<u64>,
}

impl ResourceQuota {
    /// The quota applied while a project is force-slept: no pods may run.
    pub fn force_sleep(namespace: &str) -> Self {
        Self {
            name: FORCE_SLEEP_QUOTA_NAME.to_string(),
            namespace: namespace.to_string(),
            scope: None,
            hard: QuotaLimits {
                max_pods: Some(0),
                max_memory_bytes: None,
            },
            created_at: Utc::now(),
        }
    }

    pub fn is_force_sleep(&self) -> bool {
        self.name == FORCE_SLEEP_QUOTA_NAME
    }
}
