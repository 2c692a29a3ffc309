use chrono::{DateTime, Utc};
use pkg_constants::annotations::IDLED_AT;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::kind::ResourceKind;

/// A workload controller whose replica count can be set to zero
/// (deployments and replication controllers).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalableController {
    pub kind: ResourceKind,
    pub name: String,
    pub namespace: String,
    /// Desired replica count
    pub replicas: u32,
    /// Replicas currently running and ready
    #[serde(default)]
    pub ready_replicas: u32,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl ScalableController {
    /// Identity used by per-resource state tables: `namespace/Kind/name`.
    pub fn key(&self) -> String {
        format!("{}/{}/{}", self.namespace, self.kind, self.name)
    }

    pub fn is_idled(&self) -> bool {
        self.annotations.contains_key(IDLED_AT)
    }
}
