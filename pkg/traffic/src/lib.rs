//! Network-traffic boundary used by the idle controller.

pub mod fixed;
pub mod prometheus;

use async_trait::async_trait;
use std::time::Duration;

pub use prometheus::PrometheusTraffic;

/// Pods whose received traffic is measured: those owned by one controller.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrafficTarget {
    pub namespace: String,
    /// Owning controller, used for identity and logging
    pub name: String,
    /// Exact names of the controller's pods
    pub pods: Vec<String>,
}

impl TrafficTarget {
    pub fn new(namespace: &str, name: &str, pods: Vec<String>) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            pods,
        }
    }
}

impl std::fmt::Display for TrafficTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[async_trait]
pub trait TrafficSource: Send + Sync {
    /// Bytes received by `target` over the trailing `window`.
    /// `Ok(None)` means the source holds no samples for the target.
    async fn received_bytes(
        &self,
        target: &TrafficTarget,
        window: Duration,
    ) -> anyhow::Result<Option<u64>>;
}
