use chrono::{DateTime, Utc};
use pkg_types::build::Build;
use pkg_types::controller::ScalableController;
use pkg_types::kind::ResourceKind;
use pkg_types::namespace::Project;
use pkg_types::pod::Pod;
use pkg_types::quota::{QuotaScope, ResourceQuota};

/// Point-in-time view of one project, read in a single pass.
#[derive(Debug, Clone)]
pub struct ResourceSnapshot {
    pub project: Project,
    pub pods: Vec<Pod>,
    pub controllers: Vec<ScalableController>,
    pub builds: Vec<Build>,
    pub quotas: Vec<ResourceQuota>,
    /// Kinds the cluster did not serve when this snapshot was taken
    pub unavailable_kinds: Vec<ResourceKind>,
    pub taken_at: DateTime<Utc>,
}

impl ResourceSnapshot {
    pub fn name(&self) -> &str {
        &self.project.name
    }

    pub fn running_pods(&self) -> impl Iterator<Item = &Pod> {
        self.pods.iter().filter(|p| p.is_running())
    }

    /// Pods owned by `controller`, matched on owner kind and exact name.
    pub fn pods_of<'a>(
        &'a self,
        controller: &'a ScalableController,
    ) -> impl Iterator<Item = &'a Pod> + 'a {
        self.pods.iter().filter(move |p| {
            p.owner
                .as_ref()
                .is_some_and(|o| o.kind == controller.kind && o.name == controller.name)
        })
    }

    pub fn in_flight_builds(&self) -> impl Iterator<Item = &Build> {
        self.builds.iter().filter(|b| b.is_in_flight())
    }

    /// Tightest memory limit the project's own quotas place on pods of `scope`.
    /// Unscoped quotas apply to both scopes; the force-sleep quota is ignored.
    pub fn memory_limit(&self, scope: QuotaScope) -> Option<u64> {
        self.quotas
            .iter()
            .filter(|q| !q.is_force_sleep())
            .filter(|q| q.scope.is_none_or(|s| s == scope))
            .filter_map(|q| q.hard.max_memory_bytes)
            .filter(|bytes| *bytes > 0)
            .min()
    }

    pub fn has_force_sleep_quota(&self) -> bool {
        self.quotas.iter().any(|q| q.is_force_sleep())
    }
}
