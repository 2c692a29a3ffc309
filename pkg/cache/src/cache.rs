use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use pkg_cluster::{ApiError, ClusterApi};
use pkg_constants::metrics as names;
use pkg_metrics::MetricsRegistry;
use pkg_types::kind::ResourceKind;
use pkg_types::namespace::Project;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::snapshot::ResourceSnapshot;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub refresh_period: Duration,
    /// Projects fetched concurrently during one refresh
    pub concurrency: usize,
}

impl CacheConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.refresh_period.is_zero() {
            anyhow::bail!("cache refresh period must be positive");
        }
        if self.concurrency == 0 {
            anyhow::bail!("cache concurrency must be at least 1");
        }
        Ok(())
    }
}

/// One published generation of the cache.
#[derive(Default)]
struct CacheIndex {
    projects: BTreeMap<String, Arc<ResourceSnapshot>>,
    /// Kinds served at the time of this generation
    kinds: HashSet<ResourceKind>,
    refreshed_at: Option<DateTime<Utc>>,
}

/// Outcome of one refresh pass.
#[derive(Debug, Clone, Default)]
pub struct RefreshSummary {
    pub projects: usize,
    /// Projects whose fetch failed; their previous snapshot was kept
    pub failed: Vec<String>,
}

/// Live, queryable snapshot of every project's workloads.
///
/// The refresh loop is the only writer. Readers clone the current index
/// `Arc` and never wait on network I/O.
pub struct ResourceCache {
    client: Arc<dyn ClusterApi>,
    config: CacheConfig,
    index: RwLock<Arc<CacheIndex>>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl ResourceCache {
    pub fn new(client: Arc<dyn ClusterApi>, config: CacheConfig) -> anyhow::Result<Self> {
        config.validate()?;
        Ok(Self {
            client,
            config,
            index: RwLock::new(Arc::new(CacheIndex::default())),
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn current(&self) -> Arc<CacheIndex> {
        self.index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn publish(&self, next: CacheIndex) {
        *self.index.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
    }

    /// Most recent successfully fetched snapshot of `name`.
    pub fn get_project(&self, name: &str) -> Option<Arc<ResourceSnapshot>> {
        self.current().projects.get(name).cloned()
    }

    /// Names of all cached projects, in sorted order.
    pub fn list_projects(&self) -> Vec<String> {
        self.current().projects.keys().cloned().collect()
    }

    /// True once the first refresh has been published.
    pub fn has_synced(&self) -> bool {
        self.current().refreshed_at.is_some()
    }

    pub fn last_refreshed(&self) -> Option<DateTime<Utc>> {
        self.current().refreshed_at
    }

    /// Start the refresh loop as a background task.
    pub fn start(self: Arc<Self>, mut stop: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "ResourceCache started (interval={}s, concurrency={})",
                self.config.refresh_period.as_secs(),
                self.config.concurrency
            );
            let mut interval = tokio::time::interval(self.config.refresh_period);
            loop {
                if *stop.borrow() {
                    break;
                }
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = self.refresh().await {
                            warn!("ResourceCache refresh error: {:#}", e);
                            self.count(names::CACHE_REFRESH_ERRORS, 1);
                        }
                    }
                    changed = stop.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            info!("ResourceCache stopped");
        })
    }

    /// One pass: list projects, fetch each one's workloads, publish the new index.
    ///
    /// If the project list itself cannot be read the previous index stays in
    /// place. A project whose fetch fails keeps its previous snapshot.
    pub async fn refresh(&self) -> anyhow::Result<RefreshSummary> {
        let started = Instant::now();
        let previous = self.current();

        let projects = self
            .client
            .list_projects()
            .await
            .map_err(|e| anyhow::anyhow!("listing projects: {}", e))?;

        let kinds = match self.client.served_kinds().await {
            Ok(kinds) => kinds,
            Err(e) => {
                warn!(
                    "Resource discovery failed, reusing last known kinds: {}",
                    e
                );
                previous.kinds.clone()
            }
        };

        let results: Vec<(String, Result<ResourceSnapshot, ApiError>)> = stream::iter(projects)
            .map(|project| {
                let kinds = &kinds;
                async move {
                    let name = project.name.clone();
                    (name, self.snapshot_project(project, kinds).await)
                }
            })
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await;

        let mut summary = RefreshSummary {
            projects: 0,
            failed: Vec::new(),
        };
        let mut next = BTreeMap::new();
        for (name, result) in results {
            match result {
                Ok(snapshot) => {
                    next.insert(name, Arc::new(snapshot));
                }
                Err(e) => {
                    warn!(project = %name, error = %e, "Failed to refresh project, keeping previous snapshot");
                    if let Some(prev) = previous.projects.get(&name) {
                        next.insert(name.clone(), prev.clone());
                    }
                    summary.failed.push(name);
                }
            }
        }
        summary.projects = next.len();
        summary.failed.sort();

        self.publish(CacheIndex {
            projects: next,
            kinds,
            refreshed_at: Some(Utc::now()),
        });

        if let Some(metrics) = &self.metrics {
            metrics.gauge_set(names::CACHE_PROJECTS, summary.projects as i64);
            metrics.counter_add(names::CACHE_REFRESH_ERRORS, summary.failed.len() as u64);
            metrics.observe(names::CACHE_REFRESH_SECONDS, started.elapsed());
        }
        debug!(
            projects = summary.projects,
            failed = summary.failed.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "cache refreshed"
        );
        Ok(summary)
    }

    async fn snapshot_project(
        &self,
        project: Project,
        kinds: &HashSet<ResourceKind>,
    ) -> Result<ResourceSnapshot, ApiError> {
        let ns = project.name.clone();
        let pods = self.client.list_pods(&ns).await?;
        let quotas = self.client.list_quotas(&ns).await?;

        let mut unavailable_kinds = Vec::new();
        let mut controllers = Vec::new();
        for kind in ResourceKind::SCALABLE {
            if !kinds.contains(kind) {
                unavailable_kinds.push(*kind);
                continue;
            }
            match self.client.list_controllers(&ns, *kind).await {
                Ok(mut found) => controllers.append(&mut found),
                Err(ApiError::KindUnavailable(k)) => {
                    debug!(project = %ns, kind = %k, "kind not served");
                    unavailable_kinds.push(k);
                }
                Err(e) => return Err(e),
            }
        }

        let builds = if kinds.contains(&ResourceKind::Build) {
            match self.client.list_builds(&ns).await {
                Ok(builds) => builds,
                Err(ApiError::KindUnavailable(k)) => {
                    unavailable_kinds.push(k);
                    Vec::new()
                }
                Err(e) => return Err(e),
            }
        } else {
            unavailable_kinds.push(ResourceKind::Build);
            Vec::new()
        };

        Ok(ResourceSnapshot {
            project,
            pods,
            controllers,
            builds,
            quotas,
            unavailable_kinds,
            taken_at: Utc::now(),
        })
    }

    fn count(&self, name: &str, val: u64) {
        if let Some(metrics) = &self.metrics {
            metrics.counter_add(name, val);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_cluster::memory::MemoryCluster;
    use pkg_types::controller::ScalableController;
    use pkg_types::pod::{Pod, PodPhase, ResourceRequirements};
    use std::collections::HashMap;

    fn make_pod(ns: &str, name: &str) -> Pod {
        Pod {
            name: name.to_string(),
            namespace: ns.to_string(),
            phase: PodPhase::Running,
            resources: ResourceRequirements {
                memory_request_bytes: 1024,
                memory_limit_bytes: 0,
            },
            active_deadline_seconds: None,
            owner: None,
            labels: HashMap::new(),
            started_at: Some(Utc::now()),
            created_at: Utc::now(),
        }
    }

    fn make_controller(ns: &str, name: &str, kind: ResourceKind) -> ScalableController {
        ScalableController {
            kind,
            name: name.to_string(),
            namespace: ns.to_string(),
            replicas: 1,
            ready_replicas: 1,
            annotations: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    fn make_cache(cluster: Arc<MemoryCluster>) -> ResourceCache {
        ResourceCache::new(
            cluster,
            CacheConfig {
                refresh_period: Duration::from_secs(60),
                concurrency: 4,
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_refresh_indexes_every_project() {
        let cluster = Arc::new(MemoryCluster::new());
        for ns in ["alpha", "beta"] {
            cluster.add_project(Project::new(ns));
            cluster.add_pod(make_pod(ns, "web-1"));
            cluster.add_controller(make_controller(ns, "web", ResourceKind::Deployment));
        }
        let cache = make_cache(cluster.clone());
        assert!(!cache.has_synced());
        assert!(cache.get_project("alpha").is_none());

        let summary = cache.refresh().await.unwrap();
        assert_eq!(summary.projects, 2);
        assert!(summary.failed.is_empty());
        assert!(cache.has_synced());
        assert_eq!(cache.list_projects(), vec!["alpha", "beta"]);

        let alpha = cache.get_project("alpha").unwrap();
        assert_eq!(alpha.pods.len(), 1);
        assert_eq!(alpha.controllers.len(), 1);
        assert!(alpha.unavailable_kinds.is_empty());
    }

    #[tokio::test]
    async fn test_failed_project_keeps_previous_snapshot() {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.add_project(Project::new("alpha"));
        cluster.add_project(Project::new("beta"));
        cluster.add_pod(make_pod("alpha", "web-1"));
        let cache = make_cache(cluster.clone());
        cache.refresh().await.unwrap();

        cluster.add_pod(make_pod("alpha", "web-2"));
        cluster.add_pod(make_pod("beta", "api-1"));
        cluster.fail_reads("alpha", true);
        let summary = cache.refresh().await.unwrap();

        assert_eq!(summary.failed, vec!["alpha".to_string()]);
        assert_eq!(cache.get_project("alpha").unwrap().pods.len(), 1);
        assert_eq!(cache.get_project("beta").unwrap().pods.len(), 1);
    }

    #[tokio::test]
    async fn test_new_project_failing_first_fetch_is_absent() {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.add_project(Project::new("alpha"));
        cluster.fail_reads("alpha", true);
        let cache = make_cache(cluster);

        let summary = cache.refresh().await.unwrap();
        assert_eq!(summary.projects, 0);
        assert!(cache.get_project("alpha").is_none());
        assert!(cache.has_synced());
    }

    #[tokio::test]
    async fn test_removed_project_drops_out() {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.add_project(Project::new("alpha"));
        cluster.add_project(Project::new("beta"));
        let cache = make_cache(cluster.clone());
        cache.refresh().await.unwrap();

        cluster.remove_project("beta");
        cache.refresh().await.unwrap();
        assert_eq!(cache.list_projects(), vec!["alpha"]);
    }

    #[tokio::test]
    async fn test_unserved_kind_degrades_only_that_kind() {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.add_project(Project::new("alpha"));
        cluster.add_pod(make_pod("alpha", "web-1"));
        cluster.add_controller(make_controller("alpha", "web", ResourceKind::Deployment));
        cluster.add_controller(make_controller(
            "alpha",
            "legacy",
            ResourceKind::ReplicationController,
        ));
        cluster.set_served(&[ResourceKind::Deployment]);
        let cache = make_cache(cluster);
        cache.refresh().await.unwrap();

        let alpha = cache.get_project("alpha").unwrap();
        assert_eq!(alpha.pods.len(), 1);
        assert_eq!(alpha.controllers.len(), 1);
        assert_eq!(alpha.controllers[0].name, "web");
        assert!(
            alpha
                .unavailable_kinds
                .contains(&ResourceKind::ReplicationController)
        );
        assert!(alpha.unavailable_kinds.contains(&ResourceKind::Build));
    }

    #[tokio::test]
    async fn test_discovery_failure_reuses_last_known_kinds() {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.add_project(Project::new("alpha"));
        cluster.add_controller(make_controller("alpha", "web", ResourceKind::Deployment));
        let cache = make_cache(cluster.clone());
        cache.refresh().await.unwrap();

        cluster.set_discovery_down(true);
        cache.refresh().await.unwrap();
        let alpha = cache.get_project("alpha").unwrap();
        assert_eq!(alpha.controllers.len(), 1);
        assert!(alpha.unavailable_kinds.is_empty());
    }

    #[tokio::test]
    async fn test_readers_keep_their_generation() {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.add_project(Project::new("alpha"));
        cluster.add_pod(make_pod("alpha", "web-1"));
        let cache = make_cache(cluster.clone());
        cache.refresh().await.unwrap();

        let held = cache.get_project("alpha").unwrap();
        cluster.add_pod(make_pod("alpha", "web-2"));
        cache.refresh().await.unwrap();

        assert_eq!(held.pods.len(), 1);
        assert_eq!(cache.get_project("alpha").unwrap().pods.len(), 2);
    }

    #[tokio::test]
    async fn test_metrics_report_cached_projects() {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.add_project(Project::new("alpha"));
        cluster.add_project(Project::new("beta"));
        cluster.fail_reads("beta", true);
        let metrics = Arc::new(MetricsRegistry::with_hibernate_metrics());
        let cache = make_cache(cluster).with_metrics(metrics.clone());

        cache.refresh().await.unwrap();
        assert_eq!(metrics.gauge_get(names::CACHE_PROJECTS), Some(1));
        assert_eq!(metrics.counter_get(names::CACHE_REFRESH_ERRORS), Some(1));
        assert_eq!(metrics.summary_count(names::CACHE_REFRESH_SECONDS), Some(1));
    }

    #[tokio::test]
    async fn test_start_stops_on_signal() {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.add_project(Project::new("alpha"));
        let cache = Arc::new(make_cache(cluster));
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = cache.clone().start(stop_rx);
        for _ in 0..50 {
            if cache.has_synced() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(cache.has_synced());

        stop_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
