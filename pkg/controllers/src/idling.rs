//! Idle controller.
//!
//! Scales individual controllers to zero when their pods received less
//! network traffic than a threshold over the query window.

use anyhow::Context;
use chrono::{DateTime, TimeDelta, Utc};
use pkg_cache::ResourceCache;
use pkg_cluster::{AnnotationPatch, ClusterApi};
use pkg_constants::annotations::{IDLED_AT, PREVIOUS_SCALE};
use pkg_constants::metrics as names;
use pkg_metrics::MetricsRegistry;
use pkg_traffic::{TrafficSource, TrafficTarget};
use pkg_types::controller::ScalableController;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::forcesleep::SleepStateQuery;
use crate::workqueue::run_workers;

#[derive(Debug, Clone)]
pub struct IdlerConfig {
    pub idle_sync_period: Duration,
    /// Trailing window over which received bytes are summed
    pub idle_query_period: Duration,
    pub sync_workers: usize,
    /// Controllers receiving fewer bytes than this are idled
    pub threshold: u64,
    pub dry_run: bool,
}

impl IdlerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.idle_sync_period.is_zero() {
            anyhow::bail!("idle sync period must be positive");
        }
        if self.idle_query_period.is_zero() {
            anyhow::bail!("idle query period must be positive");
        }
        if self.sync_workers == 0 {
            anyhow::bail!("idler needs at least one sync worker");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleState {
    Active,
    Idled {
        at: DateTime<Utc>,
        /// Decided in dry-run; nothing was scaled
        dry_run: bool,
    },
}

#[derive(Debug, Clone, Copy)]
struct IdleRecord {
    state: IdleState,
    /// Set when the controller was seen scaled back up after an idle
    unidled_at: Option<DateTime<Utc>>,
}

impl Default for IdleRecord {
    fn default() -> Self {
        Self {
            state: IdleState::Active,
            unidled_at: None,
        }
    }
}

pub struct Idler {
    config: IdlerConfig,
    cache: Arc<ResourceCache>,
    client: Arc<dyn ClusterApi>,
    traffic: Arc<dyn TrafficSource>,
    sleep: Arc<dyn SleepStateQuery>,
    records: Mutex<HashMap<String, IdleRecord>>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl Idler {
    pub fn new(
        config: IdlerConfig,
        cache: Arc<ResourceCache>,
        client: Arc<dyn ClusterApi>,
        traffic: Arc<dyn TrafficSource>,
        sleep: Arc<dyn SleepStateQuery>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            cache,
            client,
            traffic,
            sleep,
            records: Mutex::new(HashMap::new()),
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn records(&self) -> MutexGuard<'_, HashMap<String, IdleRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state of the controller identified by `key` (`ns/Kind/name`).
    pub fn idle_state(&self, key: &str) -> IdleState {
        self.records()
            .get(key)
            .map(|r| r.state)
            .unwrap_or(IdleState::Active)
    }

    pub fn start(self: Arc<Self>, mut stop: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "Idler started (interval={}s, window={}s, threshold={}B, dry_run={})",
                self.config.idle_sync_period.as_secs(),
                self.config.idle_query_period.as_secs(),
                self.config.threshold,
                self.config.dry_run
            );
            let mut interval = tokio::time::interval(self.config.idle_sync_period);
            loop {
                if *stop.borrow() {
                    break;
                }
                tokio::select! {
                    _ = interval.tick() => {
                        if !self.cache.has_synced() {
                            debug!("Idler waiting for first cache refresh");
                            continue;
                        }
                        self.sync_all(Utc::now()).await;
                    }
                    changed = stop.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            info!("Idler stopped");
        })
    }

    /// Sync every cached project once. Returns the number of projects with
    /// at least one failed controller.
    pub async fn sync_all(self: &Arc<Self>, now: DateTime<Utc>) -> usize {
        let started = Instant::now();
        let projects = self.cache.list_projects();

        let live: HashSet<&str> = projects.iter().map(String::as_str).collect();
        self.records().retain(|key, _| {
            key.split('/')
                .next()
                .is_some_and(|ns| live.contains(ns))
        });

        let this = self.clone();
        let failures = run_workers("Idler", projects, self.config.sync_workers, move |name| {
            let this = this.clone();
            async move { this.sync_project(&name, now).await }
        })
        .await;

        if let Some(metrics) = &self.metrics {
            let idled = self
                .records()
                .values()
                .filter(|r| matches!(r.state, IdleState::Idled { .. }))
                .count();
            metrics.gauge_set(names::IDLED_RESOURCES, idled as i64);
            metrics.counter_add(names::IDLE_SYNC_ERRORS, failures as u64);
            metrics.observe(names::IDLE_SYNC_SECONDS, started.elapsed());
        }
        failures
    }

    /// Check every scalable controller of one project against the traffic
    /// threshold.
    pub async fn sync_project(&self, name: &str, now: DateTime<Utc>) -> anyhow::Result<()> {
        let Some(snapshot) = self.cache.get_project(name) else {
            return Ok(());
        };
        if snapshot.project.is_excluded() {
            debug!(project = %name, "project excluded from idling");
            return Ok(());
        }
        if self.sleep.is_enforced_sleep(name) {
            debug!(project = %name, "project is force-sleeping, skipping idle check");
            return Ok(());
        }
        if let Some(woke) = self.sleep.last_wake(name)
            && self.within_query_window(woke, now)
        {
            debug!(project = %name, %woke, "project woke recently, skipping idle check");
            return Ok(());
        }

        let mut failed = 0;
        for controller in &snapshot.controllers {
            let key = controller.key();
            let record = self.observe(controller, snapshot.taken_at, now);

            if controller.replicas == 0 {
                continue;
            }
            if record
                .unidled_at
                .is_some_and(|at| self.within_query_window(at, now))
            {
                debug!(resource = %key, "resource unidled recently, skipping");
                continue;
            }

            let pods: Vec<String> = snapshot
                .pods_of(controller)
                .map(|p| p.name.clone())
                .collect();
            if pods.is_empty() {
                debug!(resource = %key, "no pods found, skipping");
                continue;
            }
            let target = TrafficTarget::new(&controller.namespace, &controller.name, pods);
            let bytes = match self
                .traffic
                .received_bytes(&target, self.config.idle_query_period)
                .await
            {
                Ok(Some(bytes)) => bytes,
                Ok(None) => {
                    debug!(resource = %key, "no traffic data, skipping");
                    continue;
                }
                Err(e) => {
                    warn!(resource = %key, "traffic query failed: {:#}", e);
                    self.count(names::TRAFFIC_QUERY_ERRORS);
                    continue;
                }
            };

            if bytes >= self.config.threshold {
                if let IdleState::Idled { .. } = record.state {
                    info!(resource = %key, bytes, threshold = self.config.threshold, "resource is active again");
                    self.set_state(&key, IdleState::Active);
                }
                continue;
            }
            if let IdleState::Idled { .. } = record.state {
                continue;
            }

            if self.config.dry_run {
                info!(
                    resource = %key,
                    bytes,
                    threshold = self.config.threshold,
                    "dry run: would idle resource"
                );
                self.count(names::IDLE_DECISIONS_DRY_RUN);
                self.set_state(&key, IdleState::Idled { at: now, dry_run: true });
                continue;
            }

            info!(
                resource = %key,
                bytes,
                threshold = self.config.threshold,
                "idling resource"
            );
            match self.idle(controller, now).await {
                Ok(()) => {
                    self.count(names::IDLE_DECISIONS);
                    self.set_state(&key, IdleState::Idled { at: now, dry_run: false });
                }
                Err(e) => {
                    warn!(resource = %key, "failed to idle: {:#}", e);
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            anyhow::bail!("{} resource(s) in project {} could not be idled", failed, name);
        }
        Ok(())
    }

    /// Reconcile the stored record with what the cache shows and return it.
    /// A controller idled by us and seen running again was woken externally.
    fn observe(
        &self,
        controller: &ScalableController,
        taken_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> IdleRecord {
        let mut records = self.records();
        let record = records.entry(controller.key()).or_insert_with(|| {
            if controller.is_idled() && controller.replicas == 0 {
                IdleRecord {
                    state: IdleState::Idled { at: now, dry_run: false },
                    unidled_at: None,
                }
            } else {
                IdleRecord::default()
            }
        });
        if let IdleState::Idled { at, dry_run: false } = record.state
            && controller.replicas > 0
            && taken_at > at
        {
            info!(resource = %controller.key(), "resource was unidled externally");
            record.state = IdleState::Active;
            record.unidled_at = Some(now);
        }
        *record
    }

    fn set_state(&self, key: &str, state: IdleState) {
        self.records().entry(key.to_string()).or_default().state = state;
    }

    fn within_query_window(&self, since: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        TimeDelta::from_std(self.config.idle_query_period)
            .map(|window| now - since < window)
            .unwrap_or(true)
    }

    /// Mark the controller idled, then scale it to zero so the platform's
    /// traffic-triggered unidler can restore it.
    async fn idle(&self, controller: &ScalableController, now: DateTime<Utc>) -> anyhow::Result<()> {
        let patch = AnnotationPatch::from([
            (IDLED_AT.to_string(), Some(now.to_rfc3339())),
            (
                PREVIOUS_SCALE.to_string(),
                Some(controller.replicas.to_string()),
            ),
        ]);
        self.client
            .annotate_controller(
                &controller.namespace,
                controller.kind,
                &controller.name,
                &patch,
            )
            .await
            .with_context(|| format!("annotating {}", controller.key()))?;
        self.client
            .scale(&controller.namespace, controller.kind, &controller.name, 0)
            .await
            .with_context(|| format!("scaling {} to zero", controller.key()))?;
        Ok(())
    }

    fn count(&self, name: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.counter_inc(name);
        }
    }
}
