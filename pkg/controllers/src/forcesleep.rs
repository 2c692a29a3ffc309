//! Force-sleep controller.
//!
//! Accounts memory-weighted quota-hours per project over a rolling period
//! and suspends projects that exceed their budget for a fixed duration.

use anyhow::Context;
use chrono::{DateTime, TimeDelta, Utc};
use pkg_cache::{ResourceCache, ResourceSnapshot};
use pkg_cluster::{AnnotationPatch, ApiError, ClusterApi};
use pkg_constants::annotations::{
    FORCE_SLEEP_QUOTA_NAME, FORCE_SLEEP_UNTIL, LAST_SLEEP_TIME, PREVIOUS_SCALE,
};
use pkg_constants::metrics as names;
use pkg_metrics::MetricsRegistry;
use pkg_types::quantity::Quantity;
use pkg_types::quota::{QuotaScope, ResourceQuota};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::quota_window::QuotaWindow;
use crate::workqueue::run_workers;

#[derive(Debug, Clone)]
pub struct SleeperConfig {
    /// Quota-hours a project may consume per `period`, as a duration
    pub quota: Duration,
    pub period: Duration,
    pub sleep_sync_period: Duration,
    pub sync_workers: usize,
    /// How long a project stays asleep once it exceeds its quota
    pub project_sleep_period: Duration,
    /// Memory entitlement of terminating pods when the project sets none
    pub term_quota: Quantity,
    /// Memory entitlement of long-running pods when the project sets none
    pub nonterm_quota: Quantity,
    pub dry_run: bool,
}

impl SleeperConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.quota.is_zero() {
            anyhow::bail!("sleeper quota must be positive");
        }
        if self.period.is_zero() {
            anyhow::bail!("sleeper period must be positive");
        }
        if self.sleep_sync_period.is_zero() {
            anyhow::bail!("sleep sync period must be positive");
        }
        if self.project_sleep_period.is_zero() {
            anyhow::bail!("project sleep period must be positive");
        }
        if self.sync_workers == 0 {
            anyhow::bail!("sleeper needs at least one sync worker");
        }
        if self.term_quota.is_zero() || self.nonterm_quota.is_zero() {
            anyhow::bail!("terminating and non-terminating memory quotas must be non-zero");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepState {
    Awake,
    ForceSleep { wake_at: DateTime<Utc> },
}

impl SleepState {
    pub fn is_asleep(&self) -> bool {
        matches!(self, SleepState::ForceSleep { .. })
    }
}

/// Read-only view of force-sleep state for other controllers.
pub trait SleepStateQuery: Send + Sync {
    fn sleep_state(&self, project: &str) -> SleepState;

    /// True when the project is asleep and its workloads were actually
    /// scaled down. Dry-run sleeps are not enforced.
    fn is_enforced_sleep(&self, project: &str) -> bool;

    /// When the project last woke from an enforced force-sleep.
    fn last_wake(&self, project: &str) -> Option<DateTime<Utc>>;
}

struct ProjectAccount {
    window: QuotaWindow,
    state: SleepState,
    /// The current sleep was applied to the cluster
    enforced: bool,
    last_sample_at: Option<DateTime<Utc>>,
    last_wake: Option<DateTime<Utc>>,
}

enum Decision {
    Hold,
    Sleep {
        wake_at: DateTime<Utc>,
        consumed_hours: f64,
    },
    Wake,
}

pub struct Sleeper {
    config: SleeperConfig,
    cache: Arc<ResourceCache>,
    client: Arc<dyn ClusterApi>,
    accounts: Mutex<HashMap<String, ProjectAccount>>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl Sleeper {
    pub fn new(
        config: SleeperConfig,
        cache: Arc<ResourceCache>,
        client: Arc<dyn ClusterApi>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            cache,
            client,
            accounts: Mutex::new(HashMap::new()),
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn accounts(&self) -> MutexGuard<'_, HashMap<String, ProjectAccount>> {
        self.accounts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn start(self: Arc<Self>, mut stop: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "Sleeper started (interval={}s, quota={}h, period={}h, dry_run={})",
                self.config.sleep_sync_period.as_secs(),
                self.config.quota.as_secs_f64() / 3600.0,
                self.config.period.as_secs_f64() / 3600.0,
                self.config.dry_run
            );
            let mut interval = tokio::time::interval(self.config.sleep_sync_period);
            loop {
                if *stop.borrow() {
                    break;
                }
                tokio::select! {
                    _ = interval.tick() => {
                        if !self.cache.has_synced() {
                            debug!("Sleeper waiting for first cache refresh");
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
            info!("Sleeper stopped");
        })
    }

    /// Sync every cached project once. Returns the number of projects whose
    /// sync failed.
    pub async fn sync_all(self: &Arc<Self>, now: DateTime<Utc>) -> usize {
        let started = Instant::now();
        let projects = self.cache.list_projects();

        let live: HashSet<&String> = projects.iter().collect();
        self.accounts().retain(|name, _| live.contains(name));

        let this = self.clone();
        let failures = run_workers("Sleeper", projects, self.config.sync_workers, move |name| {
            let this = this.clone();
            async move { this.sync_project(&name, now).await }
        })
        .await;

        if let Some(metrics) = &self.metrics {
            let sleeping = self
                .accounts()
                .values()
                .filter(|a| a.state.is_asleep())
                .count();
            metrics.gauge_set(names::SLEEPING_PROJECTS, sleeping as i64);
            metrics.counter_add(names::SLEEP_SYNC_ERRORS, failures as u64);
            metrics.observe(names::SLEEP_SYNC_SECONDS, started.elapsed());
        }
        failures
    }

    /// Account one project's usage and apply any sleep/wake transition.
    pub async fn sync_project(&self, name: &str, now: DateTime<Utc>) -> anyhow::Result<()> {
        let Some(snapshot) = self.cache.get_project(name) else {
            return Ok(());
        };
        if snapshot.project.is_excluded() {
            debug!(project = %name, "project excluded from force-sleep");
            return Ok(());
        }

        match self.decide(&snapshot, now) {
            Decision::Hold => Ok(()),
            Decision::Sleep {
                wake_at,
                consumed_hours,
            } => {
                let quota_hours = self.config.quota.as_secs_f64() / 3600.0;
                if self.config.dry_run {
                    info!(
                        project = %name,
                        consumption_hours = consumed_hours,
                        quota_hours,
                        %wake_at,
                        "dry run: would force-sleep project"
                    );
                    self.count(names::SLEEP_DECISIONS_DRY_RUN);
                } else {
                    info!(
                        project = %name,
                        consumption_hours = consumed_hours,
                        quota_hours,
                        %wake_at,
                        "force-sleeping project"
                    );
                    self.put_to_sleep(&snapshot, wake_at, now).await?;
                    self.count(names::SLEEP_DECISIONS);
                }
                if let Some(account) = self.accounts().get_mut(name) {
                    account.state = SleepState::ForceSleep { wake_at };
                    account.enforced = !self.config.dry_run;
                }
                Ok(())
            }
            Decision::Wake => {
                if self.config.dry_run {
                    info!(project = %name, "dry run: would wake project");
                    self.count(names::WAKE_DECISIONS_DRY_RUN);
                } else {
                    info!(project = %name, "waking project");
                    self.wake(name).await?;
                    self.count(names::WAKE_DECISIONS);
                }
                if let Some(account) = self.accounts().get_mut(name) {
                    if account.enforced {
                        account.last_wake = Some(now);
                    }
                    account.state = SleepState::Awake;
                    account.enforced = false;
                    account.window.clear();
                    account.last_sample_at = Some(now);
                }
                Ok(())
            }
        }
    }

    /// Update the project's window and pick its transition. Holds the state
    /// lock only for the bookkeeping, never across cluster calls.
    fn decide(&self, snapshot: &ResourceSnapshot, now: DateTime<Utc>) -> Decision {
        let mut accounts = self.accounts();
        let account = accounts
            .entry(snapshot.name().to_string())
            .or_insert_with(|| {
                // A persisted annotation means a live run scaled the project down.
                let state = match snapshot.project.force_sleep_until() {
                    Some(wake_at) => {
                        info!(project = %snapshot.name(), %wake_at, "resuming force-sleep from annotation");
                        SleepState::ForceSleep { wake_at }
                    }
                    None => SleepState::Awake,
                };
                ProjectAccount {
                    window: QuotaWindow::new(self.config.period),
                    state,
                    enforced: state.is_asleep(),
                    last_sample_at: None,
                    last_wake: None,
                }
            });

        if let SleepState::ForceSleep { wake_at } = account.state {
            account.last_sample_at = Some(now);
            account.window.evict(now);
            return if now >= wake_at {
                Decision::Wake
            } else {
                Decision::Hold
            };
        }

        self.record_usage(account, snapshot, now);
        account.last_sample_at = Some(now);
        account.window.evict(now);

        let consumed = account.window.total_seconds();
        let consumed_hours = consumed / 3600.0;
        debug!(
            project = %snapshot.name(),
            consumption_hours = consumed_hours,
            quota_hours = self.config.quota.as_secs_f64() / 3600.0,
            "quota usage"
        );
        if consumed > self.config.quota.as_secs_f64() {
            let wake_at = TimeDelta::from_std(self.config.project_sleep_period)
                .ok()
                .and_then(|d| now.checked_add_signed(d))
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            Decision::Sleep {
                wake_at,
                consumed_hours,
            }
        } else {
            Decision::Hold
        }
    }

    /// Credit each running pod from the later of its start and the previous
    /// sample. On the first sample the lookback is one full period.
    fn record_usage(&self, account: &mut ProjectAccount, snapshot: &ResourceSnapshot, now: DateTime<Utc>) {
        let since = account.last_sample_at.unwrap_or_else(|| {
            TimeDelta::from_std(self.config.period)
                .ok()
                .and_then(|p| now.checked_sub_signed(p))
                .unwrap_or(DateTime::<Utc>::MIN_UTC)
        });
        for pod in snapshot.running_pods() {
            let pod_start = pod.started_at.unwrap_or(pod.created_at);
            let start = pod_start.max(since);
            let (scope, fallback) = if pod.is_terminating() {
                (QuotaScope::Terminating, self.config.term_quota)
            } else {
                (QuotaScope::NotTerminating, self.config.nonterm_quota)
            };
            let entitlement = snapshot.memory_limit(scope).unwrap_or(fallback.bytes());
            if entitlement == 0 {
                continue;
            }
            let units = pod.memory_bytes() as f64 / entitlement as f64;
            account.window.record(start, now, units);
        }
    }

    async fn put_to_sleep(
        &self,
        snapshot: &ResourceSnapshot,
        wake_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let ns = snapshot.name();
        self.client
            .apply_quota(&ResourceQuota::force_sleep(ns))
            .await
            .with_context(|| format!("applying force-sleep quota to {}", ns))?;

        for controller in snapshot.controllers.iter().filter(|c| c.replicas > 0) {
            let patch = AnnotationPatch::from([(
                PREVIOUS_SCALE.to_string(),
                Some(controller.replicas.to_string()),
            )]);
            self.client
                .annotate_controller(ns, controller.kind, &controller.name, &patch)
                .await
                .with_context(|| format!("annotating {}", controller.key()))?;
            self.client
                .scale(ns, controller.kind, &controller.name, 0)
                .await
                .with_context(|| format!("scaling {} to zero", controller.key()))?;
        }

        for build in snapshot.in_flight_builds() {
            tolerate_missing(self.client.cancel_build(ns, &build.name).await)
                .with_context(|| format!("cancelling build {}/{}", ns, build.name))?;
        }

        for pod in snapshot.running_pods().filter(|p| p.is_standalone()) {
            tolerate_missing(self.client.delete_pod(ns, &pod.name).await)
                .with_context(|| format!("deleting pod {}/{}", ns, pod.name))?;
        }

        let patch = AnnotationPatch::from([
            (FORCE_SLEEP_UNTIL.to_string(), Some(wake_at.to_rfc3339())),
            (LAST_SLEEP_TIME.to_string(), Some(now.to_rfc3339())),
        ]);
        self.client
            .annotate_project(ns, &patch)
            .await
            .with_context(|| format!("annotating project {}", ns))?;
        Ok(())
    }

    /// Lift the force-sleep quota. Controllers are left at zero for their
    /// owners to scale back up.
    async fn wake(&self, ns: &str) -> anyhow::Result<()> {
        tolerate_missing(self.client.delete_quota(ns, FORCE_SLEEP_QUOTA_NAME).await)
            .with_context(|| format!("removing force-sleep quota from {}", ns))?;
        let patch = AnnotationPatch::from([(FORCE_SLEEP_UNTIL.to_string(), None)]);
        self.client
            .annotate_project(ns, &patch)
            .await
            .with_context(|| format!("annotating project {}", ns))?;
        Ok(())
    }

    fn count(&self, name: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.counter_inc(name);
        }
    }
}

fn tolerate_missing(result: Result<(), ApiError>) -> Result<(), ApiError> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

impl SleepStateQuery for Sleeper {
    fn sleep_state(&self, project: &str) -> SleepState {
        self.accounts()
            .get(project)
            .map(|a| a.state)
            .unwrap_or(SleepState::Awake)
    }

    fn is_enforced_sleep(&self, project: &str) -> bool {
        self.accounts()
            .get(project)
            .is_some_and(|a| a.enforced && a.state.is_asleep())
    }

    fn last_wake(&self, project: &str) -> Option<DateTime<Utc>> {
        self.accounts().get(project).and_then(|a| a.last_wake)
    }
}
