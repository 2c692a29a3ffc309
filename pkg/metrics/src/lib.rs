pub mod server;

use pkg_constants::metrics as names;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard};
use std::time::Duration;

/// A lightweight, thread-safe metrics registry that renders in Prometheus text exposition format.
pub struct MetricsRegistry {
    counters: RwLock<BTreeMap<String, Counter>>,
    gauges: RwLock<BTreeMap<String, Gauge>>,
    summaries: RwLock<BTreeMap<String, Summary>>,
}

/// Monotonically increasing counter.
struct Counter {
    value: AtomicU64,
    help: String,
}

/// Value that can go up or down.
struct Gauge {
    value: AtomicI64,
    help: String,
}

/// Running sum and count of observed durations, in seconds.
struct Summary {
    /// f64 bits of the running sum
    sum_bits: AtomicU64,
    count: AtomicU64,
    help: String,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(BTreeMap::new()),
            gauges: RwLock::new(BTreeMap::new()),
            summaries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Registry with every metric hibernate exports already registered.
    pub fn with_hibernate_metrics() -> Self {
        let registry = Self::new();
        registry.register_gauge(names::CACHE_PROJECTS, "Projects held in the resource cache");
        registry.register_counter(
            names::CACHE_REFRESH_ERRORS,
            "Cache refreshes or per-project fetches that failed",
        );
        registry.register_summary(names::CACHE_REFRESH_SECONDS, "Duration of cache refresh passes");

        registry.register_counter(names::SLEEP_DECISIONS, "Projects put into force-sleep");
        registry.register_counter(
            names::SLEEP_DECISIONS_DRY_RUN,
            "Force-sleep decisions suppressed by dry-run",
        );
        registry.register_counter(names::WAKE_DECISIONS, "Projects woken from force-sleep");
        registry.register_counter(
            names::WAKE_DECISIONS_DRY_RUN,
            "Wake decisions suppressed by dry-run",
        );
        registry.register_gauge(names::SLEEPING_PROJECTS, "Projects currently in force-sleep");
        registry.register_counter(names::SLEEP_SYNC_ERRORS, "Per-project force-sleep syncs that failed");
        registry.register_summary(names::SLEEP_SYNC_SECONDS, "Duration of force-sleep sync passes");

        registry.register_counter(names::IDLE_DECISIONS, "Resources idled for low traffic");
        registry.register_counter(
            names::IDLE_DECISIONS_DRY_RUN,
            "Idle decisions suppressed by dry-run",
        );
        registry.register_gauge(names::IDLED_RESOURCES, "Resources currently marked idled");
        registry.register_counter(names::IDLE_SYNC_ERRORS, "Per-project idle syncs that failed");
        registry.register_counter(
            names::TRAFFIC_QUERY_ERRORS,
            "Traffic queries that failed and were skipped",
        );
        registry.register_summary(names::IDLE_SYNC_SECONDS, "Duration of idle sync passes");
        registry
    }

    /// Register a counter. If it already exists, this is a no-op.
    pub fn register_counter(&self, name: &str, help: &str) {
        let mut counters = self.counters.write().unwrap_or_else(PoisonError::into_inner);
        counters.entry(name.to_string()).or_insert_with(|| Counter {
            value: AtomicU64::new(0),
            help: help.to_string(),
        });
    }

    /// Register a gauge. If it already exists, this is a no-op.
    pub fn register_gauge(&self, name: &str, help: &str) {
        let mut gauges = self.gauges.write().unwrap_or_else(PoisonError::into_inner);
        gauges.entry(name.to_string()).or_insert_with(|| Gauge {
            value: AtomicI64::new(0),
            help: help.to_string(),
        });
    }

    pub fn register_summary(&self, name: &str, help: &str) {
        let mut summaries = self.summaries.write().unwrap_or_else(PoisonError::into_inner);
        summaries.entry(name.to_string()).or_insert_with(|| Summary {
            sum_bits: AtomicU64::new(0f64.to_bits()),
            count: AtomicU64::new(0),
            help: help.to_string(),
        });
    }

    pub fn counter_inc(&self, name: &str) {
        self.counter_add(name, 1);
    }

    pub fn counter_add(&self, name: &str, val: u64) {
        if let Some(c) = read(&self.counters).get(name) {
            c.value.fetch_add(val, Ordering::Relaxed);
        }
    }

    pub fn counter_get(&self, name: &str) -> Option<u64> {
        read(&self.counters)
            .get(name)
            .map(|c| c.value.load(Ordering::Relaxed))
    }

    pub fn gauge_set(&self, name: &str, val: i64) {
        if let Some(g) = read(&self.gauges).get(name) {
            g.value.store(val, Ordering::Relaxed);
        }
    }

    pub fn gauge_get(&self, name: &str) -> Option<i64> {
        read(&self.gauges)
            .get(name)
            .map(|g| g.value.load(Ordering::Relaxed))
    }

    /// Record one observation of `elapsed`.
    pub fn observe(&self, name: &str, elapsed: Duration) {
        if let Some(s) = read(&self.summaries).get(name) {
            let secs = elapsed.as_secs_f64();
            let _ = s
                .sum_bits
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                    Some((f64::from_bits(bits) + secs).to_bits())
                });
            s.count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Number of observations recorded for a summary.
    pub fn summary_count(&self, name: &str) -> Option<u64> {
        read(&self.summaries)
            .get(name)
            .map(|s| s.count.load(Ordering::Relaxed))
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut out = String::new();

        for (name, counter) in read(&self.counters).iter() {
            let _ = writeln!(out, "# HELP {} {}", name, counter.help);
            let _ = writeln!(out, "# TYPE {} counter", name);
            let _ = writeln!(out, "{} {}", name, counter.value.load(Ordering::Relaxed));
        }

        for (name, gauge) in read(&self.gauges).iter() {
            let _ = writeln!(out, "# HELP {} {}", name, gauge.help);
            let _ = writeln!(out, "# TYPE {} gauge", name);
            let _ = writeln!(out, "{} {}", name, gauge.value.load(Ordering::Relaxed));
        }

        for (name, summary) in read(&self.summaries).iter() {
            let sum = f64::from_bits(summary.sum_bits.load(Ordering::Relaxed));
            let _ = writeln!(out, "# HELP {} {}", name, summary.help);
            let _ = writeln!(out, "# TYPE {} summary", name);
            let _ = writeln!(out, "{}_sum {}", name, sum);
            let _ = writeln!(out, "{}_count {}", name, summary.count.load(Ordering::Relaxed));
        }

        out
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unregistered_names_are_ignored() {
        let registry = MetricsRegistry::new();
        registry.counter_inc("missing_total");
        registry.gauge_set("missing", 3);
        assert_eq!(registry.counter_get("missing_total"), None);
        assert!(registry.render().is_empty());
    }

    #[test]
    fn test_render_exposition_format() {
        let registry = MetricsRegistry::new();
        registry.register_counter("decisions_total", "Decisions made");
        registry.register_gauge("projects", "Projects cached");
        registry.register_summary("sync_duration_seconds", "Sync latency");

        registry.counter_add("decisions_total", 2);
        registry.gauge_set("projects", 7);
        registry.observe("sync_duration_seconds", Duration::from_millis(500));
        registry.observe("sync_duration_seconds", Duration::from_millis(1500));

        let text = registry.render();
        assert!(text.contains("# TYPE decisions_total counter\ndecisions_total 2\n"));
        assert!(text.contains("# TYPE projects gauge\nprojects 7\n"));
        assert!(text.contains("sync_duration_seconds_sum 2\n"));
        assert!(text.contains("sync_duration_seconds_count 2\n"));
    }

    #[test]
    fn test_hibernate_metrics_registered() {
        let registry = MetricsRegistry::with_hibernate_metrics();
        assert_eq!(registry.counter_get(names::SLEEP_DECISIONS), Some(0));
        assert_eq!(registry.gauge_get(names::CACHE_PROJECTS), Some(0));
        assert_eq!(registry.summary_count(names::IDLE_SYNC_SECONDS), Some(0));
    }
}
