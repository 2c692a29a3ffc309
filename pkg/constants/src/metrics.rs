//! Names of the metrics exported on `/metrics`.

// ─── Cache ────────────────────────────────────────────────────────────────

pub const CACHE_PROJECTS: &str = "hibernate_cache_projects";
pub const CACHE_REFRESH_ERRORS: &str = "hibernate_cache_refresh_errors_total";
pub const CACHE_REFRESH_SECONDS: &str = "hibernate_cache_refresh_duration_seconds";

// ─── Force-sleep ──────────────────────────────────────────────────────────

pub const SLEEP_DECISIONS: &str = "hibernate_sleep_decisions_total";
pub const SLEEP_DECISIONS_DRY_RUN: &str = "hibernate_sleep_decisions_dry_run_total";
pub const WAKE_DECISIONS: &str = "hibernate_wake_decisions_total";
pub const WAKE_DECISIONS_DRY_RUN: &str = "hibernate_wake_decisions_dry_run_total";
pub const SLEEPING_PROJECTS: &str = "hibernate_sleeping_projects";
pub const SLEEP_SYNC_ERRORS: &str = "hibernate_sleep_sync_errors_total";
pub const SLEEP_SYNC_SECONDS: &str = "hibernate_sleep_sync_duration_seconds";

// ─── Idle ─────────────────────────────────────────────────────────────────

pub const IDLE_DECISIONS: &str = "hibernate_idle_decisions_total";
pub const IDLE_DECISIONS_DRY_RUN: &str = "hibernate_idle_decisions_dry_run_total";
pub const IDLED_RESOURCES: &str = "hibernate_idled_resources";
pub const IDLE_SYNC_ERRORS: &str = "hibernate_idle_sync_errors_total";
pub const TRAFFIC_QUERY_ERRORS: &str = "hibernate_traffic_query_errors_total";
pub const IDLE_SYNC_SECONDS: &str = "hibernate_idle_sync_duration_seconds";
