//! Built-in defaults for every tunable the binary exposes.

/// Quota-hours a project may consume within one accounting period.
pub const QUOTA_HOURS: u64 = 16;

/// Length of the rolling accounting period, in hours.
pub const PERIOD_HOURS: u64 = 24;

/// Interval between force-sleep syncs, in minutes.
pub const SLEEP_SYNC_PERIOD_MINS: u64 = 60;

/// How long an over-quota project stays asleep, in hours.
pub const SLEEP_DURATION_HOURS: u64 = 8;

/// Interval between idle syncs, in minutes.
pub const IDLE_SYNC_PERIOD_MINS: u64 = 10;

/// Trailing window over which received bytes are summed, in minutes.
pub const IDLE_QUERY_PERIOD_MINS: u64 = 30;

/// Minimum bytes received within the query window to stay active.
pub const IDLE_THRESHOLD_BYTES: u64 = 5000;

/// Interval between cache refreshes, in seconds.
pub const CACHE_REFRESH_PERIOD_SECS: u64 = 60;

/// Size of each worker pool.
pub const SYNC_WORKERS: usize = 10;

/// Listen address for the metrics endpoint.
pub const METRICS_BIND_ADDR: &str = "0.0.0.0:8080";

/// Cluster API endpoint used when none is configured.
pub const API_SERVER: &str = "http://127.0.0.1:6443";

/// Prometheus endpoint that serves network-traffic samples.
pub const PROMETHEUS_URL: &str = "http://prometheus.monitoring.svc:9090";

/// Metric holding cumulative bytes received per container.
pub const TRAFFIC_METRIC: &str = "container_network_receive_bytes_total";

/// Timeout applied to every outbound HTTP request, in seconds.
pub const HTTP_TIMEOUT_SECS: u64 = 30;
