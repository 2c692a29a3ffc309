use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::quantity::Quantity;

/// Hibernate configuration file (YAML).
///
/// Every field is optional; command-line flags take precedence and
/// built-in defaults fill whatever neither source sets.
///
/// Example `config.yaml`:
/// ```yaml
/// quota: 16h
/// period: 24h
/// sleep-duration: 8h
/// sleep-dry-run: false
/// terminating: 1Gi
/// nonterminating: 1Gi
/// idle-query-period: 30m
/// idle-threshold: 5000
/// prometheus-url: http://prometheus.monitoring.svc:9090
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HibernateConfigFile {
    #[serde(default, with = "humantime_serde")]
    pub quota: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    pub period: Option<Duration>,
    #[serde(default, alias = "sleep-sync-period", with = "humantime_serde")]
    pub sleep_sync_period: Option<Duration>,
    #[serde(default, alias = "sleep-duration", with = "humantime_serde")]
    pub sleep_duration: Option<Duration>,
    #[serde(default, alias = "sleep-dry-run")]
    pub sleep_dry_run: Option<bool>,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub terminating: Option<Quantity>,
    #[serde(default)]
    pub nonterminating: Option<Quantity>,
    #[serde(default, alias = "idle-sync-period", with = "humantime_serde")]
    pub idle_sync_period: Option<Duration>,
    #[serde(default, alias = "idle-query-period", with = "humantime_serde")]
    pub idle_query_period: Option<Duration>,
    #[serde(default, alias = "idle-threshold")]
    pub idle_threshold: Option<u64>,
    #[serde(default, alias = "idle-dry-run")]
    pub idle_dry_run: Option<bool>,
    #[serde(default, alias = "cache-refresh-period", with = "humantime_serde")]
    pub cache_refresh_period: Option<Duration>,
    #[serde(default, alias = "metrics-bind-addr")]
    pub metrics_bind_addr: Option<String>,
    #[serde(default, alias = "prometheus-url")]
    pub prometheus_url: Option<String>,
    #[serde(default, alias = "api-server")]
    pub api_server: Option<String>,
    #[serde(default, alias = "token-file")]
    pub token_file: Option<String>,
    #[serde(default, alias = "prometheus-ca-file")]
    pub prometheus_ca_file: Option<String>,
}

/// Load a YAML config file, returning the default if the file doesn't exist.
pub fn load_config_file<T: serde::de::DeserializeOwned + Default>(path: &str) -> anyhow::Result<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(T::default());
        }
        Err(e) => return Err(e.into()),
    };
    let config: T = serde_yaml::from_str(&content)?;
    Ok(config)
}
