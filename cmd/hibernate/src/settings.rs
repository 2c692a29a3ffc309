use anyhow::Context;
use clap::Parser;
use pkg_cache::CacheConfig;
use pkg_constants::defaults;
use pkg_constants::paths::{DEFAULT_CONFIG, DEFAULT_SERVICE_CA_FILE, DEFAULT_TOKEN_FILE};
use pkg_controllers::{IdlerConfig, SleeperConfig};
use pkg_types::config::HibernateConfigFile;
use pkg_types::quantity::Quantity;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    name = "hibernate",
    about = "Force-sleeps projects over their quota and idles quiet services"
)]
pub struct Cli {
    /// Path to YAML config file
    #[arg(long, short, default_value = DEFAULT_CONFIG)]
    pub config: String,

    /// Quota-hours a project may use per period (e.g. 16h)
    #[arg(long, value_parser = humantime::parse_duration)]
    pub quota: Option<Duration>,

    /// Rolling accounting period (e.g. 24h)
    #[arg(long, value_parser = humantime::parse_duration)]
    pub period: Option<Duration>,

    #[arg(long, value_parser = humantime::parse_duration)]
    pub sleep_sync_period: Option<Duration>,

    /// How long an over-quota project is kept asleep
    #[arg(long, short = 'z', value_parser = humantime::parse_duration)]
    pub sleep_duration: Option<Duration>,

    /// Log force-sleep decisions without acting on them
    #[arg(long)]
    pub sleep_dry_run: Option<bool>,

    /// Sync workers per controller
    #[arg(long, short = 'w')]
    pub workers: Option<usize>,

    /// Memory entitlement of terminating pods (e.g. 1Gi)
    #[arg(long)]
    pub terminating: Option<String>,

    /// Memory entitlement of long-running pods (e.g. 1Gi)
    #[arg(long)]
    pub nonterminating: Option<String>,

    #[arg(long, value_parser = humantime::parse_duration)]
    pub idle_sync_period: Option<Duration>,

    /// Traffic window checked by the idler (e.g. 30m)
    #[arg(long, value_parser = humantime::parse_duration)]
    pub idle_query_period: Option<Duration>,

    /// Bytes received below which a service is idled
    #[arg(long)]
    pub idle_threshold: Option<u64>,

    /// Log idle decisions without acting on them
    #[arg(long)]
    pub idle_dry_run: Option<bool>,

    #[arg(long, value_parser = humantime::parse_duration)]
    pub cache_refresh_period: Option<Duration>,

    /// Address for the /metrics endpoint (`host:port` or `:port`)
    #[arg(long)]
    pub metrics_bind_addr: Option<String>,

    #[arg(long)]
    pub prometheus_url: Option<String>,

    /// Cluster API server URL
    #[arg(long)]
    pub api_server: Option<String>,

    /// Bearer token file for the cluster API, also sent to Prometheus
    #[arg(long)]
    pub token_file: Option<String>,

    /// PEM CA bundle trusted for the Prometheus endpoint
    #[arg(long)]
    pub prometheus_ca_file: Option<String>,

    /// Emit logs as JSON
    #[arg(long, default_value_t = false)]
    pub log_json: bool,
}

/// Fully resolved, validated process configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub cache: CacheConfig,
    pub sleeper: SleeperConfig,
    pub idler: IdlerConfig,
    pub metrics_bind_addr: SocketAddr,
    pub prometheus_url: String,
    pub api_server: String,
    pub token_file: String,
    pub prometheus_ca_file: String,
}

fn hours(h: u64) -> Duration {
    Duration::from_secs(h * 3600)
}

fn mins(m: u64) -> Duration {
    Duration::from_secs(m * 60)
}

/// Parse `host:port`, or `:port` meaning every interface.
fn bind_addr(raw: &str) -> anyhow::Result<SocketAddr> {
    let full = if raw.starts_with(':') {
        format!("0.0.0.0{}", raw)
    } else {
        raw.to_string()
    };
    full.parse()
        .with_context(|| format!("invalid metrics bind address {:?}", raw))
}

fn quantity(flag: &str, cli: Option<&str>, file: Option<Quantity>) -> anyhow::Result<Quantity> {
    let quantity = match cli {
        Some(raw) => raw
            .parse::<Quantity>()
            .with_context(|| format!("invalid --{} quantity {:?}", flag, raw))?,
        None => file.with_context(|| format!("--{} is required", flag))?,
    };
    if quantity.is_zero() {
        anyhow::bail!("--{} must be greater than zero", flag);
    }
    Ok(quantity)
}

impl Settings {
    /// Merge: CLI args > config file > defaults, then validate.
    pub fn resolve(cli: &Cli, file: HibernateConfigFile) -> anyhow::Result<Self> {
        let workers = cli
            .workers
            .or(file.workers)
            .unwrap_or(defaults::SYNC_WORKERS);

        let sleeper = SleeperConfig {
            quota: cli.quota.or(file.quota).unwrap_or(hours(defaults::QUOTA_HOURS)),
            period: cli
                .period
                .or(file.period)
                .unwrap_or(hours(defaults::PERIOD_HOURS)),
            sleep_sync_period: cli
                .sleep_sync_period
                .or(file.sleep_sync_period)
                .unwrap_or(mins(defaults::SLEEP_SYNC_PERIOD_MINS)),
            sync_workers: workers,
            project_sleep_period: cli
                .sleep_duration
                .or(file.sleep_duration)
                .unwrap_or(hours(defaults::SLEEP_DURATION_HOURS)),
            term_quota: quantity("terminating", cli.terminating.as_deref(), file.terminating)?,
            nonterm_quota: quantity(
                "nonterminating",
                cli.nonterminating.as_deref(),
                file.nonterminating,
            )?,
            dry_run: cli.sleep_dry_run.or(file.sleep_dry_run).unwrap_or(true),
        };
        sleeper.validate()?;

        let idler = IdlerConfig {
            idle_sync_period: cli
                .idle_sync_period
                .or(file.idle_sync_period)
                .unwrap_or(mins(defaults::IDLE_SYNC_PERIOD_MINS)),
            idle_query_period: cli
                .idle_query_period
                .or(file.idle_query_period)
                .unwrap_or(mins(defaults::IDLE_QUERY_PERIOD_MINS)),
            sync_workers: workers,
            threshold: cli
                .idle_threshold
                .or(file.idle_threshold)
                .unwrap_or(defaults::IDLE_THRESHOLD_BYTES),
            dry_run: cli.idle_dry_run.or(file.idle_dry_run).unwrap_or(true),
        };
        idler.validate()?;

        let cache = CacheConfig {
            refresh_period: cli
                .cache_refresh_period
                .or(file.cache_refresh_period)
                .unwrap_or(Duration::from_secs(defaults::CACHE_REFRESH_PERIOD_SECS)),
            concurrency: workers,
        };
        cache.validate()?;

        let bind = cli
            .metrics_bind_addr
            .clone()
            .or(file.metrics_bind_addr)
            .unwrap_or_else(|| defaults::METRICS_BIND_ADDR.to_string());
        let metrics_bind_addr = bind_addr(&bind)?;

        Ok(Self {
            cache,
            sleeper,
            idler,
            metrics_bind_addr,
            prometheus_url: cli
                .prometheus_url
                .clone()
                .or(file.prometheus_url)
                .unwrap_or_else(|| defaults::PROMETHEUS_URL.to_string()),
            api_server: cli
                .api_server
                .clone()
                .or(file.api_server)
                .unwrap_or_else(|| defaults::API_SERVER.to_string()),
            token_file: cli
                .token_file
                .clone()
                .or(file.token_file)
                .unwrap_or_else(|| DEFAULT_TOKEN_FILE.to_string()),
            prometheus_ca_file: cli
                .prometheus_ca_file
                .clone()
                .or(file.prometheus_ca_file)
                .unwrap_or_else(|| DEFAULT_SERVICE_CA_FILE.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["hibernate"];
        argv.extend_from_slice(args);
        Cli::parse_from(argv)
    }

    #[test]
    fn test_defaults_with_required_quantities() {
        let settings = Settings::resolve(
            &cli(&["--terminating", "1Gi", "--nonterminating", "512Mi"]),
            HibernateConfigFile::default(),
        )
        .unwrap();
        assert_eq!(settings.sleeper.quota, hours(16));
        assert_eq!(settings.sleeper.period, hours(24));
        assert_eq!(settings.sleeper.project_sleep_period, hours(8));
        assert!(settings.sleeper.dry_run);
        assert!(settings.idler.dry_run);
        assert_eq!(settings.idler.threshold, 5000);
        assert_eq!(settings.idler.idle_query_period, mins(30));
        assert_eq!(settings.sleeper.term_quota.bytes(), 1 << 30);
        assert_eq!(settings.sleeper.nonterm_quota.bytes(), 512 << 20);
        assert_eq!(settings.metrics_bind_addr.port(), 8080);
    }

    #[test]
    fn test_cli_overrides_file() {
        let file = HibernateConfigFile {
            quota: Some(hours(4)),
            period: Some(hours(12)),
            workers: Some(3),
            terminating: Some(Quantity::from_bytes(1 << 30)),
            nonterminating: Some(Quantity::from_bytes(1 << 30)),
            sleep_dry_run: Some(false),
            ..Default::default()
        };
        let settings = Settings::resolve(
            &cli(&["--quota", "2h", "--idle-threshold", "100", "--nonterminating", "2Gi"]),
            file,
        )
        .unwrap();
        assert_eq!(settings.sleeper.quota, hours(2));
        assert_eq!(settings.sleeper.period, hours(12));
        assert_eq!(settings.sleeper.sync_workers, 3);
        assert_eq!(settings.cache.concurrency, 3);
        assert!(!settings.sleeper.dry_run);
        assert_eq!(settings.idler.threshold, 100);
        assert_eq!(settings.sleeper.nonterm_quota.bytes(), 2 << 30);
    }

    #[test]
    fn test_invalid_or_missing_quantity_is_fatal() {
        let err = Settings::resolve(
            &cli(&["--terminating", "lots", "--nonterminating", "1Gi"]),
            HibernateConfigFile::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("terminating"));

        assert!(
            Settings::resolve(&cli(&["--terminating", "1Gi"]), HibernateConfigFile::default())
                .is_err()
        );
        assert!(
            Settings::resolve(
                &cli(&["--terminating", "0", "--nonterminating", "1Gi"]),
                HibernateConfigFile::default()
            )
            .is_err()
        );
    }

    #[test]
    fn test_invalid_bind_address() {
        assert!(
            Settings::resolve(
                &cli(&[
                    "--terminating",
                    "1Gi",
                    "--nonterminating",
                    "1Gi",
                    "--metrics-bind-addr",
                    "not-an-address"
                ]),
                HibernateConfigFile::default()
            )
            .is_err()
        );
    }

    #[test]
    fn test_short_flags_and_port_only_bind() {
        let settings = Settings::resolve(
            &cli(&[
                "-z",
                "2h",
                "-w",
                "3",
                "--terminating",
                "1Gi",
                "--nonterminating",
                "1Gi",
                "--metrics-bind-addr",
                ":9090",
            ]),
            HibernateConfigFile::default(),
        )
        .unwrap();
        assert_eq!(settings.sleeper.project_sleep_period, hours(2));
        assert_eq!(settings.sleeper.sync_workers, 3);
        assert_eq!(settings.idler.sync_workers, 3);
        assert_eq!(settings.metrics_bind_addr, "0.0.0.0:9090".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn test_prometheus_ca_file_default_and_override() {
        let required = ["--terminating", "1Gi", "--nonterminating", "1Gi"];
        let settings = Settings::resolve(&cli(&required), HibernateConfigFile::default()).unwrap();
        assert_eq!(settings.prometheus_ca_file, DEFAULT_SERVICE_CA_FILE);

        let file = HibernateConfigFile {
            prometheus_ca_file: Some("/etc/hibernate/ca.crt".to_string()),
            ..Default::default()
        };
        let settings = Settings::resolve(&cli(&required), file).unwrap();
        assert_eq!(settings.prometheus_ca_file, "/etc/hibernate/ca.crt");
    }
}
