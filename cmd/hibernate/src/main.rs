mod settings;

use anyhow::Context;
use clap::Parser;
use pkg_cache::ResourceCache;
use pkg_cluster::ClusterApi;
use pkg_cluster::http::{HttpCluster, read_token_file};
use pkg_constants::defaults::{HTTP_TIMEOUT_SECS, TRAFFIC_METRIC};
use pkg_controllers::{Idler, Sleeper};
use pkg_metrics::MetricsRegistry;
use pkg_traffic::{PrometheusTraffic, TrafficSource};
use pkg_types::config::{HibernateConfigFile, load_config_file};
use settings::{Cli, Settings};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        fmt.json().init();
    } else {
        fmt.init();
    }
}

async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res?,
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    // Load config file (returns defaults if file not found)
    let file_cfg: HibernateConfigFile = load_config_file(&cli.config)
        .with_context(|| format!("loading config file {}", cli.config))?;
    info!("Config file: {}", cli.config);

    let settings = Settings::resolve(&cli, file_cfg)?;

    info!("Starting hibernate");
    info!("  API server:   {}", settings.api_server);
    info!("  Prometheus:   {}", settings.prometheus_url);
    info!(
        "  Force-sleep:  quota={} period={} sleep={} dry_run={}",
        humantime::format_duration(settings.sleeper.quota),
        humantime::format_duration(settings.sleeper.period),
        humantime::format_duration(settings.sleeper.project_sleep_period),
        settings.sleeper.dry_run
    );
    info!(
        "  Idling:       window={} threshold={}B dry_run={}",
        humantime::format_duration(settings.idler.idle_query_period),
        settings.idler.threshold,
        settings.idler.dry_run
    );
    info!(
        "  Quotas:       terminating={} nonterminating={}",
        settings.sleeper.term_quota, settings.sleeper.nonterm_quota
    );

    let timeout = Duration::from_secs(HTTP_TIMEOUT_SECS);
    // Prometheus sits behind the same auth proxy as the API server.
    let token = read_token_file(&settings.token_file)?;
    let client: Arc<dyn ClusterApi> = Arc::new(
        HttpCluster::new(&settings.api_server, token.clone(), timeout)
            .context("building cluster API client")?,
    );
    let traffic: Arc<dyn TrafficSource> = Arc::new(
        PrometheusTraffic::new(
            &settings.prometheus_url,
            TRAFFIC_METRIC,
            token,
            Some(&settings.prometheus_ca_file),
            timeout,
        )
        .context("building Prometheus client")?,
    );
    let metrics = Arc::new(MetricsRegistry::with_hibernate_metrics());

    let cache = Arc::new(
        ResourceCache::new(client.clone(), settings.cache.clone())?.with_metrics(metrics.clone()),
    );
    let sleeper = Arc::new(
        Sleeper::new(settings.sleeper.clone(), cache.clone(), client.clone())?
            .with_metrics(metrics.clone()),
    );
    let idler = Arc::new(
        Idler::new(
            settings.idler.clone(),
            cache.clone(),
            client,
            traffic,
            sleeper.clone(),
        )?
        .with_metrics(metrics.clone()),
    );

    let listener = TcpListener::bind(settings.metrics_bind_addr)
        .await
        .with_context(|| format!("binding metrics address {}", settings.metrics_bind_addr))?;

    let (stop_tx, stop_rx) = watch::channel(false);
    let metrics_server = tokio::spawn(pkg_metrics::server::serve_listener(
        listener,
        metrics,
        stop_rx.clone(),
    ));
    let loops = vec![
        cache.start(stop_rx.clone()),
        sleeper.start(stop_rx.clone()),
        idler.start(stop_rx),
    ];

    shutdown_signal().await?;
    info!("Shutting down");
    let _ = stop_tx.send(true);

    for handle in loops {
        if let Err(e) = handle.await {
            warn!("Controller loop ended abnormally: {}", e);
        }
    }
    match metrics_server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Metrics server error: {:#}", e),
        Err(e) => warn!("Metrics server task failed: {}", e),
    }
    info!("hibernate stopped");
    Ok(())
}
