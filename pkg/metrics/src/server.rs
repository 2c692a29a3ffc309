use axum::Router;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::MetricsRegistry;

pub fn router(registry: Arc<MetricsRegistry>) -> Router {
    Router::new()
        .route("/metrics", get(render_metrics))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(registry)
}

async fn render_metrics(State(registry): State<Arc<MetricsRegistry>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        registry.render(),
    )
}

/// Serve `/metrics` and `/healthz` on `listener` until `stop` flips to true.
pub async fn serve_listener(
    listener: TcpListener,
    registry: Arc<MetricsRegistry>,
    mut stop: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    info!("Serving metrics on {}", listener.local_addr()?);
    axum::serve(listener, router(registry))
        .with_graceful_shutdown(async move {
            let _ = stop.wait_for(|stopped| *stopped).await;
        })
        .await?;
    info!("Metrics server stopped");
    Ok(())
}
