use anyhow::{Context, bail};
use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

use crate::{TrafficSource, TrafficTarget};

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryData {
    result_type: String,
    #[serde(default)]
    result: Vec<VectorSample>,
}

#[derive(Debug, Deserialize)]
struct VectorSample {
    #[serde(default)]
    #[allow(dead_code)]
    metric: HashMap<String, String>,
    /// `[unix_seconds, "value"]`
    value: (f64, String),
}

/// Reads received bytes from a Prometheus instant-query endpoint.
pub struct PrometheusTraffic {
    client: reqwest::Client,
    query_url: Url,
    metric: String,
    token: Option<String>,
}

impl PrometheusTraffic {
    /// `token` is sent as a bearer token. `ca_file` adds a PEM root for an
    /// in-cluster proxy; a missing file falls back to the system roots.
    pub fn new(
        base_url: &str,
        metric: &str,
        token: Option<String>,
        ca_file: Option<&str>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let query_url = Url::parse(&format!("{}/api/v1/query", base_url.trim_end_matches('/')))
            .with_context(|| format!("invalid Prometheus URL {:?}", base_url))?;

        let mut builder = reqwest::Client::builder().timeout(timeout);
        if let Some(path) = ca_file {
            match std::fs::read(path) {
                Ok(pem) => {
                    let cert = reqwest::Certificate::from_pem(&pem)
                        .with_context(|| format!("invalid CA bundle {}", path))?;
                    builder = builder.add_root_certificate(cert);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    info!("No CA bundle at {}, using system roots for Prometheus", path);
                }
                Err(e) => {
                    return Err(anyhow::anyhow!("Failed to read CA bundle {}: {}", path, e));
                }
            }
        }
        let client = builder.build()?;
        Ok(Self {
            client,
            query_url,
            metric: metric.to_string(),
            token,
        })
    }

    /// PromQL summing the increase of the traffic counter across exactly
    /// the target's pods.
    pub fn query_for(&self, target: &TrafficTarget, window: Duration) -> String {
        let pods: Vec<String> = target.pods.iter().map(|p| escape_regex(p)).collect();
        format!(
            "sum(increase({}{{namespace=\"{}\",pod=~\"{}\"}}[{}s]))",
            self.metric,
            escape_label(&target.namespace),
            escape_label(&format!("^({})$", pods.join("|"))),
            window.as_secs().max(1)
        )
    }
}

fn escape_label(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn escape_regex(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if "\\.+*?()|[]{}^$".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Decode an instant-query response into a byte count.
fn parse_query_response(body: &str) -> anyhow::Result<Option<u64>> {
    let resp: QueryResponse =
        serde_json::from_str(body).context("decoding Prometheus response")?;
    if resp.status != "success" {
        bail!(
            "Prometheus query failed: {}",
            resp.error.unwrap_or_else(|| resp.status.clone())
        );
    }
    let data = resp.data.context("Prometheus response has no data")?;
    if data.result_type != "vector" {
        bail!("unexpected Prometheus result type {:?}", data.result_type);
    }
    if data.result.is_empty() {
        return Ok(None);
    }

    let mut total = 0.0;
    for sample in &data.result {
        let value: f64 = sample
            .value
            .1
            .parse()
            .with_context(|| format!("invalid sample value {:?}", sample.value.1))?;
        if !value.is_finite() {
            return Ok(None);
        }
        total += value;
    }
    // Truncate so a fractional count just under a threshold stays under it.
    Ok(Some(total.max(0.0).floor() as u64))
}

#[async_trait]
impl TrafficSource for PrometheusTraffic {
    async fn received_bytes(
        &self,
        target: &TrafficTarget,
        window: Duration,
    ) -> anyhow::Result<Option<u64>> {
        if target.pods.is_empty() {
            return Ok(None);
        }
        let query = self.query_for(target, window);
        let url = Url::parse_with_params(self.query_url.as_str(), &[("query", query.as_str())])?;
        debug!(%target, %query, "querying traffic");

        let mut req = self.client.get(url);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() && status.as_u16() != 400 && status.as_u16() != 422 {
            bail!("Prometheus returned {}: {}", status, body);
        }
        parse_query_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::extract::Query;
    use axum::http::{HeaderMap, StatusCode, header};
    use axum::routing::get;

    fn source(base: &str, token: Option<&str>) -> PrometheusTraffic {
        PrometheusTraffic::new(
            base,
            "container_network_receive_bytes_total",
            token.map(String::from),
            None,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn target(name: &str, pods: &[&str]) -> TrafficTarget {
        TrafficTarget::new("demo", name, pods.iter().map(|p| p.to_string()).collect())
    }

    /// Pod names selected by an exact-match `pod=~"^(a|b)$"` matcher.
    fn selected_pods(query: &str) -> Vec<String> {
        let Some(start) = query.find("pod=~\"^(") else {
            return Vec::new();
        };
        let rest = &query[start + "pod=~\"^(".len()..];
        let end = rest.find(")$\"").unwrap_or(rest.len());
        rest[..end]
            .split('|')
            .map(|p| p.replace("\\\\", ""))
            .collect()
    }

    #[test]
    fn test_query_selects_exact_pod_names() {
        let prom = source("http://prometheus:9090/", None);
        let query = prom.query_for(
            &target("web", &["web-5d9f-abcde", "web-5d9f-fghij"]),
            Duration::from_secs(1800),
        );
        assert_eq!(
            query,
            "sum(increase(container_network_receive_bytes_total{namespace=\"demo\",pod=~\"^(web-5d9f-abcde|web-5d9f-fghij)$\"}[1800s]))"
        );
        assert!(!query.contains("web-api"));
        assert_eq!(prom.query_url.as_str(), "http://prometheus:9090/api/v1/query");
    }

    #[test]
    fn test_query_escapes_regex_metacharacters() {
        let prom = source("http://prometheus:9090", None);
        let query = prom.query_for(&target("web", &["web.v2-1"]), Duration::from_secs(60));
        assert!(query.contains("pod=~\"^(web\\\\.v2-1)$\""));
    }

    #[test]
    fn test_parse_vector_sums_samples() {
        let body = r#"{"status":"success","data":{"resultType":"vector","result":[
            {"metric":{"pod":"web-1"},"value":[1700000000.1,"3999.6"]},
            {"metric":{"pod":"web-2"},"value":[1700000000.1,"1000.4"]}]}}"#;
        assert_eq!(parse_query_response(body).unwrap(), Some(5000));
    }

    #[test]
    fn test_parse_fraction_below_threshold_stays_below() {
        let body = r#"{"status":"success","data":{"resultType":"vector","result":[
            {"metric":{},"value":[1700000000.1,"4999.6"]}]}}"#;
        let bytes = parse_query_response(body).unwrap().unwrap();
        assert_eq!(bytes, 4999);
        assert!(bytes < 5000);
    }

    #[test]
    fn test_parse_empty_vector_is_no_data() {
        let body = r#"{"status":"success","data":{"resultType":"vector","result":[]}}"#;
        assert_eq!(parse_query_response(body).unwrap(), None);
    }

    #[test]
    fn test_parse_error_status() {
        let body = r#"{"status":"error","errorType":"bad_data","error":"parse error"}"#;
        let err = parse_query_response(body).unwrap_err();
        assert!(err.to_string().contains("parse error"));
        assert!(parse_query_response("not json").is_err());
    }

    #[test]
    fn test_missing_ca_file_uses_system_roots() {
        let prom = PrometheusTraffic::new(
            "https://prometheus:9091",
            "m",
            None,
            Some("/nonexistent/service-ca.crt"),
            Duration::from_secs(5),
        );
        assert!(prom.is_ok());
    }

    #[tokio::test]
    async fn test_received_bytes_per_controller_over_http() {
        // Two controllers whose names share a prefix; only exact pods count.
        let app = Router::new().route(
            "/api/v1/query",
            get(
                |headers: HeaderMap, Query(params): Query<HashMap<String, String>>| async move {
                    let authorized = headers
                        .get(header::AUTHORIZATION)
                        .is_some_and(|v| v == "Bearer sa-token");
                    if !authorized {
                        return (StatusCode::UNAUTHORIZED, "forbidden".to_string());
                    }
                    let per_pod: HashMap<&str, u64> = HashMap::from([
                        ("web-5d9f-abcde", 100),
                        ("web-api-5f7c9-abcde", 90_000),
                    ]);
                    let query = params.get("query").cloned().unwrap_or_default();
                    let total: u64 = selected_pods(&query)
                        .iter()
                        .filter_map(|p| per_pod.get(p.as_str()))
                        .sum();
                    (
                        StatusCode::OK,
                        format!(
                            r#"{{"status":"success","data":{{"resultType":"vector","result":[{{"metric":{{}},"value":[1.0,"{}"]}}]}}}}"#,
                            total
                        ),
                    )
                },
            ),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let base = format!("http://{}", addr);
        let prom = source(&base, Some("sa-token"));
        let window = Duration::from_secs(1800);
        assert_eq!(
            prom.received_bytes(&target("web", &["web-5d9f-abcde"]), window)
                .await
                .unwrap(),
            Some(100)
        );
        assert_eq!(
            prom.received_bytes(&target("web-api", &["web-api-5f7c9-abcde"]), window)
                .await
                .unwrap(),
            Some(90_000)
        );
        assert_eq!(
            prom.received_bytes(&target("empty", &[]), window)
                .await
                .unwrap(),
            None
        );

        let anonymous = source(&base, None);
        assert!(
            anonymous
                .received_bytes(&target("web", &["web-5d9f-abcde"]), window)
                .await
                .is_err()
        );
    }
}
