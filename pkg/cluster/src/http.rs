use async_trait::async_trait;
use pkg_types::build::Build;
use pkg_types::controller::ScalableController;
use pkg_types::kind::ResourceKind;
use pkg_types::namespace::Project;
use pkg_types::pod::Pod;
use pkg_types::quota::ResourceQuota;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info};

use crate::{AnnotationPatch, ApiError, ClusterApi};

/// Read a bearer token, trimmed. A missing file yields `None`.
pub fn read_token_file(path: &str) -> anyhow::Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(t) => Ok(Some(t.trim().to_string())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("No token at {}, using unauthenticated requests", path);
            Ok(None)
        }
        Err(e) => Err(anyhow::anyhow!("Failed to read token file {}: {}", path, e)),
    }
}

#[derive(Serialize)]
struct ScaleRequest {
    replicas: u32,
}

/// Cluster API client speaking the control plane's REST interface.
pub struct HttpCluster {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpCluster {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn namespaced(&self, namespace: &str, rest: &str) -> String {
        format!("{}/api/v1/namespaces/{}/{}", self.base_url, namespace, rest)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let req = self.client.request(method, url);
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn execute(&self, req: RequestBuilder, what: &str) -> Result<Response, ApiError> {
        let resp = req.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        if status == StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound(what.to_string()));
        }
        Err(ApiError::Status {
            code: status.as_u16(),
            body,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, what: &str) -> Result<T, ApiError> {
        let resp = self.execute(self.request(Method::GET, url), what).await?;
        resp.json::<T>()
            .await
            .map_err(|e| ApiError::Decode(format!("{}: {}", what, e)))
    }

    /// List an optional kind; a 404 means the cluster does not serve it.
    async fn list_optional<T: DeserializeOwned>(
        &self,
        namespace: &str,
        kind: ResourceKind,
    ) -> Result<Vec<T>, ApiError> {
        let url = self.namespaced(namespace, kind.plural());
        match self.get_json(&url, &url).await {
            Err(ApiError::NotFound(_)) => Err(ApiError::KindUnavailable(kind)),
            other => other,
        }
    }

    async fn send_json<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: &str,
        body: &B,
    ) -> Result<(), ApiError> {
        debug!("{} {}", method, url);
        self.execute(self.request(method, url).json(body), url)
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl ClusterApi for HttpCluster {
    async fn served_kinds(&self) -> Result<HashSet<ResourceKind>, ApiError> {
        let url = format!("{}/api/v1/resources", self.base_url);
        let plurals: Vec<String> = self.get_json(&url, "resource discovery").await?;
        let mut kinds: HashSet<ResourceKind> = plurals
            .iter()
            .filter_map(|p| ResourceKind::from_plural(p))
            .collect();
        kinds.insert(ResourceKind::Pod);
        kinds.insert(ResourceKind::ResourceQuota);
        Ok(kinds)
    }

    async fn list_projects(&self) -> Result<Vec<Project>, ApiError> {
        let url = format!("{}/api/v1/namespaces", self.base_url);
        self.get_json(&url, "namespaces").await
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, ApiError> {
        let url = self.namespaced(namespace, "pods");
        self.get_json(&url, &url).await
    }

    async fn list_controllers(
        &self,
        namespace: &str,
        kind: ResourceKind,
    ) -> Result<Vec<ScalableController>, ApiError> {
        let mut controllers: Vec<ScalableController> =
            self.list_optional(namespace, kind).await?;
        // The payload may omit the kind; the path already fixed it.
        for c in &mut controllers {
            c.kind = kind;
        }
        Ok(controllers)
    }

    async fn list_builds(&self, namespace: &str) -> Result<Vec<Build>, ApiError> {
        self.list_optional(namespace, ResourceKind::Build).await
    }

    async fn list_quotas(&self, namespace: &str) -> Result<Vec<ResourceQuota>, ApiError> {
        let url = self.namespaced(namespace, "resourcequotas");
        self.get_json(&url, &url).await
    }

    async fn scale(
        &self,
        namespace: &str,
        kind: ResourceKind,
        name: &str,
        replicas: u32,
    ) -> Result<(), ApiError> {
        let url = self.namespaced(namespace, &format!("{}/{}/scale", kind.plural(), name));
        self.send_json(Method::PUT, &url, &ScaleRequest { replicas })
            .await
    }

    async fn apply_quota(&self, quota: &ResourceQuota) -> Result<(), ApiError> {
        let url = self.namespaced(&quota.namespace, &format!("resourcequotas/{}", quota.name));
        self.send_json(Method::PUT, &url, quota).await
    }

    async fn delete_quota(&self, namespace: &str, name: &str) -> Result<(), ApiError> {
        let url = self.namespaced(namespace, &format!("resourcequotas/{}", name));
        self.execute(self.request(Method::DELETE, &url), &url)
            .await
            .map(|_| ())
    }

    async fn annotate_project(
        &self,
        namespace: &str,
        patch: &AnnotationPatch,
    ) -> Result<(), ApiError> {
        let url = self.namespaced(namespace, "annotations");
        self.send_json(Method::PATCH, &url, patch).await
    }

    async fn annotate_controller(
        &self,
        namespace: &str,
        kind: ResourceKind,
        name: &str,
        patch: &AnnotationPatch,
    ) -> Result<(), ApiError> {
        let url = self.namespaced(
            namespace,
            &format!("{}/{}/annotations", kind.plural(), name),
        );
        self.send_json(Method::PATCH, &url, patch).await
    }

    async fn cancel_build(&self, namespace: &str, name: &str) -> Result<(), ApiError> {
        let url = self.namespaced(namespace, &format!("builds/{}/cancel", name));
        self.execute(self.request(Method::POST, &url), &url)
            .await
            .map(|_| ())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ApiError> {
        let url = self.namespaced(namespace, &format!("pods/{}", name));
        self.execute(self.request(Method::DELETE, &url), &url)
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, State};
    use axum::http::HeaderMap;
    use axum::routing::{get, put};
    use axum::{Json, Router};
    use chrono::Utc;
    use pkg_types::pod::{PodPhase, ResourceRequirements};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    type Seen = Arc<Mutex<Vec<(String, u32, Option<String>)>>>;

    fn sample_pod() -> Pod {
        Pod {
            name: "web-1".to_string(),
            namespace: "demo".to_string(),
            phase: PodPhase::Running,
            resources: ResourceRequirements {
                memory_request_bytes: 1024,
                memory_limit_bytes: 2048,
            },
            active_deadline_seconds: None,
            owner: None,
            labels: HashMap::new(),
            started_at: Some(Utc::now()),
            created_at: Utc::now(),
        }
    }

    async fn serve(seen: Seen) -> String {
        let app = Router::new()
            .route("/api/v1/resources", get(|| async { Json(vec!["pods", "deployments", "statefulsets"]) }))
            .route(
                "/api/v1/namespaces/demo/pods",
                get(|| async { Json(vec![sample_pod()]) }),
            )
            .route(
                "/api/v1/namespaces/demo/deployments/{name}/scale",
                put(
                    |State(seen): State<Seen>,
                     Path(name): Path<String>,
                     headers: HeaderMap,
                     Json(body): Json<serde_json::Value>| async move {
                        let replicas = body["replicas"].as_u64().unwrap_or(999) as u32;
                        let auth = headers
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string);
                        seen.lock().unwrap().push((name, replicas, auth));
                        Json(serde_json::json!({}))
                    },
                ),
            )
            .with_state(seen);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_lists_pods_and_discovers_kinds() {
        let base = serve(Arc::new(Mutex::new(Vec::new()))).await;
        let cluster = HttpCluster::new(&base, None, Duration::from_secs(5)).unwrap();

        let pods = cluster.list_pods("demo").await.unwrap();
        assert_eq!(pods.len(), 1);
        assert_eq!(pods[0].memory_bytes(), 1024);

        let kinds = cluster.served_kinds().await.unwrap();
        assert!(kinds.contains(&ResourceKind::Deployment));
        assert!(kinds.contains(&ResourceKind::Pod));
        assert!(kinds.contains(&ResourceKind::ResourceQuota));
        assert!(!kinds.contains(&ResourceKind::Build));
    }

    #[tokio::test]
    async fn test_scale_sends_replicas_with_token() {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let base = serve(seen.clone()).await;
        let cluster =
            HttpCluster::new(&base, Some("secret".to_string()), Duration::from_secs(5)).unwrap();

        cluster
            .scale("demo", ResourceKind::Deployment, "web", 0)
            .await
            .unwrap();

        let calls = seen.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![("web".to_string(), 0, Some("Bearer secret".to_string()))]
        );
    }

    #[tokio::test]
    async fn test_missing_optional_kind_is_unavailable() {
        let base = serve(Arc::new(Mutex::new(Vec::new()))).await;
        let cluster = HttpCluster::new(&base, None, Duration::from_secs(5)).unwrap();

        let err = cluster.list_builds("demo").await.unwrap_err();
        assert!(err.is_kind_unavailable());

        let err = cluster.list_quotas("demo").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_read_token_file_trims_and_tolerates_missing() {
        let path = std::env::temp_dir().join(format!("hibernate-token-{}", std::process::id()));
        std::fs::write(&path, "sa-token\n").unwrap();
        let token = read_token_file(path.to_str().unwrap()).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(token.as_deref(), Some("sa-token"));

        assert_eq!(read_token_file("/nonexistent/hibernate/token").unwrap(), None);
    }
}
