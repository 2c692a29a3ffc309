//! Cluster API boundary.
//!
//! Everything hibernate reads from or writes to the orchestration platform
//! goes through [`ClusterApi`]. Calls are keyed by project (namespace) name
//! and resource name.

pub mod error;
pub mod http;
pub mod memory;

use async_trait::async_trait;
use pkg_types::build::Build;
use pkg_types::controller::ScalableController;
use pkg_types::kind::ResourceKind;
use pkg_types::namespace::Project;
use pkg_types::pod::Pod;
use pkg_types::quota::ResourceQuota;
use std::collections::{BTreeMap, HashSet};

pub use error::ApiError;

/// Annotation changes: `Some` sets a value, `None` removes the key.
pub type AnnotationPatch = BTreeMap<String, Option<String>>;

#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Kinds the cluster currently serves. Pods and quotas are always assumed.
    async fn served_kinds(&self) -> Result<HashSet<ResourceKind>, ApiError>;

    async fn list_projects(&self) -> Result<Vec<Project>, ApiError>;

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, ApiError>;

    /// List deployments or replication controllers.
    async fn list_controllers(
        &self,
        namespace: &str,
        kind: ResourceKind,
    ) -> Result<Vec<ScalableController>, ApiError>;

    async fn list_builds(&self, namespace: &str) -> Result<Vec<Build>, ApiError>;

    async fn list_quotas(&self, namespace: &str) -> Result<Vec<ResourceQuota>, ApiError>;

    /// Set the desired replica count of a scalable controller.
    async fn scale(
        &self,
        namespace: &str,
        kind: ResourceKind,
        name: &str,
        replicas: u32,
    ) -> Result<(), ApiError>;

    /// Create or replace a quota object.
    async fn apply_quota(&self, quota: &ResourceQuota) -> Result<(), ApiError>;

    async fn delete_quota(&self, namespace: &str, name: &str) -> Result<(), ApiError>;

    async fn annotate_project(
        &self,
        namespace: &str,
        patch: &AnnotationPatch,
    ) -> Result<(), ApiError>;

    async fn annotate_controller(
        &self,
        namespace: &str,
        kind: ResourceKind,
        name: &str,
        patch: &AnnotationPatch,
    ) -> Result<(), ApiError>;

    async fn cancel_build(&self, namespace: &str, name: &str) -> Result<(), ApiError>;

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ApiError>;
}
