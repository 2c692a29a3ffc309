//! In-memory cluster.
//!
//! Serves the [`ClusterApi`] from plain collections, applies writes to them,
//! and records every mutating call so callers can assert on exactly what
//! would have been sent to a real cluster. Reads and writes can be made to
//! fail per namespace.

use async_trait::async_trait;
use pkg_types::build::{Build, BuildPhase};
use pkg_types::controller::ScalableController;
use pkg_types::kind::ResourceKind;
use pkg_types::namespace::Project;
use pkg_types::pod::Pod;
use pkg_types::quota::ResourceQuota;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::{AnnotationPatch, ApiError, ClusterApi};

/// A write issued against the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Scale {
        namespace: String,
        kind: ResourceKind,
        name: String,
        replicas: u32,
    },
    ApplyQuota {
        namespace: String,
        name: String,
    },
    DeleteQuota {
        namespace: String,
        name: String,
    },
    AnnotateProject {
        namespace: String,
    },
    AnnotateController {
        namespace: String,
        kind: ResourceKind,
        name: String,
    },
    CancelBuild {
        namespace: String,
        name: String,
    },
    DeletePod {
        namespace: String,
        name: String,
    },
}

impl Mutation {
    pub fn namespace(&self) -> &str {
        match self {
            Mutation::Scale { namespace, .. }
            | Mutation::ApplyQuota { namespace, .. }
            | Mutation::DeleteQuota { namespace, .. }
            | Mutation::AnnotateProject { namespace }
            | Mutation::AnnotateController { namespace, .. }
            | Mutation::CancelBuild { namespace, .. }
            | Mutation::DeletePod { namespace, .. } => namespace,
        }
    }
}

#[derive(Default)]
struct Inner {
    projects: BTreeMap<String, Project>,
    pods: Vec<Pod>,
    controllers: Vec<ScalableController>,
    builds: Vec<Build>,
    quotas: Vec<ResourceQuota>,
    served: HashSet<ResourceKind>,
    discovery_down: bool,
    failing_reads: HashSet<String>,
    failing_writes: HashSet<String>,
    mutations: Vec<Mutation>,
}

pub struct MemoryCluster {
    inner: Mutex<Inner>,
}

fn unavailable(namespace: &str) -> ApiError {
    ApiError::Status {
        code: 503,
        body: format!("namespace {} is unavailable", namespace),
    }
}

fn apply_patch(target: &mut HashMap<String, String>, patch: &AnnotationPatch) {
    for (key, value) in patch {
        match value {
            Some(v) => {
                target.insert(key.clone(), v.clone());
            }
            None => {
                target.remove(key);
            }
        }
    }
}

impl MemoryCluster {
    /// An empty cluster serving every kind.
    pub fn new() -> Self {
        let served = [
            ResourceKind::Pod,
            ResourceKind::Deployment,
            ResourceKind::ReplicationController,
            ResourceKind::Build,
            ResourceKind::ResourceQuota,
        ]
        .into_iter()
        .collect();
        Self {
            inner: Mutex::new(Inner {
                served,
                ..Inner::default()
            }),
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_project(&self, project: Project) {
        self.inner().projects.insert(project.name.clone(), project);
    }

    pub fn remove_project(&self, name: &str) {
        let mut inner = self.inner();
        inner.projects.remove(name);
        inner.pods.retain(|p| p.namespace != name);
        inner.controllers.retain(|c| c.namespace != name);
        inner.builds.retain(|b| b.namespace != name);
        inner.quotas.retain(|q| q.namespace != name);
    }

    pub fn add_pod(&self, pod: Pod) {
        self.inner().pods.push(pod);
    }

    pub fn add_controller(&self, controller: ScalableController) {
        self.inner().controllers.push(controller);
    }

    pub fn add_build(&self, build: Build) {
        self.inner().builds.push(build);
    }

    pub fn add_quota(&self, quota: ResourceQuota) {
        self.inner().quotas.push(quota);
    }

    /// Restrict discovery to `kinds` (pods and quotas stay served).
    pub fn set_served(&self, kinds: &[ResourceKind]) {
        let mut served: HashSet<ResourceKind> = kinds.iter().copied().collect();
        served.insert(ResourceKind::Pod);
        served.insert(ResourceKind::ResourceQuota);
        self.inner().served = served;
    }

    pub fn set_discovery_down(&self, down: bool) {
        self.inner().discovery_down = down;
    }

    pub fn fail_reads(&self, namespace: &str, fail: bool) {
        let mut inner = self.inner();
        if fail {
            inner.failing_reads.insert(namespace.to_string());
        } else {
            inner.failing_reads.remove(namespace);
        }
    }

    pub fn fail_writes(&self, namespace: &str, fail: bool) {
        let mut inner = self.inner();
        if fail {
            inner.failing_writes.insert(namespace.to_string());
        } else {
            inner.failing_writes.remove(namespace);
        }
    }

    /// Every mutating call issued so far, failed ones included.
    pub fn mutations(&self) -> Vec<Mutation> {
        self.inner().mutations.clone()
    }

    pub fn mutations_for(&self, namespace: &str) -> Vec<Mutation> {
        self.inner()
            .mutations
            .iter()
            .filter(|m| m.namespace() == namespace)
            .cloned()
            .collect()
    }

    pub fn clear_mutations(&self) {
        self.inner().mutations.clear();
    }

    pub fn project(&self, name: &str) -> Option<Project> {
        self.inner().projects.get(name).cloned()
    }

    pub fn controller(&self, namespace: &str, name: &str) -> Option<ScalableController> {
        self.inner()
            .controllers
            .iter()
            .find(|c| c.namespace == namespace && c.name == name)
            .cloned()
    }

    pub fn quotas(&self, namespace: &str) -> Vec<ResourceQuota> {
        self.inner()
            .quotas
            .iter()
            .filter(|q| q.namespace == namespace)
            .cloned()
            .collect()
    }

    pub fn pods(&self, namespace: &str) -> Vec<Pod> {
        self.inner()
            .pods
            .iter()
            .filter(|p| p.namespace == namespace)
            .cloned()
            .collect()
    }

    pub fn builds(&self, namespace: &str) -> Vec<Build> {
        self.inner()
            .builds
            .iter()
            .filter(|b| b.namespace == namespace)
            .cloned()
            .collect()
    }

    fn check_read(inner: &Inner, namespace: &str) -> Result<(), ApiError> {
        if inner.failing_reads.contains(namespace) {
            return Err(unavailable(namespace));
        }
        if !inner.projects.contains_key(namespace) {
            return Err(ApiError::NotFound(format!("namespace {}", namespace)));
        }
        Ok(())
    }

    /// Record the call, then fail it if writes to the namespace are broken.
    fn begin_write(inner: &mut Inner, mutation: Mutation) -> Result<(), ApiError> {
        let namespace = mutation.namespace().to_string();
        inner.mutations.push(mutation);
        if inner.failing_writes.contains(&namespace) {
            return Err(unavailable(&namespace));
        }
        Ok(())
    }
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClusterApi for MemoryCluster {
    async fn served_kinds(&self) -> Result<HashSet<ResourceKind>, ApiError> {
        let inner = self.inner();
        if inner.discovery_down {
            return Err(ApiError::Status {
                code: 503,
                body: "discovery unavailable".to_string(),
            });
        }
        Ok(inner.served.clone())
    }

    async fn list_projects(&self) -> Result<Vec<Project>, ApiError> {
        Ok(self.inner().projects.values().cloned().collect())
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, ApiError> {
        let inner = self.inner();
        Self::check_read(&inner, namespace)?;
        Ok(inner
            .pods
            .iter()
            .filter(|p| p.namespace == namespace)
            .cloned()
            .collect())
    }

    async fn list_controllers(
        &self,
        namespace: &str,
        kind: ResourceKind,
    ) -> Result<Vec<ScalableController>, ApiError> {
        let inner = self.inner();
        if !inner.served.contains(&kind) {
            return Err(ApiError::KindUnavailable(kind));
        }
        Self::check_read(&inner, namespace)?;
        Ok(inner
            .controllers
            .iter()
            .filter(|c| c.namespace == namespace && c.kind == kind)
            .cloned()
            .collect())
    }

    async fn list_builds(&self, namespace: &str) -> Result<Vec<Build>, ApiError> {
        let inner = self.inner();
        if !inner.served.contains(&ResourceKind::Build) {
            return Err(ApiError::KindUnavailable(ResourceKind::Build));
        }
        Self::check_read(&inner, namespace)?;
        Ok(inner
            .builds
            .iter()
            .filter(|b| b.namespace == namespace)
            .cloned()
            .collect())
    }

    async fn list_quotas(&self, namespace: &str) -> Result<Vec<ResourceQuota>, ApiError> {
        let inner = self.inner();
        Self::check_read(&inner, namespace)?;
        Ok(inner
            .quotas
            .iter()
            .filter(|q| q.namespace == namespace)
            .cloned()
            .collect())
    }

    async fn scale(
        &self,
        namespace: &str,
        kind: ResourceKind,
        name: &str,
        replicas: u32,
    ) -> Result<(), ApiError> {
        let mut inner = self.inner();
        Self::begin_write(
            &mut inner,
            Mutation::Scale {
                namespace: namespace.to_string(),
                kind,
                name: name.to_string(),
                replicas,
            },
        )?;
        let controller = inner
            .controllers
            .iter_mut()
            .find(|c| c.namespace == namespace && c.kind == kind && c.name == name)
            .ok_or_else(|| ApiError::NotFound(format!("{} {}/{}", kind, namespace, name)))?;
        controller.replicas = replicas;
        controller.ready_replicas = controller.ready_replicas.min(replicas);
        Ok(())
    }

    async fn apply_quota(&self, quota: &ResourceQuota) -> Result<(), ApiError> {
        let mut inner = self.inner();
        Self::begin_write(
            &mut inner,
            Mutation::ApplyQuota {
                namespace: quota.namespace.clone(),
                name: quota.name.clone(),
            },
        )?;
        inner
            .quotas
            .retain(|q| !(q.namespace == quota.namespace && q.name == quota.name));
        inner.quotas.push(quota.clone());
        Ok(())
    }

    async fn delete_quota(&self, namespace: &str, name: &str) -> Result<(), ApiError> {
        let mut inner = self.inner();
        Self::begin_write(
            &mut inner,
            Mutation::DeleteQuota {
                namespace: namespace.to_string(),
                name: name.to_string(),
            },
        )?;
        let before = inner.quotas.len();
        inner
            .quotas
            .retain(|q| !(q.namespace == namespace && q.name == name));
        if inner.quotas.len() == before {
            return Err(ApiError::NotFound(format!("quota {}/{}", namespace, name)));
        }
        Ok(())
    }

    async fn annotate_project(
        &self,
        namespace: &str,
        patch: &AnnotationPatch,
    ) -> Result<(), ApiError> {
        let mut inner = self.inner();
        Self::begin_write(
            &mut inner,
            Mutation::AnnotateProject {
                namespace: namespace.to_string(),
            },
        )?;
        let project = inner
            .projects
            .get_mut(namespace)
            .ok_or_else(|| ApiError::NotFound(format!("namespace {}", namespace)))?;
        apply_patch(&mut project.annotations, patch);
        Ok(())
    }

    async fn annotate_controller(
        &self,
        namespace: &str,
        kind: ResourceKind,
        name: &str,
        patch: &AnnotationPatch,
    ) -> Result<(), ApiError> {
        let mut inner = self.inner();
        Self::begin_write(
            &mut inner,
            Mutation::AnnotateController {
                namespace: namespace.to_string(),
                kind,
                name: name.to_string(),
            },
        )?;
        let controller = inner
            .controllers
            .iter_mut()
            .find(|c| c.namespace == namespace && c.kind == kind && c.name == name)
            .ok_or_else(|| ApiError::NotFound(format!("{} {}/{}", kind, namespace, name)))?;
        apply_patch(&mut controller.annotations, patch);
        Ok(())
    }

    async fn cancel_build(&self, namespace: &str, name: &str) -> Result<(), ApiError> {
        let mut inner = self.inner();
        Self::begin_write(
            &mut inner,
            Mutation::CancelBuild {
                namespace: namespace.to_string(),
                name: name.to_string(),
            },
        )?;
        let build = inner
            .builds
            .iter_mut()
            .find(|b| b.namespace == namespace && b.name == name)
            .ok_or_else(|| ApiError::NotFound(format!("build {}/{}", namespace, name)))?;
        build.phase = BuildPhase::Cancelled;
        Ok(())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ApiError> {
        let mut inner = self.inner();
        Self::begin_write(
            &mut inner,
            Mutation::DeletePod {
                namespace: namespace.to_string(),
                name: name.to_string(),
            },
        )?;
        let before = inner.pods.len();
        inner
            .pods
            .retain(|p| !(p.namespace == namespace && p.name == name));
        if inner.pods.len() == before {
            return Err(ApiError::NotFound(format!("pod {}/{}", namespace, name)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn make_controller(ns: &str, name: &str, replicas: u32) -> ScalableController {
        ScalableController {
            kind: ResourceKind::Deployment,
            name: name.to_string(),
            namespace: ns.to_string(),
            replicas,
            ready_replicas: replicas,
            annotations: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_scale_updates_state_and_records_call() {
        let cluster = MemoryCluster::new();
        cluster.add_project(Project::new("demo"));
        cluster.add_controller(make_controller("demo", "web", 3));

        cluster
            .scale("demo", ResourceKind::Deployment, "web", 0)
            .await
            .unwrap();

        let web = cluster.controller("demo", "web").unwrap();
        assert_eq!(web.replicas, 0);
        assert_eq!(web.ready_replicas, 0);
        assert_eq!(cluster.mutations().len(), 1);
    }

    #[tokio::test]
    async fn test_failing_writes_are_still_recorded() {
        let cluster = MemoryCluster::new();
        cluster.add_project(Project::new("demo"));
        cluster.add_controller(make_controller("demo", "web", 3));
        cluster.fail_writes("demo", true);

        let err = cluster
            .scale("demo", ResourceKind::Deployment, "web", 0)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Status { code: 503, .. }));
        assert_eq!(cluster.controller("demo", "web").unwrap().replicas, 3);
        assert_eq!(cluster.mutations_for("demo").len(), 1);
    }

    #[tokio::test]
    async fn test_unserved_kind_is_unavailable() {
        let cluster = MemoryCluster::new();
        cluster.add_project(Project::new("demo"));
        cluster.set_served(&[ResourceKind::Deployment]);

        assert!(
            cluster
                .list_builds("demo")
                .await
                .unwrap_err()
                .is_kind_unavailable()
        );
        assert!(
            cluster
                .list_controllers("demo", ResourceKind::Deployment)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_annotation_patch_sets_and_removes() {
        let cluster = MemoryCluster::new();
        cluster.add_project(Project::new("demo"));

        let mut patch = AnnotationPatch::new();
        patch.insert("a".to_string(), Some("1".to_string()));
        cluster.annotate_project("demo", &patch).await.unwrap();
        assert_eq!(
            cluster.project("demo").unwrap().annotations.get("a"),
            Some(&"1".to_string())
        );

        patch.insert("a".to_string(), None);
        cluster.annotate_project("demo", &patch).await.unwrap();
        assert!(cluster.project("demo").unwrap().annotations.is_empty());
    }
}
