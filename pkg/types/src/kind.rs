use serde::{Deserialize, Serialize};

/// Kinds of cluster objects hibernate reads or mutates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Pod,
    Deployment,
    ReplicationController,
    Build,
    ResourceQuota,
}

impl ResourceKind {
    /// Kinds that can be scaled to zero replicas.
    pub const SCALABLE: &'static [ResourceKind] =
        &[ResourceKind::Deployment, ResourceKind::ReplicationController];

    /// Kinds whose presence depends on what the cluster serves.
    /// Pods and quotas are core and always assumed present.
    pub const OPTIONAL: &'static [ResourceKind] = &[
        ResourceKind::Deployment,
        ResourceKind::ReplicationController,
        ResourceKind::Build,
    ];

    /// Lower-case plural used in REST paths.
    pub fn plural(&self) -> &'static str {
        match self {
            ResourceKind::Pod => "pods",
            ResourceKind::Deployment => "deployments",
            ResourceKind::ReplicationController => "replicationcontrollers",
            ResourceKind::Build => "builds",
            ResourceKind::ResourceQuota => "resourcequotas",
        }
    }

    pub fn from_plural(plural: &str) -> Option<Self> {
        match plural {
            "pods" => Some(ResourceKind::Pod),
            "deployments" => Some(ResourceKind::Deployment),
            "replicationcontrollers" => Some(ResourceKind::ReplicationController),
            "builds" => Some(ResourceKind::Build),
            "resourcequotas" => Some(ResourceKind::ResourceQuota),
            _ => None,
        }
    }

    pub fn is_scalable(&self) -> bool {
        Self::SCALABLE.contains(self)
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Pod => write!(f, "Pod"),
            ResourceKind::Deployment => write!(f, "Deployment"),
            ResourceKind::ReplicationController => write!(f, "ReplicationController"),
            ResourceKind::Build => write!(f, "Build"),
            ResourceKind::ResourceQuota => write!(f, "ResourceQuota"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plural_names_resolve_back() {
        for kind in [
            ResourceKind::Pod,
            ResourceKind::Deployment,
            ResourceKind::ReplicationController,
            ResourceKind::Build,
            ResourceKind::ResourceQuota,
        ] {
            assert_eq!(ResourceKind::from_plural(kind.plural()), Some(kind));
        }
        assert_eq!(ResourceKind::from_plural("statefulsets"), None);
    }

    #[test]
    fn only_controllers_are_scalable() {
        assert!(ResourceKind::Deployment.is_scalable());
        assert!(ResourceKind::ReplicationController.is_scalable());
        assert!(!ResourceKind::Pod.is_scalable());
        assert!(!ResourceKind::Build.is_scalable());
    }
}
