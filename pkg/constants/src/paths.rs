//! Filesystem path constants.

/// Default config file path.
pub const DEFAULT_CONFIG: &str = "/etc/hibernate/config.yaml";

/// Service-account token presented to the cluster API.
pub const DEFAULT_TOKEN_FILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

/// CA bundle trusted when reaching Prometheus through the cluster's proxy.
pub const DEFAULT_SERVICE_CA_FILE: &str =
    "/var/run/secrets/kubernetes.io/serviceaccount/service-ca.crt";
