use pkg_types::kind::ResourceKind;
use thiserror::Error;

/// Failure talking to the cluster API.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    /// The cluster does not serve this kind; callers degrade rather than fail.
    #[error("resource kind {0} is not served by the cluster")]
    KindUnavailable(ResourceKind),

    #[error("cluster API returned {code}: {body}")]
    Status { code: u16, body: String },

    #[error("cluster API transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to decode cluster API response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound(_))
    }

    pub fn is_kind_unavailable(&self) -> bool {
        matches!(self, ApiError::KindUnavailable(_))
    }
}
