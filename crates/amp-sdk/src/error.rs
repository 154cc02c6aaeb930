use thiserror::Error;

use crate::session::AuthError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("[AMP] This action is unauthorized! Confirm that API token has the right permissions ({status})")]
    Permission { status: reqwest::StatusCode },
    #[error("[AMP] Internal Server Error: {status}")]
    RemoteServer { status: reqwest::StatusCode },
    #[error("[AMP] Failed to connect to the API ({0}). Ensure the API details and hostname are valid.")]
    Connectivity(String),
    #[error("[AMP] Deployment template catalog is invalid: {0}")]
    Catalog(String),
}

impl ApiError {
    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Auth(_) => "auth",
            ApiError::Permission { .. } => "permission",
            ApiError::RemoteServer { .. } => "remote_server",
            ApiError::Connectivity(_) => "connectivity",
            ApiError::Catalog(_) => "catalog",
        }
    }

    /// Whether an idempotent call may be retried as-is.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ApiError::RemoteServer { .. } | ApiError::Connectivity(_)
        )
    }
}
