//! Errors surfaced to the request layer.

/// Failure of a request-layer operation (plan service, payment creation,
/// status polls).
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("access denied: {0}")]
    Forbidden(String),
    #[error("{0}")]
    IllegalState(String),
    #[error("invalid request: {0}")]
    Invalid(String),
    #[error("{0}")]
    RetryShortly(String),
    #[error("upstream failure: {0}")]
    Upstream(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::NotFound(what.to_string())
    }
}
