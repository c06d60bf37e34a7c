use thiserror::Error;

/// Failure of the analysis collaborator.
///
/// An analysis that legitimately finds nothing is `Ok` with an empty clause list;
/// every variant here is a failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AiError {
    #[error("analysis provider is not configured: {0}")]
    NotConfigured(String),

    #[error("analysis request timed out")]
    Timeout,

    #[error("analysis provider unreachable: {0}")]
    Connection(String),

    #[error("analysis failed: {0}")]
    InferenceFailed(String),

    #[error("analysis provider returned no content")]
    EmptyResponse,

    #[error("analysis output was not a valid document: {0}")]
    MalformedOutput(String),
}

impl From<tokio::time::error::Elapsed> for AiError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        AiError::Timeout
    }
}
