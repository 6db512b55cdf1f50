/// Error returned by backend collaborators (directory, message and
/// attachment stores).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The table or remote procedure backing the request is not provisioned.
    #[error("schema unavailable: {0}")]
    SchemaUnavailable(String),

    #[error("request timed out")]
    Timeout,

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),
}

impl BackendError {
    /// Whether the failure says nothing about the request itself and may be
    /// retried as-is.
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Timeout | BackendError::Unavailable(_))
    }
}
