use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("submission can no longer be edited or deleted")]
    EditNotAllowed,
    #[error("a general reply requires an earlier admin reply")]
    TurnViolation,
    #[error("reply message is empty")]
    EmptyMessage,
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("rejected by record store: {0}")]
    Rejected(String),
    #[error("record store unavailable: {0}")]
    RemoteUnavailable(String),
    #[error("schema drift: {0}")]
    SchemaDrift(String),
    #[error("not found")]
    NotFound,
    #[error("conflict")]
    Conflict,
}

impl DomainError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RemoteUnavailable(_))
    }

    pub(crate) fn schema_drift(context: &str, err: impl std::fmt::Display) -> Self {
        Self::SchemaDrift(format!("{context}: {err}"))
    }
}
