//! Error types for the session layer.

use readtrack_model::{LoginSessionId, ModelError, ReadingSessionId, UserId};

/// Failure reported by a [`TtlCache`](crate::TtlCache) backend.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The cache could not be reached (connection refused, reset, ...).
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    /// The backend answered with something we could not interpret.
    #[error("cache backend error: {0}")]
    Backend(String),
}

/// Failure reported by a [`SessionStore`](crate::SessionStore) backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A write was rejected, e.g. a duplicate primary key.
    #[error("store rejected write: {0}")]
    Rejected(String),
}

/// Errors that can occur during session management.
///
/// Grouped by how a caller should react:
///
/// - **Validation / not found**: surfaced to the client, never retried here.
/// - **Conflict / already ended**: a normal business outcome.
/// - **Store / cache / timeout**: transient; see [`SessionError::is_transient`].
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The request is malformed (for example an end time before the start).
    #[error("invalid request: {0}")]
    Validation(String),

    /// An identifier could not be parsed.
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("login session {0} not found")]
    LoginSessionNotFound(LoginSessionId),

    #[error("reading session {0} not found")]
    ReadingSessionNotFound(ReadingSessionId),

    /// The user already has a live login session and the policy is to
    /// reject the new one.
    #[error("user {0} already has an active session")]
    SingleSessionConflict(UserId),

    /// The client tried to close a reading session twice.
    #[error("reading session {0} already ended")]
    AlreadyEnded(ReadingSessionId),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    /// A dependency call exceeded its time bound. Carries the operation name.
    #[error("{0} timed out")]
    Timeout(&'static str),
}

impl SessionError {
    /// `true` for dependency failures that may succeed if retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Cache(_) | Self::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_transient_dependency_errors_only() {
        assert!(SessionError::Timeout("store.get").is_transient());
        assert!(SessionError::Cache(CacheError::Unavailable("down".into())).is_transient());
        assert!(SessionError::Store(StoreError::Unavailable("down".into())).is_transient());

        assert!(!SessionError::Validation("bad".into()).is_transient());
        assert!(!SessionError::SingleSessionConflict(UserId::new_v4()).is_transient());
    }
}
