//! Unified error type for the readtrack platform.

use std::path::PathBuf;

use readtrack_model::ModelError;
use readtrack_session::SessionError;
use readtrack_telemetry::TelemetryError;
use readtrack_upload::UploadError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` variants let `?` convert sub-crate errors, so callers of
/// the platform deal with one type.
#[derive(Debug, thiserror::Error)]
pub enum ReadtrackError {
    /// Login or reading session failure (not found, conflict, backend).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The telemetry buffer refused a record.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    /// Malformed identifier.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// A request that is well-formed but not meaningful, e.g. a data
    /// submission that is neither a ping nor carries events.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Bad or unreadable configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Creating a data directory failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A background loop panicked.
    #[error("background task {task} failed: {source}")]
    Join {
        task: &'static str,
        #[source]
        source: tokio::task::JoinError,
    },
}

impl ReadtrackError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Session(e) => e.is_transient(),
            Self::Upload(UploadError::Upload { .. }) => true,
            _ => false,
        }
    }
}
