//! Error types for the telemetry buffer.

use std::path::PathBuf;

use readtrack_model::ModelError;

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The buffer has been drained for shutdown and accepts nothing more.
    #[error("telemetry buffer is closed")]
    Closed,

    /// The record carries no events (or no news items).
    #[error("record is empty")]
    EmptyRecord,

    /// Reading, writing, or renaming a batch file failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Model(#[from] ModelError),
}

impl TelemetryError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
