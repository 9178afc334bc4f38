use std::path::PathBuf;

/// Errors that can occur while archiving or shipping batch files.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// Scanning, reading, or deleting a local file failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Building the zip archive failed.
    #[error("archive failed: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// The object store did not accept the archive.
    #[error("upload of {key} failed: {reason}")]
    Upload { key: String, reason: String },

    /// The object store client could not be built.
    #[error("invalid object store configuration: {0}")]
    Config(String),

    /// A blocking archive or scan task panicked.
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl UploadError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn upload(key: &str, reason: impl ToString) -> Self {
        Self::Upload {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }
}
