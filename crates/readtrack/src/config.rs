//! Platform configuration loaded from TOML.
//!
//! Every field has a default, so an empty file is a valid configuration:
//!
//! ```toml
//! [session]
//! heartbeat_ttl_secs = 300
//! single_session_policy = "reject_new"   # or "evict_existing"
//!
//! [cleanup]
//! interval_secs = 30
//! heartbeat_timeout_secs = 120
//!
//! [telemetry]
//! data_dir = "data"
//! flush_interval_secs = 30
//!
//! [upload]
//! max_files = 100
//! scan_interval_secs = 300
//!
//! [object_store]
//! endpoint = "https://storage.example.com"
//! bucket = "reading-study"
//!
//! [logging]
//! level = "info"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use readtrack_model::Category;
use readtrack_session::{CleanupConfig, ReadingConfig, SessionConfig, SingleSessionPolicy};
use readtrack_upload::UploadConfig;
use serde::Deserialize;

use crate::ReadtrackError;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub session: SessionSection,
    pub cleanup: CleanupSection,
    pub telemetry: TelemetrySection,
    pub upload: UploadSection,
    pub object_store: ObjectStoreSection,
    pub logging: LoggingConfig,
}

/// `[session]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub heartbeat_ttl_secs: u64,
    /// Bound on every cache and store call.
    pub call_timeout_secs: u64,
    pub single_session_policy: PolicySetting,
    /// Prefix of the per-day list article id.
    pub list_prefix: String,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            heartbeat_ttl_secs: 300,
            call_timeout_secs: 3,
            single_session_policy: PolicySetting::RejectNew,
            list_prefix: "news".to_string(),
        }
    }
}

/// Spelling of [`SingleSessionPolicy`] in TOML.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicySetting {
    #[default]
    RejectNew,
    EvictExisting,
}

impl From<PolicySetting> for SingleSessionPolicy {
    fn from(setting: PolicySetting) -> Self {
        match setting {
            PolicySetting::RejectNew => Self::RejectNew,
            PolicySetting::EvictExisting => Self::EvictExisting,
        }
    }
}

/// `[cleanup]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CleanupSection {
    pub interval_secs: u64,
    pub heartbeat_timeout_secs: u64,
}

impl Default for CleanupSection {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            heartbeat_timeout_secs: 120,
        }
    }
}

/// `[telemetry]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelemetrySection {
    /// Parent of the `tracking/` and `news/` roots.
    pub data_dir: PathBuf,
    pub flush_interval_secs: u64,
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            flush_interval_secs: 30,
        }
    }
}

/// `[upload]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UploadSection {
    pub enabled: bool,
    /// Where archives are staged. Defaults to `<data_dir>/upload`.
    pub staging_dir: Option<PathBuf>,
    pub max_files: usize,
    pub max_bytes: u64,
    pub scan_interval_secs: u64,
    pub daily_rotation: bool,
}

impl Default for UploadSection {
    fn default() -> Self {
        Self {
            enabled: true,
            staging_dir: None,
            max_files: 100,
            max_bytes: 100 * 1024 * 1024,
            scan_interval_secs: 300,
            daily_rotation: true,
        }
    }
}

/// `[object_store]`. With an `endpoint`, archives go over HTTP; without
/// one, they are written under `directory`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObjectStoreSection {
    pub endpoint: Option<String>,
    pub bucket: String,
    pub token: Option<String>,
    pub timeout_secs: u64,
    pub directory: PathBuf,
}

impl Default for ObjectStoreSection {
    fn default() -> Self {
        Self {
            endpoint: None,
            bucket: String::new(),
            token: None,
            timeout_secs: 60,
            directory: PathBuf::from("data/objects"),
        }
    }
}

/// `[logging]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` filter directive; `RUST_LOG` wins when set.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl PlatformConfig {
    /// Reads and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ReadtrackError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ReadtrackError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml_str(&text)
    }

    /// Parses and validates TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ReadtrackError> {
        let config: Self =
            toml::from_str(text).map_err(|e| ReadtrackError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values that would make a component misbehave.
    pub fn validate(&self) -> Result<(), ReadtrackError> {
        let fail = |msg: &str| Err(ReadtrackError::Config(msg.to_string()));

        if self.session.heartbeat_ttl_secs == 0 {
            return fail("session.heartbeat_ttl_secs must be greater than zero");
        }
        if self.session.call_timeout_secs == 0 {
            return fail("session.call_timeout_secs must be greater than zero");
        }
        if self.session.list_prefix.trim().is_empty() {
            return fail("session.list_prefix must not be empty");
        }
        if self.cleanup.heartbeat_timeout_secs == 0 {
            return fail("cleanup.heartbeat_timeout_secs must be greater than zero");
        }
        if self.upload.max_files == 0 {
            return fail("upload.max_files must be greater than zero");
        }
        if self.upload.max_bytes == 0 {
            return fail("upload.max_bytes must be greater than zero");
        }
        if self.object_store.endpoint.is_some() && self.object_store.bucket.trim().is_empty() {
            return fail("object_store.bucket is required when an endpoint is set");
        }
        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            heartbeat_ttl: secs(self.session.heartbeat_ttl_secs),
            call_timeout: secs(self.session.call_timeout_secs),
            policy: self.session.single_session_policy.into(),
        }
    }

    pub fn reading_config(&self) -> ReadingConfig {
        ReadingConfig {
            list_prefix: self.session.list_prefix.clone(),
            call_timeout: secs(self.session.call_timeout_secs),
        }
    }

    pub fn cleanup_config(&self) -> CleanupConfig {
        CleanupConfig {
            interval: secs(self.cleanup.interval_secs),
            heartbeat_timeout: secs(self.cleanup.heartbeat_timeout_secs),
            call_timeout: secs(self.session.call_timeout_secs),
        }
    }

    pub fn upload_config(&self) -> UploadConfig {
        UploadConfig {
            staging_dir: self
                .upload
                .staging_dir
                .clone()
                .unwrap_or_else(|| self.telemetry.data_dir.join("upload")),
            max_files: self.upload.max_files,
            max_bytes: self.upload.max_bytes,
            scan_interval: secs(self.upload.scan_interval_secs),
            daily_rotation: self.upload.daily_rotation,
        }
    }

    pub fn flush_interval(&self) -> Duration {
        secs(self.telemetry.flush_interval_secs)
    }

    /// Root directory for a category's batch files.
    pub fn category_dir(&self, category: Category) -> PathBuf {
        self.telemetry.data_dir.join(category.as_str())
    }
}

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}
