//! # readtrack
//!
//! Server core for a reading and eye-tracking research platform.
//!
//! Participants log in, read articles, and stream gaze, click and scroll
//! events from the browser. readtrack keeps at most one live login per
//! participant, tracks nested reading sessions, buffers the event stream
//! to dated per-user files, and ships those files to object storage in
//! zipped batches.
//!
//! The HTTP surface is left to the embedding service; it calls the
//! request-path methods on [`RunningPlatform`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use readtrack::prelude::*;
//!
//! # async fn run() -> Result<(), ReadtrackError> {
//! let config = PlatformConfig::load("readtrack.toml")?;
//! let object_store = Arc::new(PlatformObjectStore::from_config(&config.object_store)?);
//! let platform = Platform::builder()
//!     .config(config)
//!     .build(
//!         Arc::new(MemoryTtlCache::new()),
//!         Arc::new(MemorySessionStore::new()),
//!         object_store,
//!     )?
//!     .start();
//!
//! let user = UserId::new_v4();
//! let login = platform.login(user).await?;
//! // ...
//! platform.logout(login.id).await?;
//! platform.shutdown().await
//! # }
//! ```

mod config;
mod error;
pub mod logging;
mod platform;

pub use config::{
    CleanupSection, LoggingConfig, ObjectStoreSection, PlatformConfig, PolicySetting,
    SessionSection, TelemetrySection, UploadSection,
};
pub use error::ReadtrackError;
pub use platform::{
    CloseReading, Platform, PlatformBuilder, PlatformObjectStore, RunningPlatform, Submission,
    SubmitAck,
};

/// Common imports for embedding the platform.
pub mod prelude {
    pub use crate::{
        CloseReading, Platform, PlatformConfig, PlatformObjectStore, ReadtrackError,
        RunningPlatform, Submission, SubmitAck,
    };
    pub use readtrack_model::{
        ArticleId, ClickEvent, DeviceInfo, EyeEvent, LoginSession, LoginSessionId,
        ReadingSession, ReadingSessionId, ScrollEvent, TrackingData, UserId,
    };
    pub use readtrack_session::{
        HeartbeatStatus, MemorySessionStore, MemoryTtlCache, OpenReading, SessionError,
        SessionStore, TtlCache,
    };
    pub use readtrack_upload::{MemoryObjectStore, ObjectStore, UploadStats};
}
