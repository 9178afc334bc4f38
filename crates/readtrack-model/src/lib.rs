//! Data model for readtrack.
//!
//! This crate defines the values every other layer passes around:
//!
//! - **Identifiers** ([`UserId`], [`LoginSessionId`], [`ReadingSessionId`],
//!   [`ArticleId`]) with validated parsing.
//! - **Sessions** ([`LoginSession`], [`ReadingSession`]) as the store and
//!   cache see them.
//! - **Telemetry** ([`TelemetryRecord`], [`NewsRecord`], [`BatchFile`]) as
//!   the buffer holds them and the flush writes them.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]) for turning any of the
//!   above into bytes.
//!
//! # Architecture
//!
//! ```text
//! session / telemetry / upload  →  model (this crate)
//! ```
//!
//! The model knows nothing about caches, stores, files, or timers.

mod codec;
mod error;
mod telemetry;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ModelError;
pub use telemetry::{
    BatchFile, ClickEvent, EyeEvent, NewsRecord, ScrollEvent, TelemetryRecord, TrackingData,
};
pub use types::{
    ArticleId, Category, DeviceInfo, LoginSession, LoginSessionId, ReadingSession,
    ReadingSessionId, UserId,
};
