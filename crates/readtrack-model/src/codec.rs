//! Codec trait and implementations for serializing/deserializing values.
//!
//! Two places turn model values into bytes: cache entries (one
//! [`LoginSession`](crate::LoginSession) per active user) and the dated
//! batch files the telemetry buffer writes. Both go through the [`Codec`]
//! trait so the format is chosen in one place.
//!
//! Currently we provide [`JsonCodec`]. Batch files are consumed by offline
//! analysis scripts, so they are written pretty-printed; cache entries are
//! compact.

use serde::{Serialize, de::DeserializeOwned};

use crate::ModelError;

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// `Send + Sync + 'static` because codecs are stored inside long-lived
/// components that are shared across Tokio tasks.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ModelError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ModelError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ModelError::Decode` if the bytes are malformed,
    /// incomplete, or don't match the expected type.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ModelError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// ## Example
///
/// ```rust
/// use readtrack_model::{Codec, JsonCodec, NewsRecord};
///
/// let codec = JsonCodec::compact();
/// let record = NewsRecord {
///     start_time: chrono::Utc::now(),
///     news_guids: vec!["guid-1".into()],
/// };
///
/// let bytes = codec.encode(&record).unwrap();
/// let decoded: NewsRecord = codec.decode(&bytes).unwrap();
/// assert_eq!(record, decoded);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec {
    pretty: bool,
}

#[cfg(feature = "json")]
impl JsonCodec {
    /// Single-line JSON. Used for cache entries.
    pub fn compact() -> Self {
        Self { pretty: false }
    }

    /// Indented JSON. Used for batch files.
    pub fn pretty() -> Self {
        Self { pretty: true }
    }

    /// Whether this codec indents its output.
    pub fn is_pretty(&self) -> bool {
        self.pretty
    }
}

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ModelError> {
        if self.pretty {
            serde_json::to_vec_pretty(value).map_err(ModelError::Encode)
        } else {
            serde_json::to_vec(value).map_err(ModelError::Encode)
        }
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ModelError> {
        serde_json::from_slice(data).map_err(ModelError::Decode)
    }
}
