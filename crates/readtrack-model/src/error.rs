//! Error types for the model layer.
//!
//! Each crate in readtrack defines its own error enum. A `ModelError`
//! always means a value could not be parsed, encoded, or decoded; it never
//! means a dependency was unreachable.

/// Errors that can occur while building or (de)serializing model values.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// Serialization failed (turning a Rust type into bytes).
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed (turning bytes into a Rust type).
    ///
    /// Common causes: a truncated batch file, a cache entry written by an
    /// incompatible version, or plain garbage.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// An identifier supplied by a caller is malformed.
    ///
    /// `kind` names the identifier type ("user", "login session", ...),
    /// `value` is the rejected input.
    #[error("invalid {kind} id: {value:?}")]
    InvalidId { kind: &'static str, value: String },
}
