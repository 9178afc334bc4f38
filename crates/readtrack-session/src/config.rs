//! Configuration for the session layer.
//!
//! All durations are injected; the defaults match a production deployment
//! (5-minute heartbeat window, 30-second sweep, 2-minute abandonment).

use std::time::Duration;

/// What to do when a user logs in while another login session is live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SingleSessionPolicy {
    /// Refuse the new login with
    /// [`SessionError::SingleSessionConflict`](crate::SessionError::SingleSessionConflict).
    #[default]
    RejectNew,
    /// End the existing session (with its reading sessions left for the
    /// cleanup sweep) and create the new one.
    EvictExisting,
}

/// Configuration for [`SessionCache`](crate::SessionCache).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum silence before a login session counts as abandoned. Also
    /// the TTL of its cache entry.
    pub heartbeat_ttl: Duration,
    /// Upper bound for every cache and store call.
    pub call_timeout: Duration,
    pub policy: SingleSessionPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_ttl: Duration::from_secs(5 * 60),
            call_timeout: Duration::from_secs(3),
            policy: SingleSessionPolicy::default(),
        }
    }
}

/// Configuration for [`ReadingSessionManager`](crate::ReadingSessionManager).
#[derive(Debug, Clone)]
pub struct ReadingConfig {
    /// Prefix of the synthetic per-day list article id.
    pub list_prefix: String,
    pub call_timeout: Duration,
}

impl Default for ReadingConfig {
    fn default() -> Self {
        Self {
            list_prefix: "news".to_string(),
            call_timeout: Duration::from_secs(3),
        }
    }
}

/// Configuration for [`SessionCleanup`](crate::SessionCleanup).
#[derive(Debug, Clone)]
pub struct CleanupConfig {
    /// Time between sweeps.
    pub interval: Duration,
    /// Silence after which the sweep ends a login session.
    pub heartbeat_timeout: Duration,
    pub call_timeout: Duration,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(2 * 60),
            call_timeout: Duration::from_secs(3),
        }
    }
}
