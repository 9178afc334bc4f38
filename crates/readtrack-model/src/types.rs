//! Identity types and the session data model.
//!
//! These are the values that move between the session layer, the cache,
//! and the durable store. Timestamps are wall-clock `DateTime<Utc>` because
//! they are persisted and compared across process restarts.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ModelError;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Generates a UUID newtype with `Display`, `FromStr`, and a random
/// constructor. The newtypes keep a user id from being passed where a
/// session id is expected, even though both are UUIDs underneath.
macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Creates a fresh random (v4) identifier.
            pub fn new_v4() -> Self {
                Self(Uuid::new_v4())
            }

            /// Returns the underlying UUID.
            pub fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0.hyphenated())
            }
        }

        impl FromStr for $name {
            type Err = ModelError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim())
                    .map(Self)
                    .map_err(|_| ModelError::InvalidId {
                        kind: $kind,
                        value: s.to_string(),
                    })
            }
        }
    };
}

uuid_id!(
    /// A research participant. Issued when an invite code is redeemed.
    UserId,
    "user"
);

uuid_id!(
    /// A login session: one heartbeat-kept-alive presence of a user.
    LoginSessionId,
    "login session"
);

uuid_id!(
    /// A reading session: attention on one article or on the list view.
    ReadingSessionId,
    "reading session"
);

/// Identifies what a reading session is attached to.
///
/// Either a literal article identifier supplied by the client, or the
/// synthetic per-day list identifier built by [`ArticleId::daily_list`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArticleId(String);

impl ArticleId {
    /// Wraps a literal article identifier.
    ///
    /// # Errors
    /// Returns [`ModelError::InvalidId`] when the identifier is blank.
    pub fn new(id: impl Into<String>) -> Result<Self, ModelError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ModelError::InvalidId {
                kind: "article",
                value: id,
            });
        }
        Ok(Self(id))
    }

    /// Builds the synthetic id used to group undifferentiated browsing of
    /// the article list on `day`: `<prefix><YYYYMMDD>000`.
    ///
    /// ```rust
    /// use chrono::NaiveDate;
    /// use readtrack_model::ArticleId;
    ///
    /// let day = NaiveDate::from_ymd_opt(2025, 7, 18).unwrap();
    /// assert_eq!(ArticleId::daily_list("news", day).as_str(), "news20250718000");
    /// ```
    pub fn daily_list(prefix: &str, day: NaiveDate) -> Self {
        Self(format!("{prefix}{}000", day.format("%Y%m%d")))
    }

    /// Borrows the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArticleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// LoginSession
// ---------------------------------------------------------------------------

/// A user's authenticated presence.
///
/// The durable store holds the truth; the TTL cache holds a copy keyed by
/// user as a fast-path hint. Lifecycle:
///
/// ```text
///   Active ──(explicit end | cleanup sweep)──→ Ended
/// ```
///
/// There is no way back: a new login always creates a new id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginSession {
    pub id: LoginSessionId,
    pub user_id: UserId,
    pub start_time: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub is_active: bool,
    /// Set together with `is_active = false`.
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

impl LoginSession {
    /// A fresh active session whose first heartbeat is its start time.
    pub fn start(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            id: LoginSessionId::new_v4(),
            user_id,
            start_time: now,
            last_heartbeat: now,
            is_active: true,
            end_time: None,
        }
    }

    /// `true` once at least `timeout` has passed since the last heartbeat.
    ///
    /// A heartbeat stamped in the future (client clock skew) never counts
    /// as stale, except with a zero timeout where everything is stale.
    pub fn is_stale(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        match now.signed_duration_since(self.last_heartbeat).to_std() {
            Ok(elapsed) => elapsed >= timeout,
            Err(_) => timeout.is_zero(),
        }
    }

    /// Active and heard from within `timeout`.
    pub fn is_live(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.is_active && !self.is_stale(now, timeout)
    }

    /// Marks the session ended at `at`. Ending twice keeps the first end time.
    pub fn end(&mut self, at: DateTime<Utc>) {
        if self.is_active {
            self.is_active = false;
            self.end_time = Some(at);
        }
    }
}

// ---------------------------------------------------------------------------
// ReadingSession
// ---------------------------------------------------------------------------

/// Optional client metadata captured when a reading session opens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub user_agent: String,
    pub screen_width: u32,
    pub screen_height: u32,
    pub viewport_width: u32,
    pub viewport_height: u32,
}

/// A bounded interval of attention on one article (or the list view).
///
/// `Open → Closed`. Once `end_time` is set it never changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadingSession {
    pub id: ReadingSessionId,
    pub user_id: UserId,
    pub article_id: ArticleId,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub device_info: Option<DeviceInfo>,
}

impl ReadingSession {
    /// Whether the session has been closed.
    pub fn is_closed(&self) -> bool {
        self.end_time.is_some()
    }
}

// ---------------------------------------------------------------------------
// Category
// ---------------------------------------------------------------------------

/// A class of flushed data. Each category has its own directory tree and
/// its own archive namespace in object storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Gaze, click and scroll telemetry.
    Tracking,
    /// Which news items a user was shown.
    News,
}

impl Category {
    /// Every category, in a stable order.
    pub const ALL: [Category; 2] = [Category::Tracking, Category::News];

    /// Lowercase name used in paths, archive names, and object keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tracking => "tracking",
            Self::News => "news",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
