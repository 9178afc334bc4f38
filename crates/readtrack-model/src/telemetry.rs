//! Telemetry records and the on-disk batch file shape.
//!
//! Clients submit batches of raw events (gaze samples, clicks, scrolls).
//! Each submission becomes one [`TelemetryRecord`] in the in-memory buffer
//! and, after the next flush, one element of a [`BatchFile`]'s `records`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ReadingSessionId, UserId};

/// A gaze sample resolved to the element under the user's eyes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EyeEvent {
    /// Element id (a token or component of the rendered article).
    pub id: String,
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClickEvent {
    pub timestamp: DateTime<Utc>,
    /// Id of the clicked element.
    pub id: String,
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrollEvent {
    pub timestamp: DateTime<Utc>,
    /// Vertical distance; positive scrolls down.
    pub delta_y: f32,
}

/// The event payload of one client submission.
///
/// The JSON keys are singular (`eye_event`, ...) to match what clients
/// send and what the offline analysis expects in batch files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackingData {
    #[serde(rename = "eye_event", default, skip_serializing_if = "Vec::is_empty")]
    pub eye_events: Vec<EyeEvent>,
    #[serde(rename = "click_event", default, skip_serializing_if = "Vec::is_empty")]
    pub click_events: Vec<ClickEvent>,
    #[serde(rename = "scroll_event", default, skip_serializing_if = "Vec::is_empty")]
    pub scroll_events: Vec<ScrollEvent>,
}

impl TrackingData {
    pub fn total_events(&self) -> usize {
        self.eye_events.len() + self.click_events.len() + self.scroll_events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total_events() == 0
    }
}

/// One submission's worth of telemetry, attributed to a user and the
/// reading session it was captured in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub user_id: UserId,
    pub session_id: ReadingSessionId,
    pub timestamp: DateTime<Utc>,
    pub data: TrackingData,
}

impl TelemetryRecord {
    pub fn new(
        user_id: UserId,
        session_id: ReadingSessionId,
        timestamp: DateTime<Utc>,
        data: TrackingData,
    ) -> Self {
        Self {
            user_id,
            session_id,
            timestamp,
            data,
        }
    }

    pub fn total_events(&self) -> usize {
        self.data.total_events()
    }
}

/// The list of news items a user was shown in one page view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsRecord {
    pub start_time: DateTime<Utc>,
    pub news_guids: Vec<String>,
}

/// Contents of one per-user, per-day, per-category file.
///
/// Files are append-merged across flush cycles: `records` grows and
/// `flush_time` tracks the latest flush that touched the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchFile<R> {
    pub flush_time: DateTime<Utc>,
    pub records: Vec<R>,
}

impl<R> BatchFile<R> {
    pub fn new(flush_time: DateTime<Utc>, records: Vec<R>) -> Self {
        Self { flush_time, records }
    }

    /// Appends `records` after the existing ones and bumps `flush_time`.
    pub fn merge(&mut self, flush_time: DateTime<Utc>, records: Vec<R>) {
        self.records.extend(records);
        self.flush_time = flush_time;
    }
}
