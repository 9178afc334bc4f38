//! Telemetry buffering for readtrack.
//!
//! Clients stream gaze, click and scroll events at a high rate. Writing
//! each batch to disk on the request path would make request latency
//! depend on the disk, so [`TelemetryBuffer`] keeps records in memory and
//! a [`FlushLoop`] writes them out every few seconds, one JSON file per
//! user per day per category:
//!
//! ```text
//! data/tracking/2025-07-18/<user>.json   {"flush_time": ..., "records": [...]}
//! data/news/2025-07-18/<user>.json
//! ```
//!
//! Those files are what the upload pipeline later archives and ships.

mod buffer;
mod error;

pub use buffer::{BufferedRecord, FlushLoop, FlushReport, TelemetryBuffer};
pub use error::TelemetryError;
