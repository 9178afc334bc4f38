//! Upload pipeline for readtrack.
//!
//! Flushed telemetry files accumulate under one root per [`Category`]. The
//! [`UploadPipeline`] periodically zips them into a single archive per
//! category and puts it to remote object storage, deleting the local files
//! only once the store has confirmed the upload. While an upload is in
//! flight its files are claimed (renamed aside) so writers never append to
//! a file that is about to be deleted.
//!
//! # Feature Flags
//!
//! - `http` (default): [`HttpObjectStore`] via `reqwest`
//!
//! [`Category`]: readtrack_model::Category

mod archive;
mod claim;
mod error;
mod pipeline;
mod scan;
mod store;

pub use archive::{archive_name, object_key, write_archive};
pub use claim::{ClaimedFile, claim_files};
pub use error::UploadError;
pub use pipeline::{
    CategoryStats, ShipReport, Trigger, UploadConfig, UploadLoop, UploadPipeline, UploadStats,
};
pub use scan::{Scan, ScannedFile, prune_empty_dirs, scan_dir};
#[cfg(feature = "http")]
pub use store::{HttpObjectStore, HttpStoreConfig};
pub use store::{DirectoryObjectStore, MemoryObjectStore, ObjectStore};
