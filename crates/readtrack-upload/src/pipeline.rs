//! The archive-and-ship pipeline.
//!
//! Each pass scans every watched root and decides per category whether to
//! ship:
//!
//! | trigger | condition |
//! |---|---|
//! | [`Trigger::Threshold`] | `files >= max_files` or `bytes >= max_bytes` |
//! | [`Trigger::Rotation`] | first pass after local midnight, any non-empty root |
//! | [`Trigger::Forced`] | [`UploadPipeline::force_upload_all`] |
//!
//! Shipping a category first claims the scanned files by renaming each to
//! `<name>.uploading`, then zips them into the staging directory and puts
//! the archive to the [`ObjectStore`]. Only after the store confirms are
//! the claimed files deleted; on failure they are renamed back. A writer
//! that flushes to a claimed name meanwhile starts a fresh file, which the
//! next pass picks up. The staged archive is removed either way, and claims
//! left by an interrupted process are released at the start of a pass.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate};
use readtrack_model::Category;
use readtrack_tick::PeriodicTask;
use tracing::{debug, info, warn};

use crate::archive::{archive_name, object_key, write_archive};
use crate::claim::{ClaimedFile, claim_files, delete_claims, recover_claims, release_claims};
use crate::scan::{Scan, prune_empty_dirs, scan_dir};
use crate::{ObjectStore, UploadError};

/// Thresholds and scheduling for [`UploadPipeline`].
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Where archives are built before upload.
    pub staging_dir: PathBuf,
    pub max_files: usize,
    pub max_bytes: u64,
    pub scan_interval: Duration,
    /// Ship everything once per day on the first pass after local midnight.
    pub daily_rotation: bool,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            staging_dir: PathBuf::from("data/upload"),
            max_files: 100,
            max_bytes: 100 * 1024 * 1024,
            scan_interval: Duration::from_secs(300),
            daily_rotation: true,
        }
    }
}

/// Why a category was shipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Threshold,
    Rotation,
    Forced,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Threshold => "threshold",
            Self::Rotation => "rotation",
            Self::Forced => "forced",
        })
    }
}

/// Result of shipping one category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShipReport {
    pub category: Category,
    pub trigger: Trigger,
    pub key: String,
    pub files_archived: usize,
    pub bytes_archived: u64,
    /// Claimed sources deleted after the upload succeeded.
    pub files_deleted: usize,
}

/// Pending files for one category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryStats {
    pub category: Category,
    pub root: PathBuf,
    pub files: usize,
    pub bytes: u64,
}

/// Read-only snapshot of what is waiting to be shipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadStats {
    pub categories: Vec<CategoryStats>,
    pub max_files: usize,
    pub max_bytes: u64,
    pub scan_interval: Duration,
}

impl UploadStats {
    pub fn total_files(&self) -> usize {
        self.categories.iter().map(|c| c.files).sum()
    }

    pub fn total_bytes(&self) -> u64 {
        self.categories.iter().map(|c| c.bytes).sum()
    }

    pub fn category(&self, category: Category) -> Option<&CategoryStats> {
        self.categories.iter().find(|c| c.category == category)
    }
}

/// Watches one root per category and ships batches to an [`ObjectStore`].
pub struct UploadPipeline<O> {
    store: Arc<O>,
    config: UploadConfig,
    roots: Vec<(Category, PathBuf)>,
    /// Local day of the last completed rotation.
    rotated_on: Mutex<NaiveDate>,
    /// Last archive name per category, to keep keys unique within a second.
    last_names: Mutex<HashMap<Category, String>>,
    /// One pass at a time.
    run_lock: tokio::sync::Mutex<()>,
}

impl<O: ObjectStore> UploadPipeline<O> {
    /// Creates a pipeline with no watched roots. The first rotation happens
    /// at the next local midnight.
    pub fn new(store: Arc<O>, config: UploadConfig) -> Self {
        Self::starting_on(store, config, Local::now().date_naive())
    }

    /// Like [`new`](Self::new), treating `today` as already rotated.
    pub fn starting_on(store: Arc<O>, config: UploadConfig, today: NaiveDate) -> Self {
        Self {
            store,
            config,
            roots: Vec::new(),
            rotated_on: Mutex::new(today),
            last_names: Mutex::new(HashMap::new()),
            run_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Adds a watched root for `category`.
    pub fn watch(mut self, category: Category, root: impl Into<PathBuf>) -> Self {
        self.roots.push((category, root.into()));
        self
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    pub fn roots(&self) -> &[(Category, PathBuf)] {
        &self.roots
    }

    /// Counts pending files and bytes per category.
    ///
    /// # Errors
    /// [`UploadError::Io`] if a root cannot be read.
    pub async fn stats(&self) -> Result<UploadStats, UploadError> {
        let mut categories = Vec::with_capacity(self.roots.len());
        for (category, root) in &self.roots {
            let scan = scan(root).await?;
            categories.push(CategoryStats {
                category: *category,
                root: root.clone(),
                files: scan.len(),
                bytes: scan.bytes,
            });
        }
        Ok(UploadStats {
            categories,
            max_files: self.config.max_files,
            max_bytes: self.config.max_bytes,
            scan_interval: self.config.scan_interval,
        })
    }

    /// One scheduled pass at the current local time.
    pub async fn run_once(&self) -> Vec<ShipReport> {
        self.run_at(Local::now()).await
    }

    /// One scheduled pass at `now`. Failures are logged per category and
    /// leave that category's files for the next pass.
    pub async fn run_at(&self, now: DateTime<Local>) -> Vec<ShipReport> {
        let _running = self.run_lock.lock().await;
        self.recover_all().await;

        let today = now.date_naive();
        let rotating = self.config.daily_rotation && today > self.rotated_on();
        let mut rotation_ok = true;
        let mut reports = Vec::new();

        for (category, root) in &self.roots {
            let scan = match scan(root).await {
                Ok(scan) => scan,
                Err(e) => {
                    warn!(%category, error = %e, "upload scan failed");
                    rotation_ok = false;
                    continue;
                }
            };
            if scan.is_empty() {
                continue;
            }

            let trigger = if scan.len() >= self.config.max_files
                || scan.bytes >= self.config.max_bytes
            {
                Trigger::Threshold
            } else if rotating {
                Trigger::Rotation
            } else {
                debug!(%category, files = scan.len(), bytes = scan.bytes, "below upload thresholds");
                continue;
            };

            match self.ship(*category, root, scan, trigger, now).await {
                Ok(Some(report)) => reports.push(report),
                Ok(None) => {}
                Err(e) => {
                    warn!(%category, %trigger, error = %e, "upload failed, files kept for retry");
                    rotation_ok = false;
                }
            }
        }

        if rotating {
            if rotation_ok {
                *self.rotated_on.lock().unwrap_or_else(|e| e.into_inner()) = today;
                info!(day = %today, "daily upload rotation complete");
            } else {
                warn!(day = %today, "daily upload rotation incomplete, retrying next pass");
            }
        }
        reports
    }

    /// Ships every non-empty category regardless of thresholds.
    ///
    /// # Errors
    /// Stops at the first category that fails; categories already shipped
    /// stay shipped.
    pub async fn force_upload_all(&self) -> Result<Vec<ShipReport>, UploadError> {
        let _running = self.run_lock.lock().await;
        info!("forced upload of all categories");
        self.recover_all().await;

        let now = Local::now();
        let mut reports = Vec::new();
        for (category, root) in &self.roots {
            let scan = scan(root).await?;
            if scan.is_empty() {
                debug!(%category, "nothing to upload");
                continue;
            }
            if let Some(report) = self.ship(*category, root, scan, Trigger::Forced, now).await? {
                reports.push(report);
            }
        }
        Ok(reports)
    }

    // -- internals --------------------------------------------------------

    fn rotated_on(&self) -> NaiveDate {
        *self.rotated_on.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Archive name for this ship, suffixed if the same category already
    /// shipped within the same second.
    fn unique_name(&self, category: Category, now: DateTime<Local>) -> String {
        let base = archive_name(category, now);
        let mut last = self.last_names.lock().unwrap_or_else(|e| e.into_inner());
        let name = match last.get(&category) {
            Some(prev) if prev.starts_with(base.trim_end_matches(".zip")) => {
                let n = prev
                    .trim_end_matches(".zip")
                    .rsplit_once('-')
                    .and_then(|(_, n)| n.parse::<u32>().ok())
                    .unwrap_or(1);
                format!("{}-{}.zip", base.trim_end_matches(".zip"), n + 1)
            }
            _ => base,
        };
        last.insert(category, name.clone());
        name
    }

    /// Releases claims an interrupted pass left behind. Callers hold
    /// `run_lock`, so no claim is in flight.
    async fn recover_all(&self) {
        for (category, root) in &self.roots {
            let dir = root.clone();
            match tokio::task::spawn_blocking(move || recover_claims(&dir)).await {
                Ok(Ok(0)) => {}
                Ok(Ok(n)) => info!(%category, files = n, "released claims of an interrupted upload"),
                Ok(Err(e)) => warn!(%category, error = %e, "failed to release leftover claims"),
                Err(e) => warn!(%category, error = %e, "claim recovery task failed"),
            }
        }
    }

    /// Claims, archives and uploads one category. `None` when every scanned
    /// file vanished before it could be claimed.
    async fn ship(
        &self,
        category: Category,
        root: &Path,
        scan: Scan,
        trigger: Trigger,
        now: DateTime<Local>,
    ) -> Result<Option<ShipReport>, UploadError> {
        let staging = self.config.staging_dir.clone();
        tokio::fs::create_dir_all(&staging)
            .await
            .map_err(|e| UploadError::io(&staging, e))?;

        let claimed = claim(root, scan).await?;
        if claimed.is_empty() {
            debug!(%category, "scanned files vanished before upload");
            return Ok(None);
        }
        let bytes: u64 = claimed.iter().map(|f| f.len).sum();

        let name = self.unique_name(category, now);
        let key = object_key(category, &name);
        let archive = staging.join(&name);
        info!(%category, %trigger, files = claimed.len(), bytes, %key, "shipping batch");

        let result = self.build_and_put(root, &claimed, &archive, &key).await;
        match tokio::fs::remove_file(&archive).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %archive.display(), error = %e, "failed to remove staged archive")
            }
        }
        if let Err(e) = result {
            let files = claimed.len();
            match tokio::task::spawn_blocking(move || release_claims(&claimed)).await {
                Ok(restored) => debug!(%category, files, restored, "claims released after failed upload"),
                Err(join) => warn!(%category, error = %join, "claim release task failed"),
            }
            return Err(e);
        }

        let files_archived = claimed.len();
        let deleted = finish(root, claimed).await?;
        info!(%category, %key, deleted, "batch uploaded");

        Ok(Some(ShipReport {
            category,
            trigger,
            key,
            files_archived,
            bytes_archived: bytes,
            files_deleted: deleted,
        }))
    }

    async fn build_and_put(
        &self,
        root: &Path,
        claimed: &[ClaimedFile],
        archive: &Path,
        key: &str,
    ) -> Result<(), UploadError> {
        let (src_root, files, dest) = (root.to_path_buf(), claimed.to_vec(), archive.to_path_buf());
        tokio::task::spawn_blocking(move || write_archive(&src_root, &files, &dest)).await??;

        let body = tokio::fs::read(archive)
            .await
            .map_err(|e| UploadError::io(archive, e))?;
        self.store.put_object(key, body).await
    }
}

async fn scan(root: &Path) -> Result<Scan, UploadError> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || scan_dir(&root).map_err(|e| UploadError::io(&root, e)))
        .await?
}

async fn claim(root: &Path, scan: Scan) -> Result<Vec<ClaimedFile>, UploadError> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || claim_files(&scan).map_err(|e| UploadError::io(&root, e)))
        .await?
}

/// Deletes claimed files after a confirmed upload, then prunes empty
/// directories. Returns how many files were deleted.
async fn finish(root: &Path, claimed: Vec<ClaimedFile>) -> Result<usize, UploadError> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let deleted = delete_claims(&claimed);
        if let Err(e) = prune_empty_dirs(&root) {
            warn!(root = %root.display(), error = %e, "failed to prune empty directories");
        }
        deleted
    })
    .await
    .map_err(UploadError::from)
}

/// Runs [`UploadPipeline::run_once`] as a [`PeriodicTask`]. The drain is one
/// more pass so files flushed during shutdown are considered.
pub struct UploadLoop<O>(pub Arc<UploadPipeline<O>>);

impl<O: ObjectStore> PeriodicTask for UploadLoop<O> {
    fn name(&self) -> &'static str {
        "upload"
    }

    async fn tick(&mut self) {
        self.0.run_once().await;
    }
}
