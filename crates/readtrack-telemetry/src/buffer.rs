//! The in-memory telemetry buffer and its flush to dated files.
//!
//! # Write path
//!
//! [`TelemetryBuffer::add_record`] appends to a per-user `Vec` under a
//! plain mutex. It never touches the disk, so request handlers are never
//! slowed down by a flush in progress.
//!
//! # Flush
//!
//! A flush swaps the whole map for an empty one while holding the lock,
//! then releases the lock before any I/O. Each user's records are then
//! merged into `<root>/<YYYY-MM-DD>/<user>.json`:
//!
//! ```text
//! read existing file ──→ decode ──→ append new records ──→ write .tmp ──→ rename
//! ```
//!
//! A user whose write fails gets their records put back at the front of
//! their queue, ahead of anything that arrived during the flush, and the
//! next flush tries again. Other users are not affected.
//!
//! # Shutdown
//!
//! [`TelemetryBuffer::drain`] closes the buffer and then flushes. Every
//! record accepted before `drain` returns is on disk, unless its write
//! failed, in which case it is still pending and reported.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Local, NaiveDate, Utc};
use readtrack_model::{BatchFile, Category, Codec, JsonCodec, NewsRecord, TelemetryRecord, UserId};
use readtrack_tick::PeriodicTask;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::TelemetryError;

/// A record type the buffer can hold.
pub trait BufferedRecord: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Empty records are rejected at the door.
    fn is_empty(&self) -> bool;
}

impl BufferedRecord for TelemetryRecord {
    fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl BufferedRecord for NewsRecord {
    fn is_empty(&self) -> bool {
        self.news_guids.is_empty()
    }
}

/// Counts from one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub users_written: usize,
    pub records_written: usize,
    /// Users whose records were re-queued after a failed write.
    pub users_failed: usize,
}

struct Pending<R> {
    by_user: HashMap<UserId, Vec<R>>,
    closed: bool,
}

/// Write-back buffer for one data category.
pub struct TelemetryBuffer<R> {
    category: Category,
    root: PathBuf,
    codec: JsonCodec,
    pending: Mutex<Pending<R>>,
    /// Serializes flushes so a timer flush and a drain never interleave
    /// their read-merge-write of the same file.
    flush_lock: tokio::sync::Mutex<()>,
}

impl<R: BufferedRecord> TelemetryBuffer<R> {
    /// Creates a buffer that writes under `root`. The directory is created
    /// on first flush.
    pub fn new(category: Category, root: impl Into<PathBuf>) -> Self {
        Self {
            category,
            root: root.into(),
            codec: JsonCodec::pretty(),
            pending: Mutex::new(Pending {
                by_user: HashMap::new(),
                closed: false,
            }),
            flush_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Queues a record for `user`.
    ///
    /// # Errors
    /// [`TelemetryError::EmptyRecord`] for a record with nothing in it,
    /// [`TelemetryError::Closed`] after [`drain`](Self::drain).
    pub fn add_record(&self, user: UserId, record: R) -> Result<(), TelemetryError> {
        if record.is_empty() {
            return Err(TelemetryError::EmptyRecord);
        }
        let mut pending = self.lock();
        if pending.closed {
            return Err(TelemetryError::Closed);
        }
        pending.by_user.entry(user).or_default().push(record);
        Ok(())
    }

    /// Records waiting for the next flush, across all users.
    pub fn pending_len(&self) -> usize {
        self.lock().by_user.values().map(Vec::len).sum()
    }

    /// Users with records waiting for the next flush.
    pub fn pending_users(&self) -> usize {
        self.lock().by_user.len()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Path of `user`'s file for `day`.
    pub fn file_path(&self, user: UserId, day: NaiveDate) -> PathBuf {
        self.root
            .join(day.format("%Y-%m-%d").to_string())
            .join(format!("{user}.json"))
    }

    /// Flushes everything pending into today's files.
    pub async fn flush(&self) -> FlushReport {
        self.flush_at(Utc::now()).await
    }

    /// Flushes with an explicit flush time; the file date is its local day.
    pub async fn flush_at(&self, now: DateTime<Utc>) -> FlushReport {
        let _flushing = self.flush_lock.lock().await;

        let batch = std::mem::take(&mut self.lock().by_user);
        let mut report = FlushReport::default();
        if batch.is_empty() {
            return report;
        }

        let day = now.with_timezone(&Local).date_naive();
        for (user, records) in batch {
            let path = self.file_path(user, day);
            let count = records.len();
            match self.merge_into(&path, now, &records).await {
                Ok(()) => {
                    report.users_written += 1;
                    report.records_written += count;
                    debug!(category = %self.category, %user, count, path = %path.display(), "records flushed");
                }
                Err(e) => {
                    report.users_failed += 1;
                    warn!(category = %self.category, %user, count, error = %e, "flush failed, records re-queued");
                    self.requeue(user, records);
                }
            }
        }

        info!(
            category = %self.category,
            users = report.users_written,
            records = report.records_written,
            failed = report.users_failed,
            "telemetry flushed"
        );
        report
    }

    /// Closes the buffer to new records, then flushes.
    pub async fn drain(&self) -> FlushReport {
        self.lock().closed = true;
        let report = self.flush().await;
        let left = self.pending_len();
        if left > 0 {
            warn!(category = %self.category, left, "records still pending after drain");
        }
        report
    }

    // -- internals --------------------------------------------------------

    fn lock(&self) -> MutexGuard<'_, Pending<R>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Puts failed records back ahead of any that arrived since the swap.
    fn requeue(&self, user: UserId, mut records: Vec<R>) {
        let mut pending = self.lock();
        let slot = pending.by_user.entry(user).or_default();
        records.append(slot);
        *slot = records;
    }

    async fn merge_into(
        &self,
        path: &Path,
        now: DateTime<Utc>,
        records: &[R],
    ) -> Result<(), TelemetryError> {
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| TelemetryError::io(dir, e))?;
        }

        let mut file = match self.read_existing(path, now).await? {
            Some(existing) => existing,
            None => BatchFile::new(now, Vec::new()),
        };
        file.merge(now, records.to_vec());

        let bytes = self.codec.encode(&file)?;
        let tmp = tmp_path(path);
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| TelemetryError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| TelemetryError::io(path, e))?;
        Ok(())
    }

    /// Loads the existing file. An undecodable file is moved aside so its
    /// bytes survive and a fresh file can be started.
    async fn read_existing(
        &self,
        path: &Path,
        now: DateTime<Utc>,
    ) -> Result<Option<BatchFile<R>>, TelemetryError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(TelemetryError::io(path, e)),
        };

        match self.codec.decode::<BatchFile<R>>(&bytes) {
            Ok(file) => Ok(Some(file)),
            Err(e) => {
                let aside = corrupt_path(path, now);
                warn!(
                    path = %path.display(),
                    moved_to = %aside.display(),
                    error = %e,
                    "existing batch file is corrupt, starting a new one"
                );
                tokio::fs::rename(path, &aside)
                    .await
                    .map_err(|e| TelemetryError::io(path, e))?;
                Ok(None)
            }
        }
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

fn corrupt_path(path: &Path, now: DateTime<Utc>) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".corrupt-{}", now.format("%Y%m%d%H%M%S")));
    PathBuf::from(name)
}

/// Runs [`TelemetryBuffer::flush`] as a [`PeriodicTask`]; shutdown drains.
pub struct FlushLoop<R>(pub Arc<TelemetryBuffer<R>>);

impl<R: BufferedRecord> PeriodicTask for FlushLoop<R> {
    fn name(&self) -> &'static str {
        match self.0.category() {
            Category::Tracking => "tracking-flush",
            Category::News => "news-flush",
        }
    }

    async fn tick(&mut self) {
        self.0.flush().await;
    }

    async fn drain(&mut self) {
        self.0.drain().await;
    }
}
