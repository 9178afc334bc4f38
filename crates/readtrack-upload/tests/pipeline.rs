//! Integration tests for the upload pipeline against real directories.

use std::fs::File;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Local, TimeDelta};
use readtrack_model::Category;
use readtrack_tick::{TickConfig, spawn_periodic};
use readtrack_upload::{
    MemoryObjectStore, ObjectStore, Trigger, UploadConfig, UploadError, UploadLoop,
    UploadPipeline, scan_dir,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

// =========================================================================
// Helpers
// =========================================================================

struct Fixture {
    _dir: TempDir,
    tracking: PathBuf,
    news: PathBuf,
    staging: PathBuf,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let tracking = dir.path().join("tracking");
    let news = dir.path().join("news");
    let staging = dir.path().join("upload");
    std::fs::create_dir_all(&tracking).unwrap();
    std::fs::create_dir_all(&news).unwrap();
    Fixture {
        _dir: dir,
        tracking,
        news,
        staging,
    }
}

impl Fixture {
    fn config(&self, max_files: usize) -> UploadConfig {
        UploadConfig {
            staging_dir: self.staging.clone(),
            max_files,
            max_bytes: 1024 * 1024,
            ..Default::default()
        }
    }

    fn pipeline<O: ObjectStore>(&self, store: Arc<O>, max_files: usize) -> UploadPipeline<O> {
        UploadPipeline::new(store, self.config(max_files))
            .watch(Category::Tracking, &self.tracking)
            .watch(Category::News, &self.news)
    }
}

/// Writes `n` small batch files spread over two date directories.
fn write_files(root: &Path, n: usize) {
    for i in 0..n {
        let day = root.join(if i % 2 == 0 { "2025-07-01" } else { "2025-07-02" });
        std::fs::create_dir_all(&day).unwrap();
        std::fs::write(day.join(format!("user-{i}.json")), format!("{{\"n\":{i}}}")).unwrap();
    }
}

fn count_files(root: &Path) -> usize {
    scan_dir(root).unwrap().len()
}

fn archive_entries(bytes: Vec<u8>) -> Vec<String> {
    let archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut names: Vec<_> = archive.file_names().map(str::to_string).collect();
    names.sort();
    names
}

fn staged(staging: &Path) -> usize {
    std::fs::read_dir(staging).map(|d| d.count()).unwrap_or(0)
}

// =========================================================================
// run_once()
// =========================================================================

#[tokio::test]
async fn test_run_once_101_files_over_threshold_ships_one_archive() {
    let fx = fixture();
    write_files(&fx.tracking, 101);
    let store = Arc::new(MemoryObjectStore::new());
    let pipeline = fx.pipeline(store.clone(), 100);

    let reports = pipeline.run_once().await;

    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert_eq!(report.category, Category::Tracking);
    assert_eq!(report.trigger, Trigger::Threshold);
    assert_eq!(report.files_archived, 101);
    assert_eq!(report.files_deleted, 101);
    assert!(report.key.starts_with("tracking/tracking_batch_"));
    assert!(report.key.ends_with(".zip"));

    assert_eq!(store.keys(), vec![report.key.clone()]);
    let entries = archive_entries(store.get(&report.key).unwrap());
    assert_eq!(entries.len(), 101);
    assert!(entries.contains(&"2025-07-01/user-0.json".to_string()));
    assert!(entries.contains(&"2025-07-02/user-1.json".to_string()));

    assert_eq!(count_files(&fx.tracking), 0);
    assert!(fx.tracking.exists(), "watched root is kept");
    assert!(!fx.tracking.join("2025-07-01").exists(), "empty day dirs are pruned");
    assert_eq!(staged(&fx.staging), 0, "staged archive removed");
}

#[tokio::test]
async fn test_run_once_below_threshold_ships_nothing() {
    let fx = fixture();
    write_files(&fx.news, 5);
    let store = Arc::new(MemoryObjectStore::new());
    let pipeline = fx.pipeline(store.clone(), 100);

    let reports = pipeline.run_once().await;

    assert!(reports.is_empty());
    assert!(store.is_empty());
    assert_eq!(count_files(&fx.news), 5);
}

#[tokio::test]
async fn test_run_once_byte_threshold_triggers() {
    let fx = fixture();
    std::fs::create_dir_all(fx.news.join("2025-07-01")).unwrap();
    std::fs::write(fx.news.join("2025-07-01/big.json"), vec![b'x'; 2048]).unwrap();
    let store = Arc::new(MemoryObjectStore::new());
    let pipeline = UploadPipeline::new(
        store.clone(),
        UploadConfig {
            max_bytes: 1024,
            ..fx.config(100)
        },
    )
    .watch(Category::News, &fx.news);

    let reports = pipeline.run_once().await;

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].bytes_archived, 2048);
    assert_eq!(count_files(&fx.news), 0);
}

#[tokio::test]
async fn test_run_once_upload_failure_keeps_sources() {
    let fx = fixture();
    write_files(&fx.tracking, 10);
    let store = Arc::new(MemoryObjectStore::new());
    store.set_available(false);
    let pipeline = fx.pipeline(store.clone(), 10);

    let reports = pipeline.run_once().await;

    assert!(reports.is_empty());
    assert_eq!(count_files(&fx.tracking), 10);
    assert_eq!(staged(&fx.staging), 0, "staged archive removed after failure");

    store.set_available(true);
    let retried = pipeline.run_once().await;

    assert_eq!(retried.len(), 1);
    assert_eq!(retried[0].files_archived, 10);
    assert_eq!(count_files(&fx.tracking), 0);
}

#[tokio::test]
async fn test_run_once_skips_in_progress_tmp_files() {
    let fx = fixture();
    write_files(&fx.news, 3);
    std::fs::write(fx.news.join("2025-07-01/user-9.json.tmp"), b"{partial").unwrap();
    let store = Arc::new(MemoryObjectStore::new());
    let pipeline = fx.pipeline(store.clone(), 3);

    let reports = pipeline.run_once().await;

    let entries = archive_entries(store.get(&reports[0].key).unwrap());
    assert_eq!(entries.len(), 3);
    assert!(fx.news.join("2025-07-01/user-9.json.tmp").exists());
}

// =========================================================================
// Daily rotation
// =========================================================================

#[tokio::test]
async fn test_run_at_after_midnight_rotates_below_threshold() {
    let fx = fixture();
    write_files(&fx.tracking, 2);
    write_files(&fx.news, 1);
    let store = Arc::new(MemoryObjectStore::new());
    let now = Local::now();
    let yesterday = (now - TimeDelta::days(1)).date_naive();
    let pipeline = UploadPipeline::starting_on(store.clone(), fx.config(100), yesterday)
        .watch(Category::Tracking, &fx.tracking)
        .watch(Category::News, &fx.news);

    let reports = pipeline.run_at(now).await;

    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.trigger == Trigger::Rotation));
    assert_eq!(count_files(&fx.tracking) + count_files(&fx.news), 0);

    write_files(&fx.news, 1);
    let again = pipeline.run_at(now).await;
    assert!(again.is_empty(), "one rotation per day");
}

#[tokio::test]
async fn test_run_at_failed_rotation_is_retried_next_pass() {
    let fx = fixture();
    write_files(&fx.news, 2);
    let store = Arc::new(MemoryObjectStore::new());
    store.set_available(false);
    let now = Local::now();
    let yesterday = (now - TimeDelta::days(1)).date_naive();
    let pipeline = UploadPipeline::starting_on(store.clone(), fx.config(100), yesterday)
        .watch(Category::News, &fx.news);

    assert!(pipeline.run_at(now).await.is_empty());
    store.set_available(true);
    let retried = pipeline.run_at(now).await;

    assert_eq!(retried.len(), 1);
    assert_eq!(retried[0].trigger, Trigger::Rotation);
    assert_eq!(count_files(&fx.news), 0);
}

#[tokio::test]
async fn test_run_at_rotation_disabled_waits_for_threshold() {
    let fx = fixture();
    write_files(&fx.news, 2);
    let store = Arc::new(MemoryObjectStore::new());
    let now = Local::now();
    let yesterday = (now - TimeDelta::days(1)).date_naive();
    let config = UploadConfig {
        daily_rotation: false,
        ..fx.config(100)
    };
    let pipeline =
        UploadPipeline::starting_on(store.clone(), config, yesterday).watch(Category::News, &fx.news);

    assert!(pipeline.run_at(now).await.is_empty());
    assert_eq!(count_files(&fx.news), 2);
}

// =========================================================================
// Source safety
// =========================================================================

/// Writes to a source path while the upload is in flight, like a flush
/// landing between archiving and deletion.
struct FlushingStore {
    inner: MemoryObjectStore,
    touch: PathBuf,
    fail: bool,
}

impl ObjectStore for FlushingStore {
    async fn put_object(&self, key: &str, body: Vec<u8>) -> Result<(), UploadError> {
        std::fs::write(&self.touch, b"{\"n\":\"fresh\"}").unwrap();
        if self.fail {
            return Err(UploadError::Upload {
                key: key.to_string(),
                reason: "store offline".into(),
            });
        }
        self.inner.put_object(key, body).await
    }
}

fn archive_entry(bytes: Vec<u8>, name: &str) -> String {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut body = String::new();
    std::io::Read::read_to_string(&mut archive.by_name(name).unwrap(), &mut body).unwrap();
    body
}

#[tokio::test]
async fn test_ship_write_during_upload_survives_deletion() {
    let fx = fixture();
    write_files(&fx.news, 4);
    let touched = fx.news.join("2025-07-01/user-0.json");
    let store = Arc::new(FlushingStore {
        inner: MemoryObjectStore::new(),
        touch: touched.clone(),
        fail: false,
    });
    let pipeline = fx.pipeline(store.clone(), 4);

    let reports = pipeline.run_once().await;

    assert_eq!(reports[0].files_archived, 4);
    assert_eq!(reports[0].files_deleted, 4);
    let shipped = store.inner.get(&reports[0].key).unwrap();
    assert_eq!(archive_entry(shipped, "2025-07-01/user-0.json"), "{\"n\":0}");
    assert_eq!(std::fs::read_to_string(&touched).unwrap(), "{\"n\":\"fresh\"}");
    assert_eq!(count_files(&fx.news), 1);
}

#[tokio::test]
async fn test_ship_failure_restores_claimed_beside_newer_file() {
    let fx = fixture();
    write_files(&fx.news, 2);
    let touched = fx.news.join("2025-07-01/user-0.json");
    let store = Arc::new(FlushingStore {
        inner: MemoryObjectStore::new(),
        touch: touched.clone(),
        fail: true,
    });
    let pipeline = fx.pipeline(store, 2);

    assert!(pipeline.run_once().await.is_empty());

    assert_eq!(std::fs::read_to_string(&touched).unwrap(), "{\"n\":\"fresh\"}");
    assert_eq!(
        std::fs::read_to_string(fx.news.join("2025-07-01/user-0-2.json")).unwrap(),
        "{\"n\":0}"
    );
    assert_eq!(count_files(&fx.news), 3);
}

#[tokio::test]
async fn test_run_once_releases_claims_left_by_interrupted_pass() {
    let fx = fixture();
    write_files(&fx.tracking, 2);
    std::fs::rename(
        fx.tracking.join("2025-07-01/user-0.json"),
        fx.tracking.join("2025-07-01/user-0.json.uploading"),
    )
    .unwrap();
    assert_eq!(count_files(&fx.tracking), 1);
    let store = Arc::new(MemoryObjectStore::new());
    let pipeline = fx.pipeline(store.clone(), 2);

    let reports = pipeline.run_once().await;

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].files_archived, 2);
    assert_eq!(count_files(&fx.tracking), 0);
}

// =========================================================================
// force_upload_all() / stats()
// =========================================================================

#[tokio::test]
async fn test_force_upload_all_ships_every_non_empty_category() {
    let fx = fixture();
    write_files(&fx.tracking, 1);
    write_files(&fx.news, 2);
    let store = Arc::new(MemoryObjectStore::new());
    let pipeline = fx.pipeline(store.clone(), 100);

    let reports = pipeline.force_upload_all().await.unwrap();

    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.trigger == Trigger::Forced));
    assert_eq!(store.len(), 2);
    assert!(store.keys().iter().any(|k| k.starts_with("news/news_batch_")));
    assert_eq!(pipeline.stats().await.unwrap().total_files(), 0);
}

#[tokio::test]
async fn test_force_upload_all_twice_in_one_second_uses_distinct_keys() {
    let fx = fixture();
    let store = Arc::new(MemoryObjectStore::new());
    let pipeline = fx.pipeline(store.clone(), 100);

    write_files(&fx.news, 1);
    pipeline.force_upload_all().await.unwrap();
    write_files(&fx.news, 1);
    pipeline.force_upload_all().await.unwrap();

    assert_eq!(store.len(), 2, "second archive must not overwrite the first");
}

#[tokio::test]
async fn test_force_upload_all_store_down_returns_error() {
    let fx = fixture();
    write_files(&fx.tracking, 1);
    let store = Arc::new(MemoryObjectStore::new());
    store.set_available(false);
    let pipeline = fx.pipeline(store, 100);

    let result = pipeline.force_upload_all().await;

    assert!(matches!(result, Err(UploadError::Upload { .. })));
    assert_eq!(count_files(&fx.tracking), 1);
}

#[tokio::test]
async fn test_stats_reports_pending_per_category() {
    let fx = fixture();
    write_files(&fx.tracking, 3);
    write_files(&fx.news, 1);
    let pipeline = fx.pipeline(Arc::new(MemoryObjectStore::new()), 100);

    let stats = pipeline.stats().await.unwrap();

    assert_eq!(stats.category(Category::Tracking).map(|c| c.files), Some(3));
    assert_eq!(stats.category(Category::News).map(|c| c.files), Some(1));
    assert_eq!(stats.total_files(), 4);
    assert!(stats.total_bytes() > 0);
    assert_eq!(stats.max_files, 100);
}

// =========================================================================
// UploadLoop
// =========================================================================

#[tokio::test]
async fn test_upload_loop_shutdown_runs_final_pass() {
    let fx = fixture();
    write_files(&fx.news, 2);
    let store = Arc::new(MemoryObjectStore::new());
    let pipeline = Arc::new(fx.pipeline(store.clone(), 2));
    let shutdown = CancellationToken::new();

    let handle = spawn_periodic(UploadLoop(pipeline), TickConfig::default(), &shutdown);
    assert_eq!(handle.name(), "upload");
    shutdown.cancel();
    handle.shutdown().await.unwrap();

    assert_eq!(store.len(), 1);
    assert_eq!(count_files(&fx.news), 0);
}

#[test]
fn test_archive_on_disk_is_readable_zip() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("news");
    write_files(&root, 2);
    let dest = dir.path().join("a.zip");
    let claimed = readtrack_upload::claim_files(&scan_dir(&root).unwrap()).unwrap();

    readtrack_upload::write_archive(&root, &claimed, &dest).unwrap();

    let archive = zip::ZipArchive::new(File::open(&dest).unwrap()).unwrap();
    assert_eq!(archive.len(), 2);
}
