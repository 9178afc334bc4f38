//! Integration tests for the telemetry buffer against a real directory.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Local, TimeDelta, Utc};
use readtrack_model::{
    BatchFile, Category, EyeEvent, NewsRecord, ReadingSessionId, TelemetryRecord, TrackingData,
    UserId,
};
use readtrack_telemetry::{FlushLoop, TelemetryBuffer, TelemetryError};
use readtrack_tick::{TickConfig, spawn_periodic};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

// =========================================================================
// Helpers
// =========================================================================

fn tracking(user: UserId, n: usize) -> TelemetryRecord {
    TelemetryRecord::new(
        user,
        ReadingSessionId::new_v4(),
        Utc::now(),
        TrackingData {
            eye_events: vec![EyeEvent {
                id: format!("w-{n}"),
                x: n as f32,
                y: 0.0,
            }],
            ..Default::default()
        },
    )
}

fn news(guid: impl Into<String>) -> NewsRecord {
    NewsRecord {
        start_time: Utc::now(),
        news_guids: vec![guid.into()],
    }
}

fn read<R: serde::de::DeserializeOwned>(path: &Path) -> BatchFile<R> {
    let bytes = std::fs::read(path).expect("batch file should exist");
    serde_json::from_slice(&bytes).expect("batch file should decode")
}

fn files_under(dir: &Path) -> Vec<std::path::PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(d) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&d) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                out.push(path);
            }
        }
    }
    out.sort();
    out
}

fn today(now: DateTime<Utc>) -> chrono::NaiveDate {
    now.with_timezone(&Local).date_naive()
}

// =========================================================================
// flush()
// =========================================================================

#[tokio::test]
async fn test_flush_120_records_3_users_writes_3_files() {
    let dir = TempDir::new().unwrap();
    let buffer = TelemetryBuffer::new(Category::Tracking, dir.path().join("tracking"));
    let users: Vec<_> = (0..3).map(|_| UserId::new_v4()).collect();
    for i in 0..120 {
        let user = users[i % 3];
        buffer.add_record(user, tracking(user, i)).unwrap();
    }
    let now = Utc::now();

    let report = buffer.flush_at(now).await;

    assert_eq!(report.users_written, 3);
    assert_eq!(report.records_written, 120);
    assert_eq!(report.users_failed, 0);
    assert_eq!(buffer.pending_len(), 0);
    assert_eq!(files_under(dir.path()).len(), 3);

    for user in &users {
        let file: BatchFile<TelemetryRecord> = read(&buffer.file_path(*user, today(now)));
        assert_eq!(file.records.len(), 40);
        assert!(file.records.iter().all(|r| r.user_id == *user));
        assert_eq!(file.flush_time, now);
    }
}

#[tokio::test]
async fn test_flush_keeps_per_user_arrival_order() {
    let dir = TempDir::new().unwrap();
    let buffer = TelemetryBuffer::new(Category::Tracking, dir.path());
    let user = UserId::new_v4();
    for i in 0..10 {
        buffer.add_record(user, tracking(user, i)).unwrap();
    }
    let now = Utc::now();

    buffer.flush_at(now).await;

    let file: BatchFile<TelemetryRecord> = read(&buffer.file_path(user, today(now)));
    let ids: Vec<_> = file
        .records
        .iter()
        .map(|r| r.data.eye_events[0].id.clone())
        .collect();
    let expected: Vec<_> = (0..10).map(|i| format!("w-{i}")).collect();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn test_flush_twice_appends_to_existing_file() {
    let dir = TempDir::new().unwrap();
    let buffer = TelemetryBuffer::new(Category::News, dir.path());
    let user = UserId::new_v4();
    let t0 = Utc::now();
    let t1 = t0 + TimeDelta::seconds(30);

    buffer.add_record(user, news("a")).unwrap();
    buffer.add_record(user, news("b")).unwrap();
    buffer.flush_at(t0).await;
    buffer.add_record(user, news("c")).unwrap();
    buffer.flush_at(t1).await;

    let file: BatchFile<NewsRecord> = read(&buffer.file_path(user, today(t0)));
    let guids: Vec<_> = file.records.iter().map(|r| r.news_guids[0].as_str()).collect();
    assert_eq!(guids, ["a", "b", "c"]);
    assert_eq!(file.flush_time, t1);
}

#[tokio::test]
async fn test_flush_empty_buffer_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let buffer: TelemetryBuffer<NewsRecord> = TelemetryBuffer::new(Category::News, dir.path());

    let report = buffer.flush().await;

    assert_eq!(report, Default::default());
    assert!(files_under(dir.path()).is_empty());
}

#[tokio::test]
async fn test_flush_leaves_no_tmp_files() {
    let dir = TempDir::new().unwrap();
    let buffer = TelemetryBuffer::new(Category::News, dir.path());
    buffer.add_record(UserId::new_v4(), news("a")).unwrap();

    buffer.flush().await;

    assert!(
        files_under(dir.path())
            .iter()
            .all(|p| p.extension().is_some_and(|e| e == "json"))
    );
}

#[tokio::test]
async fn test_flush_corrupt_file_is_moved_aside() {
    let dir = TempDir::new().unwrap();
    let buffer = TelemetryBuffer::new(Category::News, dir.path());
    let user = UserId::new_v4();
    let now = Utc::now();
    let path = buffer.file_path(user, today(now));
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, b"{ not json").unwrap();

    buffer.add_record(user, news("fresh")).unwrap();
    let report = buffer.flush_at(now).await;

    assert_eq!(report.users_written, 1);
    let file: BatchFile<NewsRecord> = read(&path);
    assert_eq!(file.records.len(), 1);
    let aside: Vec<_> = files_under(dir.path())
        .into_iter()
        .filter(|p| p.to_string_lossy().contains(".corrupt-"))
        .collect();
    assert_eq!(aside.len(), 1);
    assert_eq!(std::fs::read(&aside[0]).unwrap(), b"{ not json");
}

#[tokio::test]
async fn test_flush_write_failure_requeues_and_retries() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("news");
    // A plain file where the category root should be makes every write fail.
    std::fs::write(&root, b"").unwrap();
    let buffer = TelemetryBuffer::new(Category::News, &root);
    let user = UserId::new_v4();
    buffer.add_record(user, news("first")).unwrap();

    let failed = buffer.flush().await;

    assert_eq!(failed.users_failed, 1);
    assert_eq!(buffer.pending_len(), 1);

    buffer.add_record(user, news("second")).unwrap();
    std::fs::remove_file(&root).unwrap();
    let now = Utc::now();
    let retried = buffer.flush_at(now).await;

    assert_eq!(retried.records_written, 2);
    let file: BatchFile<NewsRecord> = read(&buffer.file_path(user, today(now)));
    let guids: Vec<_> = file.records.iter().map(|r| r.news_guids[0].as_str()).collect();
    assert_eq!(guids, ["first", "second"]);
}

// =========================================================================
// add_record()
// =========================================================================

#[tokio::test]
async fn test_add_record_without_events_is_rejected() {
    let buffer = TelemetryBuffer::new(Category::Tracking, "/unused");
    let user = UserId::new_v4();
    let empty = TelemetryRecord::new(
        user,
        ReadingSessionId::new_v4(),
        Utc::now(),
        TrackingData::default(),
    );

    let result = buffer.add_record(user, empty);

    assert!(matches!(result, Err(TelemetryError::EmptyRecord)));
}

// =========================================================================
// drain()
// =========================================================================

#[tokio::test]
async fn test_drain_persists_everything_then_closes() {
    let dir = TempDir::new().unwrap();
    let buffer = TelemetryBuffer::new(Category::News, dir.path());
    let user = UserId::new_v4();
    for i in 0..25 {
        buffer.add_record(user, news(format!("g-{i}"))).unwrap();
    }

    let report = buffer.drain().await;

    assert_eq!(report.records_written, 25);
    assert!(buffer.is_closed());
    assert!(matches!(
        buffer.add_record(user, news("late")),
        Err(TelemetryError::Closed)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_with_flushes_lose_and_duplicate_nothing() {
    let dir = TempDir::new().unwrap();
    let buffer = Arc::new(TelemetryBuffer::new(Category::News, dir.path()));
    let users: Vec<_> = (0..4).map(|_| UserId::new_v4()).collect();

    let writers: Vec<_> = users
        .iter()
        .map(|user| {
            let buffer = buffer.clone();
            let user = *user;
            tokio::spawn(async move {
                for i in 0..250 {
                    buffer.add_record(user, news(format!("{user}-{i}"))).unwrap();
                    if i % 50 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            })
        })
        .collect();
    let flusher = {
        let buffer = buffer.clone();
        tokio::spawn(async move {
            for _ in 0..20 {
                buffer.flush().await;
                tokio::task::yield_now().await;
            }
        })
    };
    for w in writers {
        w.await.unwrap();
    }
    flusher.await.unwrap();
    buffer.drain().await;

    let mut seen = HashSet::new();
    let mut total = 0;
    for path in files_under(dir.path()) {
        let file: BatchFile<NewsRecord> = read(&path);
        for record in file.records {
            total += 1;
            seen.insert(record.news_guids[0].clone());
        }
    }
    assert_eq!(total, 1000, "every record written exactly once");
    assert_eq!(seen.len(), 1000);
    assert_eq!(buffer.pending_len(), 0);
    // One file per user, two if the test straddled midnight.
    assert!(files_under(dir.path()).len() >= users.len());
}

// =========================================================================
// FlushLoop
// =========================================================================

#[tokio::test]
async fn test_flush_loop_shutdown_drains_buffer() {
    let dir = TempDir::new().unwrap();
    let buffer = Arc::new(TelemetryBuffer::new(Category::News, dir.path()));
    let shutdown = CancellationToken::new();
    let handle = spawn_periodic(FlushLoop(buffer.clone()), TickConfig::default(), &shutdown);
    assert_eq!(handle.name(), "news-flush");

    buffer.add_record(UserId::new_v4(), news("x")).unwrap();
    handle.shutdown().await.unwrap();

    assert_eq!(buffer.pending_len(), 0);
    assert!(buffer.is_closed());
    assert_eq!(files_under(dir.path()).len(), 1);
}
