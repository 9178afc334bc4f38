//! A simulated reading study.
//!
//! Boots the platform with in-memory session backends, lets a few
//! participants read for a while, and shuts down cleanly. Batch files land
//! under `lab-data/`, archives under `lab-data/objects/` (or the configured
//! object store).
//!
//! ```text
//! cargo run -p reading-lab [-- path/to/readtrack.toml]
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use readtrack::prelude::*;
use readtrack::{CloseReading, logging};

type Lab = RunningPlatform<MemoryTtlCache, MemorySessionStore, PlatformObjectStore>;

const PARTICIPANTS: usize = 3;
const ARTICLES: [&str; 3] = ["guid-climate", "guid-election", "guid-football"];

fn lab_config() -> Result<PlatformConfig, ReadtrackError> {
    if let Some(path) = std::env::args().nth(1) {
        return PlatformConfig::load(path);
    }
    let mut config = PlatformConfig::default();
    config.telemetry.data_dir = "lab-data".into();
    config.telemetry.flush_interval_secs = 2;
    config.upload.max_files = 2;
    config.upload.scan_interval_secs = 5;
    config.object_store.directory = "lab-data/objects".into();
    config.logging.level = "info,readtrack=debug".into();
    Ok(config)
}

fn gaze_batch(n: usize) -> TrackingData {
    let mut rng = rand::rng();
    TrackingData {
        eye_events: (0..n)
            .map(|i| EyeEvent {
                id: format!("word-{i}"),
                x: rng.random_range(0.0..1280.0),
                y: rng.random_range(0.0..800.0),
            })
            .collect(),
        scroll_events: vec![ScrollEvent {
            timestamp: Utc::now(),
            delta_y: rng.random_range(-120.0..120.0),
        }],
        ..Default::default()
    }
}

async fn participant(lab: Arc<Lab>, n: usize) -> Result<(), ReadtrackError> {
    let user = UserId::new_v4();
    let login = lab.login(user).await?;

    let list = lab.open_list_session(user, OpenReading::default()).await?;
    lab.record_news_view(user, ARTICLES.iter().map(|s| s.to_string()).collect())?;
    lab.close_reading_session(
        user,
        list.id,
        CloseReading {
            end_time: Utc::now(),
            data: None,
        },
    )
    .await?;

    let article = ArticleId::new(ARTICLES[n % ARTICLES.len()])?;
    let reading = lab
        .open_article_session(user, article, OpenReading::default())
        .await?;
    for _ in 0..5 {
        lab.submit(
            user,
            reading.id,
            Submission {
                data: Some(gaze_batch(20)),
                ..Default::default()
            },
        )?;
        lab.heartbeat(login.id, Utc::now()).await?;
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    lab.close_reading_session(
        user,
        reading.id,
        CloseReading {
            end_time: Utc::now(),
            data: Some(gaze_batch(5)),
        },
    )
    .await?;

    lab.logout(login.id).await?;
    tracing::info!(participant = n, %user, "participant finished");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), ReadtrackError> {
    let config = lab_config()?;
    logging::init(&config.logging)?;

    let object_store = Arc::new(PlatformObjectStore::from_config(&config.object_store)?);
    let lab = Arc::new(
        Platform::builder()
            .config(config)
            .build(
                Arc::new(MemoryTtlCache::new()),
                Arc::new(MemorySessionStore::new()),
                object_store,
            )?
            .start(),
    );

    let participants: Vec<_> = (0..PARTICIPANTS)
        .map(|n| tokio::spawn(participant(lab.clone(), n)))
        .collect();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("interrupted"),
        _ = async {
            for p in participants {
                match p.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::warn!(error = %e, "participant failed"),
                    Err(e) => tracing::warn!(error = %e, "participant task panicked"),
                }
            }
        } => {}
    }

    let stats = lab.upload_stats().await?;
    tracing::info!(
        files = stats.total_files(),
        bytes = stats.total_bytes(),
        "pending before shutdown"
    );

    match Arc::try_unwrap(lab) {
        Ok(lab) => lab.shutdown().await,
        Err(_) => {
            tracing::warn!("participants still running, flushing without stopping loops");
            Ok(())
        }
    }
}
