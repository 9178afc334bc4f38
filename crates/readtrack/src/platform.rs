//! `Platform` builder, background loops, and the request-path API.
//!
//! This is the entry point for running readtrack. It ties together all the
//! layers: sessions → telemetry → uploads.
//!
//! ```text
//!                 ┌──────────── RunningPlatform ────────────┐
//! request path →  │ login / heartbeat / logout              │ → SessionCache, SessionCleanup
//!                 │ open / close reading session            │ → ReadingSessionManager
//!                 │ submit / record_news_view               │ → TelemetryBuffer (tracking, news)
//!                 │ upload_stats / force_upload             │ → UploadPipeline
//!                 └─────────────────────────────────────────┘
//! loops:  tracking-flush, news-flush, session-cleanup, upload
//! ```

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use readtrack_model::{
    ArticleId, Category, LoginSession, LoginSessionId, NewsRecord, ReadingSession,
    ReadingSessionId, TelemetryRecord, TrackingData, UserId,
};
use readtrack_session::{
    CleanupLoop, HeartbeatStatus, NewLogin, OpenReading, ReadingSessionManager, SessionCache,
    SessionCleanup, SessionStore, TtlCache, check_close,
};
use readtrack_telemetry::{FlushLoop, TelemetryBuffer};
use readtrack_tick::{LoopHandle, TickConfig, spawn_periodic};
use readtrack_upload::{
    DirectoryObjectStore, HttpObjectStore, HttpStoreConfig, ObjectStore, ShipReport, UploadError,
    UploadLoop, UploadPipeline, UploadStats,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::ReadtrackError;
use crate::config::{ObjectStoreSection, PlatformConfig};

/// Builder for configuring a [`Platform`].
///
/// # Example
///
/// ```rust,ignore
/// let platform = Platform::builder()
///     .config(PlatformConfig::load("readtrack.toml")?)
///     .build(cache, store, object_store)?;
/// let running = platform.start();
/// // ... serve requests ...
/// running.shutdown().await?;
/// ```
#[derive(Debug, Default)]
pub struct PlatformBuilder {
    config: PlatformConfig,
}

impl PlatformBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: PlatformConfig) -> Self {
        self.config = config;
        self
    }

    /// Validates the configuration, creates the data directories, and wires
    /// the components around the given backends.
    pub fn build<C, S, O>(
        self,
        cache: Arc<C>,
        store: Arc<S>,
        object_store: Arc<O>,
    ) -> Result<Platform<C, S, O>, ReadtrackError>
    where
        C: TtlCache,
        S: SessionStore,
        O: ObjectStore,
    {
        let config = self.config;
        config.validate()?;

        let tracking_dir = config.category_dir(Category::Tracking);
        let news_dir = config.category_dir(Category::News);
        let upload_config = config.upload_config();
        for dir in [&tracking_dir, &news_dir, &upload_config.staging_dir] {
            create_dir(dir)?;
        }

        let sessions = Arc::new(SessionCache::new(
            cache,
            store.clone(),
            config.session_config(),
        ));
        let reading = Arc::new(ReadingSessionManager::new(
            store.clone(),
            config.reading_config(),
        ));
        let cleanup = Arc::new(SessionCleanup::new(
            sessions.clone(),
            reading.clone(),
            store,
            config.cleanup_config(),
        ));
        let tracking = Arc::new(TelemetryBuffer::new(Category::Tracking, &tracking_dir));
        let news = Arc::new(TelemetryBuffer::new(Category::News, &news_dir));
        let upload = Arc::new(
            UploadPipeline::new(object_store, upload_config)
                .watch(Category::Tracking, tracking_dir)
                .watch(Category::News, news_dir),
        );

        info!(data_dir = %config.telemetry.data_dir.display(), "platform built");
        Ok(Platform {
            config,
            sessions,
            reading,
            cleanup,
            tracking,
            news,
            upload,
        })
    }
}

fn create_dir(dir: &Path) -> Result<(), ReadtrackError> {
    std::fs::create_dir_all(dir).map_err(|e| ReadtrackError::Io {
        path: dir.to_path_buf(),
        source: e,
    })
}

/// The wired components, not yet running.
pub struct Platform<C, S, O> {
    config: PlatformConfig,
    sessions: Arc<SessionCache<C, S>>,
    reading: Arc<ReadingSessionManager<S>>,
    cleanup: Arc<SessionCleanup<C, S>>,
    tracking: Arc<TelemetryBuffer<TelemetryRecord>>,
    news: Arc<TelemetryBuffer<NewsRecord>>,
    upload: Arc<UploadPipeline<O>>,
}

impl Platform<(), (), ()> {
    /// Creates a new builder.
    pub fn builder() -> PlatformBuilder {
        PlatformBuilder::new()
    }
}

impl<C: TtlCache, S: SessionStore, O: ObjectStore> Platform<C, S, O> {
    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    /// Spawns the background loops on the current runtime.
    ///
    /// # Panics
    /// Outside a Tokio runtime.
    pub fn start(self) -> RunningPlatform<C, S, O> {
        let shutdown = CancellationToken::new();
        let flush = TickConfig::every(self.config.flush_interval());

        let tracking_flush =
            spawn_periodic(FlushLoop(self.tracking.clone()), flush.clone(), &shutdown);
        let news_flush = spawn_periodic(FlushLoop(self.news.clone()), flush, &shutdown);
        let cleanup = spawn_periodic(
            CleanupLoop(self.cleanup.clone()),
            TickConfig::every(self.cleanup.config().interval),
            &shutdown,
        );
        let upload = if self.config.upload.enabled {
            Some(spawn_periodic(
                UploadLoop(self.upload.clone()),
                TickConfig::every(self.upload.config().scan_interval),
                &shutdown,
            ))
        } else {
            info!("upload pipeline disabled");
            None
        };

        info!("platform started");
        RunningPlatform {
            platform: self,
            shutdown,
            loops: Loops {
                tracking_flush,
                news_flush,
                cleanup,
                upload,
            },
        }
    }
}

struct Loops {
    tracking_flush: LoopHandle,
    news_flush: LoopHandle,
    cleanup: LoopHandle,
    upload: Option<LoopHandle>,
}

/// What a data submission carries.
#[derive(Debug, Clone, Default)]
pub struct Submission {
    /// Client time of the batch; the server's clock when absent.
    pub timestamp: Option<DateTime<Utc>>,
    /// A keep-alive with no data.
    pub ping: bool,
    pub data: Option<TrackingData>,
}

/// Reply to a [`Submission`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitAck {
    Pong,
    Accepted {
        session_id: ReadingSessionId,
        events: usize,
    },
}

/// Closing a reading session, optionally with a last batch of events.
#[derive(Debug, Clone)]
pub struct CloseReading {
    pub end_time: DateTime<Utc>,
    pub data: Option<TrackingData>,
}

/// A started [`Platform`]: the request-path API plus ordered shutdown.
pub struct RunningPlatform<C, S, O> {
    platform: Platform<C, S, O>,
    shutdown: CancellationToken,
    loops: Loops,
}

impl<C: TtlCache, S: SessionStore, O: ObjectStore> RunningPlatform<C, S, O> {
    // -- login sessions ---------------------------------------------------

    /// Logs a user in under the configured single-session policy.
    ///
    /// When the policy evicts an existing session, that session's reading
    /// sessions are closed here as well.
    pub async fn login(&self, user: UserId) -> Result<LoginSession, ReadtrackError> {
        let NewLogin { session, evicted } = self.platform.sessions.create_session(user).await?;

        if let Some(old) = evicted {
            match self.platform.cleanup.end_with_cascade(&old).await {
                Ok(closed) => debug!(%user, session_id = %old.id, closed, "evicted session closed"),
                Err(e) => warn!(
                    %user,
                    session_id = %old.id,
                    error = %e,
                    "reading sessions of evicted login were not closed"
                ),
            }
        }
        Ok(session)
    }

    pub async fn heartbeat(
        &self,
        id: LoginSessionId,
        at: DateTime<Utc>,
    ) -> Result<HeartbeatStatus, ReadtrackError> {
        Ok(self.platform.sessions.heartbeat(id, at).await?)
    }

    /// Ends a login session and closes its reading sessions. Returns how
    /// many reading sessions were closed. Safe to repeat.
    pub async fn logout(&self, id: LoginSessionId) -> Result<usize, ReadtrackError> {
        let login = self.platform.sessions.get_session(id).await?;
        let closed = self.platform.cleanup.end_with_cascade(&login).await?;
        info!(session_id = %id, user = %login.user_id, closed, "logged out");
        Ok(closed)
    }

    // -- reading sessions -------------------------------------------------

    /// Opens a session on today's article list.
    pub async fn open_list_session(
        &self,
        user: UserId,
        req: OpenReading,
    ) -> Result<ReadingSession, ReadtrackError> {
        Ok(self.platform.reading.create_for_list(user, req).await?)
    }

    pub async fn open_article_session(
        &self,
        user: UserId,
        article: ArticleId,
        req: OpenReading,
    ) -> Result<ReadingSession, ReadtrackError> {
        Ok(self.platform.reading.create_for_feed(user, article, req).await?)
    }

    /// Closes a reading session on the client's request. Events sent with
    /// the close are buffered before the session is closed, and only once
    /// the close has passed its checks, so a rejected close buffers nothing.
    ///
    /// # Errors
    /// [`ReadtrackError::InvalidRequest`] if the session belongs to another
    /// user; otherwise as [`ReadingSessionManager::end_session`].
    pub async fn close_reading_session(
        &self,
        user: UserId,
        id: ReadingSessionId,
        req: CloseReading,
    ) -> Result<ReadingSession, ReadtrackError> {
        let session = self.platform.reading.get_session(id).await?;
        check_owner(&session, user)?;
        check_close(&session, req.end_time)?;

        if let Some(data) = req.data.filter(|d| !d.is_empty()) {
            let record = TelemetryRecord::new(user, id, req.end_time, data);
            self.platform.tracking.add_record(user, record)?;
        }
        Ok(self.platform.reading.end_session(id, req.end_time).await?)
    }

    // -- telemetry --------------------------------------------------------

    /// Accepts a data submission for a reading session.
    ///
    /// A ping is answered without touching the buffer. Anything else must
    /// carry at least one event.
    pub fn submit(
        &self,
        user: UserId,
        session_id: ReadingSessionId,
        submission: Submission,
    ) -> Result<SubmitAck, ReadtrackError> {
        if submission.ping {
            return Ok(SubmitAck::Pong);
        }
        let Some(data) = submission.data.filter(|d| !d.is_empty()) else {
            return Err(ReadtrackError::InvalidRequest(
                "submission must be a ping or carry tracking data".to_string(),
            ));
        };

        let events = data.total_events();
        let timestamp = submission.timestamp.unwrap_or_else(Utc::now);
        self.platform
            .tracking
            .add_record(user, TelemetryRecord::new(user, session_id, timestamp, data))?;
        Ok(SubmitAck::Accepted { session_id, events })
    }

    /// Records which news items were shown to `user`.
    pub fn record_news_view(&self, user: UserId, news_guids: Vec<String>) -> Result<(), ReadtrackError> {
        let record = NewsRecord {
            start_time: Utc::now(),
            news_guids,
        };
        Ok(self.platform.news.add_record(user, record)?)
    }

    // -- uploads ----------------------------------------------------------

    pub async fn upload_stats(&self) -> Result<UploadStats, ReadtrackError> {
        Ok(self.platform.upload.stats().await?)
    }

    /// Flushes both buffers, then ships every category regardless of
    /// thresholds.
    pub async fn force_upload(&self) -> Result<Vec<ShipReport>, ReadtrackError> {
        self.platform.tracking.flush().await;
        self.platform.news.flush().await;
        Ok(self.platform.upload.force_upload_all().await?)
    }

    // -- components -------------------------------------------------------

    pub fn config(&self) -> &PlatformConfig {
        &self.platform.config
    }

    pub fn sessions(&self) -> &SessionCache<C, S> {
        &self.platform.sessions
    }

    pub fn reading(&self) -> &ReadingSessionManager<S> {
        &self.platform.reading
    }

    pub fn cleanup(&self) -> &SessionCleanup<C, S> {
        &self.platform.cleanup
    }

    pub fn tracking(&self) -> &Arc<TelemetryBuffer<TelemetryRecord>> {
        &self.platform.tracking
    }

    pub fn news(&self) -> &Arc<TelemetryBuffer<NewsRecord>> {
        &self.platform.news
    }

    pub fn upload(&self) -> &UploadPipeline<O> {
        &self.platform.upload
    }

    /// A token cancelled when [`shutdown`](Self::shutdown) completes, for
    /// tasks that should stop with the platform.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    /// Stops the loops in dependency order: both telemetry buffers drain to
    /// disk, the cleanup loop runs a last sweep, and then the upload loop
    /// runs a last pass over the freshly flushed files.
    ///
    /// Every loop is stopped even if an earlier one failed; the first
    /// failure is returned.
    pub async fn shutdown(self) -> Result<(), ReadtrackError> {
        info!("platform shutting down");
        let Loops {
            tracking_flush,
            news_flush,
            cleanup,
            upload,
        } = self.loops;

        let mut first_error = None;
        for handle in [tracking_flush, news_flush, cleanup].into_iter().chain(upload) {
            let task = handle.name();
            match handle.shutdown().await {
                Ok(metrics) => debug!(task, runs = metrics.total_ticks, "loop stopped"),
                Err(e) => {
                    error!(task, error = %e, "loop panicked");
                    first_error.get_or_insert(ReadtrackError::Join { task, source: e });
                }
            }
        }
        self.shutdown.cancel();

        match first_error {
            Some(e) => Err(e),
            None => {
                info!("platform stopped");
                Ok(())
            }
        }
    }
}

fn check_owner(session: &ReadingSession, user: UserId) -> Result<(), ReadtrackError> {
    if session.user_id == user {
        Ok(())
    } else {
        Err(ReadtrackError::InvalidRequest(format!(
            "reading session {} does not belong to user {user}",
            session.id
        )))
    }
}

// ---------------------------------------------------------------------------
// PlatformObjectStore
// ---------------------------------------------------------------------------

/// The object store selected by `[object_store]`: HTTP when an endpoint is
/// configured, a local directory otherwise.
pub enum PlatformObjectStore {
    Http(HttpObjectStore),
    Directory(DirectoryObjectStore),
}

impl PlatformObjectStore {
    pub fn from_config(config: &ObjectStoreSection) -> Result<Self, ReadtrackError> {
        match &config.endpoint {
            Some(endpoint) => {
                let store = HttpObjectStore::new(HttpStoreConfig {
                    endpoint: endpoint.clone(),
                    bucket: config.bucket.clone(),
                    token: config.token.clone(),
                    timeout: std::time::Duration::from_secs(config.timeout_secs),
                })?;
                info!(%endpoint, bucket = %config.bucket, "uploading to HTTP object store");
                Ok(Self::Http(store))
            }
            None => {
                info!(dir = %config.directory.display(), "uploading to local directory");
                Ok(Self::Directory(DirectoryObjectStore::new(&config.directory)))
            }
        }
    }
}

impl ObjectStore for PlatformObjectStore {
    async fn put_object(&self, key: &str, body: Vec<u8>) -> Result<(), UploadError> {
        match self {
            Self::Http(store) => store.put_object(key, body).await,
            Self::Directory(store) => store.put_object(key, body).await,
        }
    }
}
