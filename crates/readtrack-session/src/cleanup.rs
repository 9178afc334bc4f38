//! The reconciliation sweep.
//!
//! Cache entries expire without telling anyone. When a user simply closes
//! the browser, their login session stays active in the store forever
//! unless something goes looking. [`SessionCleanup::sweep`] is that
//! something: it asks the store (never the cache) for active sessions that
//! have been silent too long and ends each one, closing its reading
//! sessions first.
//!
//! Logout uses the same cascade through [`SessionCleanup::end_with_cascade`].
//!
//! # Failure isolation
//!
//! One session failing never stops the sweep. If a session's reading
//! sessions cannot be listed or closed, the login session is left active
//! so the next sweep finds it again and retries the whole cascade. Every
//! step is idempotent, so repeating it is harmless.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use readtrack_model::LoginSession;
use readtrack_tick::PeriodicTask;
use tracing::{debug, info, warn};

use crate::bounded::bounded;
use crate::reading::CloseOutcome;
use crate::{
    CleanupConfig, ReadingSessionManager, SessionCache, SessionError, SessionStore, TtlCache,
};

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Stale login sessions found.
    pub expired: usize,
    /// Login sessions ended by this sweep.
    pub login_ended: usize,
    /// Reading sessions closed by this sweep.
    pub reading_closed: usize,
    /// Login sessions whose cascade failed and will be retried.
    pub failed: usize,
}

/// Ends abandoned login sessions and their reading sessions.
pub struct SessionCleanup<C, S> {
    sessions: Arc<SessionCache<C, S>>,
    reading: Arc<ReadingSessionManager<S>>,
    store: Arc<S>,
    config: CleanupConfig,
}

impl<C: TtlCache, S: SessionStore> SessionCleanup<C, S> {
    pub fn new(
        sessions: Arc<SessionCache<C, S>>,
        reading: Arc<ReadingSessionManager<S>>,
        store: Arc<S>,
        config: CleanupConfig,
    ) -> Self {
        Self {
            sessions,
            reading,
            store,
            config,
        }
    }

    pub fn config(&self) -> &CleanupConfig {
        &self.config
    }

    /// One reconciliation pass.
    ///
    /// # Errors
    /// Only if the store cannot list expired sessions. Per-session failures
    /// are counted in [`CleanupReport::failed`].
    pub async fn sweep(&self) -> Result<CleanupReport, SessionError> {
        let expired = bounded(
            "store.expired_login_sessions",
            self.config.call_timeout,
            self.store
                .expired_login_sessions(self.config.heartbeat_timeout),
        )
        .await?;

        let mut report = CleanupReport {
            expired: expired.len(),
            ..Default::default()
        };

        for session in &expired {
            match self.end_with_cascade(session).await {
                Ok(closed) => {
                    report.login_ended += 1;
                    report.reading_closed += closed;
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        session_id = %session.id,
                        user = %session.user_id,
                        error = %e,
                        "cleanup of expired session failed, will retry"
                    );
                }
            }
        }

        if report.expired > 0 {
            info!(
                expired = report.expired,
                login_ended = report.login_ended,
                reading_closed = report.reading_closed,
                failed = report.failed,
                "cleanup sweep finished"
            );
        } else {
            debug!("cleanup sweep found nothing");
        }
        Ok(report)
    }

    /// Closes the user's open reading sessions, then ends `login`.
    ///
    /// When the user has already logged in again, reading sessions opened
    /// under the newer login are left alone: only those started before the
    /// earliest live successor are closed.
    ///
    /// Returns how many reading sessions this call closed.
    pub async fn end_with_cascade(&self, login: &LoginSession) -> Result<usize, SessionError> {
        let user = login.user_id;
        let cutoff = self.successor_start(login).await?;
        let open = self.reading.get_user_active_sessions(user).await?;

        let mut closed = 0;
        for reading in open
            .iter()
            .filter(|r| cutoff.is_none_or(|cutoff| r.start_time < cutoff))
        {
            if self.reading.force_end_session(reading.id).await? == CloseOutcome::Closed {
                closed += 1;
            }
        }

        self.sessions.end_session(login.id).await?;
        debug!(session_id = %login.id, %user, reading_closed = closed, "cascade complete");
        Ok(closed)
    }

    /// Start time of the earliest other live login of the same user.
    ///
    /// Liveness uses the login TTL, the same window that makes the session
    /// cache refuse a second login, not the sweep's own timeout.
    async fn successor_start(
        &self,
        login: &LoginSession,
    ) -> Result<Option<DateTime<Utc>>, SessionError> {
        let live = bounded(
            "store.live_login_sessions",
            self.config.call_timeout,
            self.store
                .live_login_sessions(login.user_id, self.sessions.config().heartbeat_ttl),
        )
        .await?;
        Ok(live
            .iter()
            .filter(|s| s.id != login.id)
            .map(|s| s.start_time)
            .min())
    }
}

/// Runs [`SessionCleanup::sweep`] as a [`PeriodicTask`]. Shutdown performs
/// one last sweep.
pub struct CleanupLoop<C, S>(pub Arc<SessionCleanup<C, S>>);

impl<C: TtlCache, S: SessionStore> PeriodicTask for CleanupLoop<C, S> {
    fn name(&self) -> &'static str {
        "session-cleanup"
    }

    async fn tick(&mut self) {
        if let Err(e) = self.0.sweep().await {
            warn!(error = %e, "cleanup sweep failed");
        }
    }
}
