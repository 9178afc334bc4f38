//! Reading sessions: one interval of attention per article or list view.

use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use readtrack_model::{ArticleId, DeviceInfo, ReadingSession, ReadingSessionId, UserId};
use tracing::{debug, info};

use crate::bounded::bounded;
use crate::store::ReadingClose;
use crate::{ReadingConfig, SessionError, SessionStore};

/// Parameters for opening a reading session.
#[derive(Debug, Clone, Default)]
pub struct OpenReading {
    /// Client-side start time. Defaults to now.
    pub start_time: Option<DateTime<Utc>>,
    pub device_info: Option<DeviceInfo>,
}

/// What a forced close did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    Closed,
    AlreadyClosed,
}

/// Creates and closes reading sessions against the store.
pub struct ReadingSessionManager<S> {
    store: Arc<S>,
    config: ReadingConfig,
}

impl<S: SessionStore> ReadingSessionManager<S> {
    pub fn new(store: Arc<S>, config: ReadingConfig) -> Self {
        Self { store, config }
    }

    /// Opens a session on the article list.
    ///
    /// The article id is the synthetic per-day list id for the local date
    /// of the start time.
    pub async fn create_for_list(
        &self,
        user: UserId,
        req: OpenReading,
    ) -> Result<ReadingSession, SessionError> {
        let start_time = req.start_time.unwrap_or_else(Utc::now);
        let day = start_time.with_timezone(&Local).date_naive();
        let article_id = ArticleId::daily_list(&self.config.list_prefix, day);
        self.create(user, article_id, start_time, req.device_info)
            .await
    }

    /// Opens a session on one article.
    pub async fn create_for_feed(
        &self,
        user: UserId,
        article_id: ArticleId,
        req: OpenReading,
    ) -> Result<ReadingSession, SessionError> {
        let start_time = req.start_time.unwrap_or_else(Utc::now);
        self.create(user, article_id, start_time, req.device_info)
            .await
    }

    /// Closes a session on the client's request.
    ///
    /// # Errors
    /// - [`SessionError::ReadingSessionNotFound`] for an unknown id.
    /// - [`SessionError::AlreadyEnded`] if it is already closed. Use
    ///   [`force_end_session`](Self::force_end_session) for an idempotent close.
    /// - [`SessionError::Validation`] if `end_time` precedes the start.
    pub async fn end_session(
        &self,
        id: ReadingSessionId,
        end_time: DateTime<Utc>,
    ) -> Result<ReadingSession, SessionError> {
        let session = self.get_session(id).await?;
        check_close(&session, end_time)?;

        match self.close(id, end_time).await? {
            ReadingClose::Closed(closed) => {
                info!(session_id = %id, user = %closed.user_id, "reading session ended");
                Ok(closed)
            }
            // Another caller closed it between our read and our write.
            ReadingClose::AlreadyClosed(_) => Err(SessionError::AlreadyEnded(id)),
            ReadingClose::NotFound => Err(SessionError::ReadingSessionNotFound(id)),
        }
    }

    /// Closes a session if it is still open. Safe to call any number of
    /// times; used by logout and the cleanup sweep.
    pub async fn force_end_session(
        &self,
        id: ReadingSessionId,
    ) -> Result<CloseOutcome, SessionError> {
        let session = self.get_session(id).await?;
        if session.is_closed() {
            return Ok(CloseOutcome::AlreadyClosed);
        }

        // A client clock ahead of ours must not produce end < start.
        let end_time = Utc::now().max(session.start_time);
        match self.close(id, end_time).await? {
            ReadingClose::Closed(_) => {
                info!(session_id = %id, user = %session.user_id, "reading session force-closed");
                Ok(CloseOutcome::Closed)
            }
            ReadingClose::AlreadyClosed(_) => Ok(CloseOutcome::AlreadyClosed),
            ReadingClose::NotFound => Err(SessionError::ReadingSessionNotFound(id)),
        }
    }

    /// Every open reading session of `user`, oldest first.
    pub async fn get_user_active_sessions(
        &self,
        user: UserId,
    ) -> Result<Vec<ReadingSession>, SessionError> {
        bounded(
            "store.open_reading_sessions",
            self.config.call_timeout,
            self.store.open_reading_sessions(user),
        )
        .await
    }

    pub async fn get_session(&self, id: ReadingSessionId) -> Result<ReadingSession, SessionError> {
        bounded(
            "store.get_reading_session",
            self.config.call_timeout,
            self.store.get_reading_session(id),
        )
        .await?
        .ok_or(SessionError::ReadingSessionNotFound(id))
    }

    async fn create(
        &self,
        user: UserId,
        article_id: ArticleId,
        start_time: DateTime<Utc>,
        device_info: Option<DeviceInfo>,
    ) -> Result<ReadingSession, SessionError> {
        let session = ReadingSession {
            id: ReadingSessionId::new_v4(),
            user_id: user,
            article_id,
            start_time,
            end_time: None,
            device_info,
        };
        bounded(
            "store.create_reading_session",
            self.config.call_timeout,
            self.store.create_reading_session(&session),
        )
        .await?;
        debug!(session_id = %session.id, %user, article = %session.article_id, "reading session opened");
        Ok(session)
    }

    async fn close(
        &self,
        id: ReadingSessionId,
        at: DateTime<Utc>,
    ) -> Result<ReadingClose, SessionError> {
        bounded(
            "store.close_reading_session",
            self.config.call_timeout,
            self.store.close_reading_session(id, at),
        )
        .await
    }
}

/// Checks that a client close of `session` at `end_time` would be
/// accepted, without writing anything.
///
/// # Errors
/// [`SessionError::AlreadyEnded`] or [`SessionError::Validation`], as
/// [`ReadingSessionManager::end_session`] would return them.
pub fn check_close(
    session: &ReadingSession,
    end_time: DateTime<Utc>,
) -> Result<(), SessionError> {
    if session.is_closed() {
        return Err(SessionError::AlreadyEnded(session.id));
    }
    if end_time < session.start_time {
        return Err(SessionError::Validation(format!(
            "end time {end_time} is before start time {}",
            session.start_time
        )));
    }
    Ok(())
}
