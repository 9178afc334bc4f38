//! The durable session store interface and an in-memory implementation.
//!
//! The store is the source of truth for both login and reading sessions.
//! Its schema is the backend's business; this module only pins down the
//! operations the session layer needs and what they must guarantee.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use readtrack_model::{LoginSession, LoginSessionId, ReadingSession, ReadingSessionId, UserId};

use crate::StoreError;

/// Result of a heartbeat write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatUpdate {
    /// The row was live; `last_heartbeat` now holds the new timestamp.
    Updated(LoginSession),
    /// The row exists but is ended or already past its timeout. Untouched.
    Inactive(LoginSession),
    NotFound,
}

/// Result of a conditional reading-session close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadingClose {
    /// This call set the end time.
    Closed(ReadingSession),
    /// The end time was already set; nothing changed.
    AlreadyClosed(ReadingSession),
    NotFound,
}

/// Durable storage for login and reading sessions.
///
/// Implementations must make `touch_heartbeat`, `end_login_session` and
/// `close_reading_session` atomic per row: the check and the write happen
/// in one step, so concurrent callers cannot both win.
pub trait SessionStore: Send + Sync + 'static {
    fn create_login_session(
        &self,
        session: &LoginSession,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn get_login_session(
        &self,
        id: LoginSessionId,
    ) -> impl Future<Output = Result<Option<LoginSession>, StoreError>> + Send;

    /// Active sessions of `user` heard from within `timeout`, newest first.
    fn live_login_sessions(
        &self,
        user: UserId,
        timeout: Duration,
    ) -> impl Future<Output = Result<Vec<LoginSession>, StoreError>> + Send;

    /// Sets `last_heartbeat = at` if the row is active and its previous
    /// heartbeat is younger than `timeout`.
    fn touch_heartbeat(
        &self,
        id: LoginSessionId,
        at: DateTime<Utc>,
        timeout: Duration,
    ) -> impl Future<Output = Result<HeartbeatUpdate, StoreError>> + Send;

    /// Marks the row inactive with `end_time = at`. Ending an ended row
    /// returns it unchanged. `None` if the id is unknown.
    fn end_login_session(
        &self,
        id: LoginSessionId,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<Option<LoginSession>, StoreError>> + Send;

    /// Active sessions whose last heartbeat is at least `timeout` old.
    fn expired_login_sessions(
        &self,
        timeout: Duration,
    ) -> impl Future<Output = Result<Vec<LoginSession>, StoreError>> + Send;

    fn create_reading_session(
        &self,
        session: &ReadingSession,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn get_reading_session(
        &self,
        id: ReadingSessionId,
    ) -> impl Future<Output = Result<Option<ReadingSession>, StoreError>> + Send;

    /// Sets `end_time = at` only if it is still unset.
    fn close_reading_session(
        &self,
        id: ReadingSessionId,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<ReadingClose, StoreError>> + Send;

    /// Reading sessions of `user` with no end time, oldest first.
    fn open_reading_sessions(
        &self,
        user: UserId,
    ) -> impl Future<Output = Result<Vec<ReadingSession>, StoreError>> + Send;
}

// ---------------------------------------------------------------------------
// MemorySessionStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Tables {
    logins: HashMap<LoginSessionId, LoginSession>,
    readings: HashMap<ReadingSessionId, ReadingSession>,
}

/// In-process [`SessionStore`].
///
/// Besides the trait, it offers seeding and snapshot helpers for tests and
/// outage switches for the whole store, for reading-session calls, and for
/// listing one user's reading sessions.
#[derive(Default)]
pub struct MemorySessionStore {
    tables: Mutex<Tables>,
    unavailable: AtomicBool,
    readings_unavailable: AtomicBool,
    blocked_users: Mutex<HashSet<UserId>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Fails only the reading-session operations.
    pub fn set_reading_available(&self, available: bool) {
        self.readings_unavailable.store(!available, Ordering::SeqCst);
    }

    /// Fails `open_reading_sessions` for one user only.
    pub fn set_user_available(&self, user: UserId, available: bool) {
        let mut blocked = self.blocked_users.lock().unwrap_or_else(|e| e.into_inner());
        if available {
            blocked.remove(&user);
        } else {
            blocked.insert(user);
        }
    }

    /// Inserts or replaces a login session row as-is.
    pub fn insert_login_session(&self, session: LoginSession) {
        self.lock().logins.insert(session.id, session);
    }

    /// Inserts or replaces a reading session row as-is.
    pub fn insert_reading_session(&self, session: ReadingSession) {
        self.lock().readings.insert(session.id, session);
    }

    /// All login session rows, oldest start first.
    pub fn login_sessions(&self) -> Vec<LoginSession> {
        let mut rows: Vec<_> = self.lock().logins.values().cloned().collect();
        rows.sort_by_key(|s| s.start_time);
        rows
    }

    /// All reading session rows, oldest start first.
    pub fn reading_sessions(&self) -> Vec<ReadingSession> {
        let mut rows: Vec<_> = self.lock().readings.values().cloned().collect();
        rows.sort_by_key(|s| s.start_time);
        rows
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store switched off".into()));
        }
        Ok(())
    }

    fn check_readings(&self) -> Result<(), StoreError> {
        self.check()?;
        if self.readings_unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "memory store reading sessions switched off".into(),
            ));
        }
        Ok(())
    }
}

impl SessionStore for MemorySessionStore {
    async fn create_login_session(&self, session: &LoginSession) -> Result<(), StoreError> {
        self.check()?;
        let mut tables = self.lock();
        if tables.logins.contains_key(&session.id) {
            return Err(StoreError::Rejected(format!(
                "duplicate login session {}",
                session.id
            )));
        }
        tables.logins.insert(session.id, session.clone());
        Ok(())
    }

    async fn get_login_session(
        &self,
        id: LoginSessionId,
    ) -> Result<Option<LoginSession>, StoreError> {
        self.check()?;
        Ok(self.lock().logins.get(&id).cloned())
    }

    async fn live_login_sessions(
        &self,
        user: UserId,
        timeout: Duration,
    ) -> Result<Vec<LoginSession>, StoreError> {
        self.check()?;
        let now = Utc::now();
        let mut rows: Vec<_> = self
            .lock()
            .logins
            .values()
            .filter(|s| s.user_id == user && s.is_live(now, timeout))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(rows)
    }

    async fn touch_heartbeat(
        &self,
        id: LoginSessionId,
        at: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<HeartbeatUpdate, StoreError> {
        self.check()?;
        let now = Utc::now();
        let mut tables = self.lock();
        let Some(row) = tables.logins.get_mut(&id) else {
            return Ok(HeartbeatUpdate::NotFound);
        };
        if !row.is_live(now, timeout) {
            return Ok(HeartbeatUpdate::Inactive(row.clone()));
        }
        row.last_heartbeat = at;
        Ok(HeartbeatUpdate::Updated(row.clone()))
    }

    async fn end_login_session(
        &self,
        id: LoginSessionId,
        at: DateTime<Utc>,
    ) -> Result<Option<LoginSession>, StoreError> {
        self.check()?;
        let mut tables = self.lock();
        Ok(tables.logins.get_mut(&id).map(|row| {
            row.end(at);
            row.clone()
        }))
    }

    async fn expired_login_sessions(
        &self,
        timeout: Duration,
    ) -> Result<Vec<LoginSession>, StoreError> {
        self.check()?;
        let now = Utc::now();
        let mut rows: Vec<_> = self
            .lock()
            .logins
            .values()
            .filter(|s| s.is_active && s.is_stale(now, timeout))
            .cloned()
            .collect();
        rows.sort_by_key(|s| s.last_heartbeat);
        Ok(rows)
    }

    async fn create_reading_session(&self, session: &ReadingSession) -> Result<(), StoreError> {
        self.check_readings()?;
        let mut tables = self.lock();
        if tables.readings.contains_key(&session.id) {
            return Err(StoreError::Rejected(format!(
                "duplicate reading session {}",
                session.id
            )));
        }
        tables.readings.insert(session.id, session.clone());
        Ok(())
    }

    async fn get_reading_session(
        &self,
        id: ReadingSessionId,
    ) -> Result<Option<ReadingSession>, StoreError> {
        self.check_readings()?;
        Ok(self.lock().readings.get(&id).cloned())
    }

    async fn close_reading_session(
        &self,
        id: ReadingSessionId,
        at: DateTime<Utc>,
    ) -> Result<ReadingClose, StoreError> {
        self.check_readings()?;
        let mut tables = self.lock();
        let Some(row) = tables.readings.get_mut(&id) else {
            return Ok(ReadingClose::NotFound);
        };
        if row.is_closed() {
            return Ok(ReadingClose::AlreadyClosed(row.clone()));
        }
        row.end_time = Some(at);
        Ok(ReadingClose::Closed(row.clone()))
    }

    async fn open_reading_sessions(&self, user: UserId) -> Result<Vec<ReadingSession>, StoreError> {
        self.check_readings()?;
        let blocked = self
            .blocked_users
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&user);
        if blocked {
            return Err(StoreError::Unavailable(format!(
                "reading sessions of user {user} switched off"
            )));
        }
        let mut rows: Vec<_> = self
            .lock()
            .readings
            .values()
            .filter(|s| s.user_id == user && !s.is_closed())
            .cloned()
            .collect();
        rows.sort_by_key(|s| s.start_time);
        Ok(rows)
    }
}
