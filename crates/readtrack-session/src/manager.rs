//! The login session cache: single-session enforcement and heartbeats.
//!
//! [`SessionCache`] sits in front of two dependencies:
//!
//! - the [`TtlCache`], one entry per active user, consulted first because
//!   it is fast and answers "is this user already logged in?";
//! - the [`SessionStore`], which records every transition durably and is
//!   the authority whenever the two disagree.
//!
//! # Divergence
//!
//! A cache entry can expire silently while the store row stays active.
//! Nothing here tries to fix that; the cleanup sweep does. Everything in
//! this module only has to make sure it never *adds* disagreement: the
//! store is written first, and a cache failure after a successful store
//! write is logged, not returned.
//!
//! # Concurrency
//!
//! Logins of the same user are serialized by a per-user async mutex so two
//! concurrent logins cannot both pass the conflict check. Logins of
//! different users never wait on each other. Heartbeats and ends are
//! not serialized; they rely on the store's atomic row updates.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use readtrack_model::{Codec, JsonCodec, LoginSession, LoginSessionId, UserId};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::bounded::bounded;
use crate::store::HeartbeatUpdate;
use crate::{SessionConfig, SessionError, SessionStore, SingleSessionPolicy, TtlCache};

/// Outcome of a heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatStatus {
    /// The session is live and its heartbeat was recorded.
    Ok,
    /// No such session.
    Invalid,
    /// The session has ended or timed out; the client must log in again.
    Expired,
}

/// A successful login.
#[derive(Debug, Clone)]
pub struct NewLogin {
    pub session: LoginSession,
    /// The session ended to make room for this one, under
    /// [`SingleSessionPolicy::EvictExisting`]. Its reading sessions are
    /// still open; the caller closes them.
    pub evicted: Option<LoginSession>,
}

/// Enforces at most one live login session per user.
pub struct SessionCache<C, S> {
    cache: Arc<C>,
    store: Arc<S>,
    config: SessionConfig,
    codec: JsonCodec,
    login_locks: UserLocks,
}

impl<C: TtlCache, S: SessionStore> SessionCache<C, S> {
    pub fn new(cache: Arc<C>, store: Arc<S>, config: SessionConfig) -> Self {
        Self {
            cache,
            store,
            config,
            codec: JsonCodec::compact(),
            login_locks: UserLocks::default(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Cache key for a user's active session.
    pub fn cache_key(user: UserId) -> String {
        format!("session:{user}")
    }

    /// Logs a user in.
    ///
    /// # Errors
    /// - [`SessionError::SingleSessionConflict`] if the user already has a
    ///   live session and the policy is [`SingleSessionPolicy::RejectNew`].
    /// - A transient error if the store write fails. Cache failures never
    ///   fail a login.
    pub async fn create_session(&self, user: UserId) -> Result<NewLogin, SessionError> {
        let _guard = self.login_locks.lock(user).await;

        let mut evicted = None;
        if let Some(existing) = self.live_session_for(user).await? {
            match self.config.policy {
                SingleSessionPolicy::RejectNew => {
                    info!(%user, session_id = %existing.id, "login rejected, session already active");
                    return Err(SessionError::SingleSessionConflict(user));
                }
                SingleSessionPolicy::EvictExisting => {
                    info!(%user, session_id = %existing.id, "evicting active session for new login");
                    evicted = Some(self.end_session(existing.id).await?);
                }
            }
        }

        let session = LoginSession::start(user, Utc::now());
        bounded(
            "store.create_login_session",
            self.config.call_timeout,
            self.store.create_login_session(&session),
        )
        .await?;

        if let Err(e) = self.write_cache(&session).await {
            warn!(%user, session_id = %session.id, error = %e, "cache write failed after login");
        }

        info!(%user, session_id = %session.id, "login session created");
        Ok(NewLogin { session, evicted })
    }

    /// Records a heartbeat stamped `at` by the client.
    ///
    /// # Errors
    /// Only store failures. A failed cache refresh is logged; the store
    /// write has already succeeded.
    pub async fn heartbeat(
        &self,
        id: LoginSessionId,
        at: DateTime<Utc>,
    ) -> Result<HeartbeatStatus, SessionError> {
        let update = bounded(
            "store.touch_heartbeat",
            self.config.call_timeout,
            self.store.touch_heartbeat(id, at, self.config.heartbeat_ttl),
        )
        .await?;

        match update {
            HeartbeatUpdate::NotFound => {
                debug!(session_id = %id, "heartbeat for unknown session");
                Ok(HeartbeatStatus::Invalid)
            }
            HeartbeatUpdate::Inactive(session) => {
                debug!(session_id = %id, user = %session.user_id, "heartbeat for inactive session");
                self.evict_cache_entry(&session).await;
                Ok(HeartbeatStatus::Expired)
            }
            HeartbeatUpdate::Updated(session) => {
                if let Err(e) = self.write_cache(&session).await {
                    warn!(session_id = %id, error = %e, "cache refresh failed on heartbeat");
                }
                Ok(HeartbeatStatus::Ok)
            }
        }
    }

    /// Ends a login session. Ending an ended session returns it unchanged.
    ///
    /// # Errors
    /// [`SessionError::LoginSessionNotFound`] for an unknown id, or a
    /// transient store error.
    pub async fn end_session(&self, id: LoginSessionId) -> Result<LoginSession, SessionError> {
        let ended = bounded(
            "store.end_login_session",
            self.config.call_timeout,
            self.store.end_login_session(id, Utc::now()),
        )
        .await?
        .ok_or(SessionError::LoginSessionNotFound(id))?;

        self.evict_cache_entry(&ended).await;
        info!(session_id = %id, user = %ended.user_id, "login session ended");
        Ok(ended)
    }

    /// The user's live session as the cache sees it.
    ///
    /// Falls back to the store only when the cache itself is failing.
    pub async fn get_active_session_by_user(
        &self,
        user: UserId,
    ) -> Result<Option<LoginSession>, SessionError> {
        match self.read_cache(user).await {
            Ok(cached) => Ok(cached.filter(|s| s.is_live(Utc::now(), self.config.heartbeat_ttl))),
            Err(e) if e.is_transient() => {
                warn!(%user, error = %e, "cache read failed, asking the store");
                self.store_live_session(user).await
            }
            Err(e) => Err(e),
        }
    }

    /// Loads a login session from the store.
    pub async fn get_session(&self, id: LoginSessionId) -> Result<LoginSession, SessionError> {
        bounded(
            "store.get_login_session",
            self.config.call_timeout,
            self.store.get_login_session(id),
        )
        .await?
        .ok_or(SessionError::LoginSessionNotFound(id))
    }

    /// Every session currently held in the cache. Entries that fail to
    /// decode are skipped.
    pub async fn cached_sessions(&self) -> Result<Vec<LoginSession>, SessionError> {
        let keys = bounded(
            "cache.keys",
            self.config.call_timeout,
            self.cache.keys("session:*"),
        )
        .await?;

        let mut sessions = Vec::with_capacity(keys.len());
        for key in keys {
            let bytes = bounded("cache.get", self.config.call_timeout, self.cache.get(&key)).await?;
            let Some(bytes) = bytes else { continue };
            match self.codec.decode::<LoginSession>(&bytes) {
                Ok(session) => sessions.push(session),
                Err(e) => warn!(%key, error = %e, "undecodable cache entry"),
            }
        }
        Ok(sessions)
    }

    // -- internals --------------------------------------------------------

    /// The live session that blocks a new login, if any.
    ///
    /// A cache hit is confirmed against the store so a session ended behind
    /// the cache's back does not lock the user out until the TTL lapses.
    async fn live_session_for(&self, user: UserId) -> Result<Option<LoginSession>, SessionError> {
        let now = Utc::now();
        let cached = match self.read_cache(user).await {
            Ok(cached) => cached,
            Err(e) if e.is_transient() => {
                warn!(%user, error = %e, "cache unavailable for login check, asking the store");
                return self.store_live_session(user).await;
            }
            Err(e) => return Err(e),
        };

        let Some(cached) = cached.filter(|s| s.is_live(now, self.config.heartbeat_ttl)) else {
            return Ok(None);
        };

        match self.get_session(cached.id).await {
            Ok(row) if row.is_live(now, self.config.heartbeat_ttl) => Ok(Some(row)),
            Ok(_) | Err(SessionError::LoginSessionNotFound(_)) => {
                debug!(%user, session_id = %cached.id, "cache entry is stale, ignoring");
                Ok(None)
            }
            Err(e) => {
                warn!(%user, error = %e, "store check failed, trusting the cache");
                Ok(Some(cached))
            }
        }
    }

    async fn store_live_session(&self, user: UserId) -> Result<Option<LoginSession>, SessionError> {
        let live = bounded(
            "store.live_login_sessions",
            self.config.call_timeout,
            self.store.live_login_sessions(user, self.config.heartbeat_ttl),
        )
        .await?;
        Ok(live.into_iter().next())
    }

    async fn read_cache(&self, user: UserId) -> Result<Option<LoginSession>, SessionError> {
        let key = Self::cache_key(user);
        let bytes = bounded("cache.get", self.config.call_timeout, self.cache.get(&key)).await?;
        match bytes {
            None => Ok(None),
            Some(bytes) => match self.codec.decode(&bytes) {
                Ok(session) => Ok(Some(session)),
                Err(e) => {
                    warn!(%user, error = %e, "undecodable cache entry, treating as absent");
                    Ok(None)
                }
            },
        }
    }

    async fn write_cache(&self, session: &LoginSession) -> Result<(), SessionError> {
        let bytes = self.codec.encode(session)?;
        bounded(
            "cache.set",
            self.config.call_timeout,
            self.cache.set(
                &Self::cache_key(session.user_id),
                bytes,
                self.config.heartbeat_ttl,
            ),
        )
        .await
    }

    /// Deletes the user's cache entry if it still points at `session`.
    /// Failures are logged; the TTL removes the entry eventually.
    async fn evict_cache_entry(&self, session: &LoginSession) {
        let user = session.user_id;
        match self.read_cache(user).await {
            Ok(Some(cached)) if cached.id == session.id => {
                let key = Self::cache_key(user);
                let deleted: Result<bool, SessionError> =
                    bounded("cache.delete", self.config.call_timeout, self.cache.delete(&key)).await;
                if let Err(e) = deleted {
                    warn!(%user, session_id = %session.id, error = %e, "cache delete failed");
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!(%user, session_id = %session.id, error = %e, "cache read failed on end");
            }
        }
    }
}

/// One async mutex per user with a login in progress. An entry is removed
/// when its last holder is done and nobody is waiting.
#[derive(Default)]
struct UserLocks {
    locks: std::sync::Mutex<HashMap<UserId, Arc<Mutex<()>>>>,
}

impl UserLocks {
    async fn lock(&self, user: UserId) -> UserLockGuard<'_> {
        let lock = self
            .locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(user)
            .or_default()
            .clone();
        UserLockGuard {
            locks: self,
            user,
            guard: Some(lock.lock_owned().await),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

struct UserLockGuard<'a> {
    locks: &'a UserLocks,
    user: UserId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for UserLockGuard<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.locks.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(guard) = self.guard.take() {
            // Only the map and this guard hold it: nobody is waiting.
            if Arc::strong_count(OwnedMutexGuard::mutex(&guard)) == 2 {
                locks.remove(&self.user);
            }
        }
    }
}
