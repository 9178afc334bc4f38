//! The TTL cache interface and an in-memory implementation.
//!
//! The cache holds one entry per active login session, keyed by user. It is
//! a fast-path hint only: entries vanish silently when their TTL lapses and
//! nothing is notified. [`SessionCleanup`](crate::SessionCleanup) exists to
//! catch up with that.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;

use crate::CacheError;

/// A key/value store with per-key expiry.
///
/// Values are opaque bytes; callers choose the encoding. All methods are
/// `Send` futures so implementations can be used from spawned tasks.
pub trait TtlCache: Send + Sync + 'static {
    /// Returns the value, or `None` if absent or expired.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>, CacheError>> + Send;

    /// Stores `value` under `key`, replacing any previous value and TTL.
    fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> impl Future<Output = Result<(), CacheError>> + Send;

    fn exists(&self, key: &str) -> impl Future<Output = Result<bool, CacheError>> + Send;

    /// Removes `key`. Returns whether something was removed.
    fn delete(&self, key: &str) -> impl Future<Output = Result<bool, CacheError>> + Send;

    /// Lists live keys matching `pattern`, where `*` matches any run of
    /// characters.
    fn keys(&self, pattern: &str) -> impl Future<Output = Result<Vec<String>, CacheError>> + Send;
}

// ---------------------------------------------------------------------------
// MemoryTtlCache
// ---------------------------------------------------------------------------

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// In-process [`TtlCache`] using Tokio's clock for expiry.
///
/// Used by tests and the demo. Two switches simulate a misbehaving
/// backend: [`set_available`](Self::set_available) makes every call fail,
/// and [`set_latency`](Self::set_latency) delays every call.
#[derive(Default)]
pub struct MemoryTtlCache {
    entries: Mutex<HashMap<String, Entry>>,
    unavailable: AtomicBool,
    latency_ms: AtomicU64,
}

impl MemoryTtlCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Drops a key without going through the trait, as if its TTL lapsed.
    pub fn evict(&self, key: &str) {
        self.lock().remove(key);
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock().values().filter(|e| e.expires_at > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn enter(&self) -> Result<(), CacheError> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("memory cache switched off".into()));
        }
        Ok(())
    }
}

impl TtlCache for MemoryTtlCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.enter().await?;
        let now = Instant::now();
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        self.enter().await?;
        let expires_at = Instant::now() + ttl;
        self.lock()
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.get(key).await?.is_some())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.enter().await?;
        Ok(self.lock().remove(key).is_some())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        self.enter().await?;
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .lock()
            .iter()
            .filter(|(k, e)| e.expires_at > now && glob_match(pattern, k))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

/// Matches `text` against a pattern where `*` stands for any substring.
fn glob_match(pattern: &str, text: &str) -> bool {
    let mut parts = pattern.split('*');
    let Some(first) = parts.next() else {
        return text.is_empty();
    };
    let Some(mut rest) = text.strip_prefix(first) else {
        return false;
    };
    let tail: Vec<&str> = parts.collect();
    let Some((last, middle)) = tail.split_last() else {
        // No `*` at all: exact match.
        return rest.is_empty();
    };
    for part in middle {
        match rest.find(part) {
            Some(pos) => rest = &rest[pos + part.len()..],
            None => return false,
        }
    }
    rest.ends_with(last)
}
