//! Remote object storage.
//!
//! The pipeline only needs one operation: put a whole archive under a key.
//! [`HttpObjectStore`] speaks plain HTTP `PUT` to an S3-style endpoint,
//! [`DirectoryObjectStore`] mirrors keys into a local directory, and
//! [`MemoryObjectStore`] keeps objects in a map for tests.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
#[cfg(feature = "http")]
use std::time::Duration;

use tracing::debug;

use crate::UploadError;

/// A bucket that accepts whole objects.
pub trait ObjectStore: Send + Sync + 'static {
    /// Stores `body` under `key`. Returning `Ok` means the object is durable
    /// remotely; only then are local sources deleted.
    fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
    ) -> impl Future<Output = Result<(), UploadError>> + Send;
}

// ---------------------------------------------------------------------------
// HttpObjectStore
// ---------------------------------------------------------------------------

/// Connection settings for [`HttpObjectStore`].
#[cfg(feature = "http")]
#[derive(Debug, Clone)]
pub struct HttpStoreConfig {
    /// Base URL, e.g. `https://storage.example.com`.
    pub endpoint: String,
    pub bucket: String,
    /// Sent as `Authorization: Bearer <token>` when set.
    pub token: Option<String>,
    pub timeout: Duration,
}

/// Uploads with `PUT <endpoint>/<bucket>/<key>`.
#[cfg(feature = "http")]
pub struct HttpObjectStore {
    client: reqwest::Client,
    base_url: String,
}

#[cfg(feature = "http")]
impl HttpObjectStore {
    /// # Errors
    /// [`UploadError::Config`] for an empty endpoint or bucket, a token that
    /// is not a valid header value, or a client that fails to build.
    pub fn new(config: HttpStoreConfig) -> Result<Self, UploadError> {
        use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};

        let endpoint = config.endpoint.trim_end_matches('/');
        if endpoint.is_empty() {
            return Err(UploadError::Config("object store endpoint is empty".into()));
        }
        let bucket = config.bucket.trim_matches('/');
        if bucket.is_empty() {
            return Err(UploadError::Config("object store bucket is empty".into()));
        }

        let mut headers = HeaderMap::new();
        if let Some(token) = &config.token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| UploadError::Config(format!("invalid token: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| UploadError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: format!("{endpoint}/{bucket}"),
        })
    }

    pub fn object_url(&self, key: &str) -> String {
        format!("{}/{key}", self.base_url)
    }
}

#[cfg(feature = "http")]
impl ObjectStore for HttpObjectStore {
    async fn put_object(&self, key: &str, body: Vec<u8>) -> Result<(), UploadError> {
        use reqwest::header::CONTENT_TYPE;

        let url = self.object_url(key);
        let size = body.len();
        let response = self
            .client
            .put(&url)
            .header(CONTENT_TYPE, "application/zip")
            .body(body)
            .send()
            .await
            .map_err(|e| UploadError::upload(key, format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            debug!(key, size, %status, "object stored");
            Ok(())
        } else {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            Err(UploadError::upload(key, format!("HTTP {status}: {text}")))
        }
    }
}

// ---------------------------------------------------------------------------
// DirectoryObjectStore
// ---------------------------------------------------------------------------

/// Writes each object to `<root>/<key>`, for single-machine deployments and
/// the demo.
pub struct DirectoryObjectStore {
    root: PathBuf,
}

impl DirectoryObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn object_path(&self, key: &str) -> PathBuf {
        key.split('/')
            .filter(|part| !part.is_empty() && *part != "..")
            .fold(self.root.clone(), |path, part| path.join(part))
    }
}

impl ObjectStore for DirectoryObjectStore {
    async fn put_object(&self, key: &str, body: Vec<u8>) -> Result<(), UploadError> {
        let path = self.object_path(key);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| UploadError::io(dir, e))?;
        }
        tokio::fs::write(&path, &body)
            .await
            .map_err(|e| UploadError::io(&path, e))?;
        debug!(key, size = body.len(), path = %path.display(), "object stored");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryObjectStore
// ---------------------------------------------------------------------------

/// In-memory [`ObjectStore`]; [`set_available`](Self::set_available)
/// simulates an outage.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    unavailable: AtomicBool,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ObjectStore for MemoryObjectStore {
    async fn put_object(&self, key: &str, body: Vec<u8>) -> Result<(), UploadError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(UploadError::upload(key, "object store unavailable"));
        }
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), body);
        Ok(())
    }
}
