//! Remote blob storage the lifecycle manager downloads schema blobs from.
use bytes::Bytes;
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Blob '{0}' not found")]
    NotFound(String),

    #[error("Invalid storage key '{0}'")]
    InvalidKey(String),

    #[error("Invalid storage base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("Request for blob '{key}' failed: {source}")]
    Http {
        key: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to read blob '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

#[async_trait::async_trait]
pub trait BlobStorage: Send + Sync {
    /// Fetches the blob stored under `key`. `since` is the last modification time
    /// announced by the version controller, if any.
    async fn download(&self, key: &str, since: Option<SystemTime>) -> Result<Bytes, StorageError>;
}

/// Downloads blobs with plain `GET {base_url}/{key}` requests.
///
/// Every `/`-separated part of the key becomes one percent-encoded path segment,
/// so characters like `?` or `#` stay part of the path.
#[derive(Debug, Clone)]
pub struct HttpBlobStorage {
    client: reqwest::Client,
    base_url: reqwest::Url,
}

impl HttpBlobStorage {
    pub fn new(base_url: &str) -> Result<Self, StorageError> {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: &str) -> Result<Self, StorageError> {
        let invalid = |reason: String| StorageError::InvalidBaseUrl {
            url: base_url.to_string(),
            reason,
        };

        let base_url = reqwest::Url::parse(base_url).map_err(|e| invalid(e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(invalid("not a hierarchical URL".to_string()));
        }

        Ok(Self { client, base_url })
    }

    fn url_for(&self, key: &str) -> Result<reqwest::Url, StorageError> {
        let segments: Vec<&str> = key.split('/').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() || segments.iter().any(|s| *s == "." || *s == "..") {
            return Err(StorageError::InvalidKey(key.to_string()));
        }

        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| StorageError::InvalidKey(key.to_string()))?
            .pop_if_empty()
            .extend(segments);
        url.set_query(None);
        url.set_fragment(None);
        Ok(url)
    }
}

#[async_trait::async_trait]
impl BlobStorage for HttpBlobStorage {
    async fn download(&self, key: &str, since: Option<SystemTime>) -> Result<Bytes, StorageError> {
        let http_error = |source| StorageError::Http {
            key: key.to_string(),
            source,
        };

        let mut request = self.client.get(self.url_for(key)?);
        if let Some(since) = since.and_then(|t| t.duration_since(UNIX_EPOCH).ok()) {
            request = request.query(&[("since", since.as_secs())]);
        }

        let response = request.send().await.map_err(http_error)?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound(key.to_string()));
        }

        response
            .error_for_status()
            .map_err(http_error)?
            .bytes()
            .await
            .map_err(http_error)
    }
}

/// Reads blobs from a local directory, e.g. a mounted bucket.
#[derive(Debug, Clone)]
pub struct FsBlobStorage {
    root: PathBuf,
}

impl FsBlobStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait::async_trait]
impl BlobStorage for FsBlobStorage {
    async fn download(&self, key: &str, _since: Option<SystemTime>) -> Result<Bytes, StorageError> {
        let relative = Path::new(key);
        if key.is_empty() || !relative.components().all(|c| matches!(c, Component::Normal(_))) {
            return Err(StorageError::InvalidKey(key.to_string()));
        }

        match tokio::fs::read(self.root.join(relative)).await {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(source) => Err(StorageError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }
}
