//! Byte-Oriented Key/Value Stores
//!
//! Backing stores for the slower tiers. A store knows nothing about entries,
//! TTLs or capacity; it only moves opaque byte buffers under string keys.
//!
//! - [`InMemoryKvStore`]: concurrent map, used for tests and as the default
//!   embedded store
//! - [`FileKvStore`]: one file per key under a directory, atomic replace
//! - [`HttpKvStore`]: network-fronted cache speaking plain HTTP verbs

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};

/// Persistent backend contract
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    async fn put(&self, key: &str, value: Bytes) -> Result<()>;

    /// Remove a key, returning whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Every key currently stored
    async fn keys(&self) -> Result<Vec<String>>;

    /// Total bytes held by the store
    async fn size_bytes(&self) -> Result<u64>;
}

/// Store operation counters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KvStoreStats {
    pub object_count: u64,
    pub total_bytes: u64,
    pub reads: u64,
    pub writes: u64,
    pub deletes: u64,
}

// =============================================================================
// In-Memory Store
// =============================================================================

/// In-memory store backed by `DashMap`
#[derive(Default)]
pub struct InMemoryKvStore {
    storage: DashMap<String, Bytes>,
    total_bytes: AtomicU64,
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> KvStoreStats {
        KvStoreStats {
            object_count: self.storage.len() as u64,
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    fn name(&self) -> &str {
        "in-memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.storage.get(key).map(|v| v.value().clone()))
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        let size = value.len() as u64;

        match self.storage.insert(key.to_string(), value) {
            Some(old) => {
                let old_size = old.len() as u64;
                if size > old_size {
                    self.total_bytes.fetch_add(size - old_size, Ordering::Relaxed);
                } else {
                    self.total_bytes.fetch_sub(old_size - size, Ordering::Relaxed);
                }
            }
            None => {
                self.total_bytes.fetch_add(size, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        match self.storage.remove(key) {
            Some((_, data)) => {
                self.total_bytes.fetch_sub(data.len() as u64, Ordering::Relaxed);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.storage.iter().map(|e| e.key().clone()).collect())
    }

    async fn size_bytes(&self) -> Result<u64> {
        Ok(self.total_bytes.load(Ordering::Relaxed))
    }
}

// =============================================================================
// File Store
// =============================================================================

const TMP_SUFFIX: &str = ".tmp";

/// Directory-backed store; each key is one URL-encoded file name
pub struct FileKvStore {
    root: PathBuf,
    next_tmp: AtomicU64,
}

impl FileKvStore {
    /// Open (creating if needed) a store rooted at `root`
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            next_tmp: AtomicU64::new(0),
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(urlencoding::encode(key).as_ref())
    }
}

#[async_trait]
impl KvStore for FileKvStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<()> {
        let target = self.path_for(key);
        // Each write stages its own file; the last rename wins
        let seq = self.next_tmp.fetch_add(1, Ordering::Relaxed);
        let mut tmp = target.clone().into_os_string();
        tmp.push(format!(".{}{}", seq, TMP_SUFFIX));

        // Readers see either the old file or the new one, never a partial write
        let written = match tokio::fs::write(&tmp, &value).await {
            Ok(()) => tokio::fs::rename(&tmp, &target).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            if let Err(cleanup) = tokio::fs::remove_file(&tmp).await {
                debug!("Leaving staged file for {}: {}", key, cleanup);
            }
            return Err(e.into());
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.root).await?;
        while let Some(item) = dir.next_entry().await? {
            let name = item.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.ends_with(TMP_SUFFIX) {
                continue;
            }
            match urlencoding::decode(name) {
                Ok(key) => keys.push(key.into_owned()),
                Err(e) => debug!("Skipping undecodable file name {}: {}", name, e),
            }
        }
        Ok(keys)
    }

    async fn size_bytes(&self) -> Result<u64> {
        let mut total = 0;
        let mut dir = tokio::fs::read_dir(&self.root).await?;
        while let Some(item) = dir.next_entry().await? {
            total += item.metadata().await?.len();
        }
        Ok(total)
    }
}

// =============================================================================
// HTTP Store
// =============================================================================

#[derive(Debug, Deserialize)]
struct RemoteStats {
    total_bytes: u64,
}

/// Network-fronted cache: `GET/PUT/DELETE {base_url}/{key}`
///
/// Key listing is `GET {base_url}/` returning a JSON array of keys; size is
/// `GET {base_url}/_stats` returning `{"total_bytes": n}`.
pub struct HttpKvStore {
    base_url: String,
    client: Client,
}

impl HttpKvStore {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, urlencoding::encode(key))
    }
}

#[async_trait]
impl KvStore for HttpKvStore {
    fn name(&self) -> &str {
        "http"
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let response = self.client.get(self.url_for(key)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(response.error_for_status()?.bytes().await?))
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<()> {
        self.client
            .put(self.url_for(key))
            .body(value)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let response = self.client.delete(self.url_for(key)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        response.error_for_status()?;
        Ok(true)
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let url = format!("{}/", self.base_url);
        let keys = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<String>>()
            .await?;
        Ok(keys)
    }

    async fn size_bytes(&self) -> Result<u64> {
        let url = format!("{}/_stats", self.base_url);
        let stats = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json::<RemoteStats>()
            .await?;
        Ok(stats.total_bytes)
    }
}

// =============================================================================
// Tests
// =============================================================================
