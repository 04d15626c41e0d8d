//! Fetching sector payloads and manifests.
//!
//! [`SectorFetcher`] is the seam between the loader and wherever sector files
//! live. Two implementations are provided: [`HttpFetcher`] for model files
//! served over HTTP (with a pluggable [`Cache`]) and [`FileFetcher`] for a
//! model tree on local disk.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::error::{Error, Result};
use crate::metadata::{LevelOfDetail, ModelId, SectorId, SectorKey};

/// File name of the sector manifest inside a model revision directory.
pub const MANIFEST_FILE_NAME: &str = "scene.json";

/// Everything needed to locate one sector file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SectorRequest {
    pub model: ModelId,
    pub sector_id: SectorId,
    pub lod: LevelOfDetail,
    pub file_name: String,
}

impl SectorRequest {
    #[must_use]
    pub fn key(&self) -> SectorKey {
        SectorKey::new(self.model, self.sector_id)
    }

    /// Relative path `{model_id}/{revision_id}/{file_name}`.
    #[must_use]
    pub fn relative_path(&self) -> String {
        model_file_path(self.model, &self.file_name)
    }
}

fn model_file_path(model: ModelId, file_name: &str) -> String {
    format!("{}/{}/{}", model.model_id, model.revision_id, file_name)
}

/// Source of raw sector payload bytes.
pub trait SectorFetcher: Send + Sync + 'static {
    fn fetch(&self, request: &SectorRequest) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

/// Byte cache keyed by relative file path.
pub trait Cache: Send + Sync + 'static {
    fn get(&self, key: &str) -> Option<Arc<[u8]>>;
    fn insert(&self, key: &str, bytes: Arc<[u8]>);
}

/// Cache that stores nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

impl Cache for NoCache {
    fn get(&self, _key: &str) -> Option<Arc<[u8]>> {
        None
    }

    fn insert(&self, _key: &str, _bytes: Arc<[u8]>) {}
}

#[derive(Debug, Default)]
struct MemoryCacheInner {
    entries: HashMap<String, Arc<[u8]>>,
    order: VecDeque<String>,
    bytes: usize,
}

/// In-memory cache with a byte capacity; the oldest entries go first.
#[derive(Debug)]
pub struct MemoryCache {
    inner: Mutex<MemoryCacheInner>,
    capacity_bytes: usize,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCache {
    /// Cache holding up to 256 MiB.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity_bytes(256 * 1024 * 1024)
    }

    #[must_use]
    pub fn with_capacity_bytes(capacity_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(MemoryCacheInner::default()),
            capacity_bytes,
        }
    }

    /// Total size of cached entries.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.inner.lock().map_or(0, |inner| inner.bytes)
    }
}

impl Cache for MemoryCache {
    fn get(&self, key: &str) -> Option<Arc<[u8]>> {
        self.inner.lock().ok()?.entries.get(key).cloned()
    }

    fn insert(&self, key: &str, bytes: Arc<[u8]>) {
        if bytes.len() > self.capacity_bytes {
            return;
        }
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        if let Some(previous) = inner.entries.insert(key.to_string(), Arc::clone(&bytes)) {
            inner.bytes -= previous.len();
            inner.order.retain(|k| k != key);
        }
        inner.bytes += bytes.len();
        inner.order.push_back(key.to_string());
        while inner.bytes > self.capacity_bytes {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            if let Some(evicted) = inner.entries.remove(&oldest) {
                inner.bytes -= evicted.len();
            }
        }
    }
}

/// Fetches model files over HTTP from `{base_url}/{model_id}/{revision_id}/`.
#[derive(Debug)]
pub struct HttpFetcher<C: Cache = MemoryCache> {
    http: reqwest::Client,
    base_url: String,
    cache: Arc<C>,
}

impl HttpFetcher<MemoryCache> {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_cache(base_url, MemoryCache::new())
    }
}

impl<C: Cache> HttpFetcher<C> {
    #[must_use]
    pub fn with_cache(base_url: impl Into<String>, cache: C) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http: reqwest::Client::new(),
            base_url,
            cache: Arc::new(cache),
        }
    }

    #[must_use]
    pub fn cache(&self) -> &C {
        &self.cache
    }

    #[must_use]
    pub fn url(&self, relative_path: &str) -> String {
        format!("{}/{}", self.base_url, relative_path)
    }

    /// Fetch bytes for a path relative to the base URL, going through the cache.
    pub async fn fetch_bytes(&self, relative_path: &str) -> Result<Arc<[u8]>> {
        if let Some(bytes) = self.cache.get(relative_path) {
            tracing::trace!("Cache hit for {}", relative_path);
            return Ok(bytes);
        }
        let url = self.url(relative_path);
        let response = self.http.get(&url).send().await?.error_for_status()?;
        let bytes: Arc<[u8]> = Arc::from(response.bytes().await?.as_ref());
        self.cache.insert(relative_path, Arc::clone(&bytes));
        Ok(bytes)
    }

    /// Fetch and decode the JSON manifest of a model revision.
    pub async fn fetch_manifest(&self, model: ModelId) -> Result<Value> {
        let url = self.url(&model_file_path(model, MANIFEST_FILE_NAME));
        let response = self.http.get(&url).send().await?.error_for_status()?;
        Ok(serde_json::from_slice(&response.bytes().await?)?)
    }
}

impl<C: Cache> SectorFetcher for HttpFetcher<C> {
    async fn fetch(&self, request: &SectorRequest) -> Result<Vec<u8>> {
        Ok(self.fetch_bytes(&request.relative_path()).await?.to_vec())
    }
}

/// Reads model files from `{root}/{model_id}/{revision_id}/`.
#[derive(Debug, Clone)]
pub struct FileFetcher {
    root: PathBuf,
}

impl FileFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn path(&self, model: ModelId, file_name: &str) -> PathBuf {
        self.root
            .join(model.model_id.to_string())
            .join(model.revision_id.to_string())
            .join(file_name)
    }

    /// Read and decode the JSON manifest of a model revision.
    pub async fn fetch_manifest(&self, model: ModelId) -> Result<Value> {
        let bytes = tokio::fs::read(self.path(model, MANIFEST_FILE_NAME)).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

impl SectorFetcher for FileFetcher {
    async fn fetch(&self, request: &SectorRequest) -> Result<Vec<u8>> {
        let path = self.path(request.model, &request.file_name);
        tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::Fetch(format!("{} not found", path.display()))
            } else {
                Error::Io(e)
            }
        })
    }
}
