//! Tiered fetch cache
//!
//! Sits between the sync gate and the network and keeps manifest and graph
//! responses on disk so a later run can start offline:
//!
//! - manifest requests are served stale-while-revalidate from `manifest-cache`
//! - graph asset requests are served cache-first from a namespace scoped to the
//!   current dataset sha, with a background refresh of that namespace
//!
//! The lifecycle is carried by types. [`TieredFetchCache::install`] warms the
//! cache and yields an [`InstalledCache`]; only the [`ActiveCache`] returned by
//! [`InstalledCache::activate`] implements [`Fetch`], so nothing is intercepted
//! before stale namespaces are gone.
//!
//! Activation leaves a marker in the cache root. Later runs pick the layer up
//! with [`TieredFetchCache::resume`] and make no network call to do so; old
//! dataset versions are then dropped by [`ActiveCache::retain`] when the sync
//! gate moves to a new sha.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use log::{debug, info, warn};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

use crate::core::error::{Error, Result};
use crate::core::fetch::{Fetch, FetchRequest};
use crate::core::manifest::Manifest;

/// Namespace used for stale-while-revalidate manifest responses
pub const MANIFEST_CACHE: &str = "manifest-cache";

/// Namespace tag used when no manifest could be resolved
pub const BOOTSTRAP_TAG: &str = "bootstrap";

/// Layout version of the cache; a change forces a fresh install
pub const CACHE_LAYER: &str = "route-cache-v1";

/// File in the cache root recording the last completed activation
const MARKER_FILE: &str = "active.json";

/// Namespace holding responses for one dataset version
pub fn cache_name(sha: &str) -> String {
    let tag: String = sha
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{CACHE_LAYER}-{tag}")
}

/// What the last activation kept
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationMarker {
    pub layer: String,
    pub sha: String,
}

/// Which requests the cache intercepts
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub manifest_url: Url,
    /// URL prefix; requests outside it go straight to the network
    pub scope: String,
    /// Path suffix identifying manifest requests
    pub manifest_suffix: String,
    /// Path fragment identifying versioned graph assets
    pub graph_marker: String,
}

impl CacheConfig {
    /// Scope defaults to the directory above the manifest's `assets/` folder
    pub fn for_manifest(manifest_url: Url) -> Self {
        let scope = manifest_url
            .join("..")
            .map(|u| u.to_string())
            .unwrap_or_else(|_| manifest_url.origin().ascii_serialization());
        Self {
            manifest_url,
            scope,
            manifest_suffix: "/assets/tn.manifest.json".to_string(),
            graph_marker: "/assets/tn.graph.v1.".to_string(),
        }
    }
}

/// What kind of interception a request gets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Manifest,
    GraphAsset,
    Passthrough,
}

impl CacheConfig {
    fn classify(&self, url: &Url) -> Route {
        if !url.as_str().starts_with(&self.scope) {
            return Route::Passthrough;
        }
        let path = url.path();
        if path.ends_with(&self.manifest_suffix) {
            Route::Manifest
        } else if path.contains(&self.graph_marker) {
            Route::GraphAsset
        } else {
            Route::Passthrough
        }
    }
}

/// On-disk set of named namespaces, one directory each
#[derive(Debug, Clone)]
pub struct CacheStorage {
    root: PathBuf,
}

impl CacheStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Open a namespace, creating it if needed
    pub async fn open(&self, name: &str) -> Result<CacheNamespace> {
        let dir = self.root.join(name);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(CacheNamespace { dir })
    }

    /// Names of all namespaces present, sorted
    pub async fn keys(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    pub async fn delete(&self, name: &str) -> Result<()> {
        match tokio::fs::remove_dir_all(self.root.join(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete every namespace not in `keep`
    async fn delete_all_except(&self, keep: &[&str]) -> Result<()> {
        let stale: Vec<String> = self
            .keys()
            .await?
            .into_iter()
            .filter(|name| !keep.contains(&name.as_str()))
            .collect();
        let results = futures::future::join_all(stale.iter().map(|name| self.delete(name))).await;
        for (name, result) in stale.iter().zip(results) {
            match result {
                Ok(()) => debug!("Deleted cache namespace {name}"),
                Err(e) => warn!("Could not delete cache namespace {name}: {e}"),
            }
        }
        Ok(())
    }

    /// Marker left by the last activation; unreadable markers count as absent
    pub async fn marker(&self) -> Option<ActivationMarker> {
        let bytes = tokio::fs::read(self.root.join(MARKER_FILE)).await.ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(marker) => Some(marker),
            Err(e) => {
                warn!("Ignoring corrupt cache marker: {e}");
                None
            }
        }
    }

    async fn set_marker(&self, sha: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        let marker = ActivationMarker {
            layer: CACHE_LAYER.to_string(),
            sha: sha.to_string(),
        };
        let path = self.root.join(MARKER_FILE);
        let tmp = self.root.join(format!(".{MARKER_FILE}.tmp"));
        tokio::fs::write(&tmp, serde_json::to_vec(&marker)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

/// One namespace; entries are keyed by the SHA-256 of the request URL
#[derive(Debug, Clone)]
pub struct CacheNamespace {
    dir: PathBuf,
}

impl CacheNamespace {
    fn entry_path(&self, url: &Url) -> PathBuf {
        let digest = Sha256::digest(url.as_str().as_bytes());
        self.dir.join(hex::encode(digest))
    }

    /// Cached body for `url`, if any
    pub async fn lookup(&self, url: &Url) -> Option<Bytes> {
        match tokio::fs::read(self.entry_path(url)).await {
            Ok(bytes) => Some(Bytes::from(bytes)),
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Unreadable cache entry for {url}: {e}");
                }
                None
            }
        }
    }

    pub async fn put(&self, url: &Url, body: &Bytes) -> Result<()> {
        let path = self.entry_path(url);
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

/// Entry point of the cache lifecycle
pub struct TieredFetchCache;

impl TieredFetchCache {
    /// Warm the cache for the current manifest and graph asset.
    ///
    /// The manifest goes to `manifest-cache`, where stale-while-revalidate
    /// reads it, and the graph to the namespace of its sha. Warming is best
    /// effort: an unreachable network leaves the cache as it was and
    /// installation still succeeds.
    pub async fn install<F>(
        config: CacheConfig,
        storage: CacheStorage,
        inner: Arc<F>,
    ) -> Result<InstalledCache<F>>
    where
        F: Fetch + 'static,
    {
        if let Some((manifest, body)) = resolve_manifest(inner.as_ref(), &config.manifest_url).await {
            storage
                .open(MANIFEST_CACHE)
                .await?
                .put(&config.manifest_url, &body)
                .await?;
            match manifest.graph_url(&config.manifest_url) {
                Ok(url) => {
                    let ns = storage.open(&cache_name(&manifest.sha)).await?;
                    match inner.fetch(&FetchRequest::new(url.clone())).await {
                        Ok(body) => ns.put(&url, &body).await?,
                        Err(e) => warn!("Could not warm {url}: {e}"),
                    }
                }
                Err(e) => warn!("Not warming graph asset: {e}"),
            }
            debug!("Installed cache for {}", manifest.sha);
        }

        Ok(InstalledCache {
            config,
            storage,
            inner,
        })
    }

    /// Pick up a cache activated by an earlier run, without touching the network.
    ///
    /// `None` when there is no marker or it was written by another cache
    /// layout; the caller then installs and activates afresh.
    pub async fn resume<F>(
        config: CacheConfig,
        storage: CacheStorage,
        inner: Arc<F>,
    ) -> Option<ActiveCache<F>>
    where
        F: Fetch + 'static,
    {
        let marker = storage.marker().await?;
        if marker.layer != CACHE_LAYER {
            info!("Cache layout changed ({} -> {CACHE_LAYER}); reinstalling", marker.layer);
            return None;
        }
        debug!("Resuming cache for {}", marker.sha);
        Some(ActiveCache {
            config,
            storage,
            inner,
            tracker: TaskTracker::new(),
        })
    }
}

/// Fetch the manifest straight from the network, bypassing every cache layer
async fn resolve_manifest<F: Fetch>(inner: &F, url: &Url) -> Option<(Manifest, Bytes)> {
    let body = match inner.fetch(&FetchRequest::fresh(url.clone())).await {
        Ok(body) => body,
        Err(e) => {
            debug!("Manifest unreachable: {e}");
            return None;
        }
    };
    match Manifest::from_slice(&body) {
        Ok(manifest) => Some((manifest, body)),
        Err(e) => {
            warn!("Ignoring malformed manifest: {e}");
            None
        }
    }
}

/// Installed but not yet intercepting
pub struct InstalledCache<F> {
    config: CacheConfig,
    storage: CacheStorage,
    inner: Arc<F>,
}

impl<F: Fetch + 'static> InstalledCache<F> {
    /// Delete every dataset namespace except the current version's, refresh
    /// `manifest-cache` with the manifest just resolved, then start serving.
    ///
    /// Without a reachable manifest the current version is unknown: no
    /// namespace is deleted and no marker is written, so the next run
    /// installs again.
    pub async fn activate(self) -> Result<ActiveCache<F>> {
        match resolve_manifest(self.inner.as_ref(), &self.config.manifest_url).await {
            Some((manifest, body)) => {
                let keep = cache_name(&manifest.sha);
                self.storage
                    .delete_all_except(&[keep.as_str(), MANIFEST_CACHE])
                    .await?;
                self.storage
                    .open(MANIFEST_CACHE)
                    .await?
                    .put(&self.config.manifest_url, &body)
                    .await?;
                self.storage.set_marker(&manifest.sha).await?;
                info!("Cache active for {}", manifest.sha);
            }
            None => warn!("Manifest unreachable during activation; keeping all cache namespaces"),
        }

        Ok(ActiveCache {
            config: self.config,
            storage: self.storage,
            inner: self.inner,
            tracker: TaskTracker::new(),
        })
    }
}

/// Intercepting cache; implements [`Fetch`]
pub struct ActiveCache<F> {
    config: CacheConfig,
    storage: CacheStorage,
    inner: Arc<F>,
    tracker: TaskTracker,
}

impl<F: Fetch + 'static> ActiveCache<F> {
    pub fn storage(&self) -> &CacheStorage {
        &self.storage
    }

    /// Wait for background revalidations started so far
    pub async fn settle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Drop every dataset namespace except `sha`'s and record it as current.
    ///
    /// Call once the sync gate has moved to `sha`, so older versions do not
    /// pile up between installs.
    pub async fn retain(&self, sha: &str) -> Result<()> {
        let keep = cache_name(sha);
        self.storage
            .delete_all_except(&[keep.as_str(), MANIFEST_CACHE])
            .await?;
        self.storage.set_marker(sha).await?;
        debug!("Cache retains {sha}");
        Ok(())
    }

    /// Sha of the current dataset: network first, then the cached manifest
    async fn current_sha(&self) -> String {
        if let Some((manifest, _)) = resolve_manifest(self.inner.as_ref(), &self.config.manifest_url).await {
            return manifest.sha;
        }
        if let Ok(ns) = self.storage.open(MANIFEST_CACHE).await {
            if let Some(body) = ns.lookup(&self.config.manifest_url).await {
                if let Ok(manifest) = Manifest::from_slice(&body) {
                    return manifest.sha;
                }
            }
        }
        BOOTSTRAP_TAG.to_string()
    }

    /// Start a detached network fetch that refreshes `ns` when it lands
    fn revalidate(&self, ns: CacheNamespace, request: FetchRequest) -> JoinHandle<Result<Bytes>> {
        let inner = Arc::clone(&self.inner);
        self.tracker.spawn(async move {
            match inner.fetch(&request).await {
                Ok(body) => {
                    if let Err(e) = ns.put(&request.url, &body).await {
                        warn!("Could not update cache for {}: {e}", request.url);
                    }
                    Ok(body)
                }
                Err(e) => {
                    debug!("Revalidation of {} failed: {e}", request.url);
                    Err(e)
                }
            }
        })
    }

    /// Cached body if present, otherwise wait for the network leg
    async fn serve(&self, ns: CacheNamespace, request: &FetchRequest) -> Result<Bytes> {
        let cached = ns.lookup(&request.url).await;
        let network = self.revalidate(ns, request.clone());
        if let Some(body) = cached {
            debug!("Serving {} from cache", request.url);
            return Ok(body);
        }
        match network.await {
            Ok(result) => result,
            Err(_) => Err(Error::Offline(request.url.to_string())),
        }
    }

    async fn stale_while_revalidate(&self, request: &FetchRequest) -> Result<Bytes> {
        let ns = self.storage.open(MANIFEST_CACHE).await?;
        self.serve(ns, request).await
    }

    async fn cache_first_then_update(&self, request: &FetchRequest) -> Result<Bytes> {
        let sha = self.current_sha().await;
        let ns = self.storage.open(&cache_name(&sha)).await?;
        self.serve(ns, request).await
    }
}

impl<F: Fetch + 'static> Fetch for ActiveCache<F> {
    async fn fetch(&self, request: &FetchRequest) -> Result<Bytes> {
        match self.config.classify(&request.url) {
            Route::Manifest => self.stale_while_revalidate(request).await,
            Route::GraphAsset => self.cache_first_then_update(request).await,
            Route::Passthrough => self.inner.fetch(request).await,
        }
    }
}
