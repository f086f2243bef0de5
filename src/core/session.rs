//! Wiring of store, transport, sync gate and engine for one process run

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use log::{debug, warn};

use crate::core::bundle::Bundle;
use crate::core::cache::{ActiveCache, CacheStorage, TieredFetchCache};
use crate::core::config::Config;
use crate::core::engine::{spawn_engine, EngineHandle, LabelledRoute, RouteQuery};
use crate::core::error::Result;
use crate::core::fetch::{Fetch, FetchRequest, HttpFetcher};
use crate::core::graph::Bbox;
use crate::core::store::{BundleStore, FileStore, BUNDLE_KEY};
use crate::core::sync::{SyncGate, SyncOutcome};

/// Network access, optionally behind the tiered cache
pub enum Transport {
    Direct(HttpFetcher),
    Cached(Arc<ActiveCache<HttpFetcher>>),
}

impl Transport {
    /// Direct transport, or the tiered cache.
    ///
    /// A cache activated by an earlier run is resumed as is; install and
    /// activation only happen when none exists yet.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let http = HttpFetcher::with_retry_delay(config.retry_base_delay_ms);
        if !config.offline_cache {
            return Ok(Transport::Direct(http));
        }
        let http = Arc::new(http);
        let cache_config = config.cache_config()?;
        let storage = CacheStorage::new(config.cache_dir());
        let resumed =
            TieredFetchCache::resume(cache_config.clone(), storage.clone(), Arc::clone(&http)).await;
        let cache = match resumed {
            Some(cache) => cache,
            None => {
                TieredFetchCache::install(cache_config, storage, http)
                    .await?
                    .activate()
                    .await?
            }
        };
        Ok(Transport::Cached(Arc::new(cache)))
    }

    /// Follow a version change: drop cached namespaces of older versions
    async fn observe(&self, outcome: &SyncOutcome) {
        if let (Transport::Cached(cache), SyncOutcome::Updated { sha }) = (self, outcome) {
            if let Err(e) = cache.retain(sha).await {
                warn!("Could not collect old cache versions: {e}");
            }
        }
    }

    async fn settle(&self) {
        if let Transport::Cached(cache) = self {
            cache.settle().await;
        }
    }
}

impl Fetch for Transport {
    async fn fetch(&self, request: &FetchRequest) -> Result<Bytes> {
        match self {
            Transport::Direct(http) => http.fetch(request).await,
            Transport::Cached(cache) => cache.fetch(request).await,
        }
    }
}

/// Snapshot of what is stored locally
#[derive(Debug, Clone, PartialEq)]
pub struct Status {
    pub sha: Option<String>,
    pub nodes: usize,
    pub edges: usize,
    pub bbox: Option<Bbox>,
    pub last_checked: Option<DateTime<Utc>>,
}

impl Status {
    /// Read what is stored under `config`'s data dir; no network, no engine
    pub async fn read(config: &Config) -> Self {
        let store = FileStore::new(config.store_dir());
        let bundle = store.get(BUNDLE_KEY).await;
        Self {
            sha: bundle.as_ref().map(|b| b.sha().to_string()),
            nodes: bundle.as_ref().map_or(0, |b| b.graph().nodes.len()),
            edges: bundle.as_ref().map_or(0, |b| b.graph().edges.len()),
            bbox: bundle.as_ref().and_then(|b| b.bbox().or_else(|| b.graph().bounds())),
            last_checked: store.get_sync_state().await.last_checked,
        }
    }
}

pub struct Session {
    gate: SyncGate<FileStore, Arc<Transport>>,
    transport: Arc<Transport>,
    engine: EngineHandle,
}

impl Session {
    pub async fn open(config: &Config) -> Result<Self> {
        let engine = spawn_engine()?;
        let transport = Arc::new(Transport::from_config(config).await?);
        let store = FileStore::new(config.store_dir());
        let gate = SyncGate::open(
            config.sync_config()?,
            store,
            Arc::clone(&transport),
            engine.clone(),
        )
        .await;
        Ok(Self {
            gate,
            transport,
            engine,
        })
    }

    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }

    pub fn gate(&self) -> &SyncGate<FileStore, Arc<Transport>> {
        &self.gate
    }

    /// Load the stored bundle, then refresh through the gate
    pub async fn sync(&mut self, force: bool) -> Result<SyncOutcome> {
        self.gate.warm_start().await?;
        let outcome = self.gate.refresh(force).await;
        self.transport.observe(&outcome).await;
        Ok(outcome)
    }

    /// Answer `query` as early as the data allows.
    ///
    /// With a stored bundle the route is computed from it while the refresh
    /// runs alongside; without one the refresh has to land first. The answer
    /// carries the sha and node names of the bundle that computed it, which
    /// may be older than the one the refresh just stored.
    pub async fn route(&mut self, query: RouteQuery) -> Result<(LabelledRoute, SyncOutcome)> {
        let (route, outcome) = if self.gate.warm_start().await?.is_some() {
            let (outcome, route) =
                tokio::join!(self.gate.refresh(false), self.engine.route_labelled(query));
            (route?, outcome)
        } else {
            debug!("Cold start; waiting for the first sync");
            let outcome = self.gate.refresh(false).await;
            (self.engine.route_labelled(query).await?, outcome)
        };
        self.transport.observe(&outcome).await;
        Ok((route, outcome))
    }

    pub async fn stored_bundle(&self) -> Option<Bundle> {
        self.gate.store().get(BUNDLE_KEY).await
    }


    /// Let background cache revalidations finish
    pub async fn close(self) {
        self.transport.settle().await;
    }
}
