//! Manifest sync gate
//!
//! Decides on each boot whether the remote dataset needs checking, and
//! replaces the stored bundle only when the manifest announces a new sha.
//!
//! ```text
//! Cold ──cached──▶ WarmServing ──┐
//!   └──no cache─────────────────▶ gate check ──recent──▶ Idle
//!                                     │
//!                                     ▼
//!                                 Checking ──same sha──▶ Idle
//!                                     │
//!                                     ▼
//!                                Refreshing ──────────▶ Idle
//! ```
//!
//! Network failures end in `Idle` with stored state untouched.

use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use reqwest::Url;

use crate::core::bundle::Bundle;
use crate::core::engine::EngineHandle;
use crate::core::error::Result;
use crate::core::fetch::{Fetch, FetchRequest};
use crate::core::graph::Graph;
use crate::core::manifest::Manifest;
use crate::core::store::{BundleStore, SyncState, BUNDLE_KEY};

/// Default minimum time between manifest checks
pub const DEFAULT_GATE_HOURS: i64 = 6;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub manifest_url: Url,
    pub gate_interval: Duration,
}

impl SyncConfig {
    pub fn new(manifest_url: Url) -> Self {
        Self {
            manifest_url,
            gate_interval: Duration::hours(DEFAULT_GATE_HOURS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatePhase {
    Cold,
    WarmServing,
    Checking,
    Refreshing,
    Idle,
}

/// How a refresh ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Checked recently and a bundle is cached; no network call made
    Throttled,
    /// The manifest matches the cached bundle
    UpToDate { sha: String },
    /// A new bundle was stored and loaded
    Updated { sha: String },
    /// Network or decode failure; the cached bundle stays authoritative
    Failed { reason: String },
}

pub struct SyncGate<S, F> {
    config: SyncConfig,
    store: S,
    fetcher: F,
    engine: EngineHandle,
    state: SyncState,
    cached_sha: Option<String>,
    phase: GatePhase,
}

impl<S: BundleStore, F: Fetch> SyncGate<S, F> {
    pub fn new(
        config: SyncConfig,
        store: S,
        fetcher: F,
        engine: EngineHandle,
        state: SyncState,
    ) -> Self {
        Self {
            config,
            store,
            fetcher,
            engine,
            state,
            cached_sha: None,
            phase: GatePhase::Cold,
        }
    }

    /// Build a gate with the sync state persisted in `store`
    pub async fn open(config: SyncConfig, store: S, fetcher: F, engine: EngineHandle) -> Self {
        let state = store.get_sync_state().await;
        Self::new(config, store, fetcher, engine, state)
    }

    pub fn phase(&self) -> GatePhase {
        self.phase
    }

    pub fn cached_sha(&self) -> Option<&str> {
        self.cached_sha.as_deref()
    }

    pub fn sync_state(&self) -> &SyncState {
        &self.state
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn enter(&mut self, phase: GatePhase) {
        debug!("Sync gate {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    /// Load the stored bundle into the engine, if there is one.
    ///
    /// Returns the sha now being served. Once a bundle has been handed to the
    /// engine this returns its sha without touching the store again.
    pub async fn warm_start(&mut self) -> Result<Option<String>> {
        if let Some(sha) = &self.cached_sha {
            return Ok(Some(sha.clone()));
        }
        match self.store.get(BUNDLE_KEY).await {
            Some(bundle) => {
                let sha = bundle.sha().to_string();
                self.engine.load(bundle).await?;
                self.cached_sha = Some(sha.clone());
                self.enter(GatePhase::WarmServing);
                Ok(Some(sha))
            }
            None => {
                debug!("No cached bundle");
                Ok(None)
            }
        }
    }

    /// Warm start, then refresh through the gate
    pub async fn boot(&mut self) -> Result<SyncOutcome> {
        self.warm_start().await?;
        Ok(self.refresh(false).await)
    }

    pub async fn refresh(&mut self, force: bool) -> SyncOutcome {
        self.refresh_at(Utc::now(), force).await
    }

    /// Refresh as if the current time were `now`
    pub async fn refresh_at(&mut self, now: DateTime<Utc>, force: bool) -> SyncOutcome {
        if !force && self.recently_checked(now) {
            debug!("Manifest checked less than {} ago; skipping", self.config.gate_interval);
            self.enter(GatePhase::Idle);
            return SyncOutcome::Throttled;
        }

        self.enter(GatePhase::Checking);
        let manifest = match self.fetch_manifest().await {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!("Manifest fetch failed: {e}");
                self.enter(GatePhase::Idle);
                return SyncOutcome::Failed { reason: e.to_string() };
            }
        };

        self.state.last_checked = Some(now);
        if let Err(e) = self.store.set_sync_state(&self.state).await {
            warn!("Could not persist last check time: {e}");
        }

        if self.cached_sha.as_deref() == Some(manifest.sha.as_str()) {
            debug!("Graph {} is current", manifest.sha);
            self.enter(GatePhase::Idle);
            return SyncOutcome::UpToDate { sha: manifest.sha };
        }

        self.enter(GatePhase::Refreshing);
        let outcome = match self.replace_bundle(&manifest).await {
            Ok(()) => {
                info!("Graph updated to {}", manifest.sha);
                self.cached_sha = Some(manifest.sha.clone());
                SyncOutcome::Updated { sha: manifest.sha }
            }
            Err(e) => {
                warn!("Graph refresh to {} failed: {e}", manifest.sha);
                SyncOutcome::Failed { reason: e.to_string() }
            }
        };
        self.enter(GatePhase::Idle);
        outcome
    }

    fn recently_checked(&self, now: DateTime<Utc>) -> bool {
        let Some(last) = self.state.last_checked else {
            return false;
        };
        self.cached_sha.is_some() && now.signed_duration_since(last) < self.config.gate_interval
    }

    async fn fetch_manifest(&self) -> Result<Manifest> {
        let request = FetchRequest::fresh(self.config.manifest_url.clone());
        let body = self.fetcher.fetch(&request).await?;
        Manifest::from_slice(&body)
    }

    async fn replace_bundle(&self, manifest: &Manifest) -> Result<()> {
        let url = manifest.graph_url(&self.config.manifest_url)?;
        let body = self.fetcher.fetch(&FetchRequest::new(url)).await?;
        let graph: Graph = serde_json::from_slice(&body)?;
        let bundle = Bundle::assemble(manifest, graph);

        if let Err(e) = self.store.set(BUNDLE_KEY, &bundle).await {
            warn!("Could not persist bundle {}: {e}", manifest.sha);
        }
        self.engine.load(bundle).await
    }
}
