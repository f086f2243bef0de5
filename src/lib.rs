//! # Butterfly-wayfinder Library
//!
//! Offline-capable, versioned route finding over a graph snapshot published
//! behind a small manifest.
//!
//! ## Features
//!
//! - **Instant start**: the last synced bundle is read from disk before any network call
//! - **Cheap staleness checks**: a time gate limits manifest checks, and the full
//!   graph is downloaded only when the manifest's sha changes
//! - **Isolated compute**: shortest paths run on a dedicated thread behind a message channel
//! - **Offline cache**: optional on-disk tiered cache for manifest and graph responses,
//!   garbage-collected per dataset version
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = butterfly_wayfinder::Config {
//!         manifest_url: "https://example.org/route/assets/tn.manifest.json".into(),
//!         ..Default::default()
//!     };
//!
//!     let result = butterfly_wayfinder::route(&config, "Central", "Harbour", "shortest").await?;
//!     if result.is_empty() {
//!         println!("No route found");
//!     } else {
//!         println!("Distance: {:.1} · Hops: {}", result.distance, result.hops);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Driving the pieces directly
//!
//! ```rust,no_run
//! use butterfly_wayfinder::{spawn_engine, FileStore, HttpFetcher, SyncConfig, SyncGate};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = spawn_engine()?;
//! let config = SyncConfig::new("https://example.org/assets/tn.manifest.json".parse()?);
//! let mut gate = SyncGate::open(config, FileStore::new("./data"), HttpFetcher::new(), engine.clone()).await;
//! let outcome = gate.boot().await?;
//! println!("{outcome:?}");
//! # Ok(())
//! # }
//! ```

// Internal modules
mod core;

pub use crate::core::bundle::Bundle;
pub use crate::core::cache::{
    cache_name, ActivationMarker, ActiveCache, CacheConfig, CacheNamespace, CacheStorage,
    InstalledCache, TieredFetchCache, BOOTSTRAP_TAG, CACHE_LAYER, MANIFEST_CACHE,
};
pub use crate::core::config::Config;
pub use crate::core::engine::{
    path_distance, shortest_path, spawn_engine, EngineHandle, EngineRequest, EngineResponse,
    EngineState, LabelledRoute, RouteMode, RouteQuery, RouteResult,
};
pub use crate::core::error::{suggest_names, Error, Result};
pub use crate::core::fetch::{CacheMode, Fetch, FetchRequest, HttpFetcher};
pub use crate::core::graph::{
    build_indexes, ensure_adjacency, AdjEntry, Adjacency, Bbox, Edge, Graph, Indexes, Node, NodeId,
};
pub use crate::core::link::DeepLink;
pub use crate::core::manifest::Manifest;
pub use crate::core::session::{Session, Status, Transport};
pub use crate::core::store::{BundleStore, FileStore, MemoryStore, SyncState, BUNDLE_KEY, SYNC_STATE_KEY};
pub use crate::core::sync::{GatePhase, SyncConfig, SyncGate, SyncOutcome, DEFAULT_GATE_HOURS};

/// Sync if due, then find a route between two named nodes
///
/// Uses the stored bundle right away when one exists. Unknown names and
/// unreachable destinations give an empty result rather than an error.
///
/// # Arguments
/// * `config` - Where the manifest lives and where local data is kept
/// * `start` / `end` - Node names, matched case-insensitively
/// * `mode` - `"fewest_hops"`, or anything else for shortest weighted distance
pub async fn route(config: &Config, start: &str, end: &str, mode: &str) -> Result<RouteResult> {
    let mut session = Session::open(config).await?;
    let query = RouteQuery {
        start_name: start.to_string(),
        end_name: end.to_string(),
        mode: RouteMode::from(mode),
    };
    let (route, _) = session.route(query).await?;
    session.close().await;
    Ok(route.result)
}

/// Run the sync gate once
///
/// `force` checks the manifest even when the last check was recent.
pub async fn sync(config: &Config, force: bool) -> Result<SyncOutcome> {
    let mut session = Session::open(config).await?;
    let outcome = session.sync(force).await?;
    session.close().await;
    Ok(outcome)
}
