//! Route compute engine
//!
//! The engine owns the live graph on a dedicated thread and is reached only
//! through [`EngineHandle`]. Each request carries its own reply channel, and
//! requests are answered one at a time in arrival order, so a `route` sent
//! after a `load` always sees that load (or a newer one).

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::core::bundle::Bundle;
use crate::core::error::{Error, Result};
use crate::core::graph::{ensure_adjacency, AdjEntry, Graph, Indexes, NodeId};

/// Pending requests the channel buffers before senders wait
const REQUEST_BUFFER: usize = 32;

/// Search cost model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RouteMode {
    /// Every edge costs 1
    FewestHops,
    /// Edge weights, 1 where absent
    #[default]
    Shortest,
}

impl From<&str> for RouteMode {
    fn from(s: &str) -> Self {
        match s {
            "fewest_hops" => RouteMode::FewestHops,
            _ => RouteMode::Shortest,
        }
    }
}

impl From<String> for RouteMode {
    fn from(s: String) -> Self {
        RouteMode::from(s.as_str())
    }
}

impl From<RouteMode> for String {
    fn from(mode: RouteMode) -> Self {
        mode.as_str().to_string()
    }
}

impl RouteMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteMode::FewestHops => "fewest_hops",
            RouteMode::Shortest => "shortest",
        }
    }
}

/// Answer to a route query; an empty path means no route
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteResult {
    pub path: Vec<NodeId>,
    /// Euclidean length of the path through node coordinates
    pub distance: f64,
    pub hops: usize,
}

impl RouteResult {
    pub fn is_empty(&self) -> bool {
        self.path.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteQuery {
    pub start_name: String,
    pub end_name: String,
    pub mode: RouteMode,
}

/// Requests accepted by the engine, tagged by `kind` on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EngineRequest {
    Load { bundle: Box<Bundle> },
    Route(RouteQuery),
}

/// Responses produced by the engine, tagged by `kind` on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EngineResponse {
    Ready,
    Route(RouteResult),
}

struct Envelope {
    request: EngineRequest,
    reply: oneshot::Sender<Reply>,
}

/// Response plus the version it was computed against
#[derive(Debug)]
struct Reply {
    response: EngineResponse,
    sha: Option<String>,
    names: Vec<String>,
}

/// A route labelled by the bundle that answered it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelledRoute {
    pub result: RouteResult,
    /// Sha the engine held when it answered; `None` before any load
    pub sha: Option<String>,
    /// Node names along `result.path`, from that same bundle
    pub names: Vec<String>,
}

/// Graph state owned by the compute thread
#[derive(Debug, Default)]
pub struct EngineState {
    loaded: Option<Loaded>,
}

#[derive(Debug)]
struct Loaded {
    sha: String,
    graph: Graph,
    indexes: Indexes,
}

impl EngineState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace whatever is loaded with `bundle`.
    ///
    /// Returns false when that sha is already loaded; state is left as is.
    pub fn load(&mut self, bundle: Bundle) -> bool {
        if self.sha() == Some(bundle.sha()) {
            debug!("Engine already holds {}", bundle.sha());
            return false;
        }
        let (sha, mut graph, indexes) = bundle.into_parts();
        ensure_adjacency(&mut graph);
        debug!("Engine loaded {sha} ({} nodes)", graph.nodes.len());
        self.loaded = Some(Loaded { sha, graph, indexes });
        true
    }

    pub fn sha(&self) -> Option<&str> {
        self.loaded.as_ref().map(|l| l.sha.as_str())
    }

    pub fn handle(&mut self, request: EngineRequest) -> EngineResponse {
        match request {
            EngineRequest::Load { bundle } => {
                self.load(*bundle);
                EngineResponse::Ready
            }
            EngineRequest::Route(query) => EngineResponse::Route(self.route(&query)),
        }
    }

    /// Names along `path` from the loaded bundle, `#id` for unknown slots
    pub fn names_along(&self, path: &[NodeId]) -> Vec<String> {
        let Some(loaded) = &self.loaded else {
            return Vec::new();
        };
        path.iter()
            .map(|&id| {
                loaded
                    .indexes
                    .node(id)
                    .map_or_else(|| format!("#{id}"), |node| node.name.clone())
            })
            .collect()
    }

    fn answer(&mut self, request: EngineRequest, loads: &AtomicUsize) -> Reply {
        let response = match request {
            EngineRequest::Load { bundle } => {
                if self.load(*bundle) {
                    loads.fetch_add(1, AtomicOrdering::SeqCst);
                }
                EngineResponse::Ready
            }
            request => self.handle(request),
        };
        let names = match &response {
            EngineResponse::Route(result) => self.names_along(&result.path),
            EngineResponse::Ready => Vec::new(),
        };
        Reply {
            response,
            sha: self.sha().map(str::to_string),
            names,
        }
    }

    /// Resolve both names to their first registered id and search between them
    pub fn route(&self, query: &RouteQuery) -> RouteResult {
        let Some(loaded) = &self.loaded else {
            return RouteResult::default();
        };
        let (Some(&src), Some(&dst)) = (
            loaded.indexes.ids_for_name(&query.start_name).first(),
            loaded.indexes.ids_for_name(&query.end_name).first(),
        ) else {
            return RouteResult::default();
        };

        let adj = loaded.graph.adj.as_deref().unwrap_or(&[]);
        let path = shortest_path(adj, src, dst, query.mode);
        let distance = path_distance(&loaded.indexes, &path);
        RouteResult {
            hops: path.len().saturating_sub(1),
            path,
            distance,
        }
    }
}

/// Frontier entry: lowest cost first, lowest node id among equal costs
#[derive(Debug, Clone, Copy, PartialEq)]
struct Frontier {
    cost: f64,
    node: NodeId,
}

impl Eq for Frontier {}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Frontier {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for a min-heap
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.node.cmp(&self.node))
    }
}

/// Dijkstra from `src`, stopping once `dst` is settled.
///
/// Returns the node sequence `src..=dst`, or an empty path if `dst` is
/// unreachable or outside the adjacency.
pub fn shortest_path(
    adj: &[Vec<AdjEntry>],
    src: NodeId,
    dst: NodeId,
    mode: RouteMode,
) -> Vec<NodeId> {
    let n = adj.len();
    if src >= n || dst >= n {
        return Vec::new();
    }

    let mut dist = vec![f64::INFINITY; n];
    let mut prev: Vec<Option<NodeId>> = vec![None; n];
    let mut settled = vec![false; n];
    let mut heap = BinaryHeap::new();

    dist[src] = 0.0;
    heap.push(Frontier { cost: 0.0, node: src });

    while let Some(Frontier { cost, node }) = heap.pop() {
        if settled[node] || cost > dist[node] {
            continue;
        }
        if node == dst {
            break;
        }
        settled[node] = true;

        for entry in &adj[node] {
            let step = match mode {
                RouteMode::FewestHops => 1.0,
                RouteMode::Shortest => entry.w.unwrap_or(1.0),
            };
            let alt = cost + step;
            if entry.to < n && !settled[entry.to] && alt < dist[entry.to] {
                dist[entry.to] = alt;
                prev[entry.to] = Some(node);
                heap.push(Frontier { cost: alt, node: entry.to });
            }
        }
    }

    if prev[dst].is_none() && src != dst {
        return Vec::new();
    }
    let mut path = vec![dst];
    let mut current = dst;
    while let Some(p) = prev[current] {
        path.push(p);
        current = p;
    }
    path.reverse();
    path
}

/// Sum of Euclidean distances between consecutive path nodes
pub fn path_distance(indexes: &Indexes, path: &[NodeId]) -> f64 {
    path.windows(2)
        .filter_map(|pair| Some((indexes.node(pair[0])?, indexes.node(pair[1])?)))
        .map(|(a, b)| (a.x - b.x).hypot(a.y - b.y))
        .sum()
}

/// Cloneable handle to the compute thread
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<Envelope>,
    loads: Arc<AtomicUsize>,
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Envelope").field("request", &self.request).finish()
    }
}

/// Start the compute thread; it exits once every handle is dropped
pub fn spawn_engine() -> Result<EngineHandle> {
    let (tx, mut rx) = mpsc::channel::<Envelope>(REQUEST_BUFFER);
    let loads = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&loads);
    thread::Builder::new()
        .name("route-engine".to_string())
        .spawn(move || {
            let mut state = EngineState::new();
            while let Some(Envelope { request, reply }) = rx.blocking_recv() {
                let answer = state.answer(request, &counter);
                // The requester may have given up; nothing to do then
                let _ = reply.send(answer);
            }
            debug!("Route engine stopped");
        })?;
    Ok(EngineHandle { tx, loads })
}

impl EngineHandle {
    async fn request(&self, request: EngineRequest) -> Result<Reply> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(Envelope { request, reply })
            .await
            .map_err(|_| Error::EngineUnavailable)?;
        response.await.map_err(|_| Error::EngineUnavailable)
    }

    /// Hand a bundle to the engine and wait for `ready`
    pub async fn load(&self, bundle: Bundle) -> Result<()> {
        let sha = bundle.sha().to_string();
        match self.request(EngineRequest::Load { bundle: Box::new(bundle) }).await?.response {
            EngineResponse::Ready => {
                info!("Route engine ready on {sha}");
                Ok(())
            }
            EngineResponse::Route(_) => Err(Error::EngineUnavailable),
        }
    }

    pub async fn route(&self, query: RouteQuery) -> Result<RouteResult> {
        Ok(self.route_labelled(query).await?.result)
    }

    /// Route, with the sha and node names of the bundle that answered
    pub async fn route_labelled(&self, query: RouteQuery) -> Result<LabelledRoute> {
        let reply = self.request(EngineRequest::Route(query)).await?;
        match reply.response {
            EngineResponse::Route(result) => Ok(LabelledRoute {
                result,
                sha: reply.sha,
                names: reply.names,
            }),
            EngineResponse::Ready => Err(Error::EngineUnavailable),
        }
    }

    /// Loads that replaced the engine's state; same-sha loads are not counted
    pub fn loads(&self) -> usize {
        self.loads.load(AtomicOrdering::SeqCst)
    }
}
