//! Graph snapshot types and the index builder
//!
//! A [`Graph`] is the immutable document delivered by the remote source. The
//! builder derives a name lookup, an id lookup, and the symmetric adjacency
//! lists the route engine walks.

use std::collections::HashMap;

use log::warn;
use serde::{Deserialize, Serialize};

/// Dense node index used by the adjacency and id lookups
pub type NodeId = usize;

/// Bounding box `[xmin, ymin, xmax, ymax]` of all node coordinates
pub type Bbox = [f64; 4];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: i64,
    pub name: String,
    pub x: f64,
    pub y: f64,
}

/// Undirected edge; a missing weight counts as 1 during search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub a: i64,
    pub b: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub w: Option<f64>,
}

/// One direction of an edge as seen from its source node
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdjEntry {
    pub to: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub w: Option<f64>,
}

pub type Adjacency = Vec<Vec<AdjEntry>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Bbox>,
    /// Adjacency cache; travels with the graph once built
    #[serde(rename = "_adj", default, skip_serializing_if = "Option::is_none")]
    pub adj: Option<Adjacency>,
}

/// Lookups derived from a graph by [`build_indexes`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Indexes {
    /// Lowercase name to ids, in node order
    pub name_index: HashMap<String, Vec<NodeId>>,
    /// Slot `i` holds node `i`; gaps stay `None`
    pub nodes_by_id: Vec<Option<Node>>,
}

impl Indexes {
    /// Ids registered under a name, compared case-insensitively
    pub fn ids_for_name(&self, name: &str) -> &[NodeId] {
        self.name_index
            .get(&name.to_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes_by_id.get(id).and_then(Option::as_ref)
    }
}

impl Graph {
    /// Number of adjacency slots: largest non-negative node id plus one
    pub fn slot_count(&self) -> usize {
        self.nodes
            .iter()
            .filter_map(|n| slot(n.id))
            .max()
            .map_or(0, |max| max + 1)
    }

    /// Bbox from the document, or computed from node coordinates
    pub fn bounds(&self) -> Option<Bbox> {
        if self.bbox.is_some() {
            return self.bbox;
        }
        let mut iter = self.nodes.iter();
        let first = iter.next()?;
        let init = [first.x, first.y, first.x, first.y];
        Some(iter.fold(init, |[x0, y0, x1, y1], n| {
            [x0.min(n.x), y0.min(n.y), x1.max(n.x), y1.max(n.y)]
        }))
    }
}

fn slot(id: i64) -> Option<NodeId> {
    usize::try_from(id).ok()
}

/// Build the name and id lookups and make sure the adjacency cache exists.
///
/// An adjacency cache already present on the graph is kept as is.
pub fn build_indexes(graph: &mut Graph) -> Indexes {
    let slots = graph.slot_count();
    let mut name_index: HashMap<String, Vec<NodeId>> = HashMap::new();
    let mut nodes_by_id = vec![None; slots];

    for node in &graph.nodes {
        let Some(id) = slot(node.id) else {
            warn!("Skipping node with negative id {}", node.id);
            continue;
        };
        name_index
            .entry(node.name.to_lowercase())
            .or_default()
            .push(id);
        nodes_by_id[id] = Some(node.clone());
    }

    ensure_adjacency(graph);

    Indexes {
        name_index,
        nodes_by_id,
    }
}

/// Build the adjacency cache if absent and return it.
///
/// Each edge appends to both endpoints in input order. Edges touching an id
/// outside `0..slot_count()` are skipped.
pub fn ensure_adjacency(graph: &mut Graph) -> &Adjacency {
    if graph.adj.is_none() {
        let slots = graph.slot_count();
        let mut adj: Adjacency = vec![Vec::new(); slots];
        for edge in &graph.edges {
            match (slot(edge.a), slot(edge.b)) {
                (Some(a), Some(b)) if a < slots && b < slots => {
                    adj[a].push(AdjEntry { to: b, w: edge.w });
                    adj[b].push(AdjEntry { to: a, w: edge.w });
                }
                _ => warn!("Skipping edge {}-{} with unknown endpoint", edge.a, edge.b),
            }
        }
        graph.adj = Some(adj);
    }
    graph.adj.get_or_insert_with(Vec::new)
}
