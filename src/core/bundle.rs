//! The versioned unit handed between sync, storage and the route engine

use serde::{Deserialize, Serialize};

use crate::core::graph::{build_indexes, Bbox, Graph, Indexes};
use crate::core::manifest::Manifest;

/// A graph together with the indexes derived from it.
///
/// Fields are private so the indexes and bbox can only be produced from the
/// bundle's own graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    sha: String,
    graph: Graph,
    indexes: Indexes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bbox: Option<Bbox>,
}

impl Bundle {
    /// Index `graph` and pair it with the manifest that announced it
    pub fn assemble(manifest: &Manifest, mut graph: Graph) -> Self {
        let indexes = build_indexes(&mut graph);
        let bbox = graph.bbox.or(manifest.bbox);
        Self {
            sha: manifest.sha.clone(),
            graph,
            indexes,
            bbox,
        }
    }

    pub fn sha(&self) -> &str {
        &self.sha
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn indexes(&self) -> &Indexes {
        &self.indexes
    }

    pub fn bbox(&self) -> Option<Bbox> {
        self.bbox
    }

    /// Split into parts for the engine, which owns them from then on
    pub(crate) fn into_parts(self) -> (String, Graph, Indexes) {
        (self.sha, self.graph, self.indexes)
    }
}
