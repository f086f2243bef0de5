//! Manifest document: the cheap version descriptor fetched before a graph

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::core::error::{Error, Result};
use crate::core::graph::Bbox;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Content version id; equal shas mean identical graphs
    pub sha: String,
    pub graph_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Bbox>,
}

impl Manifest {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Resolve `graph_url` against the URL the manifest was fetched from
    pub fn graph_url(&self, manifest_url: &Url) -> Result<Url> {
        manifest_url.join(&self.graph_url).map_err(|e| {
            Error::InvalidInput(format!("Bad graph_url '{}': {e}", self.graph_url))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_graph_url_resolves_against_manifest() {
        let manifest = Manifest {
            sha: "abc".into(),
            graph_url: "./tn.graph.v1.abc.json".into(),
            bbox: None,
        };
        let base = Url::parse("https://example.org/route/assets/tn.manifest.json").unwrap();
        assert_eq!(
            manifest.graph_url(&base).unwrap().as_str(),
            "https://example.org/route/assets/tn.graph.v1.abc.json"
        );
    }

    #[test]
    fn test_absolute_graph_url_is_kept() {
        let manifest = Manifest {
            sha: "abc".into(),
            graph_url: "https://cdn.example.org/g.json".into(),
            bbox: None,
        };
        let base = Url::parse("https://example.org/assets/tn.manifest.json").unwrap();
        assert_eq!(
            manifest.graph_url(&base).unwrap().as_str(),
            "https://cdn.example.org/g.json"
        );
    }

    #[test]
    fn test_manifest_parses_optional_bbox() {
        let m = Manifest::from_slice(br#"{"sha":"x","graph_url":"g.json","bbox":[0,0,1,2]}"#).unwrap();
        assert_eq!(m.bbox, Some([0.0, 0.0, 1.0, 2.0]));
        assert!(Manifest::from_slice(b"{\"sha\":1}").is_err());
    }
}
