//! Deep-link parameters (`start`, `end`, `mode`)

use reqwest::Url;

use crate::core::engine::{RouteMode, RouteQuery};

/// Route parameters carried in a shared link's query string
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeepLink {
    pub start: Option<String>,
    pub end: Option<String>,
    pub mode: Option<String>,
}

impl DeepLink {
    pub fn from_url(url: &Url) -> Self {
        let mut link = DeepLink::default();
        for (key, value) in url.query_pairs() {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            match key.as_ref() {
                "start" => link.start = Some(value.to_string()),
                "end" => link.end = Some(value.to_string()),
                "mode" => link.mode = Some(value.to_string()),
                _ => {}
            }
        }
        link
    }

    /// The query to run automatically; only when both endpoints are present
    pub fn query(&self) -> Option<RouteQuery> {
        Some(RouteQuery {
            start_name: self.start.clone()?,
            end_name: self.end.clone()?,
            mode: self.mode.as_deref().map(RouteMode::from).unwrap_or_default(),
        })
    }

    /// Render back onto `base` as a shareable link
    pub fn to_url(&self, base: &Url) -> Url {
        let mut url = base.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs.clear();
            for (key, value) in [("start", &self.start), ("end", &self.end), ("mode", &self.mode)] {
                if let Some(value) = value {
                    pairs.append_pair(key, value);
                }
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }
        url
    }
}
