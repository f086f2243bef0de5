//! Configuration for butterfly-wayfinder
//!
//! Every field has a default, so a config file only needs the values it
//! changes. Command-line flags are applied on top by the binary.

use std::path::{Path, PathBuf};

use chrono::Duration;
use reqwest::Url;
use serde::Deserialize;

use crate::core::cache::CacheConfig;
use crate::core::error::{Error, Result};
use crate::core::fetch::BASE_RETRY_DELAY_MS;
use crate::core::sync::{SyncConfig, DEFAULT_GATE_HOURS};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Where the manifest is published
    pub manifest_url: String,

    /// Directory for the bundle store and the fetch cache
    pub data_dir: PathBuf,

    /// Minimum hours between manifest checks
    pub gate_interval_hours: i64,

    /// Route fetches through the on-disk tiered cache
    pub offline_cache: bool,

    /// URL prefix the tiered cache intercepts; derived from the manifest URL when unset
    pub scope: Option<String>,

    /// Path suffix identifying manifest requests
    pub manifest_suffix: String,

    /// Path fragment identifying versioned graph assets
    pub graph_marker: String,

    /// Base delay for network retry backoff
    pub retry_base_delay_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            manifest_url: "http://localhost:8080/route/assets/tn.manifest.json".to_string(),
            data_dir: default_data_dir(),
            gate_interval_hours: DEFAULT_GATE_HOURS,
            offline_cache: false,
            scope: None,
            manifest_suffix: "/assets/tn.manifest.json".to_string(),
            graph_marker: "/assets/tn.graph.v1.".to_string(),
            retry_base_delay_ms: BASE_RETRY_DELAY_MS,
        }
    }
}

/// `$XDG_DATA_HOME/butterfly-wayfinder`, falling back to `./.butterfly-wayfinder`
fn default_data_dir() -> PathBuf {
    std::env::var_os("XDG_DATA_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".local/share")))
        .map(|base| base.join("butterfly-wayfinder"))
        .unwrap_or_else(|| PathBuf::from(".butterfly-wayfinder"))
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::ConfigError(format!("{}: {e}", path.display())))?;
        Self::from_toml(&text)
    }

    pub fn manifest_url(&self) -> Result<Url> {
        Url::parse(&self.manifest_url)
            .map_err(|e| Error::InvalidInput(format!("Bad manifest URL '{}': {e}", self.manifest_url)))
    }

    pub fn store_dir(&self) -> PathBuf {
        self.data_dir.join("store")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join("cache")
    }

    pub fn sync_config(&self) -> Result<SyncConfig> {
        if self.gate_interval_hours < 0 {
            return Err(Error::InvalidInput("gate_interval_hours must not be negative".into()));
        }
        Ok(SyncConfig {
            manifest_url: self.manifest_url()?,
            gate_interval: Duration::hours(self.gate_interval_hours),
        })
    }

    pub fn cache_config(&self) -> Result<CacheConfig> {
        let mut config = CacheConfig::for_manifest(self.manifest_url()?);
        if let Some(scope) = &self.scope {
            config.scope = scope.clone();
        }
        config.manifest_suffix = self.manifest_suffix.clone();
        config.graph_marker = self.graph_marker.clone();
        Ok(config)
    }
}
