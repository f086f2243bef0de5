//! HTTP transport for manifest and graph documents
//!
//! [`Fetch`] is the seam the sync gate talks to. [`HttpFetcher`] goes to the
//! network; the tiered cache wraps any `Fetch` and intercepts on top of it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use log::warn;
use once_cell::sync::Lazy;
use reqwest::header::CACHE_CONTROL;
use reqwest::{Client, ClientBuilder, Url};

use crate::core::error::{Error, Result};

/// Maximum number of retry attempts for network errors
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff (in milliseconds)
pub const BASE_RETRY_DELAY_MS: u64 = 1000;

/// Global HTTP client shared by every fetcher
static GLOBAL_CLIENT: Lazy<Client> = Lazy::new(|| {
    ClientBuilder::new()
        .tcp_keepalive(Duration::from_secs(60))
        .pool_idle_timeout(Duration::from_secs(90))
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .user_agent(format!("butterfly-wayfinder/{}", env!("WAYFINDER_VERSION")))
        .build()
        .unwrap_or_else(|_| Client::new())
});

/// How a request may use intermediate HTTP caches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    #[default]
    Default,
    /// Revalidate with the origin (`Cache-Control: no-cache`)
    NoCache,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: Url,
    pub cache: CacheMode,
}

impl FetchRequest {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            cache: CacheMode::Default,
        }
    }

    pub fn fresh(url: Url) -> Self {
        Self {
            url,
            cache: CacheMode::NoCache,
        }
    }
}

/// Something that can turn a request into a response body
pub trait Fetch: Send + Sync {
    fn fetch(&self, request: &FetchRequest) -> impl Future<Output = Result<Bytes>> + Send;
}

impl<F: Fetch> Fetch for Arc<F> {
    fn fetch(&self, request: &FetchRequest) -> impl Future<Output = Result<Bytes>> + Send {
        (**self).fetch(request)
    }
}

/// Execute an operation with retry logic for network errors
async fn retry_on_network_error<F, Fut, T>(base_delay_ms: u64, operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(Error::NetworkError(msg)) if attempt < MAX_RETRY_ATTEMPTS => {
                attempt += 1;
                let delay = base_delay_ms * (1 << (attempt - 1));
                warn!("Network error (attempt {attempt}): {msg}. Retrying in {delay}ms...");
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Network fetcher over the shared reqwest client
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    retry_base_delay_ms: u64,
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            retry_base_delay_ms: BASE_RETRY_DELAY_MS,
        }
    }

    pub fn with_retry_delay(retry_base_delay_ms: u64) -> Self {
        Self { retry_base_delay_ms }
    }

    async fn fetch_once(&self, request: &FetchRequest) -> Result<Bytes> {
        let mut builder = GLOBAL_CLIENT.get(request.url.clone());
        if request.cache == CacheMode::NoCache {
            builder = builder.header(CACHE_CONTROL, "no-cache");
        }
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpError(format!(
                "Failed to fetch {}: {status}",
                request.url
            )));
        }
        Ok(response.bytes().await?)
    }
}

impl Fetch for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<Bytes> {
        retry_on_network_error(self.retry_base_delay_ms, || self.fetch_once(request)).await
    }
}
