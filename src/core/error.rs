//! Error types for butterfly-wayfinder
//!
//! Network, storage and engine failures share one error type. Name misses and
//! disconnected graphs are not errors: they surface as an empty route.

use strsim::{jaro_winkler, normalized_levenshtein};

/// Main error type for butterfly-wayfinder operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HTTP-specific error (non-success status, malformed response)
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Network connectivity issues (connect failures, timeouts)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// File I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// A fetched or persisted document did not decode
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Invalid configuration or parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration file could not be read
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The compute thread has shut down or dropped a reply
    #[error("Route engine unavailable")]
    EngineUnavailable,

    /// Neither the cache nor the network could answer a request
    #[error("Offline and no cached response for {0}")]
    Offline(String),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            Error::NetworkError(err.to_string())
        } else {
            Error::HttpError(err.to_string())
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::ConfigError(err.to_string())
    }
}

impl Error {
    /// True for failures that a later retry may fix
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::NetworkError(_) | Error::Offline(_))
    }
}

/// Convenience result type for butterfly-wayfinder operations
pub type Result<T> = std::result::Result<T, Error>;

/// Minimum blended similarity for a name to count as a suggestion
const MIN_SIMILARITY: f64 = 0.75;

/// Suggest known node names close to a name that resolved to nothing.
///
/// Scores blend Jaro-Winkler (prefix and transposition typos) with normalized
/// Levenshtein (insertions and deletions). Best matches come first.
pub fn suggest_names<'a, I>(input: &str, candidates: I, limit: usize) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let input_lower = input.to_lowercase();
    let mut scored: Vec<(f64, &str)> = candidates
        .into_iter()
        .filter_map(|candidate| {
            let lower = candidate.to_lowercase();
            if lower == input_lower {
                return None;
            }
            let jw = jaro_winkler(&input_lower, &lower);
            let lev = normalized_levenshtein(&input_lower, &lower);
            Some(((jw * 0.7) + (lev * 0.3), candidate))
        })
        .filter(|(score, _)| *score >= MIN_SIMILARITY)
        .collect();

    scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(b.1)));
    scored.dedup_by(|a, b| a.1 == b.1);
    scored
        .into_iter()
        .take(limit)
        .map(|(_, name)| name.to_string())
        .collect()
}
