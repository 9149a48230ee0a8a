use radar_core::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("rate limited fetching {url}")]
    RateLimited { url: String },

    #[error("server error {status} from {url}")]
    ServerError { status: u16, url: String },

    #[error("unexpected HTTP status {status} from {url}")]
    UnexpectedStatus { status: u16, url: String },

    #[error("JSON deserialization error for {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unexpected payload shape for {context}: {reason}")]
    Parse { context: String, reason: String },

    #[error("giving up on {url} after {attempts} attempts: {last}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        #[source]
        last: Box<FetchError>,
    },
}

impl FetchError {
    /// Returns `true` for transient conditions worth retrying after a backoff.
    ///
    /// Rate limiting, 5xx responses and transport failures (timeouts,
    /// connection resets) are retried. Everything else is definitive.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            FetchError::RateLimited { .. }
                | FetchError::ServerError { .. }
                | FetchError::Transport(_)
        )
    }
}

/// Failures that abort harvesting a category.
///
/// Fetch and parse problems never show up here: they are logged, counted in
/// the [`crate::HarvestReport`] and skipped.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("storage error during harvest: {0}")]
    Store(#[from] StoreError),
}
