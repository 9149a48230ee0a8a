use radar_core::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("TEI embed error: {0}")]
    Embedding(String),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("tokenizer unavailable: {0}")]
    Tokenizer(String),
}

/// Why an enrichment call produced no usable result.
///
/// Every variant is recorded on the analysis record as an error payload,
/// distinct from a well-formed low-relevance answer.
#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("enrichment service returned status {status}")]
    Status { status: u16 },

    #[error("malformed enrichment response: {0}")]
    Malformed(String),

    #[error("enrichment timed out after {secs}s")]
    Timeout { secs: u64 },
}
