//! Embedding service seam and its TEI (Text Embeddings Inference) client.

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::ScoringError;

/// Texts per `/embed` request unless configured otherwise.
const DEFAULT_BATCH: usize = 64;

/// Text-to-vector service. One vector per input, in input order.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ScoringError>;
}

/// Client for a TEI `/embed` endpoint.
///
/// Every vector it hands out is unit length; one with no usable direction
/// comes back empty so callers can score it as a zero fit.
pub struct TeiClient {
    http: reqwest::Client,
    endpoint: String,
    batch: usize,
}

#[derive(Serialize)]
struct EmbedBody<'a> {
    inputs: &'a [&'a str],
    normalize: bool,
}

impl TeiClient {
    #[must_use]
    pub fn new(tei_url: &str) -> Self {
        Self::with_batch(tei_url, DEFAULT_BATCH)
    }

    #[must_use]
    pub fn with_batch(tei_url: &str, batch: usize) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: format!("{}/embed", tei_url.trim_end_matches('/')),
            batch: batch.max(1),
        }
    }

    async fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, ScoringError> {
        let raw: Vec<Vec<f32>> = self
            .http
            .post(&self.endpoint)
            .json(&EmbedBody {
                inputs,
                normalize: true,
            })
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| ScoringError::Embedding(format!("TEI request to {}: {e}", self.endpoint)))?
            .json()
            .await
            .map_err(|e| ScoringError::Embedding(format!("TEI sent an unreadable body: {e}")))?;

        if raw.len() != inputs.len() {
            return Err(ScoringError::Embedding(format!(
                "TEI returned {} embeddings for {} inputs",
                raw.len(),
                inputs.len()
            )));
        }
        Ok(raw
            .iter()
            .map(|v| normalize(v).unwrap_or_default())
            .collect())
    }
}

#[async_trait]
impl Embedder for TeiClient {
    /// # Errors
    ///
    /// Returns [`ScoringError::Embedding`] if any batch fails, its body is
    /// unreadable, or it carries the wrong number of vectors.
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ScoringError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for inputs in texts.chunks(self.batch) {
            vectors.extend(self.embed_batch(inputs).await?);
        }
        Ok(vectors)
    }
}

/// Scale `vector` to unit length.
///
/// Returns `None` for empty, zero or non-finite vectors, which carry no
/// usable direction.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn normalize(vector: &[f32]) -> Option<Vec<f32>> {
    if vector.is_empty() || vector.iter().any(|x| !x.is_finite()) {
        return None;
    }
    let norm = vector
        .iter()
        .map(|x| f64::from(*x) * f64::from(*x))
        .sum::<f64>()
        .sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return None;
    }
    Some(
        vector
            .iter()
            .map(|x| (f64::from(*x) / norm) as f32)
            .collect(),
    )
}

/// Stable reference for an embedded text: hex SHA-256 of the text.
#[must_use]
pub fn embedding_ref(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
