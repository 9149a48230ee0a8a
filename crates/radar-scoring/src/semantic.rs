//! Semantic fit between items and tenant product profiles.
//!
//! Product embeddings are cached per (tenant, product) in memory and persisted
//! through the store together with the text that produced them. A profile
//! whose embedding text changed is re-embedded on the next
//! [`SemanticEngine::ensure_products`] call.

use std::collections::HashMap;
use std::sync::Arc;

use radar_core::{Item, ProductEmbedding, ProductProfile, RadarStore};
use tokio::sync::RwLock;

use crate::embeddings::{normalize, Embedder};
use crate::error::ScoringError;

type CacheKey = (String, String);

pub struct SemanticEngine {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn RadarStore>,
    cache: RwLock<HashMap<CacheKey, Vec<f32>>>,
    /// Embedding text behind each cached vector.
    sources: RwLock<HashMap<CacheKey, String>>,
}

impl SemanticEngine {
    #[must_use]
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn RadarStore>) -> Self {
        Self {
            embedder,
            store,
            cache: RwLock::new(HashMap::new()),
            sources: RwLock::new(HashMap::new()),
        }
    }

    /// Make sure every profile has a current cached embedding.
    ///
    /// Uses the in-memory cache, then the stored embedding, and only calls the
    /// embedding service for profiles whose text changed or was never
    /// embedded. Degenerate vectors are never cached; `fit` then reports 0.0
    /// for that product.
    ///
    /// # Errors
    ///
    /// Returns [`ScoringError`] if the embedding service or store fails.
    pub async fn ensure_products(&self, profiles: &[ProductProfile]) -> Result<(), ScoringError> {
        let mut stale: Vec<(&ProductProfile, String)> = Vec::new();

        for profile in profiles {
            let key = key_of(profile);
            let text = profile.embedding_text();
            if self.sources.read().await.get(&key) == Some(&text) {
                continue;
            }

            let stored = self
                .store
                .get_product_embedding(&profile.tenant_id, &profile.product_id)
                .await?;
            if let Some(stored) = stored.filter(|s| s.source_text == text) {
                if let Some(vector) = normalize(&stored.vector) {
                    self.insert(key, vector, text).await;
                    continue;
                }
            }
            stale.push((profile, text));
        }

        if stale.is_empty() {
            return Ok(());
        }

        let texts: Vec<&str> = stale.iter().map(|(_, t)| t.as_str()).collect();
        let vectors = self.embedder.embed(&texts).await?;
        for ((profile, text), raw) in stale.into_iter().zip(vectors) {
            let Some(vector) = normalize(&raw) else {
                tracing::warn!(
                    tenant_id = %profile.tenant_id,
                    product_id = %profile.product_id,
                    "degenerate product embedding; not caching"
                );
                self.evict(&key_of(profile)).await;
                continue;
            };
            self.store
                .put_product_embedding(&ProductEmbedding {
                    tenant_id: profile.tenant_id.clone(),
                    product_id: profile.product_id.clone(),
                    vector: vector.clone(),
                    source_text: text.clone(),
                })
                .await?;
            tracing::info!(
                tenant_id = %profile.tenant_id,
                product_id = %profile.product_id,
                dims = vector.len(),
                "product embedding refreshed"
            );
            self.insert(key_of(profile), vector, text).await;
        }
        Ok(())
    }

    /// Drop the in-memory embedding. The next `ensure_products` reloads the
    /// stored vector or re-embeds.
    pub async fn invalidate(&self, tenant_id: &str, product_id: &str) {
        self.evict(&(tenant_id.to_owned(), product_id.to_owned()))
            .await;
    }

    /// Embed items' scoring text in one batched call, returning unit vectors.
    ///
    /// A degenerate item vector comes back empty and yields a fit of 0.0.
    ///
    /// # Errors
    ///
    /// Returns [`ScoringError::Embedding`] if the embedding service fails.
    pub async fn embed_items(&self, items: &[Item]) -> Result<Vec<Vec<f32>>, ScoringError> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let texts: Vec<String> = items.iter().map(Item::scoring_text).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let vectors = self.embedder.embed(&refs).await?;
        Ok(vectors
            .iter()
            .map(|v| normalize(v).unwrap_or_default())
            .collect())
    }

    /// Cosine similarity between an item vector and the cached product
    /// embedding. Exactly 0.0 when no embedding is cached for the pair.
    pub async fn fit(&self, item_vector: &[f32], tenant_id: &str, product_id: &str) -> f64 {
        let cache = self.cache.read().await;
        cache
            .get(&(tenant_id.to_owned(), product_id.to_owned()))
            .map_or(0.0, |product| cosine_fit(item_vector, product))
    }

    pub async fn has_embedding(&self, tenant_id: &str, product_id: &str) -> bool {
        self.cache
            .read()
            .await
            .contains_key(&(tenant_id.to_owned(), product_id.to_owned()))
    }

    async fn insert(&self, key: CacheKey, vector: Vec<f32>, text: String) {
        self.cache.write().await.insert(key.clone(), vector);
        self.sources.write().await.insert(key, text);
    }

    async fn evict(&self, key: &CacheKey) {
        self.cache.write().await.remove(key);
        self.sources.write().await.remove(key);
    }
}

fn key_of(profile: &ProductProfile) -> CacheKey {
    (profile.tenant_id.clone(), profile.product_id.clone())
}

/// Cosine similarity in `[-1, 1]`.
///
/// Both inputs are normalized first, so callers need not guarantee unit
/// length. Mismatched dimensions or degenerate vectors give 0.0.
#[must_use]
pub fn cosine_fit(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }
    let (Some(a), Some(b)) = (normalize(a), normalize(b)) else {
        return 0.0;
    };
    let dot: f64 = a
        .iter()
        .zip(&b)
        .map(|(x, y)| f64::from(*x) * f64::from(*y))
        .sum();
    dot.clamp(-1.0, 1.0)
}
