//! Relevance scoring for harvested items.
//!
//! Combines keyword signal detection, logarithmic community intensity and
//! embedding-based product fit into one relevance score, decides whether an
//! item earns an enrichment call, and builds the token-bounded context that
//! call receives.

pub mod context;
pub mod embeddings;
pub mod enrichment;
pub mod error;
pub mod hybrid;
pub mod intensity;
pub mod semantic;
pub mod signals;

pub use context::{
    counter_for_model, CharApproxCounter, ContextBuilder, TiktokenCounter, TokenCounter,
};
pub use embeddings::{embedding_ref, normalize, Embedder, TeiClient};
pub use enrichment::{enrich_with_timeout, parse_assessment, ChatEnricher, Enricher};
pub use error::{EnrichError, ScoringError};
pub use hybrid::{relevance, score_item, EnrichmentGate, ProductScore, FIT_WEIGHT};
pub use intensity::community_intensity;
pub use semantic::{cosine_fit, SemanticEngine};
pub use signals::{detect, intent_bonus};
