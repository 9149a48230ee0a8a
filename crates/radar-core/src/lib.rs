//! Shared domain model for the radar harvesting-and-scoring pipeline.
//!
//! Holds the entity types, the [`RadarStore`] persistence seam, the
//! change-detection rules, environment configuration, and the YAML registry of
//! categories, tenant products, and scoring weights.

pub mod app_config;
pub mod change;
pub mod config;
pub mod memory;
pub mod registry;
pub mod store;
pub mod types;

pub use app_config::{AppConfig, Environment};
pub use change::{needs_rescore, select_pending};
pub use config::{build_app_config, load_app_config, load_app_config_from_env};
pub use memory::MemoryStore;
pub use registry::{
    load_registry, parse_registry, IntentRule, ProductConfig, RegistryFile, ScoringConfig,
    TenantConfig,
};
pub use store::{AnalysisKey, ChangeMode, PendingFilter, RadarStore, StoreError};
pub use types::{
    truncate_error, AnalysisRecord, DetectedSignals, Enrichment, EnrichmentResult, Item,
    ProductEmbedding, ProductMatch, ProductProfile, Reply, RunState, RunStatus, Urgency,
    UNPROCESSED,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },

    #[error("failed to read registry file {path}: {source}")]
    RegistryFileIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse registry file: {0}")]
    RegistryFileParse(#[from] serde_yaml::Error),

    #[error("registry validation failed: {0}")]
    Validation(String),
}
