//! The [`RadarStore`] trait: the read/write contract the pipeline needs from
//! persistence.
//!
//! Implemented by `radar-db` (Postgres) and by [`crate::MemoryStore`]. The
//! harvester, scorer and orchestrator depend on this abstraction only.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::types::{AnalysisRecord, Item, ProductEmbedding, Reply, RunState, RunStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("stored value could not be decoded: {0}")]
    Decode(String),
}

/// Identity of an analysis record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AnalysisKey {
    pub item_id: String,
    pub product_id: String,
    pub tenant_id: String,
}

impl AnalysisKey {
    #[must_use]
    pub fn of(record: &AnalysisRecord) -> Self {
        Self {
            item_id: record.item_id.clone(),
            product_id: record.product_id.clone(),
            tenant_id: record.tenant_id.clone(),
        }
    }
}

/// How pending work is selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeMode {
    /// Compare each item against its analysis record for this pair.
    PerProduct {
        tenant_id: String,
        product_id: String,
    },
    /// Compare each item against its own processed snapshot. Maintenance only.
    Global,
    /// Select every item.
    Force,
}

/// Parameters for [`RadarStore::select_pending_items`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFilter {
    pub mode: ChangeMode,
    /// Restrict to these categories (case-insensitive). `None` means all.
    pub categories: Option<Vec<String>>,
    pub limit: Option<usize>,
}

/// Persistence contract consumed by the harvester and scoring pipeline.
#[async_trait]
pub trait RadarStore: Send + Sync {
    // ── Items ─────────────────────────────────────────────────────────────

    async fn get_item(&self, id: &str) -> Result<Option<Item>, StoreError>;

    /// Insert or replace an item's harvested fields.
    ///
    /// Existing `embedding_ref` and processed snapshots are preserved.
    async fn upsert_item(&self, item: &Item) -> Result<(), StoreError>;

    /// Cheap refresh of the mutable counters for an already-captured item.
    async fn update_item_stats(
        &self,
        id: &str,
        score: i64,
        reply_count: i64,
    ) -> Result<(), StoreError>;

    async fn set_item_embedding_ref(
        &self,
        id: &str,
        embedding_ref: &str,
    ) -> Result<(), StoreError>;

    /// Record the counters used by a global (tenant-less) scoring pass.
    async fn mark_item_processed(
        &self,
        id: &str,
        score: i64,
        reply_count: i64,
    ) -> Result<(), StoreError>;

    // ── Replies ───────────────────────────────────────────────────────────

    async fn upsert_reply(&self, reply: &Reply) -> Result<(), StoreError>;

    async fn get_replies_for(&self, item_id: &str) -> Result<Vec<Reply>, StoreError>;

    // ── Analysis records ──────────────────────────────────────────────────

    async fn get_analysis(&self, key: &AnalysisKey)
        -> Result<Option<AnalysisRecord>, StoreError>;

    /// Insert or overwrite the record for its (item, product, tenant) triple.
    ///
    /// Numeric fields and snapshots are last-writer-wins. The enrichment
    /// payload follows [`crate::Enrichment::merged_over`]: an absent payload
    /// keeps the stored one and an error never replaces a stored result.
    async fn upsert_analysis(&self, record: &AnalysisRecord) -> Result<(), StoreError>;

    async fn select_pending_items(&self, filter: &PendingFilter)
        -> Result<Vec<Item>, StoreError>;

    // ── Product embeddings ────────────────────────────────────────────────

    async fn get_product_embedding(
        &self,
        tenant_id: &str,
        product_id: &str,
    ) -> Result<Option<ProductEmbedding>, StoreError>;

    async fn put_product_embedding(&self, embedding: &ProductEmbedding)
        -> Result<(), StoreError>;

    // ── Run status ────────────────────────────────────────────────────────

    async fn create_run(&self, tenant_id: &str) -> Result<RunStatus, StoreError>;

    /// Update step/progress of a running run. Terminal runs are left untouched.
    async fn update_run(
        &self,
        run_id: Uuid,
        step: &str,
        progress_percent: u8,
    ) -> Result<(), StoreError>;

    /// Move a running run into a terminal state.
    async fn finish_run(
        &self,
        run_id: Uuid,
        state: RunState,
        error: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn get_run(&self, run_id: Uuid) -> Result<Option<RunStatus>, StoreError>;

    /// Mark every running run whose last update precedes `stalled_before` as
    /// timed out. Returns the number of runs marked.
    async fn reap_stalled_runs(&self, stalled_before: DateTime<Utc>) -> Result<u64, StoreError>;
}
