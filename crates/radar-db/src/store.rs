//! [`RadarStore`] backed by Postgres.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use radar_core::{
    AnalysisKey, AnalysisRecord, Item, PendingFilter, ProductEmbedding, RadarStore, Reply,
    RunState, RunStatus, StoreError,
};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{analyses, items, product_embeddings, runs};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RadarStore for PgStore {
    async fn get_item(&self, id: &str) -> Result<Option<Item>, StoreError> {
        Ok(items::get_item(&self.pool, id).await?)
    }

    async fn upsert_item(&self, item: &Item) -> Result<(), StoreError> {
        Ok(items::upsert_item(&self.pool, item).await?)
    }

    async fn update_item_stats(
        &self,
        id: &str,
        score: i64,
        reply_count: i64,
    ) -> Result<(), StoreError> {
        Ok(items::update_item_stats(&self.pool, id, score, reply_count).await?)
    }

    async fn set_item_embedding_ref(
        &self,
        id: &str,
        embedding_ref: &str,
    ) -> Result<(), StoreError> {
        Ok(items::set_item_embedding_ref(&self.pool, id, embedding_ref).await?)
    }

    async fn mark_item_processed(
        &self,
        id: &str,
        score: i64,
        reply_count: i64,
    ) -> Result<(), StoreError> {
        Ok(items::mark_item_processed(&self.pool, id, score, reply_count).await?)
    }

    async fn upsert_reply(&self, reply: &Reply) -> Result<(), StoreError> {
        Ok(items::upsert_reply(&self.pool, reply).await?)
    }

    async fn get_replies_for(&self, item_id: &str) -> Result<Vec<Reply>, StoreError> {
        Ok(items::get_replies_for(&self.pool, item_id).await?)
    }

    async fn get_analysis(
        &self,
        key: &AnalysisKey,
    ) -> Result<Option<AnalysisRecord>, StoreError> {
        Ok(analyses::get_analysis(&self.pool, key).await?)
    }

    async fn upsert_analysis(&self, record: &AnalysisRecord) -> Result<(), StoreError> {
        Ok(analyses::upsert_analysis(&self.pool, record).await?)
    }

    async fn select_pending_items(&self, filter: &PendingFilter) -> Result<Vec<Item>, StoreError> {
        Ok(analyses::select_pending_items(&self.pool, filter).await?)
    }

    async fn get_product_embedding(
        &self,
        tenant_id: &str,
        product_id: &str,
    ) -> Result<Option<ProductEmbedding>, StoreError> {
        Ok(product_embeddings::get_product_embedding(&self.pool, tenant_id, product_id).await?)
    }

    async fn put_product_embedding(
        &self,
        embedding: &ProductEmbedding,
    ) -> Result<(), StoreError> {
        Ok(product_embeddings::put_product_embedding(&self.pool, embedding).await?)
    }

    async fn create_run(&self, tenant_id: &str) -> Result<RunStatus, StoreError> {
        Ok(runs::create_run(&self.pool, tenant_id).await?)
    }

    async fn update_run(
        &self,
        run_id: Uuid,
        step: &str,
        progress_percent: u8,
    ) -> Result<(), StoreError> {
        Ok(runs::update_run(&self.pool, run_id, step, progress_percent).await?)
    }

    async fn finish_run(
        &self,
        run_id: Uuid,
        state: RunState,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        Ok(runs::finish_run(&self.pool, run_id, state, error).await?)
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Option<RunStatus>, StoreError> {
        Ok(runs::get_run(&self.pool, run_id).await?)
    }

    async fn reap_stalled_runs(&self, stalled_before: DateTime<Utc>) -> Result<u64, StoreError> {
        Ok(runs::reap_stalled_runs(&self.pool, stalled_before).await?)
    }
}
