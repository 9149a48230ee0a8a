//! In-process [`RadarStore`] implementation.
//!
//! Keeps everything in maps behind a single mutex. Used for tests and for
//! dry runs that must not touch Postgres.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::change::needs_rescore;
use crate::store::{AnalysisKey, ChangeMode, PendingFilter, RadarStore, StoreError};
use crate::types::{
    truncate_error, AnalysisRecord, Item, ProductEmbedding, Reply, RunState, RunStatus,
};

#[derive(Default)]
struct Inner {
    items: HashMap<String, Item>,
    replies: BTreeMap<String, Reply>,
    analyses: HashMap<AnalysisKey, AnalysisRecord>,
    embeddings: HashMap<(String, String), ProductEmbedding>,
    runs: HashMap<Uuid, RunStatus>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))
    }

    /// Number of stored items.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the lock is poisoned.
    pub fn item_count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.items.len())
    }

    /// Number of stored analysis records.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the lock is poisoned.
    pub fn analysis_count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.analyses.len())
    }

    /// Overwrite a run's `updated_at`, simulating a worker that went quiet.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the run does not exist.
    pub fn backdate_run(&self, run_id: Uuid, updated_at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let run = inner.runs.get_mut(&run_id).ok_or(StoreError::NotFound {
            entity: "run",
            id: run_id.to_string(),
        })?;
        run.updated_at = updated_at;
        Ok(())
    }
}

fn in_categories(item: &Item, categories: Option<&Vec<String>>) -> bool {
    categories.is_none_or(|cats| cats.iter().any(|c| c.eq_ignore_ascii_case(&item.category)))
}

#[async_trait]
impl RadarStore for MemoryStore {
    async fn get_item(&self, id: &str) -> Result<Option<Item>, StoreError> {
        Ok(self.lock()?.items.get(id).cloned())
    }

    async fn upsert_item(&self, item: &Item) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let mut next = item.clone();
        if let Some(existing) = inner.items.get(&item.id) {
            next.embedding_ref = existing.embedding_ref.clone().or(next.embedding_ref);
            next.processed_score = existing.processed_score;
            next.processed_replies = existing.processed_replies;
        }
        inner.items.insert(next.id.clone(), next);
        Ok(())
    }

    async fn update_item_stats(
        &self,
        id: &str,
        score: i64,
        reply_count: i64,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let item = inner.items.get_mut(id).ok_or(StoreError::NotFound {
            entity: "item",
            id: id.to_string(),
        })?;
        item.score = score;
        item.reply_count = reply_count;
        item.fetched_at = Utc::now();
        Ok(())
    }

    async fn set_item_embedding_ref(
        &self,
        id: &str,
        embedding_ref: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if let Some(item) = inner.items.get_mut(id) {
            item.embedding_ref = Some(embedding_ref.to_string());
        }
        Ok(())
    }

    async fn mark_item_processed(
        &self,
        id: &str,
        score: i64,
        reply_count: i64,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if let Some(item) = inner.items.get_mut(id) {
            item.processed_score = score;
            item.processed_replies = reply_count;
        }
        Ok(())
    }

    async fn upsert_reply(&self, reply: &Reply) -> Result<(), StoreError> {
        self.lock()?.replies.insert(reply.id.clone(), reply.clone());
        Ok(())
    }

    async fn get_replies_for(&self, item_id: &str) -> Result<Vec<Reply>, StoreError> {
        Ok(self
            .lock()?
            .replies
            .values()
            .filter(|r| r.item_id == item_id)
            .cloned()
            .collect())
    }

    async fn get_analysis(
        &self,
        key: &AnalysisKey,
    ) -> Result<Option<AnalysisRecord>, StoreError> {
        Ok(self.lock()?.analyses.get(key).cloned())
    }

    async fn upsert_analysis(&self, record: &AnalysisRecord) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let key = AnalysisKey::of(record);
        let mut next = record.clone();
        next.enrichment = record
            .enrichment
            .clone()
            .merged_over(inner.analyses.get(&key).map(|r| &r.enrichment));
        inner.analyses.insert(key, next);
        Ok(())
    }

    async fn select_pending_items(&self, filter: &PendingFilter) -> Result<Vec<Item>, StoreError> {
        let inner = self.lock()?;
        let mut pending: Vec<Item> = inner
            .items
            .values()
            .filter(|item| in_categories(item, filter.categories.as_ref()))
            .filter(|item| match &filter.mode {
                ChangeMode::Force => true,
                ChangeMode::Global => needs_rescore(
                    item,
                    Some((item.processed_score, item.processed_replies)),
                ),
                ChangeMode::PerProduct {
                    tenant_id,
                    product_id,
                } => {
                    let key = AnalysisKey {
                        item_id: item.id.clone(),
                        product_id: product_id.clone(),
                        tenant_id: tenant_id.clone(),
                    };
                    let snapshot = inner
                        .analyses
                        .get(&key)
                        .map(|r| (r.snapshot_score, r.snapshot_replies));
                    needs_rescore(item, snapshot)
                }
            })
            .cloned()
            .collect();

        pending.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        if let Some(limit) = filter.limit {
            pending.truncate(limit);
        }
        Ok(pending)
    }

    async fn get_product_embedding(
        &self,
        tenant_id: &str,
        product_id: &str,
    ) -> Result<Option<ProductEmbedding>, StoreError> {
        Ok(self
            .lock()?
            .embeddings
            .get(&(tenant_id.to_string(), product_id.to_string()))
            .cloned())
    }

    async fn put_product_embedding(
        &self,
        embedding: &ProductEmbedding,
    ) -> Result<(), StoreError> {
        self.lock()?.embeddings.insert(
            (embedding.tenant_id.clone(), embedding.product_id.clone()),
            embedding.clone(),
        );
        Ok(())
    }

    async fn create_run(&self, tenant_id: &str) -> Result<RunStatus, StoreError> {
        let now = Utc::now();
        let run = RunStatus {
            run_id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            step: "Queued".to_string(),
            progress_percent: 0,
            state: RunState::Running,
            error: None,
            started_at: now,
            updated_at: now,
            finished_at: None,
        };
        self.lock()?.runs.insert(run.run_id, run.clone());
        Ok(run)
    }

    async fn update_run(
        &self,
        run_id: Uuid,
        step: &str,
        progress_percent: u8,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let run = inner.runs.get_mut(&run_id).ok_or(StoreError::NotFound {
            entity: "run",
            id: run_id.to_string(),
        })?;
        if run.state == RunState::Running {
            run.step = step.to_string();
            run.progress_percent = progress_percent.min(100);
            run.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn finish_run(
        &self,
        run_id: Uuid,
        state: RunState,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let run = inner.runs.get_mut(&run_id).ok_or(StoreError::NotFound {
            entity: "run",
            id: run_id.to_string(),
        })?;
        if run.state != RunState::Running {
            return Ok(());
        }
        let now = Utc::now();
        run.state = state;
        run.step = match state {
            RunState::Succeeded => "Success".to_string(),
            _ => "Error".to_string(),
        };
        run.progress_percent = 100;
        run.error = error.map(truncate_error);
        run.updated_at = now;
        run.finished_at = Some(now);
        Ok(())
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Option<RunStatus>, StoreError> {
        Ok(self.lock()?.runs.get(&run_id).cloned())
    }

    async fn reap_stalled_runs(&self, stalled_before: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut inner = self.lock()?;
        let now = Utc::now();
        let mut reaped = 0;
        for run in inner.runs.values_mut() {
            if run.state == RunState::Running && run.updated_at < stalled_before {
                run.state = RunState::TimedOut;
                run.step = "Error".to_string();
                run.error = Some("run stalled without a status update".to_string());
                run.finished_at = Some(now);
                run.updated_at = now;
                reaped += 1;
            }
        }
        Ok(reaped)
    }
}
