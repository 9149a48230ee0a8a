//! Scoring stage: select changed items, score them against the tenant's
//! products, enrich the pairs that pass the gate, and persist one analysis
//! record per pair.

use std::collections::HashMap;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use radar_core::{
    select_pending, AnalysisKey, AnalysisRecord, ChangeMode, DetectedSignals, Enrichment, Item,
    PendingFilter, ProductProfile, StoreError, TenantConfig,
};
use radar_scoring::{embedding_ref, enrich_with_timeout, score_item, EnrichmentGate, ProductScore};
use serde::Serialize;
use uuid::Uuid;

use super::{Pipeline, STEP_PROCESS};

/// How pending items are selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScoreMode {
    /// Items with no record for a (tenant, product) pair, or whose counters
    /// moved since that record was written.
    Incremental,
    /// Items whose counters moved since the last global pass. Maintenance only.
    Global,
    /// Every item.
    Force,
}

pub(crate) struct ScoreRequest<'a> {
    pub tenant: &'a TenantConfig,
    /// `None` scores every category the products target.
    pub categories: Option<Vec<String>>,
    pub only_product: Option<String>,
    pub mode: ScoreMode,
    /// Per-product cap on selected items.
    pub limit: Option<usize>,
    /// Run kept alive while the pass makes progress.
    pub run_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub(crate) struct ScoreReport {
    /// Distinct items scored.
    pub items: usize,
    /// Analysis records written.
    pub records: usize,
    pub enriched: usize,
    pub enrich_errors: usize,
    /// Items whose embedding came back degenerate (fit 0.0).
    pub degenerate: usize,
}

/// An item and the products it is pending for.
struct WorkItem {
    item: Item,
    profiles: Vec<ProductProfile>,
}

struct PairTask<'a> {
    item: &'a Item,
    profile: &'a ProductProfile,
    signals: DetectedSignals,
    score: ProductScore,
}

enum PairOutcome {
    Plain,
    Enriched,
    EnrichFailed,
}

impl Pipeline {
    /// Score pending items for one tenant.
    ///
    /// # Errors
    ///
    /// Fails fast if the embedding service or the store fails: semantic fit
    /// is a required input. Enrichment failures never fail the pass; they are
    /// recorded on the analysis record.
    pub(crate) async fn score(&self, request: &ScoreRequest<'_>) -> anyhow::Result<ScoreReport> {
        let profiles = request.tenant.profiles();
        if profiles.is_empty() {
            tracing::warn!(tenant_id = %request.tenant.id, "tenant has no products; nothing to score");
            return Ok(ScoreReport::default());
        }

        self.engine.ensure_products(&profiles).await?;

        let work = self.collect_work(&profiles, request).await?;
        let gate = EnrichmentGate::from_scoring(&self.scoring, request.only_product.clone());
        let mut report = ScoreReport {
            items: work.len(),
            ..ScoreReport::default()
        };
        tracing::info!(
            tenant_id = %request.tenant.id,
            items = work.len(),
            mode = ?request.mode,
            "scoring pending items"
        );

        for batch in work.chunks(self.settings.batch_size) {
            let items: Vec<Item> = batch.iter().map(|w| w.item.clone()).collect();
            let vectors = self.engine.embed_items(&items).await?;
            self.heartbeat(request.run_id).await?;

            let mut tasks = Vec::new();
            for (work_item, vector) in batch.iter().zip(&vectors) {
                let item = &work_item.item;
                if vector.is_empty() {
                    tracing::warn!(item_id = %item.id, "degenerate item embedding; fit will be 0.0");
                    report.degenerate += 1;
                } else {
                    self.store
                        .set_item_embedding_ref(&item.id, &embedding_ref(&item.scoring_text()))
                        .await?;
                }

                let (signals, scores) = score_item(
                    item,
                    vector,
                    &work_item.profiles,
                    &self.engine,
                    &self.scoring,
                    &gate,
                )
                .await;
                for score in scores {
                    let Some(profile) = work_item
                        .profiles
                        .iter()
                        .find(|p| p.product_id == score.product_id)
                    else {
                        continue;
                    };
                    tasks.push(PairTask {
                        item,
                        profile,
                        signals: signals.clone(),
                        score,
                    });
                }
            }

            // Collected before streaming: spawned runs need a Send future, and a
            // stream that keeps a closure over borrowed tasks is not one.
            let settles: Vec<_> = tasks.into_iter().map(|task| self.settle(task)).collect();
            let mut outcomes =
                stream::iter(settles).buffer_unordered(self.settings.enrich_concurrency);
            while let Some(outcome) = outcomes.next().await {
                report.records += 1;
                match outcome? {
                    PairOutcome::Plain => {}
                    PairOutcome::Enriched => report.enriched += 1,
                    PairOutcome::EnrichFailed => report.enrich_errors += 1,
                }
                self.heartbeat(request.run_id).await?;
            }

            if request.mode == ScoreMode::Global {
                for work_item in batch {
                    let item = &work_item.item;
                    self.store
                        .mark_item_processed(&item.id, item.score, item.reply_count)
                        .await?;
                }
            }
        }

        tracing::info!(
            tenant_id = %request.tenant.id,
            items = report.items,
            records = report.records,
            enriched = report.enriched,
            enrich_errors = report.enrich_errors,
            degenerate = report.degenerate,
            "scoring pass complete"
        );
        Ok(report)
    }

    async fn heartbeat(&self, run_id: Option<Uuid>) -> Result<(), StoreError> {
        match run_id {
            Some(run_id) => self.store.update_run(run_id, STEP_PROCESS, 60).await,
            None => Ok(()),
        }
    }

    /// Build the work list, newest items first.
    async fn collect_work(
        &self,
        profiles: &[ProductProfile],
        request: &ScoreRequest<'_>,
    ) -> Result<Vec<WorkItem>, StoreError> {
        let mut work: Vec<WorkItem> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        match request.mode {
            ScoreMode::Incremental => {
                for profile in profiles {
                    let categories = scoped_categories(profile, request.categories.as_deref());
                    if categories.as_ref().is_some_and(Vec::is_empty) {
                        continue;
                    }
                    let pending = select_pending(
                        self.store.as_ref(),
                        &profile.tenant_id,
                        &profile.product_id,
                        categories.as_deref(),
                        request.limit,
                    )
                    .await?;
                    for item in pending {
                        let slot = *index.entry(item.id.clone()).or_insert_with(|| {
                            work.push(WorkItem {
                                item,
                                profiles: Vec::new(),
                            });
                            work.len() - 1
                        });
                        work[slot].profiles.push(profile.clone());
                    }
                }
            }
            ScoreMode::Global | ScoreMode::Force => {
                let mode = if request.mode == ScoreMode::Global {
                    ChangeMode::Global
                } else {
                    ChangeMode::Force
                };
                let items = self
                    .store
                    .select_pending_items(&PendingFilter {
                        mode,
                        categories: request.categories.clone(),
                        limit: request.limit,
                    })
                    .await?;
                for item in items {
                    let targeted: Vec<ProductProfile> = profiles
                        .iter()
                        .filter(|p| p.targets_category(&item.category))
                        .cloned()
                        .collect();
                    if !targeted.is_empty() {
                        work.push(WorkItem {
                            item,
                            profiles: targeted,
                        });
                    }
                }
            }
        }

        work.sort_by(|a, b| {
            b.item
                .created_at
                .cmp(&a.item.created_at)
                .then_with(|| a.item.id.cmp(&b.item.id))
        });
        Ok(work)
    }

    /// Enrich if gated in, then write the record, holding the pair's lock.
    async fn settle(&self, task: PairTask<'_>) -> Result<PairOutcome, StoreError> {
        let key = AnalysisKey {
            item_id: task.item.id.clone(),
            product_id: task.profile.product_id.clone(),
            tenant_id: task.profile.tenant_id.clone(),
        };
        let _guard = self.locks.acquire(&key).await;

        let enrichment = if task.score.enrich {
            let replies = self.store.get_replies_for(&task.item.id).await?;
            let context = self.context.build(task.item, &replies);
            enrich_with_timeout(
                self.enricher.as_ref(),
                &context,
                task.profile,
                self.settings.enrich_timeout,
            )
            .await
        } else {
            Enrichment::Absent
        };
        let outcome = match &enrichment {
            Enrichment::Absent => PairOutcome::Plain,
            Enrichment::Result(_) => PairOutcome::Enriched,
            Enrichment::Error { .. } => PairOutcome::EnrichFailed,
        };

        self.store
            .upsert_analysis(&AnalysisRecord {
                item_id: key.item_id,
                product_id: key.product_id,
                tenant_id: key.tenant_id,
                relevance: task.score.relevance,
                semantic_fit: task.score.semantic_fit,
                intensity: task.score.intensity,
                signals: task.signals,
                enrichment,
                snapshot_score: task.item.score,
                snapshot_replies: task.item.reply_count,
                analyzed_at: Utc::now(),
            })
            .await?;
        Ok(outcome)
    }
}

/// Categories to select for `profile` within the requested scope.
///
/// `None` means every category. An empty list means the product targets
/// nothing in scope.
pub(crate) fn scoped_categories(
    profile: &ProductProfile,
    requested: Option<&[String]>,
) -> Option<Vec<String>> {
    match (profile.categories.is_empty(), requested) {
        (true, None) => None,
        (true, Some(requested)) => Some(requested.to_vec()),
        (false, None) => Some(profile.categories.clone()),
        (false, Some(requested)) => Some(
            requested
                .iter()
                .filter(|c| profile.targets_category(c))
                .cloned()
                .collect(),
        ),
    }
}
