//! Pipeline orchestration: harvest categories, score pending work, persist
//! results, and keep a durable run-status record up to date throughout.
//!
//! A run always ends in a terminal state. Harvest and scoring failures end
//! it as `failed` with a truncated message; a process that dies mid-run is
//! caught later by the stalled-run reaper.

mod locks;
mod scoring;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use radar_core::{
    AppConfig, RadarStore, RunState, RunStatus, ScoringConfig, StoreError, TenantConfig,
};
use radar_scoring::{ContextBuilder, Enricher, SemanticEngine};
use radar_scraper::{FetchClient, HarvestProgress, HarvestReport, Harvester, PacingPolicy};
use uuid::Uuid;

use locks::AnalysisLocks;
pub(crate) use scoring::{ScoreMode, ScoreRequest};
use scoring::ScoreReport;

pub(crate) const STEP_INGEST: &str = "Ingesting posts...";
pub(crate) const STEP_PROCESS: &str = "Processing with AI...";

/// Everything needed to build a fresh harvesting worker per run.
#[derive(Debug, Clone)]
pub(crate) struct HarvestSettings {
    pub base_url: String,
    pub page_size: u32,
    pub item_cap: usize,
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub pacing: PacingPolicy,
}

impl HarvestSettings {
    pub(crate) fn from_config(config: &AppConfig) -> Self {
        Self {
            base_url: config.source_base_url.clone(),
            page_size: config.harvest_page_size,
            item_cap: config.harvest_item_cap,
            timeout: Duration::from_secs(config.fetch_timeout_secs),
            max_retries: config.fetch_max_retries,
            backoff_base: Duration::from_millis(config.fetch_backoff_base_ms),
            backoff_max: Duration::from_millis(config.fetch_backoff_max_ms),
            pacing: PacingPolicy::from_config(config),
        }
    }

    /// A new worker with its own client, counters and pacing window.
    pub(crate) fn harvester(&self, store: Arc<dyn RadarStore>) -> anyhow::Result<Harvester> {
        let client = FetchClient::new(
            self.timeout,
            self.max_retries,
            self.backoff_base,
            self.backoff_max,
        )?;
        Ok(Harvester::new(
            client,
            store,
            &self.base_url,
            self.page_size,
            self.pacing,
        ))
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ScoreSettings {
    pub enrich_concurrency: usize,
    pub enrich_timeout: Duration,
    pub batch_size: usize,
}

impl ScoreSettings {
    pub(crate) fn from_config(config: &AppConfig) -> Self {
        Self {
            enrich_concurrency: config.enrich_concurrency.max(1),
            enrich_timeout: Duration::from_secs(config.enrich_timeout_secs),
            batch_size: config.score_batch_size.max(1),
        }
    }
}

/// One requested pipeline run for a tenant.
#[derive(Debug, Clone)]
pub(crate) struct RunRequest {
    pub tenant: TenantConfig,
    pub categories: Vec<String>,
    /// Restrict enrichment to this product; every product is still scored.
    pub only_product: Option<String>,
    pub max_age_days: u32,
}

pub(crate) struct Pipeline {
    store: Arc<dyn RadarStore>,
    harvest: HarvestSettings,
    engine: SemanticEngine,
    enricher: Arc<dyn Enricher>,
    context: ContextBuilder,
    scoring: ScoringConfig,
    settings: ScoreSettings,
    locks: AnalysisLocks,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        store: Arc<dyn RadarStore>,
        harvest: HarvestSettings,
        engine: SemanticEngine,
        enricher: Arc<dyn Enricher>,
        context: ContextBuilder,
        scoring: ScoringConfig,
        settings: ScoreSettings,
    ) -> Self {
        Self {
            store,
            harvest,
            engine,
            enricher,
            context,
            scoring,
            settings,
            locks: AnalysisLocks::default(),
        }
    }

    /// Execute a full run and return its final status.
    ///
    /// # Errors
    ///
    /// Returns an error only when the run record itself cannot be created,
    /// finished or read back. Harvest and scoring failures are recorded on
    /// the run instead.
    pub(crate) async fn run_pipeline(&self, request: &RunRequest) -> anyhow::Result<RunStatus> {
        let run = self.store.create_run(&request.tenant.id).await?;
        let run_id = run.run_id;
        tracing::info!(
            %run_id,
            tenant_id = %request.tenant.id,
            categories = request.categories.len(),
            only_product = request.only_product.as_deref().unwrap_or("-"),
            "pipeline run started"
        );

        match self.execute(run_id, request).await {
            Ok(report) => {
                self.store
                    .finish_run(run_id, RunState::Succeeded, None)
                    .await?;
                tracing::info!(
                    %run_id,
                    items = report.items,
                    records = report.records,
                    enriched = report.enriched,
                    enrich_errors = report.enrich_errors,
                    "pipeline run succeeded"
                );
            }
            Err(e) => {
                let message = format!("{e:#}");
                tracing::error!(%run_id, error = %message, "pipeline run failed");
                self.store
                    .finish_run(run_id, RunState::Failed, Some(&message))
                    .await?;
            }
        }

        self.store
            .get_run(run_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("run {run_id} disappeared from the store"))
    }

    async fn execute(&self, run_id: Uuid, request: &RunRequest) -> anyhow::Result<ScoreReport> {
        if let Some(product) = &request.only_product {
            if !request.tenant.products.iter().any(|p| &p.id == product) {
                anyhow::bail!(
                    "product '{product}' not found for tenant '{}'",
                    request.tenant.id
                );
            }
        }

        self.progress(run_id, STEP_INGEST, 10).await?;
        let mut harvester = self.harvest.harvester(Arc::clone(&self.store))?;
        let total = request.categories.len();
        for (index, category) in request.categories.iter().enumerate() {
            let heartbeat = RunHeartbeat {
                store: self.store.as_ref(),
                run_id,
                step: format!("Scraping r/{category}..."),
                percent: harvest_progress(index, total),
            };
            self.progress(run_id, &heartbeat.step, heartbeat.percent)
                .await?;
            harvester
                .harvest_with_progress(
                    category,
                    max_age(request.max_age_days),
                    self.harvest.item_cap,
                    Some(&heartbeat),
                )
                .await?;
        }

        self.progress(run_id, STEP_PROCESS, 60).await?;
        self.score(&ScoreRequest {
            tenant: &request.tenant,
            categories: Some(request.categories.clone()),
            only_product: request.only_product.clone(),
            mode: ScoreMode::Incremental,
            limit: None,
            run_id: Some(run_id),
        })
        .await
    }

    async fn progress(&self, run_id: Uuid, step: &str, percent: u8) -> anyhow::Result<()> {
        tracing::debug!(%run_id, step, percent, "run progress");
        self.store.update_run(run_id, step, percent).await?;
        Ok(())
    }
}

/// Refreshes a run's `updated_at` with its current step while a category
/// is harvested, so the reaper only ever sees runs that went silent.
struct RunHeartbeat<'a> {
    store: &'a dyn RadarStore,
    run_id: Uuid,
    step: String,
    percent: u8,
}

#[async_trait]
impl HarvestProgress for RunHeartbeat<'_> {
    async fn heartbeat(&self, _category: &str, _considered: usize) -> Result<(), StoreError> {
        self.store
            .update_run(self.run_id, &self.step, self.percent)
            .await
    }
}

/// Harvest each category in order with one worker, outside of any run.
///
/// # Errors
///
/// Returns an error if the worker cannot be built or the store fails.
pub(crate) async fn harvest_categories(
    settings: &HarvestSettings,
    store: Arc<dyn RadarStore>,
    categories: &[String],
    max_age_days: u32,
) -> anyhow::Result<Vec<HarvestReport>> {
    let mut harvester = settings.harvester(store)?;
    let mut reports = Vec::with_capacity(categories.len());
    for category in categories {
        reports.push(
            harvester
                .harvest(category, max_age(max_age_days), settings.item_cap)
                .await?,
        );
    }
    Ok(reports)
}

/// Progress while harvesting category `index` of `total`: 10% to 50%.
pub(crate) fn harvest_progress(index: usize, total: usize) -> u8 {
    let span = index.saturating_mul(40) / total.max(1);
    u8::try_from(10 + span.min(40)).unwrap_or(50)
}

fn max_age(days: u32) -> chrono::Duration {
    chrono::Duration::days(i64::from(days))
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod tests;
