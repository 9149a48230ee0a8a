//! Command handlers for the CLI.
//!
//! Called from `main` once configuration and logging are set up. Each handler
//! loads the registry and connects to Postgres only when its command needs
//! them, so `run --dry-run` works without a database.

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use radar_core::{AppConfig, RadarStore, RegistryFile, RunState, RunStatus, TenantConfig};
use radar_db::PgStore;
use radar_scoring::{counter_for_model, ChatEnricher, ContextBuilder, SemanticEngine, TeiClient};
use uuid::Uuid;

use crate::pipeline::{
    harvest_categories, HarvestSettings, Pipeline, RunRequest, ScoreMode, ScoreRequest,
    ScoreSettings,
};

pub(crate) fn load_registry(config: &AppConfig) -> anyhow::Result<RegistryFile> {
    radar_core::load_registry(&config.registry_path).with_context(|| {
        format!(
            "failed to load registry from {}",
            config.registry_path.display()
        )
    })
}

pub(crate) async fn connect_store(config: &AppConfig) -> anyhow::Result<Arc<dyn RadarStore>> {
    let pool = radar_db::connect_pool_from_config(config)
        .await
        .context("failed to connect to database")?;
    Ok(Arc::new(PgStore::new(pool)))
}

/// Wire the embedding, enrichment and context services into a pipeline.
///
/// # Errors
///
/// Returns an error if the enrichment HTTP client cannot be built.
pub(crate) fn build_pipeline(
    config: &AppConfig,
    registry: &RegistryFile,
    store: Arc<dyn RadarStore>,
) -> anyhow::Result<Pipeline> {
    let embedder = Arc::new(TeiClient::new(&config.tei_url));
    let enricher = Arc::new(ChatEnricher::from_config(config)?);
    let context = ContextBuilder::new(
        counter_for_model(&config.enrich_model),
        config.context_max_tokens,
        config.context_reply_reserve,
    );
    Ok(Pipeline::new(
        Arc::clone(&store),
        HarvestSettings::from_config(config),
        SemanticEngine::new(embedder, store),
        enricher,
        context,
        registry.scoring.clone(),
        ScoreSettings::from_config(config),
    ))
}

pub(crate) fn resolve_tenant<'a>(
    registry: &'a RegistryFile,
    tenant_id: &str,
) -> anyhow::Result<&'a TenantConfig> {
    registry
        .tenant(tenant_id)
        .ok_or_else(|| anyhow::anyhow!("tenant '{tenant_id}' not found in registry"))
}

pub(crate) fn validate_product(tenant: &TenantConfig, product: Option<&str>) -> anyhow::Result<()> {
    if let Some(product) = product {
        if !tenant.products.iter().any(|p| p.id == product) {
            anyhow::bail!("product '{product}' not found for tenant '{}'", tenant.id);
        }
    }
    Ok(())
}

/// Categories a run covers: the explicit request, else the tenant's targets,
/// else every registry category.
pub(crate) fn run_categories(
    registry: &RegistryFile,
    tenant: &TenantConfig,
    requested: &[String],
) -> Vec<String> {
    if !requested.is_empty() {
        return requested.to_vec();
    }
    tenant
        .target_categories()
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| registry.categories.clone())
}

pub(crate) fn score_mode(force: bool, global: bool) -> ScoreMode {
    if force {
        ScoreMode::Force
    } else if global {
        ScoreMode::Global
    } else {
        ScoreMode::Incremental
    }
}

/// Mark runs silent for longer than `timeout_mins` as timed out.
///
/// # Errors
///
/// Returns an error if the window is out of range or the store fails.
pub(crate) async fn reap_stalled(store: &dyn RadarStore, timeout_mins: u64) -> anyhow::Result<u64> {
    let window = i64::try_from(timeout_mins)
        .ok()
        .and_then(chrono::Duration::try_minutes)
        .ok_or_else(|| anyhow::anyhow!("stall timeout of {timeout_mins} minutes is out of range"))?;
    Ok(store.reap_stalled_runs(Utc::now() - window).await?)
}

// ---------------------------------------------------------------------------
// harvest
// ---------------------------------------------------------------------------

pub(crate) async fn run_harvest(
    config: &AppConfig,
    categories: &[String],
    max_age_days: u32,
) -> anyhow::Result<()> {
    let registry = load_registry(config)?;
    let categories = if categories.is_empty() {
        registry.categories.clone()
    } else {
        categories.to_vec()
    };
    if categories.is_empty() {
        println!("no categories requested or configured; nothing to harvest");
        return Ok(());
    }

    let store = connect_store(config).await?;
    let reports = harvest_categories(
        &HarvestSettings::from_config(config),
        store,
        &categories,
        max_age_days,
    )
    .await?;

    for report in &reports {
        println!(
            "r/{}: touched {}, deep-fetched {}, stats-only {}, failed {} ({} requests, {:.1}% ok, {} rate-limited)",
            report.category,
            report.touched,
            report.deep_fetched,
            report.skipped_deep,
            report.failed,
            report.stats.requests,
            report.stats.success_rate,
            report.stats.rate_limited,
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// score
// ---------------------------------------------------------------------------

pub(crate) async fn run_score(
    config: &AppConfig,
    tenant_id: &str,
    product: Option<String>,
    categories: &[String],
    limit: Option<usize>,
    mode: ScoreMode,
) -> anyhow::Result<()> {
    let registry = load_registry(config)?;
    let tenant = resolve_tenant(&registry, tenant_id)?;
    validate_product(tenant, product.as_deref())?;

    let store = connect_store(config).await?;
    let pipeline = build_pipeline(config, &registry, store)?;
    let report = pipeline
        .score(&ScoreRequest {
            tenant,
            categories: (!categories.is_empty()).then(|| categories.to_vec()),
            only_product: product,
            mode,
            limit,
            run_id: None,
        })
        .await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

pub(crate) async fn run_once(
    config: &AppConfig,
    tenant_id: &str,
    product: Option<String>,
    categories: &[String],
    max_age_days: u32,
    dry_run: bool,
) -> anyhow::Result<()> {
    let registry = load_registry(config)?;
    let tenant = resolve_tenant(&registry, tenant_id)?;
    validate_product(tenant, product.as_deref())?;

    let request = RunRequest {
        tenant: tenant.clone(),
        categories: run_categories(&registry, tenant, categories),
        only_product: product,
        max_age_days,
    };
    if request.categories.is_empty() {
        println!("no categories to harvest for tenant '{tenant_id}'; skipping run creation");
        return Ok(());
    }

    if dry_run {
        for line in plan_lines(&request, &registry) {
            println!("{line}");
        }
        return Ok(());
    }

    let store = connect_store(config).await?;
    let pipeline = build_pipeline(config, &registry, store)?;
    let status = pipeline.run_pipeline(&request).await?;
    println!("{}", format_status(&status));

    if status.state != RunState::Succeeded {
        anyhow::bail!(
            "run {} ended {}: {}",
            status.run_id,
            status.state.as_str(),
            status.error.as_deref().unwrap_or("no error recorded")
        );
    }
    Ok(())
}

/// Human-readable description of what a run would do.
pub(crate) fn plan_lines(request: &RunRequest, registry: &RegistryFile) -> Vec<String> {
    let mut lines = vec![format!(
        "dry-run: would run tenant '{}' over {} categories: [{}]",
        request.tenant.id,
        request.categories.len(),
        request.categories.join(", ")
    )];
    lines.push(format!(
        "  posts newer than {} days; enrichment gate: relevance >= {}, fit >= {}",
        request.max_age_days, registry.scoring.min_relevance, registry.scoring.min_fit
    ));
    for product in &request.tenant.products {
        let targets = if product.categories.is_empty() {
            "all categories".to_string()
        } else {
            format!("[{}]", product.categories.join(", "))
        };
        lines.push(format!(
            "  product {} ({}) targets {targets}",
            product.id, product.name
        ));
    }
    if let Some(only) = &request.only_product {
        lines.push(format!("  enrichment restricted to {only}"));
    }
    lines
}

// ---------------------------------------------------------------------------
// status / reap-stalled
// ---------------------------------------------------------------------------

pub(crate) async fn run_status(
    config: &AppConfig,
    run_id: Option<Uuid>,
    tenant: Option<&str>,
    limit: i64,
) -> anyhow::Result<()> {
    let pool = radar_db::connect_pool_from_config(config)
        .await
        .context("failed to connect to database")?;

    if let Some(run_id) = run_id {
        let status = radar_db::get_run(&pool, run_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("run {run_id} not found"))?;
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let runs = radar_db::list_runs(&pool, tenant, limit.max(1)).await?;
    if runs.is_empty() {
        println!("no pipeline runs recorded");
        return Ok(());
    }
    for status in &runs {
        println!("{}", format_status(status));
    }
    Ok(())
}

pub(crate) fn format_status(status: &RunStatus) -> String {
    let mut line = format!(
        "{}  {}  {:<9}  {:>3}%  {}",
        status.run_id,
        status.tenant_id,
        status.state.as_str(),
        status.progress_percent,
        status.step
    );
    if let Some(error) = &status.error {
        line.push_str("  error: ");
        line.push_str(error);
    }
    line
}

pub(crate) async fn run_reap(config: &AppConfig, timeout_mins: u64) -> anyhow::Result<()> {
    let store = connect_store(config).await?;
    let reaped = reap_stalled(store.as_ref(), timeout_mins).await?;
    println!("marked {reaped} stalled runs as timed out (no update for {timeout_mins} min)");
    Ok(())
}

// ---------------------------------------------------------------------------
// db
// ---------------------------------------------------------------------------

pub(crate) async fn run_db_ping(config: &AppConfig) -> anyhow::Result<()> {
    let pool = radar_db::connect_pool_from_config(config).await?;
    radar_db::ping(&pool).await?;
    println!("database reachable");
    Ok(())
}

pub(crate) async fn run_db_migrate(config: &AppConfig) -> anyhow::Result<()> {
    let pool = radar_db::connect_pool_from_config(config).await?;
    let applied = radar_db::run_migrations(&pool).await?;
    println!("applied {applied} migrations");
    Ok(())
}
