//! Recurring pipeline runs.
//!
//! Registers two jobs on a [`JobScheduler`]: a pipeline pass over every
//! registry tenant on the configured cron, and a stalled-run reaper every
//! five minutes. Runs until ctrl-c.

use std::sync::Arc;

use radar_core::{AppConfig, RadarStore, RegistryFile};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

use crate::commands::{build_pipeline, connect_store, load_registry, reap_stalled, run_categories};
use crate::pipeline::{Pipeline, RunRequest};
use crate::DEFAULT_MAX_AGE_DAYS;

const REAPER_CRON: &str = "0 */5 * * * *";

pub(crate) async fn run_schedule(config: AppConfig, cron: &str) -> anyhow::Result<()> {
    let registry = Arc::new(load_registry(&config)?);
    if registry.tenants.is_empty() {
        anyhow::bail!("registry has no tenants; nothing to schedule");
    }
    let store = connect_store(&config).await?;
    let pipeline = Arc::new(build_pipeline(&config, &registry, Arc::clone(&store))?);

    let mut scheduler = build_scheduler(
        pipeline,
        registry,
        store,
        cron,
        config.run_stall_timeout_mins,
    )
    .await?;
    tracing::info!(cron, "scheduler: running until ctrl-c");

    tokio::signal::ctrl_c().await?;
    tracing::info!("scheduler: shutting down");
    scheduler.shutdown().await?;
    Ok(())
}

/// Builds and starts the scheduler.
///
/// The returned handle must be kept alive; dropping it stops all jobs.
///
/// # Errors
///
/// Returns [`JobSchedulerError`] if the cron expression is invalid or the
/// scheduler cannot start.
async fn build_scheduler(
    pipeline: Arc<Pipeline>,
    registry: Arc<RegistryFile>,
    store: Arc<dyn RadarStore>,
    cron: &str,
    stall_timeout_mins: u64,
) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;

    register_pipeline_job(&scheduler, pipeline, registry, cron).await?;
    register_reaper_job(&scheduler, store, stall_timeout_mins).await?;

    scheduler.start().await?;
    Ok(scheduler)
}

/// A tick that fires while the previous pass is still running is skipped.
async fn register_pipeline_job(
    scheduler: &JobScheduler,
    pipeline: Arc<Pipeline>,
    registry: Arc<RegistryFile>,
    cron: &str,
) -> Result<(), JobSchedulerError> {
    let in_flight = Arc::new(Mutex::new(()));

    let job = Job::new_async(cron, move |_uuid, _lock| {
        let pipeline = Arc::clone(&pipeline);
        let registry = Arc::clone(&registry);
        let in_flight = Arc::clone(&in_flight);

        Box::pin(async move {
            let Ok(_pass) = in_flight.try_lock_owned() else {
                tracing::warn!("scheduler: previous pipeline pass still running; skipping tick");
                return;
            };
            tracing::info!("scheduler: starting pipeline pass");
            run_all_tenants(&pipeline, &registry).await;
            tracing::info!("scheduler: pipeline pass complete");
        })
    })?;

    scheduler.add(job).await?;
    tracing::info!(cron, "scheduler: registered pipeline job");
    Ok(())
}

/// One run per tenant, in registry order. Failures are logged and the pass
/// moves on to the next tenant.
async fn run_all_tenants(pipeline: &Pipeline, registry: &RegistryFile) {
    for tenant in &registry.tenants {
        let categories = run_categories(registry, tenant, &[]);
        if categories.is_empty() {
            tracing::warn!(tenant_id = %tenant.id, "scheduler: tenant has no categories; skipping");
            continue;
        }
        let request = RunRequest {
            tenant: tenant.clone(),
            categories,
            only_product: None,
            max_age_days: DEFAULT_MAX_AGE_DAYS,
        };
        match pipeline.run_pipeline(&request).await {
            Ok(status) => tracing::info!(
                tenant_id = %tenant.id,
                run_id = %status.run_id,
                state = status.state.as_str(),
                "scheduler: tenant run finished"
            ),
            Err(e) => tracing::error!(
                tenant_id = %tenant.id,
                error = %e,
                "scheduler: could not record tenant run"
            ),
        }
    }
}

async fn register_reaper_job(
    scheduler: &JobScheduler,
    store: Arc<dyn RadarStore>,
    stall_timeout_mins: u64,
) -> Result<(), JobSchedulerError> {
    let job = Job::new_async(REAPER_CRON, move |_uuid, _lock| {
        let store = Arc::clone(&store);

        Box::pin(async move {
            match reap_stalled(store.as_ref(), stall_timeout_mins).await {
                Ok(0) => tracing::debug!("scheduler: no stalled runs"),
                Ok(reaped) => tracing::info!(reaped, "scheduler: marked stalled runs timed out"),
                Err(e) => tracing::error!(error = %e, "scheduler: stalled-run reaper failed"),
            }
        })
    })?;

    scheduler.add(job).await?;
    tracing::info!(cron = REAPER_CRON, "scheduler: registered reaper job");
    Ok(())
}
