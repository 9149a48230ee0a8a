//! Database operations for `pipeline_runs`, the durable run-status record.

use chrono::{DateTime, Utc};
use radar_core::{truncate_error, RunState, RunStatus};
use sqlx::PgPool;
use uuid::Uuid;

use crate::DbError;

/// A row from the `pipeline_runs` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RunRow {
    pub run_id: Uuid,
    pub tenant_id: String,
    pub step: String,
    /// The schema constrains this to `0..=100`.
    pub progress_percent: i16,
    pub state: String,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TryFrom<RunRow> for RunStatus {
    type Error = DbError;

    fn try_from(row: RunRow) -> Result<Self, Self::Error> {
        let state = row.state.parse::<RunState>().map_err(DbError::Decode)?;
        let progress_percent = u8::try_from(row.progress_percent).map_err(|_| {
            DbError::Decode(format!(
                "run {} has progress {}",
                row.run_id, row.progress_percent
            ))
        })?;
        Ok(RunStatus {
            run_id: row.run_id,
            tenant_id: row.tenant_id,
            step: row.step,
            progress_percent,
            state,
            error: row.error,
            started_at: row.started_at,
            updated_at: row.updated_at,
            finished_at: row.finished_at,
        })
    }
}

const RUN_COLUMNS: &str = "run_id, tenant_id, step, progress_percent, state, error, \
     started_at, updated_at, finished_at";

/// Creates a run in `running` state at 0%.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn create_run(pool: &PgPool, tenant_id: &str) -> Result<RunStatus, DbError> {
    let row = sqlx::query_as::<_, RunRow>(&format!(
        "INSERT INTO pipeline_runs (run_id, tenant_id, step, progress_percent, state) \
         VALUES ($1, $2, 'Queued', 0, 'running') \
         RETURNING {RUN_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(tenant_id)
    .fetch_one(pool)
    .await?;

    RunStatus::try_from(row)
}

/// Updates step and progress of a running run. Terminal runs are left alone.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if the run does not exist, or
/// [`DbError::Sqlx`] if the update fails.
pub async fn update_run(
    pool: &PgPool,
    run_id: Uuid,
    step: &str,
    progress_percent: u8,
) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE pipeline_runs \
         SET step = $1, progress_percent = $2, updated_at = NOW() \
         WHERE run_id = $3 AND state = 'running'",
    )
    .bind(step)
    .bind(i16::from(progress_percent.min(100)))
    .bind(run_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        ensure_exists(pool, run_id).await?;
    }
    Ok(())
}

/// Moves a running run into `state`. A run already in a terminal state keeps
/// its first outcome.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if the run does not exist, or
/// [`DbError::Sqlx`] if the update fails.
pub async fn finish_run(
    pool: &PgPool,
    run_id: Uuid,
    state: RunState,
    error: Option<&str>,
) -> Result<(), DbError> {
    let step = if state == RunState::Succeeded {
        "Success"
    } else {
        "Error"
    };
    let result = sqlx::query(
        "UPDATE pipeline_runs \
         SET state = $1, step = $2, progress_percent = 100, error = $3, \
             updated_at = NOW(), finished_at = NOW() \
         WHERE run_id = $4 AND state = 'running'",
    )
    .bind(state.as_str())
    .bind(step)
    .bind(error.map(truncate_error))
    .bind(run_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        ensure_exists(pool, run_id).await?;
    }
    Ok(())
}

/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails, or [`DbError::Decode`] if
/// the stored state is unknown.
pub async fn get_run(pool: &PgPool, run_id: Uuid) -> Result<Option<RunStatus>, DbError> {
    let row = sqlx::query_as::<_, RunRow>(&format!(
        "SELECT {RUN_COLUMNS} FROM pipeline_runs WHERE run_id = $1"
    ))
    .bind(run_id)
    .fetch_optional(pool)
    .await?;

    row.map(RunStatus::try_from).transpose()
}

/// The most recent `limit` runs, optionally for one tenant.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_runs(
    pool: &PgPool,
    tenant_id: Option<&str>,
    limit: i64,
) -> Result<Vec<RunStatus>, DbError> {
    let rows = sqlx::query_as::<_, RunRow>(&format!(
        "SELECT {RUN_COLUMNS} FROM pipeline_runs \
         WHERE ($1::text IS NULL OR tenant_id = $1) \
         ORDER BY started_at DESC, run_id \
         LIMIT $2"
    ))
    .bind(tenant_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(RunStatus::try_from).collect()
}

/// Marks every running run last updated before `stalled_before` as
/// `timed_out`. Returns the number of runs marked.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn reap_stalled_runs(
    pool: &PgPool,
    stalled_before: DateTime<Utc>,
) -> Result<u64, DbError> {
    let result = sqlx::query(
        "UPDATE pipeline_runs \
         SET state = 'timed_out', step = 'Error', \
             error = 'run stalled without a status update', \
             updated_at = NOW(), finished_at = NOW() \
         WHERE state = 'running' AND updated_at < $1",
    )
    .bind(stalled_before)
    .execute(pool)
    .await?;

    let reaped = result.rows_affected();
    if reaped > 0 {
        tracing::warn!(reaped, %stalled_before, "marked stalled runs as timed out");
    }
    Ok(reaped)
}

async fn ensure_exists(pool: &PgPool, run_id: Uuid) -> Result<(), DbError> {
    let exists = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (SELECT 1 FROM pipeline_runs WHERE run_id = $1)",
    )
    .bind(run_id)
    .fetch_one(pool)
    .await?;

    if exists {
        Ok(())
    } else {
        Err(DbError::NotFound {
            entity: "run",
            id: run_id.to_string(),
        })
    }
}
