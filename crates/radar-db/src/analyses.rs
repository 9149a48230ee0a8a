//! Database operations for `analyses` and the pending-work query.

use chrono::{DateTime, Utc};
use radar_core::{
    AnalysisKey, AnalysisRecord, ChangeMode, DetectedSignals, Enrichment, Item, PendingFilter,
};
use sqlx::types::Json;
use sqlx::PgPool;

use crate::items::{ItemRow, ITEM_COLUMNS};
use crate::DbError;

/// A row from the `analyses` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AnalysisRow {
    pub tenant_id: String,
    pub product_id: String,
    pub item_id: String,
    pub relevance: f64,
    pub semantic_fit: f64,
    pub intensity: f64,
    pub signals: Json<DetectedSignals>,
    pub enrichment: Json<Enrichment>,
    pub snapshot_score: i64,
    pub snapshot_replies: i64,
    pub analyzed_at: DateTime<Utc>,
}

impl From<AnalysisRow> for AnalysisRecord {
    fn from(row: AnalysisRow) -> Self {
        AnalysisRecord {
            item_id: row.item_id,
            product_id: row.product_id,
            tenant_id: row.tenant_id,
            relevance: row.relevance,
            semantic_fit: row.semantic_fit,
            intensity: row.intensity,
            signals: row.signals.0,
            enrichment: row.enrichment.0,
            snapshot_score: row.snapshot_score,
            snapshot_replies: row.snapshot_replies,
            analyzed_at: row.analyzed_at,
        }
    }
}

/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails or a JSON column does not
/// decode.
pub async fn get_analysis(
    pool: &PgPool,
    key: &AnalysisKey,
) -> Result<Option<AnalysisRecord>, DbError> {
    let row = sqlx::query_as::<_, AnalysisRow>(
        "SELECT tenant_id, product_id, item_id, relevance, semantic_fit, intensity, \
                signals, enrichment, snapshot_score, snapshot_replies, analyzed_at \
         FROM analyses \
         WHERE tenant_id = $1 AND product_id = $2 AND item_id = $3",
    )
    .bind(&key.tenant_id)
    .bind(&key.product_id)
    .bind(&key.item_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(AnalysisRecord::from))
}

/// Inserts or overwrites the record for its (tenant, product, item) triple.
///
/// Numbers and snapshots are last-writer-wins. The enrichment column is
/// merged in SQL so concurrent writers cannot lose a stored result: an
/// `absent` payload keeps what is stored, and an `error` payload never
/// replaces a `result`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the upsert fails.
pub async fn upsert_analysis(pool: &PgPool, record: &AnalysisRecord) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO analyses (tenant_id, product_id, item_id, relevance, semantic_fit, \
                               intensity, signals, enrichment, snapshot_score, \
                               snapshot_replies, analyzed_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
         ON CONFLICT (tenant_id, product_id, item_id) DO UPDATE SET \
             relevance        = EXCLUDED.relevance, \
             semantic_fit     = EXCLUDED.semantic_fit, \
             intensity        = EXCLUDED.intensity, \
             signals          = EXCLUDED.signals, \
             snapshot_score   = EXCLUDED.snapshot_score, \
             snapshot_replies = EXCLUDED.snapshot_replies, \
             analyzed_at      = EXCLUDED.analyzed_at, \
             enrichment       = CASE \
                 WHEN EXCLUDED.enrichment->>'status' = 'absent' THEN analyses.enrichment \
                 WHEN EXCLUDED.enrichment->>'status' = 'error' \
                      AND analyses.enrichment->>'status' = 'result' THEN analyses.enrichment \
                 ELSE EXCLUDED.enrichment \
             END",
    )
    .bind(&record.tenant_id)
    .bind(&record.product_id)
    .bind(&record.item_id)
    .bind(record.relevance)
    .bind(record.semantic_fit)
    .bind(record.intensity)
    .bind(Json(&record.signals))
    .bind(Json(&record.enrichment))
    .bind(record.snapshot_score)
    .bind(record.snapshot_replies)
    .bind(record.analyzed_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Items needing scoring under `filter`, newest first.
///
/// Per-product mode is a left join against `analyses` on the primary key, so
/// the change check stays index-backed.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn select_pending_items(
    pool: &PgPool,
    filter: &PendingFilter,
) -> Result<Vec<Item>, DbError> {
    let categories: Option<Vec<String>> = filter
        .categories
        .as_ref()
        .map(|cats| cats.iter().map(|c| c.to_lowercase()).collect());
    let limit: Option<i64> = filter
        .limit
        .map(|l| i64::try_from(l).unwrap_or(i64::MAX));

    let rows = match &filter.mode {
        ChangeMode::PerProduct {
            tenant_id,
            product_id,
        } => {
            sqlx::query_as::<_, ItemRow>(&format!(
                "SELECT {ITEM_COLUMNS} \
                 FROM items i \
                 LEFT JOIN analyses a \
                   ON a.tenant_id = $1 AND a.product_id = $2 AND a.item_id = i.id \
                 WHERE (a.item_id IS NULL \
                        OR a.snapshot_score <> i.score \
                        OR a.snapshot_replies <> i.reply_count) \
                   AND ($3::text[] IS NULL OR lower(i.category) = ANY($3)) \
                 ORDER BY i.created_at DESC, i.id \
                 LIMIT $4"
            ))
            .bind(tenant_id)
            .bind(product_id)
            .bind(categories)
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
        ChangeMode::Global => {
            sqlx::query_as::<_, ItemRow>(&format!(
                "SELECT {ITEM_COLUMNS} \
                 FROM items i \
                 WHERE (i.processed_score <> i.score OR i.processed_replies <> i.reply_count) \
                   AND ($1::text[] IS NULL OR lower(i.category) = ANY($1)) \
                 ORDER BY i.created_at DESC, i.id \
                 LIMIT $2"
            ))
            .bind(categories)
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
        ChangeMode::Force => {
            sqlx::query_as::<_, ItemRow>(&format!(
                "SELECT {ITEM_COLUMNS} \
                 FROM items i \
                 WHERE ($1::text[] IS NULL OR lower(i.category) = ANY($1)) \
                 ORDER BY i.created_at DESC, i.id \
                 LIMIT $2"
            ))
            .bind(categories)
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
    };

    Ok(rows.into_iter().map(Item::from).collect())
}
