//! Database operations for `product_embeddings`.

use radar_core::ProductEmbedding;
use sqlx::PgPool;

use crate::DbError;

#[derive(Debug, Clone, sqlx::FromRow)]
struct ProductEmbeddingRow {
    tenant_id: String,
    product_id: String,
    vector: Vec<f32>,
    source_text: String,
}

/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_product_embedding(
    pool: &PgPool,
    tenant_id: &str,
    product_id: &str,
) -> Result<Option<ProductEmbedding>, DbError> {
    let row = sqlx::query_as::<_, ProductEmbeddingRow>(
        "SELECT tenant_id, product_id, vector, source_text \
         FROM product_embeddings \
         WHERE tenant_id = $1 AND product_id = $2",
    )
    .bind(tenant_id)
    .bind(product_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| ProductEmbedding {
        tenant_id: r.tenant_id,
        product_id: r.product_id,
        vector: r.vector,
        source_text: r.source_text,
    }))
}

/// # Errors
///
/// Returns [`DbError::Sqlx`] if the upsert fails.
pub async fn put_product_embedding(
    pool: &PgPool,
    embedding: &ProductEmbedding,
) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO product_embeddings (tenant_id, product_id, vector, source_text, updated_at) \
         VALUES ($1, $2, $3, $4, NOW()) \
         ON CONFLICT (tenant_id, product_id) DO UPDATE SET \
             vector      = EXCLUDED.vector, \
             source_text = EXCLUDED.source_text, \
             updated_at  = NOW()",
    )
    .bind(&embedding.tenant_id)
    .bind(&embedding.product_id)
    .bind(&embedding.vector)
    .bind(&embedding.source_text)
    .execute(pool)
    .await?;

    Ok(())
}
