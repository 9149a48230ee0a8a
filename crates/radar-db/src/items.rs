//! Database operations for `items` and `replies`.

use chrono::{DateTime, Utc};
use radar_core::{Item, Reply};
use sqlx::PgPool;

use crate::DbError;

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// A row from the `items` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ItemRow {
    pub id: String,
    pub category: String,
    pub url: String,
    pub title: String,
    pub body: String,
    pub author: Option<String>,
    pub score: i64,
    pub reply_count: i64,
    pub created_at: DateTime<Utc>,
    pub fetched_at: DateTime<Utc>,
    pub embedding_ref: Option<String>,
    pub processed_score: i64,
    pub processed_replies: i64,
}

impl From<ItemRow> for Item {
    fn from(row: ItemRow) -> Self {
        Item {
            id: row.id,
            category: row.category,
            url: row.url,
            title: row.title,
            body: row.body,
            author: row.author,
            score: row.score,
            reply_count: row.reply_count,
            created_at: row.created_at,
            fetched_at: row.fetched_at,
            embedding_ref: row.embedding_ref,
            processed_score: row.processed_score,
            processed_replies: row.processed_replies,
        }
    }
}

/// A row from the `replies` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReplyRow {
    pub id: String,
    pub item_id: String,
    pub parent_id: Option<String>,
    pub body: String,
    pub author: Option<String>,
    pub score: i64,
    pub depth: i32,
}

impl From<ReplyRow> for Reply {
    fn from(row: ReplyRow) -> Self {
        Reply {
            id: row.id,
            item_id: row.item_id,
            parent_id: row.parent_id,
            body: row.body,
            author: row.author,
            score: row.score,
            depth: row.depth,
        }
    }
}

pub(crate) const ITEM_COLUMNS: &str = "i.id, i.category, i.url, i.title, i.body, i.author, \
     i.score, i.reply_count, i.created_at, i.fetched_at, i.embedding_ref, \
     i.processed_score, i.processed_replies";

// ---------------------------------------------------------------------------
// items
// ---------------------------------------------------------------------------

/// Fetches an item by its source id.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_item(pool: &PgPool, id: &str) -> Result<Option<Item>, DbError> {
    let row = sqlx::query_as::<_, ItemRow>(&format!(
        "SELECT {ITEM_COLUMNS} FROM items i WHERE i.id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(Item::from))
}

/// Inserts an item or replaces its harvested fields.
///
/// `embedding_ref` keeps its stored value when present; the processed
/// snapshots are never touched by a harvest write.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the upsert fails.
pub async fn upsert_item(pool: &PgPool, item: &Item) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO items (id, category, url, title, body, author, score, reply_count, \
                            created_at, fetched_at, embedding_ref, processed_score, processed_replies) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
         ON CONFLICT (id) DO UPDATE SET \
             category      = EXCLUDED.category, \
             url           = EXCLUDED.url, \
             title         = EXCLUDED.title, \
             body          = EXCLUDED.body, \
             author        = EXCLUDED.author, \
             score         = EXCLUDED.score, \
             reply_count   = EXCLUDED.reply_count, \
             created_at    = EXCLUDED.created_at, \
             fetched_at    = EXCLUDED.fetched_at, \
             embedding_ref = COALESCE(items.embedding_ref, EXCLUDED.embedding_ref)",
    )
    .bind(&item.id)
    .bind(&item.category)
    .bind(&item.url)
    .bind(&item.title)
    .bind(&item.body)
    .bind(item.author.as_deref())
    .bind(item.score)
    .bind(item.reply_count)
    .bind(item.created_at)
    .bind(item.fetched_at)
    .bind(item.embedding_ref.as_deref())
    .bind(item.processed_score)
    .bind(item.processed_replies)
    .execute(pool)
    .await?;

    Ok(())
}

/// Refreshes the mutable counters of an existing item.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if no item has this id, or [`DbError::Sqlx`]
/// if the update fails.
pub async fn update_item_stats(
    pool: &PgPool,
    id: &str,
    score: i64,
    reply_count: i64,
) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE items SET score = $1, reply_count = $2, fetched_at = NOW() WHERE id = $3",
    )
    .bind(score)
    .bind(reply_count)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound {
            entity: "item",
            id: id.to_string(),
        });
    }
    Ok(())
}

/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn set_item_embedding_ref(
    pool: &PgPool,
    id: &str,
    embedding_ref: &str,
) -> Result<(), DbError> {
    sqlx::query("UPDATE items SET embedding_ref = $1 WHERE id = $2")
        .bind(embedding_ref)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Records the counters seen by a global scoring pass.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn mark_item_processed(
    pool: &PgPool,
    id: &str,
    score: i64,
    reply_count: i64,
) -> Result<(), DbError> {
    sqlx::query("UPDATE items SET processed_score = $1, processed_replies = $2 WHERE id = $3")
        .bind(score)
        .bind(reply_count)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// replies
// ---------------------------------------------------------------------------

/// # Errors
///
/// Returns [`DbError::Sqlx`] if the upsert fails, including when the owning
/// item does not exist.
pub async fn upsert_reply(pool: &PgPool, reply: &Reply) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO replies (id, item_id, parent_id, body, author, score, depth) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         ON CONFLICT (id) DO UPDATE SET \
             parent_id = EXCLUDED.parent_id, \
             body      = EXCLUDED.body, \
             author    = EXCLUDED.author, \
             score     = EXCLUDED.score, \
             depth     = EXCLUDED.depth",
    )
    .bind(&reply.id)
    .bind(&reply.item_id)
    .bind(reply.parent_id.as_deref())
    .bind(&reply.body)
    .bind(reply.author.as_deref())
    .bind(reply.score)
    .bind(reply.depth)
    .execute(pool)
    .await?;

    Ok(())
}

/// All stored replies of an item, ordered by id.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_replies_for(pool: &PgPool, item_id: &str) -> Result<Vec<Reply>, DbError> {
    let rows = sqlx::query_as::<_, ReplyRow>(
        "SELECT id, item_id, parent_id, body, author, score, depth \
         FROM replies \
         WHERE item_id = $1 \
         ORDER BY id",
    )
    .bind(item_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Reply::from).collect())
}
