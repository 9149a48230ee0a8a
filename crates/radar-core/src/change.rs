//! Change detection: decides which items need (re-)scoring.
//!
//! The comparison is on the two mutable counters the source exposes, reply
//! count and popularity score. Backends evaluate the same rule in their query
//! so the check stays index-backed.

use crate::store::{ChangeMode, PendingFilter, RadarStore, StoreError};
use crate::types::Item;

/// `true` when `item` must be scored given the `(score, reply_count)`
/// snapshot recorded at its last scoring, or `None` if never scored.
#[must_use]
pub fn needs_rescore(item: &Item, snapshot: Option<(i64, i64)>) -> bool {
    match snapshot {
        None => true,
        Some((score, replies)) => item.score != score || item.reply_count != replies,
    }
}

/// Select items pending scoring for one (tenant, product) pair.
///
/// Returns every item without an analysis record for the pair, or whose score
/// or reply count differs from the record's snapshot.
///
/// # Errors
///
/// Propagates [`StoreError`] from the backend.
pub async fn select_pending(
    store: &dyn RadarStore,
    tenant_id: &str,
    product_id: &str,
    category_filter: Option<&[String]>,
    limit: Option<usize>,
) -> Result<Vec<Item>, StoreError> {
    let filter = PendingFilter {
        mode: ChangeMode::PerProduct {
            tenant_id: tenant_id.to_string(),
            product_id: product_id.to_string(),
        },
        categories: category_filter.map(<[String]>::to_vec),
        limit,
    };
    store.select_pending_items(&filter).await
}
