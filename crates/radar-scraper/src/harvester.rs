//! Category harvesting: paginate the listing, refresh or deep-fetch each post.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use radar_core::{Item, RadarStore, Reply, StoreError, UNPROCESSED};
use serde::Serialize;

use crate::client::FetchClient;
use crate::error::{FetchError, HarvestError};
use crate::listing::{parse_detail, parse_listing, parse_replies, PostSummary};
use crate::pacing::PacingPolicy;
use crate::stats::FetchStatsSnapshot;

/// Guard against cursors that cycle forever.
const MAX_PAGES: usize = 200;

/// Outcome of harvesting one category.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HarvestReport {
    pub category: String,
    /// Items written or refreshed, deep-fetched or not.
    pub touched: usize,
    pub deep_fetched: usize,
    pub skipped_deep: usize,
    /// Posts that could not be fetched or parsed and were skipped.
    pub failed: usize,
    /// Listing pages that could not be fetched or parsed.
    pub page_failures: usize,
    pub stats: FetchStatsSnapshot,
}

/// Notified while a category is harvested, after every listing page and
/// every post. A failing hook aborts the category.
#[async_trait]
pub trait HarvestProgress: Send + Sync {
    async fn heartbeat(&self, category: &str, considered: usize) -> Result<(), StoreError>;
}

/// One harvesting worker.
///
/// Requests are issued strictly sequentially. The worker owns its
/// [`PacingPolicy`], so separate workers adapt their pacing independently.
pub struct Harvester {
    client: FetchClient,
    store: Arc<dyn RadarStore>,
    base_url: String,
    page_size: u32,
    pacing: PacingPolicy,
}

impl Harvester {
    #[must_use]
    pub fn new(
        client: FetchClient,
        store: Arc<dyn RadarStore>,
        base_url: &str,
        page_size: u32,
        pacing: PacingPolicy,
    ) -> Self {
        Self {
            client,
            store,
            base_url: base_url.trim_end_matches('/').to_owned(),
            page_size,
            pacing,
        }
    }

    #[must_use]
    pub fn client(&self) -> &FetchClient {
        &self.client
    }

    /// The pacing window currently in force.
    #[must_use]
    pub fn pacing(&self) -> PacingPolicy {
        self.pacing
    }

    /// Harvest `category` until the cursor runs out, `item_limit` posts have
    /// been considered, or a page reaches posts older than `max_age`.
    ///
    /// Posts already stored with a body only get their counters refreshed.
    /// Every other post is deep-fetched along with its reply tree.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::Store`] if the store fails. Fetch and parse
    /// failures are logged, counted and skipped.
    pub async fn harvest(
        &mut self,
        category: &str,
        max_age: Duration,
        item_limit: usize,
    ) -> Result<HarvestReport, HarvestError> {
        self.harvest_with_progress(category, max_age, item_limit, None)
            .await
    }

    /// [`Harvester::harvest`], reporting to `progress` as it goes.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::Store`] if the store or the progress hook
    /// fails.
    pub async fn harvest_with_progress(
        &mut self,
        category: &str,
        max_age: Duration,
        item_limit: usize,
        progress: Option<&dyn HarvestProgress>,
    ) -> Result<HarvestReport, HarvestError> {
        let cutoff = Utc::now() - max_age;
        let mut report = HarvestReport {
            category: category.to_owned(),
            touched: 0,
            deep_fetched: 0,
            skipped_deep: 0,
            failed: 0,
            page_failures: 0,
            stats: self.client.stats().snapshot(&self.pacing),
        };
        let mut cursor: Option<String> = None;
        let mut considered = 0usize;

        for page_number in 1..=MAX_PAGES {
            let url = self.listing_url(category, cursor.as_deref());
            let page = match self.fetch(&url).await.and_then(|v| parse_listing(&v)) {
                Ok(page) => page,
                Err(e) => {
                    tracing::warn!(category, page_number, error = %e, "listing page failed; stopping category");
                    report.page_failures += 1;
                    break;
                }
            };
            report.failed += page.skipped;
            if let Some(progress) = progress {
                progress.heartbeat(category, considered).await?;
            }

            let mut reached_cutoff = false;
            for post in page.posts {
                if considered >= item_limit {
                    break;
                }
                if post.created_at < cutoff {
                    reached_cutoff = true;
                    continue;
                }
                considered += 1;
                self.process_post(category, post, &mut report).await?;
                if let Some(progress) = progress {
                    progress.heartbeat(category, considered).await?;
                }
            }

            if reached_cutoff {
                tracing::debug!(category, page_number, "reached posts older than max age");
                break;
            }
            if considered >= item_limit {
                tracing::debug!(category, item_limit, "item cap reached");
                break;
            }
            match page.after {
                Some(next) => cursor = Some(next),
                None => break,
            }
            if page_number == MAX_PAGES {
                tracing::warn!(category, max_pages = MAX_PAGES, "page limit reached");
            }
        }

        report.stats = self.client.stats().snapshot(&self.pacing);
        tracing::info!(
            category,
            touched = report.touched,
            deep_fetched = report.deep_fetched,
            skipped_deep = report.skipped_deep,
            failed = report.failed,
            requests = report.stats.requests,
            retries = report.stats.retries,
            rate_limited = report.stats.rate_limited,
            success_rate = %format!("{:.1}%", report.stats.success_rate),
            min_delay_ms = report.stats.min_delay_ms,
            max_delay_ms = report.stats.max_delay_ms,
            "category harvested"
        );
        Ok(report)
    }

    async fn process_post(
        &mut self,
        category: &str,
        post: PostSummary,
        report: &mut HarvestReport,
    ) -> Result<(), HarvestError> {
        if let Some(existing) = self.store.get_item(&post.id).await? {
            if existing.has_body() {
                self.store
                    .update_item_stats(&post.id, post.score, post.reply_count)
                    .await?;
                self.client.stats().record_skipped_deep();
                report.skipped_deep += 1;
                report.touched += 1;
                return Ok(());
            }
        }

        report.deep_fetched += 1;
        match self.deep_fetch(category, &post).await {
            Ok((item, replies)) => {
                self.store.upsert_item(&item).await?;
                for reply in &replies {
                    self.store.upsert_reply(reply).await?;
                }
                tracing::debug!(item_id = %item.id, replies = replies.len(), "item captured");
                report.touched += 1;
            }
            Err(e) => {
                tracing::warn!(category, item_id = %post.id, error = %e, "deep fetch failed; skipping item");
                report.failed += 1;
            }
        }
        Ok(())
    }

    async fn deep_fetch(
        &mut self,
        category: &str,
        post: &PostSummary,
    ) -> Result<(Item, Vec<Reply>), FetchError> {
        let detail_url = format!("{}/by_id/{}.json", self.base_url, post.id);
        let detail = parse_detail(&self.fetch(&detail_url).await?)?;

        let replies = if detail.reply_count > 0 {
            let comments_url = format!("{}/comments/{}.json", self.base_url, detail.short_id());
            parse_replies(&detail.id, self.fetch(&comments_url).await?)?
        } else {
            Vec::new()
        };

        let item = Item {
            category: if detail.category.is_empty() {
                category.to_owned()
            } else {
                detail.category
            },
            id: detail.id,
            url: detail.url,
            title: detail.title,
            body: detail.body,
            author: detail.author,
            score: detail.score,
            reply_count: detail.reply_count,
            created_at: detail.created_at,
            fetched_at: Utc::now(),
            embedding_ref: None,
            processed_score: UNPROCESSED,
            processed_replies: UNPROCESSED,
        };
        Ok((item, replies))
    }

    async fn fetch(&mut self, url: &str) -> Result<serde_json::Value, FetchError> {
        let (result, pacing) = self.client.fetch(url, self.pacing).await;
        self.pacing = pacing;
        result
    }

    fn listing_url(&self, category: &str, after: Option<&str>) -> String {
        let base = format!("{}/r/{category}/new.json", self.base_url);
        let limit = self.page_size.to_string();
        match reqwest::Url::parse(&base) {
            Ok(mut url) => {
                url.query_pairs_mut().append_pair("limit", &limit);
                if let Some(after) = after {
                    url.query_pairs_mut().append_pair("after", after);
                }
                url.to_string()
            }
            Err(_) => match after {
                Some(after) => format!("{base}?limit={limit}&after={after}"),
                None => format!("{base}?limit={limit}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration as StdDuration;

    use radar_core::MemoryStore;

    use super::*;

    fn harvester(base: &str) -> Harvester {
        let client = FetchClient::new(
            StdDuration::from_secs(5),
            0,
            StdDuration::ZERO,
            StdDuration::ZERO,
        )
        .unwrap();
        let pacing = PacingPolicy {
            min_delay: StdDuration::ZERO,
            max_delay: StdDuration::ZERO,
            burst_probability: 0.0,
            burst_multiplier: 1.0,
            widen_factor: 1.5,
            min_cap: StdDuration::ZERO,
            max_cap: StdDuration::ZERO,
        };
        Harvester::new(client, Arc::new(MemoryStore::new()), base, 100, pacing)
    }

    #[test]
    fn listing_url_without_cursor() {
        let h = harvester("https://old.reddit.com/");
        assert_eq!(
            h.listing_url("shopify", None),
            "https://old.reddit.com/r/shopify/new.json?limit=100"
        );
    }

    #[test]
    fn listing_url_with_cursor() {
        let h = harvester("https://old.reddit.com");
        assert_eq!(
            h.listing_url("shopify", Some("t3_abc")),
            "https://old.reddit.com/r/shopify/new.json?limit=100&after=t3_abc"
        );
    }
}
