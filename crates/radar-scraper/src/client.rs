//! HTTP client for the discussion source's JSON endpoints.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use radar_core::AppConfig;
use reqwest::{Client, StatusCode};

use crate::error::FetchError;
use crate::identity::{browser_headers, random_user_agent};
use crate::pacing::{millis, PacingPolicy};
use crate::stats::FetchStats;

/// Fetch client that paces, disguises and retries every request.
///
/// Pacing state is not held here. Each call takes the caller's
/// [`PacingPolicy`] and hands back the policy to use next, widened if the
/// source rate-limited us during the call.
pub struct FetchClient {
    client: Client,
    /// Additional attempts after the first for retriable failures.
    max_retries: u32,
    backoff_base: Duration,
    backoff_max: Duration,
    stats: Arc<FetchStats>,
}

impl FetchClient {
    /// # Errors
    ///
    /// Returns [`FetchError::Transport`] if the underlying `reqwest::Client`
    /// cannot be constructed.
    pub fn new(
        timeout: Duration,
        max_retries: u32,
        backoff_base: Duration,
        backoff_max: Duration,
    ) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            max_retries,
            backoff_base,
            backoff_max,
            stats: Arc::new(FetchStats::default()),
        })
    }

    /// # Errors
    ///
    /// Returns [`FetchError::Transport`] if the HTTP client cannot be built.
    pub fn from_config(config: &AppConfig) -> Result<Self, FetchError> {
        Self::new(
            Duration::from_secs(config.fetch_timeout_secs),
            config.fetch_max_retries,
            Duration::from_millis(config.fetch_backoff_base_ms),
            Duration::from_millis(config.fetch_backoff_max_ms),
        )
    }

    #[must_use]
    pub fn stats(&self) -> &FetchStats {
        &self.stats
    }

    #[must_use]
    pub fn stats_handle(&self) -> Arc<FetchStats> {
        Arc::clone(&self.stats)
    }

    /// Fetch `url` and parse the body as JSON.
    ///
    /// Sleeps a sampled pause before every attempt. Rate-limit responses widen
    /// the pacing window and are retried; 5xx and transport failures are
    /// retried without widening. Any other non-success status fails at once.
    ///
    /// Returns the outcome together with the pacing policy the caller should
    /// use from now on.
    pub async fn fetch(
        &self,
        url: &str,
        pacing: PacingPolicy,
    ) -> (Result<serde_json::Value, FetchError>, PacingPolicy) {
        let mut pacing = pacing;
        let mut attempt = 0u32;

        loop {
            let pause = pacing.next_pause();
            if pause.burst {
                tracing::debug!(
                    delay_ms = millis(pause.delay),
                    "burst pause before request"
                );
            }
            tokio::time::sleep(pause.delay).await;

            self.stats.record_request();
            let err = match self.attempt(url).await {
                Ok(value) => {
                    self.stats.record_success();
                    return (Ok(value), pacing);
                }
                Err(err) => err,
            };

            if matches!(err, FetchError::RateLimited { .. }) {
                self.stats.record_rate_limited();
                pacing = pacing.widened();
                tracing::info!(
                    url,
                    min_delay_ms = millis(pacing.min_delay),
                    max_delay_ms = millis(pacing.max_delay),
                    "rate limited; widened pacing window"
                );
            }

            if !err.is_retriable() {
                self.stats.record_failure();
                return (Err(err), pacing);
            }
            if attempt >= self.max_retries {
                self.stats.record_failure();
                return (
                    Err(FetchError::RetriesExhausted {
                        url: url.to_owned(),
                        attempts: attempt + 1,
                        last: Box::new(err),
                    }),
                    pacing,
                );
            }

            let delay = self.backoff_delay(attempt);
            tracing::warn!(
                attempt,
                max_retries = self.max_retries,
                delay_ms = millis(delay),
                error = %err,
                "transient fetch error; retrying after backoff"
            );
            tokio::time::sleep(delay).await;
            self.stats.record_retry();
            attempt += 1;
        }
    }

    async fn attempt(&self, url: &str) -> Result<serde_json::Value, FetchError> {
        let headers = browser_headers(random_user_agent());
        let response = self.client.get(url).headers(headers).send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::RateLimited {
                url: url.to_owned(),
            });
        }
        if status.is_server_error() {
            return Err(FetchError::ServerError {
                status: status.as_u16(),
                url: url.to_owned(),
            });
        }
        if !status.is_success() {
            return Err(FetchError::UnexpectedStatus {
                status: status.as_u16(),
                url: url.to_owned(),
            });
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| FetchError::Deserialize {
            context: url.to_owned(),
            source: e,
        })
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        backoff_delay_with(
            self.backoff_base,
            self.backoff_max,
            attempt,
            &mut rand::rng(),
        )
    }
}

/// `base * 2^attempt`, capped at `max`, then drawn uniformly from
/// `[0.5x, 1x]` of that value.
pub(crate) fn backoff_delay_with<R: Rng + ?Sized>(
    base: Duration,
    max: Duration,
    attempt: u32,
    rng: &mut R,
) -> Duration {
    let capped = millis(base).saturating_mul(1u64 << attempt.min(32)).min(millis(max));
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let delay_ms = (capped as f64 * rng.random_range(0.5..=1.0)) as u64;
    Duration::from_millis(delay_ms)
}

#[cfg(test)]
#[path = "client_test.rs"]
mod tests;
