//! Human-like request pacing.
//!
//! A [`PacingPolicy`] is a plain value owned by one harvesting worker. It is
//! never mutated in place: [`PacingPolicy::widened`] returns the policy to use
//! after the source pushes back, so concurrent workers cannot race on a shared
//! pacing window.

use std::time::Duration;

use rand::Rng;
use radar_core::AppConfig;

/// Multiplicative jitter applied to every sampled delay (±10%).
const JITTER: f64 = 0.10;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacingPolicy {
    pub min_delay: Duration,
    pub max_delay: Duration,
    /// Chance that a pause is stretched by `burst_multiplier`.
    pub burst_probability: f64,
    pub burst_multiplier: f64,
    /// Factor applied to both window bounds after a rate-limit response.
    pub widen_factor: f64,
    pub min_cap: Duration,
    pub max_cap: Duration,
}

/// One sampled pause.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pause {
    pub delay: Duration,
    pub burst: bool,
}

impl PacingPolicy {
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            min_delay: Duration::from_millis(config.fetch_min_delay_ms),
            max_delay: Duration::from_millis(config.fetch_max_delay_ms),
            burst_probability: config.fetch_burst_probability,
            burst_multiplier: config.fetch_burst_multiplier,
            widen_factor: config.pacing_widen_factor,
            min_cap: Duration::from_millis(config.pacing_min_cap_ms),
            max_cap: Duration::from_millis(config.pacing_max_cap_ms),
        }
    }

    /// Sample the pause before the next request using the thread RNG.
    #[must_use]
    pub fn next_pause(&self) -> Pause {
        self.next_pause_with(&mut rand::rng())
    }

    /// Sample a pause: uniform in `[min, max]`, occasionally multiplied by the
    /// burst factor, then jittered by ±10%.
    pub fn next_pause_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Pause {
        let lo = self.min_delay.as_secs_f64();
        let hi = self.max_delay.as_secs_f64().max(lo);
        let mut secs = if hi > lo {
            rng.random_range(lo..=hi)
        } else {
            lo
        };

        let burst = self.burst_probability > 0.0 && rng.random::<f64>() < self.burst_probability;
        if burst {
            secs *= self.burst_multiplier;
        }
        secs *= rng.random_range((1.0 - JITTER)..=(1.0 + JITTER));

        Pause {
            delay: Duration::try_from_secs_f64(secs).unwrap_or(self.max_delay),
            burst,
        }
    }

    /// The policy to use after a rate-limit response: both bounds scaled by
    /// `widen_factor` and clamped to their caps.
    #[must_use]
    pub fn widened(&self) -> Self {
        let min_delay = scale_capped(self.min_delay, self.widen_factor, self.min_cap);
        let max_delay = scale_capped(self.max_delay, self.widen_factor, self.max_cap).max(min_delay);
        Self {
            min_delay,
            max_delay,
            ..*self
        }
    }
}

/// Whole milliseconds in `d`, saturating.
pub(crate) fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn scale_capped(delay: Duration, factor: f64, cap: Duration) -> Duration {
    let scaled = Duration::try_from_secs_f64(delay.as_secs_f64() * factor).unwrap_or(cap);
    // Never shrink a window that already sits above its cap.
    scaled.min(cap.max(delay))
}
