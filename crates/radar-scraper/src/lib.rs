//! Resilient fetching and harvesting against the discussion source.
//!
//! The [`FetchClient`] survives a rate-limiting, fingerprinting source by
//! rotating browser identities, pacing every request with a human-like delay
//! and backing off on transient failures. The [`Harvester`] walks category
//! listings with it and writes normalized items through a
//! [`radar_core::RadarStore`].

pub mod client;
pub mod error;
pub mod harvester;
pub mod identity;
pub mod listing;
pub mod pacing;
pub mod stats;

pub use client::FetchClient;
pub use error::{FetchError, HarvestError};
pub use harvester::{HarvestProgress, HarvestReport, Harvester};
pub use listing::{parse_detail, parse_listing, parse_replies, ListingPage, PostSummary};
pub use pacing::{Pause, PacingPolicy};
pub use stats::{FetchStats, FetchStatsSnapshot};
