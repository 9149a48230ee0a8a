use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Snapshot sentinel for an item that has never been scored.
pub const UNPROCESSED: i64 = -1;

/// Run error messages are cut to this many characters before persisting.
const MAX_ERROR_CHARS: usize = 200;

/// A harvested top-level discussion unit.
///
/// `processed_score` / `processed_replies` hold the counters observed at the
/// last successful global scoring pass, never the values seen at fetch time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Source fullname, e.g. `t3_abc123`. Immutable once assigned.
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

impl Item {
    /// `true` when the body was captured by a previous deep fetch.
    #[must_use]
    pub fn has_body(&self) -> bool {
        !self.body.trim().is_empty()
    }

    /// Text used for signal detection and item embeddings.
    #[must_use]
    pub fn scoring_text(&self) -> String {
        if self.body.is_empty() {
            self.title.clone()
        } else {
            format!("{} {}", self.title, self.body)
        }
    }
}

/// A nested comment under an [`Item`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub id: String,
    pub item_id: String,
    /// `None` for top-level replies.
    pub parent_id: Option<String>,
    pub body: String,
    pub author: Option<String>,
    pub score: i64,
    /// Distance from the item root; top-level replies have depth 0.
    pub depth: i32,
}

/// A tenant-owned description of what should be matched against items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductProfile {
    pub tenant_id: String,
    pub product_id: String,
    pub name: String,
    pub description: String,
    pub pain_keywords: Vec<String>,
    pub intent_keywords: Vec<String>,
    /// Categories this product should be scored against. Empty means all.
    pub categories: Vec<String>,
}

impl ProductProfile {
    /// The text embedded for semantic fit. Any change to the description or
    /// keyword lists changes this text and therefore invalidates the cached
    /// embedding.
    #[must_use]
    pub fn embedding_text(&self) -> String {
        let mut text = format!("{}: {}", self.name, self.description);
        if !self.pain_keywords.is_empty() {
            text.push_str("\nPain points: ");
            text.push_str(&self.pain_keywords.join(", "));
        }
        if !self.intent_keywords.is_empty() {
            text.push_str("\nIntents: ");
            text.push_str(&self.intent_keywords.join(", "));
        }
        text
    }

    #[must_use]
    pub fn targets_category(&self, category: &str) -> bool {
        self.categories.is_empty()
            || self
                .categories
                .iter()
                .any(|c| c.eq_ignore_ascii_case(category))
    }
}

/// Cached product embedding together with the text that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductEmbedding {
    pub tenant_id: String,
    pub product_id: String,
    pub vector: Vec<f32>,
    pub source_text: String,
}

/// Keyword matches for one product profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductMatch {
    pub pain_points: Vec<String>,
    pub intents: Vec<String>,
}

/// Output of the signal detector, stored verbatim on each analysis record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedSignals {
    pub general_intents: Vec<String>,
    /// Keyed by product id; products without any match are omitted.
    pub product_matches: BTreeMap<String, ProductMatch>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    Medium,
    High,
}

/// Structured output of a successful enrichment call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentResult {
    pub pain_point_summary: String,
    pub urgency: Urgency,
    /// Model-reported relevance/confidence on a 0-10 scale.
    pub relevance: f64,
    pub is_spam: bool,
    pub spam_indicators: Vec<String>,
}

/// Enrichment payload attached to an analysis record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Enrichment {
    /// Not requested in this pass (gate not met or product not selected).
    Absent,
    /// The call failed, timed out, or returned a malformed payload.
    Error { message: String },
    Result(EnrichmentResult),
}

impl Enrichment {
    /// Resolve the payload to store when `self` is written over `previous`.
    ///
    /// An absent payload never erases an existing one, and an error never
    /// replaces a good result.
    #[must_use]
    pub fn merged_over(self, previous: Option<&Enrichment>) -> Enrichment {
        match (self, previous) {
            (Enrichment::Absent, Some(prev)) => prev.clone(),
            (Enrichment::Error { .. }, Some(prev @ Enrichment::Result(_))) => prev.clone(),
            (next, _) => next,
        }
    }

    #[must_use]
    pub fn is_absent(&self) -> bool {
        matches!(self, Enrichment::Absent)
    }
}

/// Per-(item, product, tenant) scoring outcome. At most one per triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub item_id: String,
    pub product_id: String,
    pub tenant_id: String,
    pub relevance: f64,
    pub semantic_fit: f64,
    pub intensity: f64,
    pub signals: DetectedSignals,
    pub enrichment: Enrichment,
    /// Item score observed when this record was computed.
    pub snapshot_score: i64,
    /// Item reply count observed when this record was computed.
    pub snapshot_replies: i64,
    pub analyzed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl RunState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Running => "running",
            RunState::Succeeded => "succeeded",
            RunState::Failed => "failed",
            RunState::TimedOut => "timed_out",
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunState::Running)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunState::Running),
            "succeeded" => Ok(RunState::Succeeded),
            "failed" => Ok(RunState::Failed),
            "timed_out" => Ok(RunState::TimedOut),
            other => Err(format!("unknown run state '{other}'")),
        }
    }
}

/// Durable progress record for one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatus {
    pub run_id: Uuid,
    pub tenant_id: String,
    pub step: String,
    pub progress_percent: u8,
    pub state: RunState,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Cut an error message to the length persisted on run records.
#[must_use]
pub fn truncate_error(message: &str) -> String {
    if message.chars().count() <= MAX_ERROR_CHARS {
        return message.to_string();
    }
    let mut cut: String = message.chars().take(MAX_ERROR_CHARS - 3).collect();
    cut.push_str("...");
    cut
}
