//! Hybrid relevance scoring and the enrichment gate.

use radar_core::{DetectedSignals, Item, ProductProfile, ScoringConfig};

use crate::intensity::community_intensity;
use crate::semantic::SemanticEngine;
use crate::signals::{detect, intent_bonus};

/// Weight of semantic fit in the relevance score.
pub const FIT_WEIGHT: f64 = 15.0;

/// `fit * 15 + intent_bonus + intensity`.
#[must_use]
pub fn relevance(semantic_fit: f64, intent_bonus: f64, intensity: f64) -> f64 {
    semantic_fit * FIT_WEIGHT + intent_bonus + intensity
}

/// Cost gate in front of the enrichment call.
///
/// Both thresholds must be met. High relevance with near-zero fit is usually
/// off-topic virality; the fit floor filters it out.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentGate {
    pub min_relevance: f64,
    pub min_fit: f64,
    /// When set, only this product may be enriched in the pass.
    pub only_product: Option<String>,
}

impl EnrichmentGate {
    #[must_use]
    pub fn from_scoring(scoring: &ScoringConfig, only_product: Option<String>) -> Self {
        Self {
            min_relevance: scoring.min_relevance,
            min_fit: scoring.min_fit,
            only_product,
        }
    }

    #[must_use]
    pub fn admits(&self, product_id: &str, relevance: f64, semantic_fit: f64) -> bool {
        if self
            .only_product
            .as_deref()
            .is_some_and(|only| only != product_id)
        {
            return false;
        }
        relevance >= self.min_relevance && semantic_fit >= self.min_fit
    }
}

/// Scores for one item against one product.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductScore {
    pub product_id: String,
    pub relevance: f64,
    pub semantic_fit: f64,
    pub intensity: f64,
    pub intent_bonus: f64,
    pub enrich: bool,
}

/// Score `item` against every profile that targets its category.
///
/// Signals and intensity are computed once per item; fit and the gate
/// decision per product.
pub async fn score_item(
    item: &Item,
    item_vector: &[f32],
    profiles: &[ProductProfile],
    engine: &SemanticEngine,
    scoring: &ScoringConfig,
    gate: &EnrichmentGate,
) -> (DetectedSignals, Vec<ProductScore>) {
    let targeted: Vec<ProductProfile> = profiles
        .iter()
        .filter(|p| p.targets_category(&item.category))
        .cloned()
        .collect();
    let signals = detect(&item.scoring_text(), &scoring.intents, &targeted);
    let bonus = intent_bonus(&signals, &scoring.intents);
    let intensity = community_intensity(item.reply_count, item.score);

    let mut scores = Vec::with_capacity(targeted.len());
    for profile in &targeted {
        let fit = engine
            .fit(item_vector, &profile.tenant_id, &profile.product_id)
            .await;
        let total = relevance(fit, bonus, intensity);
        scores.push(ProductScore {
            product_id: profile.product_id.clone(),
            relevance: total,
            semantic_fit: fit,
            intensity,
            intent_bonus: bonus,
            enrich: gate.admits(&profile.product_id, total, fit),
        });
    }
    (signals, scores)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> EnrichmentGate {
        EnrichmentGate {
            min_relevance: 10.0,
            min_fit: 0.35,
            only_product: None,
        }
    }

    #[test]
    fn relevance_formula() {
        assert!((relevance(0.5, 5.0, 2.0) - 14.5).abs() < 1e-12);
        assert_eq!(relevance(0.0, 0.0, 0.0), 0.0);
    }

    #[test]
    fn gate_requires_both_thresholds() {
        let g = gate();
        assert!(g.admits("p", 10.0, 0.35), "thresholds are inclusive");
        assert!(!g.admits("p", 9.99, 0.9));
        assert!(!g.admits("p", 40.0, 0.1));
    }

    #[test]
    fn gate_restricts_to_single_product() {
        let g = EnrichmentGate {
            only_product: Some("profit".to_string()),
            ..gate()
        };
        assert!(g.admits("profit", 20.0, 0.8));
        assert!(!g.admits("ship", 20.0, 0.8));
    }

    #[test]
    fn gate_from_scoring_config() {
        let g = EnrichmentGate::from_scoring(&ScoringConfig::default(), None);
        assert_eq!(g, gate());
    }
}
