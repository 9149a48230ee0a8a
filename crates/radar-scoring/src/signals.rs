//! Keyword signal detection.
//!
//! Matching is case-insensitive substring search on the raw text, with no
//! tokenization or stemming.

use radar_core::{DetectedSignals, IntentRule, ProductMatch, ProductProfile};

/// Detect general intent categories and per-product keyword matches in `text`.
///
/// An intent category is present if any of its phrases occurs. Products are
/// keyed by product id and listed only when at least one of their phrases
/// matched; the matched phrases themselves are recorded.
#[must_use]
pub fn detect(text: &str, intents: &[IntentRule], profiles: &[ProductProfile]) -> DetectedSignals {
    let haystack = text.to_lowercase();

    let general_intents = intents
        .iter()
        .filter(|rule| rule.phrases.iter().any(|p| contains_phrase(&haystack, p)))
        .map(|rule| rule.name.clone())
        .collect();

    let mut signals = DetectedSignals {
        general_intents,
        ..DetectedSignals::default()
    };
    for profile in profiles {
        let pain_points = matched(&haystack, &profile.pain_keywords);
        let intents = matched(&haystack, &profile.intent_keywords);
        if !pain_points.is_empty() || !intents.is_empty() {
            signals.product_matches.insert(
                profile.product_id.clone(),
                ProductMatch {
                    pain_points,
                    intents,
                },
            );
        }
    }
    signals
}

/// Sum of configured weights for every general intent detected.
#[must_use]
pub fn intent_bonus(signals: &DetectedSignals, intents: &[IntentRule]) -> f64 {
    signals
        .general_intents
        .iter()
        .filter_map(|name| intents.iter().find(|r| &r.name == name))
        .map(|r| r.weight)
        .sum()
}

fn matched(haystack: &str, phrases: &[String]) -> Vec<String> {
    phrases
        .iter()
        .filter(|p| contains_phrase(haystack, p))
        .cloned()
        .collect()
}

fn contains_phrase(haystack: &str, phrase: &str) -> bool {
    let needle = phrase.trim().to_lowercase();
    !needle.is_empty() && haystack.contains(&needle)
}
