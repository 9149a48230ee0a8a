/// Engagement intensity from reply count and popularity score.
///
/// `3 * log10(replies + 1) + log10(max(score, 0) + 1)`. Negative inputs are
/// clamped to zero, so the result is never negative and is exactly `0.0` for
/// an item with no replies and no score. Growth is logarithmic in both inputs.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn community_intensity(reply_count: i64, score: i64) -> f64 {
    let replies = reply_count.max(0) as f64;
    let score = score.max(0) as f64;
    3.0 * (replies + 1.0).log10() + (score + 1.0).log10()
}
