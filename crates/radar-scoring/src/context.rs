//! Token-bounded context assembly for the enrichment call.
//!
//! Priority under the budget: title, then body (truncated with a marker),
//! then replies by descending score until the next one would not fit. When
//! an item has replies, `reply_reserve` tokens are held back from the body.
//! Every budget check counts the fully assembled text, so the result never
//! exceeds `max_tokens` under the configured counter.

use std::sync::Arc;

use radar_core::{Item, Reply};
use tiktoken_rs::CoreBPE;

use crate::error::ScoringError;

const BODY_MARKER: &str = "... [Post body truncated]";
const TITLE_MARKER: &str = "...";
const REPLIES_HEADER: &str = "\n\nCOMMUNITY COMMENTS:\n";
const UNKNOWN_AUTHOR: &str = "[deleted]";

pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// Exact counts with the enrichment model's BPE.
pub struct TiktokenCounter {
    bpe: CoreBPE,
}

impl TiktokenCounter {
    /// # Errors
    ///
    /// Returns [`ScoringError::Tokenizer`] if no encoding is known for `model`.
    pub fn for_model(model: &str) -> Result<Self, ScoringError> {
        let bpe = tiktoken_rs::get_bpe_from_model(&model.to_ascii_lowercase())
            .map_err(|e| ScoringError::Tokenizer(format!("{model}: {e}")))?;
        Ok(Self { bpe })
    }
}

impl TokenCounter for TiktokenCounter {
    fn count(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }
}

/// Conservative fallback: one token per three characters, rounded up.
#[derive(Debug, Default, Clone, Copy)]
pub struct CharApproxCounter;

impl TokenCounter for CharApproxCounter {
    fn count(&self, text: &str) -> usize {
        text.chars().count().div_ceil(3)
    }
}

/// The model's tokenizer if tiktoken knows it, otherwise the char approximation.
#[must_use]
pub fn counter_for_model(model: &str) -> Arc<dyn TokenCounter> {
    match TiktokenCounter::for_model(model) {
        Ok(counter) => Arc::new(counter),
        Err(e) => {
            tracing::warn!(model, error = %e, "falling back to character-based token estimate");
            Arc::new(CharApproxCounter)
        }
    }
}

pub struct ContextBuilder {
    counter: Arc<dyn TokenCounter>,
    max_tokens: usize,
    reply_reserve: usize,
}

impl ContextBuilder {
    #[must_use]
    pub fn new(counter: Arc<dyn TokenCounter>, max_tokens: usize, reply_reserve: usize) -> Self {
        Self {
            counter,
            max_tokens,
            reply_reserve,
        }
    }

    #[must_use]
    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    #[must_use]
    pub fn count(&self, text: &str) -> usize {
        self.counter.count(text)
    }

    #[must_use]
    pub fn build(&self, item: &Item, replies: &[Reply]) -> String {
        let author = item.author.as_deref().unwrap_or(UNKNOWN_AUTHOR);
        let head = header(&item.title, author);
        if !self.fits(&head, self.max_tokens) {
            return self.truncated_header(&item.title, author);
        }

        let text = if item.body.trim().is_empty() {
            head
        } else {
            self.with_body(head, &item.body, !replies.is_empty())
        };
        self.with_replies(text, replies)
    }

    fn fits(&self, text: &str, budget: usize) -> bool {
        self.counter.count(text) <= budget
    }

    fn with_body(&self, head: String, body: &str, reserve_for_replies: bool) -> String {
        let reserve = if reserve_for_replies {
            self.reply_reserve
        } else {
            0
        };
        let body_budget = self.max_tokens.saturating_sub(reserve);

        let full = format!("{head}BODY: {body}");
        if self.fits(&full, body_budget) {
            return full;
        }

        let truncated = |chars: usize| {
            let end = byte_offset(body, chars);
            format!("{head}BODY: {}{BODY_MARKER}", body[..end].trim_end())
        };
        // A reserve larger than what is left yields to the hard budget.
        let budget = if self.fits(&truncated(0), body_budget) {
            body_budget
        } else if self.fits(&truncated(0), self.max_tokens) {
            self.max_tokens
        } else {
            return head;
        };

        let keep = largest_fitting(body.chars().count(), |n| {
            self.fits(&truncated(n), budget)
        });
        truncated(keep)
    }

    fn with_replies(&self, mut text: String, replies: &[Reply]) -> String {
        let mut ordered: Vec<&Reply> = replies.iter().collect();
        ordered.sort_by(|a, b| b.score.cmp(&a.score));

        let mut opened = false;
        for reply in ordered {
            let line = format!(
                "COMMENT BY u/{}: {}\n",
                reply.author.as_deref().unwrap_or(UNKNOWN_AUTHOR),
                reply.body.trim()
            );
            let candidate = if opened {
                format!("{text}{line}")
            } else {
                format!("{text}{REPLIES_HEADER}{line}")
            };
            if !self.fits(&candidate, self.max_tokens) {
                break;
            }
            text = candidate;
            opened = true;
        }
        text
    }

    /// Only reached when the title alone overflows the budget.
    fn truncated_header(&self, title: &str, author: &str) -> String {
        let candidate = |chars: usize| {
            let end = byte_offset(title, chars);
            header(&format!("{}{TITLE_MARKER}", &title[..end]), author)
        };
        if !self.fits(&candidate(0), self.max_tokens) {
            return String::new();
        }
        let keep = largest_fitting(title.chars().count(), |n| {
            self.fits(&candidate(n), self.max_tokens)
        });
        candidate(keep)
    }
}

fn header(title: &str, author: &str) -> String {
    format!("TITLE: {title}\nAUTHOR: {author}\n")
}

/// Byte offset just past the first `chars` characters of `s`.
fn byte_offset(s: &str, chars: usize) -> usize {
    s.char_indices().nth(chars).map_or(s.len(), |(i, _)| i)
}

/// Largest `n` in `0..=upper` with `fits(n)`, given `fits(0)`.
///
/// Binary search; the returned value always satisfies `fits` even if the
/// predicate is not perfectly monotonic.
fn largest_fitting(upper: usize, fits: impl Fn(usize) -> bool) -> usize {
    let (mut lo, mut hi) = (0usize, upper);
    while lo < hi {
        let mid = lo + (hi - lo).div_ceil(2);
        if fits(mid) {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    lo
}

#[cfg(test)]
#[path = "context_test.rs"]
mod tests;
