//! Parsing of the source's JSON listing, detail and reply-tree payloads.
//!
//! Listings have the shape `{"data": {"after": .., "children": [{"kind",
//! "data"}]}}`. Posts are `t3` things, comments `t1`, and `more` stubs stand in
//! for collapsed branches.

use chrono::{DateTime, Utc};
use radar_core::Reply;
use serde::Deserialize;
use serde_json::Value;

use crate::error::FetchError;

/// Host used for stored item URLs regardless of which mirror was fetched.
pub const CANONICAL_HOST: &str = "https://www.reddit.com";

/// Reply bodies shorter than this (after trimming) are discarded as noise.
const MIN_REPLY_CHARS: usize = 5;

const POST_KIND: &str = "t3";
const COMMENT_KIND: &str = "t1";

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    after: Option<String>,
    #[serde(default)]
    children: Vec<Thing>,
}

#[derive(Debug, Deserialize)]
struct Thing {
    kind: String,
    data: Value,
}

#[derive(Debug, Deserialize)]
struct PostData {
    name: String,
    title: String,
    #[serde(default)]
    selftext: String,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    score: i64,
    #[serde(default)]
    num_comments: i64,
    created_utc: f64,
    #[serde(default)]
    permalink: String,
    #[serde(default)]
    subreddit: String,
}

#[derive(Debug, Deserialize)]
struct CommentData {
    name: String,
    #[serde(default)]
    parent_id: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    score: i64,
}

/// A post as seen on a listing or detail page.
#[derive(Debug, Clone, PartialEq)]
pub struct PostSummary {
    /// Fullname, e.g. `t3_abc123`.
    pub id: String,
    pub category: String,
    pub url: String,
    pub title: String,
    pub body: String,
    pub author: Option<String>,
    pub score: i64,
    pub reply_count: i64,
    pub created_at: DateTime<Utc>,
}

impl PostSummary {
    /// The id without its kind prefix, as used in the reply-tree endpoint.
    #[must_use]
    pub fn short_id(&self) -> &str {
        self.id
            .strip_prefix("t3_")
            .unwrap_or(&self.id)
    }
}

/// One page of a category listing.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingPage {
    pub after: Option<String>,
    pub posts: Vec<PostSummary>,
    /// Entries that were posts but could not be parsed.
    pub skipped: usize,
}

/// Parse a category listing page.
///
/// Malformed individual posts are skipped and counted; only a malformed
/// envelope fails the page.
///
/// # Errors
///
/// Returns [`FetchError::Parse`] if the payload is not a listing.
pub fn parse_listing(value: &Value) -> Result<ListingPage, FetchError> {
    let listing = Listing::deserialize(value).map_err(|e| FetchError::Parse {
        context: "listing page".to_string(),
        reason: e.to_string(),
    })?;

    let mut posts = Vec::with_capacity(listing.data.children.len());
    let mut skipped = 0usize;
    for thing in listing.data.children {
        if thing.kind != POST_KIND {
            continue;
        }
        match post_from_value(thing.data) {
            Ok(post) => posts.push(post),
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed listing entry");
                skipped += 1;
            }
        }
    }

    Ok(ListingPage {
        after: listing.data.after.filter(|a| !a.is_empty()),
        posts,
        skipped,
    })
}

/// Parse a detail payload and return its post.
///
/// Accepts either a bare listing or the `[post listing, comment listing]` pair
/// returned by the reply-tree endpoint.
///
/// # Errors
///
/// Returns [`FetchError::Parse`] if no well-formed post is present.
pub fn parse_detail(value: &Value) -> Result<PostSummary, FetchError> {
    let listing_value = match value {
        Value::Array(parts) => parts.first().ok_or_else(|| FetchError::Parse {
            context: "detail".to_string(),
            reason: "empty payload array".to_string(),
        })?,
        other => other,
    };
    let listing = Listing::deserialize(listing_value).map_err(|e| FetchError::Parse {
        context: "detail".to_string(),
        reason: e.to_string(),
    })?;
    let thing = listing
        .data
        .children
        .into_iter()
        .find(|t| t.kind == POST_KIND)
        .ok_or_else(|| FetchError::Parse {
            context: "detail".to_string(),
            reason: "no post in payload".to_string(),
        })?;
    post_from_value(thing.data)
}

/// Flatten a reply tree into [`Reply`] records owned by `item_id`.
///
/// Walks the tree with an explicit stack, moving each subtree out of the
/// payload as it goes, so adversarially deep threads cannot exhaust the call
/// stack. Output is in depth-first document order. Deleted, removed and
/// near-empty replies are dropped; their children are kept.
///
/// # Errors
///
/// Returns [`FetchError::Parse`] if the payload holds no comment listing.
pub fn parse_replies(item_id: &str, value: Value) -> Result<Vec<Reply>, FetchError> {
    let mut comments = match value {
        Value::Array(mut parts) if parts.len() >= 2 => parts.swap_remove(1),
        Value::Array(_) => {
            return Err(FetchError::Parse {
                context: format!("replies for {item_id}"),
                reason: "payload has no comment listing".to_string(),
            })
        }
        other => other,
    };
    if !comments
        .pointer("/data/children")
        .is_some_and(Value::is_array)
    {
        return Err(FetchError::Parse {
            context: format!("replies for {item_id}"),
            reason: "comment listing has no children".to_string(),
        });
    }

    let mut replies = Vec::new();
    let mut stack: Vec<(Value, i32)> = take_children(&mut comments)
        .into_iter()
        .rev()
        .map(|t| (t, 0))
        .collect();

    while let Some((mut thing, depth)) = stack.pop() {
        if thing.get("kind").and_then(Value::as_str) != Some(COMMENT_KIND) {
            continue;
        }
        let mut data = thing.get_mut("data").map(Value::take).unwrap_or_default();
        if let Some(mut nested) = data.get_mut("replies").map(Value::take) {
            stack.extend(
                take_children(&mut nested)
                    .into_iter()
                    .rev()
                    .map(|t| (t, depth + 1)),
            );
        }

        let comment = match CommentData::deserialize(data) {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!(item_id, error = %e, "skipping malformed reply");
                continue;
            }
        };
        if !is_meaningful_body(&comment.body) {
            continue;
        }

        let parent_id = comment
            .parent_id
            .starts_with("t1_")
            .then(|| comment.parent_id.clone());
        replies.push(Reply {
            id: comment.name,
            item_id: item_id.to_owned(),
            parent_id,
            body: comment.body,
            author: normalize_author(comment.author),
            score: comment.score,
            depth,
        });
    }

    Ok(replies)
}

/// Move the `data.children` array out of a listing value. Anything else
/// (including the empty string used for leaf comments) yields no children.
fn take_children(listing: &mut Value) -> Vec<Value> {
    match listing.pointer_mut("/data/children").map(Value::take) {
        Some(Value::Array(children)) => children,
        _ => Vec::new(),
    }
}

fn is_meaningful_body(body: &str) -> bool {
    let trimmed = body.trim();
    !matches!(trimmed, "[deleted]" | "[removed]") && trimmed.chars().count() >= MIN_REPLY_CHARS
}

fn normalize_author(author: Option<String>) -> Option<String> {
    author.filter(|a| !a.is_empty() && a != "[deleted]")
}

fn post_from_value(value: Value) -> Result<PostSummary, FetchError> {
    let data = PostData::deserialize(value).map_err(|e| FetchError::Parse {
        context: "post".to_string(),
        reason: e.to_string(),
    })?;

    if !data.name.starts_with("t3_") {
        return Err(FetchError::Parse {
            context: "post".to_string(),
            reason: format!("unexpected post id '{}'", data.name),
        });
    }

    #[allow(clippy::cast_possible_truncation)]
    let created_at = DateTime::from_timestamp(data.created_utc as i64, 0).ok_or_else(|| {
        FetchError::Parse {
            context: data.name.clone(),
            reason: format!("created_utc {} out of range", data.created_utc),
        }
    })?;

    let url = if data.permalink.starts_with('/') {
        format!("{CANONICAL_HOST}{}", data.permalink)
    } else {
        format!("{CANONICAL_HOST}/comments/{}", data.name.trim_start_matches("t3_"))
    };

    Ok(PostSummary {
        id: data.name,
        category: data.subreddit,
        url,
        title: data.title,
        body: data.selftext,
        author: normalize_author(data.author),
        score: data.score,
        reply_count: data.num_comments.max(0),
        created_at,
    })
}

#[cfg(test)]
#[path = "listing_test.rs"]
mod tests;
