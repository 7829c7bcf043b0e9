// 📰 Feed - top post per followed subreddit, ranked by score
//
// The feed source is a black box: it answers "does this subreddit exist?"
// and "what is its top post?". It never fails outward. A bad answer
// degrades to `false` or to an empty summary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

// ============================================================================
// POST SUMMARY
// ============================================================================

/// Display-ready view of one post. `Default` is the all-empty summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostSummary {
    pub subreddit: String,
    pub title: String,
    pub url: String,
    pub score: Option<i64>,
    pub created_at: String,
}

impl PostSummary {
    pub fn is_empty(&self) -> bool {
        *self == PostSummary::default()
    }
}

// ============================================================================
// FEED SOURCE
// ============================================================================

pub trait FeedSource: Send + Sync {
    /// True only when the subreddit was confirmed to exist
    fn exists(&self, name: &str) -> bool;

    /// Top post, or `PostSummary::default()` when nothing usable came back
    fn top_post(&self, name: &str) -> PostSummary;
}

// ============================================================================
// LISTING PARSER
// ============================================================================

/// Render epoch seconds the way the feed page shows them
pub fn format_created(epoch_secs: i64) -> String {
    DateTime::<Utc>::from_timestamp(epoch_secs, 0)
        .unwrap_or_default()
        .format("%Y-%m-%d %H:%M:%S UTC")
        .to_string()
}

/// Pull the first post out of a Reddit listing (`data.children[0].data`).
///
/// A listing without children, or whose first post has no title, yields
/// the empty summary.
pub fn parse_top_listing(listing: &Value) -> PostSummary {
    let Some(post) = listing
        .pointer("/data/children/0/data")
        .filter(|post| post.is_object())
    else {
        debug!("listing has no children");
        return PostSummary::default();
    };

    let Some(title) = post.get("title").and_then(Value::as_str) else {
        debug!("top post has no title");
        return PostSummary::default();
    };

    let text = |key: &str| {
        post.get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    let score = post.get("score").and_then(|score| {
        score
            .as_i64()
            .or_else(|| score.as_f64().map(|f| f.round() as i64))
    });

    let created_utc = post
        .get("created_utc")
        .and_then(Value::as_f64)
        .map(|secs| secs as i64)
        .unwrap_or(0);

    PostSummary {
        subreddit: text("subreddit"),
        title: title.to_string(),
        url: text("url"),
        score,
        created_at: format_created(created_utc),
    }
}

// ============================================================================
// ASSEMBLY
// ============================================================================

/// Stable sort, highest score first. Posts without a score go last.
pub fn rank_by_score(mut posts: Vec<PostSummary>) -> Vec<PostSummary> {
    // Option orders None below every Some, so reversing puts None last
    posts.sort_by(|a, b| b.score.cmp(&a.score));
    posts
}

/// One top post per name, ranked. Never mutates anything.
pub fn assemble_feed<S, I>(names: I, source: &S) -> Vec<PostSummary>
where
    S: FeedSource + ?Sized,
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let posts = names
        .into_iter()
        .map(|name| source.top_post(name.as_ref()))
        .collect();

    rank_by_score(posts)
}

// ============================================================================
// TESTS
// ============================================================================
