// Subreddit Follow - Core Library
// Bounded follow set with oldest-first eviction, plus a ranked top-post feed.
// Exposes all modules for use in CLI, API server, and tests

pub mod subreddit;
pub mod store;
pub mod db;
pub mod feed;
pub mod reddit;
pub mod admission;
pub mod config;

// Re-export commonly used types
pub use subreddit::{FollowedSubreddit, SubredditName, ValidationError, MAX_NAME_LEN};
pub use store::{FollowOutcome, FollowStore, MemoryFollowStore};
pub use db::{setup_database, get_recent_events, insert_event, Event, SqliteFollowStore};
pub use feed::{assemble_feed, parse_top_listing, rank_by_score, FeedSource, PostSummary};
pub use reddit::RedditClient;
pub use admission::{Admission, AdmissionError, FollowService};
pub use config::{AppConfig, RedditConfig};

/// Most subreddits followed at once
pub const CAPACITY: usize = 5;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
