// ✅ Admission Pipeline - validate → exists → duplicate → evict → insert
//
// Each step short-circuits. The store is only touched after the name is
// well-formed and the feed source has confirmed it exists, and the
// duplicate/capacity/insert unit runs under one lock.

use crate::feed::{self, FeedSource, PostSummary};
use crate::store::{FollowOutcome, FollowStore};
use crate::subreddit::{FollowedSubreddit, SubredditName, ValidationError};
use serde::Serialize;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, info};

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("invalid subreddit name: {0}")]
    Validation(#[from] ValidationError),

    #[error("subreddit '{0}' does not exist")]
    NotFound(String),

    #[error("subreddit '{0}' is already followed")]
    Duplicate(String),

    #[error("follow store failure: {0:#}")]
    Storage(anyhow::Error),
}

impl AdmissionError {
    /// Stable reason code for callers that report rejections
    pub fn reason_code(&self) -> &'static str {
        match self {
            AdmissionError::Validation(_) => "validation",
            AdmissionError::NotFound(_) => "not_found",
            AdmissionError::Duplicate(_) => "duplicate",
            AdmissionError::Storage(_) => "storage",
        }
    }
}

impl From<anyhow::Error> for AdmissionError {
    fn from(e: anyhow::Error) -> Self {
        AdmissionError::Storage(e)
    }
}

/// A successful follow, plus whatever was evicted to make room
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Admission {
    pub followed: FollowedSubreddit,
    pub evicted: Vec<FollowedSubreddit>,
}

// ============================================================================
// FOLLOW SERVICE
// ============================================================================

pub struct FollowService {
    store: Mutex<Box<dyn FollowStore>>,
    source: Box<dyn FeedSource>,
}

impl FollowService {
    pub fn new(store: impl FollowStore + 'static, source: impl FeedSource + 'static) -> Self {
        FollowService {
            store: Mutex::new(Box::new(store)),
            source: Box::new(source),
        }
    }

    fn lock_store(&self) -> Result<MutexGuard<'_, Box<dyn FollowStore>>, AdmissionError> {
        self.store
            .lock()
            .map_err(|_| AdmissionError::Storage(anyhow::anyhow!("follow store lock poisoned")))
    }

    pub fn admit(&self, raw_name: &str) -> Result<Admission, AdmissionError> {
        let name = SubredditName::parse(raw_name)?;

        // Network call; the store lock is not held here
        if !self.source.exists(name.as_str()) {
            debug!(name = %name, "rejected: subreddit not found");
            return Err(AdmissionError::NotFound(name.to_string()));
        }

        let outcome = self.lock_store()?.follow_bounded(&name)?;

        match outcome {
            FollowOutcome::AlreadyFollowed => {
                debug!(name = %name, "rejected: already followed");
                Err(AdmissionError::Duplicate(name.to_string()))
            }
            FollowOutcome::Followed { record, evicted } => {
                info!(name = %record.name, evicted = evicted.len(), "admitted");
                Ok(Admission {
                    followed: record,
                    evicted,
                })
            }
        }
    }

    pub fn followed(&self) -> Result<Vec<FollowedSubreddit>, AdmissionError> {
        Ok(self.lock_store()?.list()?)
    }

    pub fn list_followed(&self) -> Result<Vec<String>, AdmissionError> {
        Ok(self
            .followed()?
            .into_iter()
            .map(|record| String::from(record.name))
            .collect())
    }

    /// Top post per followed subreddit, highest score first
    pub fn assemble_feed(&self) -> Result<Vec<PostSummary>, AdmissionError> {
        let names = self.list_followed()?;
        Ok(feed::assemble_feed(&names, self.source.as_ref()))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteFollowStore;
    use crate::store::MemoryFollowStore;
    use crate::CAPACITY;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Everything exists unless listed as missing; scores come from the map
    #[derive(Default)]
    struct FakeFeed {
        missing: Vec<String>,
        scores: HashMap<String, Option<i64>>,
        exists_calls: Arc<AtomicUsize>,
    }

    impl FakeFeed {
        fn missing(names: &[&str]) -> Self {
            FakeFeed {
                missing: names.iter().map(|n| n.to_string()).collect(),
                ..FakeFeed::default()
            }
        }
    }

    impl FeedSource for FakeFeed {
        fn exists(&self, name: &str) -> bool {
            self.exists_calls.fetch_add(1, Ordering::SeqCst);
            !self.missing.iter().any(|m| m == name)
        }

        fn top_post(&self, name: &str) -> PostSummary {
            match self.scores.get(name) {
                Some(score) => PostSummary {
                    subreddit: name.to_string(),
                    title: format!("Top of r/{}", name),
                    url: format!("https://www.reddit.com/r/{}", name),
                    score: *score,
                    created_at: feed::format_created(0),
                },
                None => PostSummary::default(),
            }
        }
    }

    fn service_with(names: &[&str]) -> FollowService {
        let service = FollowService::new(MemoryFollowStore::new(), FakeFeed::default());
        for name in names {
            service.admit(name).unwrap();
        }
        service
    }

    #[test]
    fn test_admit_below_capacity_no_eviction() {
        let service = service_with(&["A", "B", "C"]);

        let admission = service.admit("D").unwrap();

        assert_eq!(admission.followed.name.as_str(), "D");
        assert!(admission.evicted.is_empty());
        assert_eq!(service.list_followed().unwrap(), vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn test_admit_at_capacity_evicts_oldest() {
        let service = service_with(&["A", "B", "C", "D", "E"]);

        let admission = service.admit("F").unwrap();

        let evicted: Vec<_> = admission.evicted.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(evicted, vec!["A"]);
        assert_eq!(service.list_followed().unwrap(), vec!["B", "C", "D", "E", "F"]);
    }

    #[test]
    fn test_admit_trims_input() {
        let service = service_with(&[]);
        let admission = service.admit("  rust  ").unwrap();
        assert_eq!(admission.followed.name.as_str(), "rust");
    }

    #[test]
    fn test_duplicate_rejected_without_change() {
        let service = service_with(&["A", "B", "C", "D", "E"]);

        let err = service.admit("C").unwrap_err();

        assert!(matches!(err, AdmissionError::Duplicate(ref n) if n == "C"));
        assert_eq!(err.reason_code(), "duplicate");
        assert_eq!(service.list_followed().unwrap(), vec!["A", "B", "C", "D", "E"]);
    }

    #[test]
    fn test_duplicate_match_is_exact() {
        let service = service_with(&["rust"]);
        assert!(service.admit("Rust").is_ok());
        assert!(matches!(service.admit(" rust"), Err(AdmissionError::Duplicate(_))));
    }

    #[test]
    fn test_not_found_rejected_without_change() {
        let service = FollowService::new(MemoryFollowStore::new(), FakeFeed::missing(&["nope"]));
        service.admit("real").unwrap();

        let err = service.admit("nope").unwrap_err();

        assert!(matches!(err, AdmissionError::NotFound(ref n) if n == "nope"));
        assert_eq!(err.reason_code(), "not_found");
        assert_eq!(service.list_followed().unwrap(), vec!["real"]);
    }

    #[test]
    fn test_invalid_names_skip_lookup() {
        let feed = FakeFeed::default();
        let calls = Arc::clone(&feed.exists_calls);
        let service = FollowService::new(MemoryFollowStore::new(), feed);

        let empty = service.admit("   ").unwrap_err();
        let long = service.admit(&"x".repeat(181)).unwrap_err();

        assert!(matches!(empty, AdmissionError::Validation(ValidationError::Empty)));
        assert!(matches!(long, AdmissionError::Validation(ValidationError::TooLong { length: 181 })));
        assert_eq!(empty.reason_code(), "validation");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(service.list_followed().unwrap().is_empty());
    }

    #[test]
    fn test_existence_checked_before_duplicate() {
        // A followed name that has since disappeared reports NotFound
        let service = FollowService::new(MemoryFollowStore::new(), FakeFeed::missing(&["gone"]));
        service.lock_store().unwrap().insert(&SubredditName::parse("gone").unwrap()).unwrap();

        assert!(matches!(service.admit("gone"), Err(AdmissionError::NotFound(_))));
    }

    #[test]
    fn test_count_bounded_across_many_admissions() {
        let service = service_with(&[]);
        for i in 0..25 {
            service.admit(&format!("sub{}", i)).unwrap();
            assert!(service.list_followed().unwrap().len() <= CAPACITY);
        }
    }

    #[test]
    fn test_concurrent_admissions_stay_bounded() {
        let service = service_with(&[]);

        std::thread::scope(|scope| {
            for t in 0..8 {
                let service = &service;
                scope.spawn(move || {
                    for i in 0..10 {
                        service.admit(&format!("t{}-{}", t, i)).unwrap();
                    }
                });
            }
        });

        let followed = service.list_followed().unwrap();
        assert_eq!(followed.len(), CAPACITY);
    }

    #[test]
    fn test_concurrent_same_name_admitted_once() {
        let service = service_with(&[]);

        let results: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| service.admit("rust")))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(service.list_followed().unwrap(), vec!["rust"]);
    }

    #[test]
    fn test_assemble_feed_ranks_and_keeps_empty() {
        let mut feed = FakeFeed::default();
        feed.scores.insert("ten".into(), Some(10));
        feed.scores.insert("unscored".into(), None);
        feed.scores.insert("five".into(), Some(5));
        let service = FollowService::new(MemoryFollowStore::new(), feed);
        for name in ["ten", "unscored", "five", "broken"] {
            service.admit(name).unwrap();
        }

        let posts = service.assemble_feed().unwrap();

        let scores: Vec<_> = posts.iter().map(|p| p.score).collect();
        assert_eq!(scores, vec![Some(10), Some(5), None, None]);
        assert_eq!(posts[2].subreddit, "unscored");
        assert!(posts[3].is_empty());
        assert_eq!(service.list_followed().unwrap().len(), 4);
    }

    #[test]
    fn test_pipeline_over_sqlite_store() {
        let store = SqliteFollowStore::open_in_memory().unwrap();
        let service = FollowService::new(store, FakeFeed::default());

        for name in ["A", "B", "C", "D", "E"] {
            service.admit(name).unwrap();
        }
        let admission = service.admit("F").unwrap();

        assert_eq!(admission.evicted[0].name.as_str(), "A");
        assert_eq!(service.list_followed().unwrap(), vec!["B", "C", "D", "E", "F"]);
        assert!(matches!(service.admit("F"), Err(AdmissionError::Duplicate(_))));
    }
}
