// 📦 Follow Store - capacity-bounded set of followed subreddits
//
// The store owns its records. The only growth path is `insert`, the only
// shrink path is `evict_oldest`. `follow_bounded` is the unit the admission
// pipeline runs under its lock: duplicate check, evict while full, insert.

use crate::subreddit::{FollowedSubreddit, SubredditName};
use crate::CAPACITY;
use anyhow::{bail, Result};
use tracing::info;

// ============================================================================
// OUTCOME
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum FollowOutcome {
    /// A record with the same name already exists; nothing changed
    AlreadyFollowed,

    /// The name was stored, after evicting `evicted` (oldest first)
    Followed {
        record: FollowedSubreddit,
        evicted: Vec<FollowedSubreddit>,
    },
}

// ============================================================================
// STORE CONTRACT
// ============================================================================

pub trait FollowStore: Send {
    /// All current records, oldest first
    fn list(&self) -> Result<Vec<FollowedSubreddit>>;

    fn count(&self) -> Result<usize>;

    fn contains(&self, name: &SubredditName) -> Result<bool>;

    /// Record with the smallest `followed_at`; earliest inserted wins ties
    fn oldest(&self) -> Result<Option<FollowedSubreddit>>;

    /// Remove and return `oldest()`. Errors on an empty store.
    fn evict_oldest(&mut self) -> Result<FollowedSubreddit>;

    /// Stamp and store a new record.
    /// Errors if the store is full or the name is already present.
    fn insert(&mut self, name: &SubredditName) -> Result<FollowedSubreddit>;

    fn follow_bounded(&mut self, name: &SubredditName) -> Result<FollowOutcome> {
        if self.contains(name)? {
            return Ok(FollowOutcome::AlreadyFollowed);
        }

        let mut evicted = Vec::new();
        while self.count()? >= CAPACITY {
            let old = self.evict_oldest()?;
            info!(name = %old.name, "evicted oldest followed subreddit");
            evicted.push(old);
        }

        let record = self.insert(name)?;
        info!(name = %record.name, "followed subreddit");

        Ok(FollowOutcome::Followed { record, evicted })
    }
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

/// Vec-backed store. Records stay in insertion order.
#[derive(Debug, Default)]
pub struct MemoryFollowStore {
    records: Vec<FollowedSubreddit>,
}

impl MemoryFollowStore {
    pub fn new() -> Self {
        MemoryFollowStore {
            records: Vec::new(),
        }
    }

    fn oldest_index(&self) -> Option<usize> {
        // min_by_key keeps the first of equal keys, i.e. the earliest inserted
        self.records
            .iter()
            .enumerate()
            .min_by_key(|(_, record)| record.followed_at)
            .map(|(i, _)| i)
    }
}

impl FollowStore for MemoryFollowStore {
    fn list(&self) -> Result<Vec<FollowedSubreddit>> {
        // Stable, so equal stamps stay in insertion order
        let mut records = self.records.clone();
        records.sort_by_key(|record| record.followed_at);
        Ok(records)
    }

    fn count(&self) -> Result<usize> {
        Ok(self.records.len())
    }

    fn contains(&self, name: &SubredditName) -> Result<bool> {
        Ok(self.records.iter().any(|record| &record.name == name))
    }

    fn oldest(&self) -> Result<Option<FollowedSubreddit>> {
        Ok(self.oldest_index().map(|i| self.records[i].clone()))
    }

    fn evict_oldest(&mut self) -> Result<FollowedSubreddit> {
        match self.oldest_index() {
            Some(i) => Ok(self.records.remove(i)),
            None => bail!("evict_oldest called on an empty follow store"),
        }
    }

    fn insert(&mut self, name: &SubredditName) -> Result<FollowedSubreddit> {
        if self.records.len() >= CAPACITY {
            bail!("follow store is full ({} records)", self.records.len());
        }
        if self.contains(name)? {
            bail!("'{}' is already followed", name);
        }

        let record = FollowedSubreddit::new(name.clone());
        self.records.push(record.clone());
        Ok(record)
    }
}

// ============================================================================
// TESTS
// ============================================================================
