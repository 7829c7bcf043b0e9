use crate::store::{FollowOutcome, FollowStore};
use crate::subreddit::{FollowedSubreddit, SubredditName};
use crate::CAPACITY;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

/// Event for audit trail (every follow and eviction is recorded)
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }

    fn for_record(event_type: &str, record: &FollowedSubreddit) -> Self {
        Event::new(
            event_type,
            "subreddit",
            record.name.as_str(),
            serde_json::json!({
                "followed_at": encode_time(&record.followed_at),
            }),
            "admission",
        )
    }
}

pub const EVENT_FOLLOWED: &str = "subreddit_followed";
pub const EVENT_EVICTED: &str = "subreddit_evicted";

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Followed subreddits (at most CAPACITY rows)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS followed_subreddits (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT UNIQUE NOT NULL,
            followed_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_followed_at ON followed_subreddits(followed_at, id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

// Fixed-width RFC 3339 so lexical order in SQLite matches time order
fn encode_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn decode_time(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// A `followed_subreddits` row before its name and timestamp are checked
struct StoredRow {
    id: i64,
    name: String,
    followed_at: String,
}

impl StoredRow {
    fn decode(&self) -> Result<FollowedSubreddit> {
        let name = SubredditName::parse(&self.name)
            .with_context(|| format!("stored row {} has an invalid name", self.id))?;
        let followed_at = DateTime::parse_from_rfc3339(&self.followed_at)
            .with_context(|| format!("stored row {} has an invalid followed_at", self.id))?
            .with_timezone(&Utc);

        Ok(FollowedSubreddit::at(name, followed_at))
    }
}

// ============================================================================
// Row-level operations (shared by plain calls and the follow transaction)
// ============================================================================

fn stored_rows(conn: &Connection) -> Result<Vec<StoredRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, followed_at
         FROM followed_subreddits
         ORDER BY followed_at ASC, id ASC",
    )?;

    let rows = stmt
        .query_map([], |row| {
            Ok(StoredRow {
                id: row.get(0)?,
                name: row.get(1)?,
                followed_at: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Decodable rows, oldest first, paired with their row id. Rows that fail
/// to decode are logged and left out.
fn decoded_rows(conn: &Connection) -> Result<Vec<(i64, FollowedSubreddit)>> {
    let records = stored_rows(conn)?
        .into_iter()
        .filter_map(|row| match row.decode() {
            Ok(record) => Some((row.id, record)),
            Err(e) => {
                warn!("skipping unreadable follow row: {:#}", e);
                None
            }
        })
        .collect();

    Ok(records)
}

fn list_records(conn: &Connection) -> Result<Vec<FollowedSubreddit>> {
    Ok(decoded_rows(conn)?
        .into_iter()
        .map(|(_, record)| record)
        .collect())
}

/// Delete rows that can no longer be decoded, by id. Each removal is audited
/// as an eviction with the raw stored name.
fn purge_unreadable_rows(conn: &Connection) -> Result<usize> {
    let mut purged = 0;

    for row in stored_rows(conn)? {
        let Err(e) = row.decode() else {
            continue;
        };

        warn!("removing unreadable follow row: {:#}", e);
        conn.execute("DELETE FROM followed_subreddits WHERE id = ?1", params![row.id])?;
        insert_event(
            conn,
            &Event::new(
                EVENT_EVICTED,
                "subreddit",
                &row.name,
                serde_json::json!({
                    "followed_at": row.followed_at,
                    "reason": "unreadable",
                }),
                "admission",
            ),
        )?;
        purged += 1;
    }

    Ok(purged)
}

fn count_records(conn: &Connection) -> Result<usize> {
    let count: i64 =
        conn.query_row("SELECT COUNT(*) FROM followed_subreddits", [], |row| row.get(0))?;

    Ok(count as usize)
}

fn contains_name(conn: &Connection, name: &SubredditName) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM followed_subreddits WHERE name = ?1",
            params![name.as_str()],
            |row| row.get(0),
        )
        .optional()?;

    Ok(found.is_some())
}

fn oldest_record(conn: &Connection) -> Result<Option<(i64, FollowedSubreddit)>> {
    Ok(decoded_rows(conn)?.into_iter().next())
}

fn evict_oldest_record(conn: &Connection) -> Result<FollowedSubreddit> {
    let Some((row_id, record)) = oldest_record(conn)? else {
        bail!("evict_oldest called on an empty follow store");
    };

    conn.execute("DELETE FROM followed_subreddits WHERE id = ?1", params![row_id])?;
    insert_event(conn, &Event::for_record(EVENT_EVICTED, &record))?;

    Ok(record)
}

fn insert_record(conn: &Connection, name: &SubredditName) -> Result<FollowedSubreddit> {
    let count = count_records(conn)?;
    if count >= CAPACITY {
        bail!("follow store is full ({} records)", count);
    }
    if contains_name(conn, name)? {
        bail!("'{}' is already followed", name);
    }

    let record = FollowedSubreddit::new(name.clone());
    conn.execute(
        "INSERT INTO followed_subreddits (name, followed_at) VALUES (?1, ?2)",
        params![record.name.as_str(), encode_time(&record.followed_at)],
    )?;
    insert_event(conn, &Event::for_record(EVENT_FOLLOWED, &record))?;

    Ok(record)
}

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Most recent events first
pub fn get_recent_events(conn: &Connection, limit: usize) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         ORDER BY id DESC
         LIMIT ?1",
    )?;

    let events = stmt
        .query_map(params![limit as i64], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: decode_time(1, &timestamp_str)?,
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e))
                })?,
                actor: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

// ============================================================================
// SQLITE FOLLOW STORE
// ============================================================================

/// Durable follow store backed by a single SQLite connection
pub struct SqliteFollowStore {
    conn: Connection,
}

impl SqliteFollowStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database at {}", db_path.display()))?;
        debug!(path = %db_path.display(), "opened follow database");
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self> {
        setup_database(&conn).context("Failed to set up follow database schema")?;
        Ok(SqliteFollowStore { conn })
    }

    pub fn recent_events(&self, limit: usize) -> Result<Vec<Event>> {
        get_recent_events(&self.conn, limit)
    }
}

impl FollowStore for SqliteFollowStore {
    fn list(&self) -> Result<Vec<FollowedSubreddit>> {
        list_records(&self.conn)
    }

    fn count(&self) -> Result<usize> {
        count_records(&self.conn)
    }

    fn contains(&self, name: &SubredditName) -> Result<bool> {
        contains_name(&self.conn, name)
    }

    fn oldest(&self) -> Result<Option<FollowedSubreddit>> {
        Ok(oldest_record(&self.conn)?.map(|(_, record)| record))
    }

    fn evict_oldest(&mut self) -> Result<FollowedSubreddit> {
        let tx = self.conn.transaction()?;
        purge_unreadable_rows(&tx)?;
        let record = evict_oldest_record(&tx)?;
        tx.commit()?;
        Ok(record)
    }

    fn insert(&mut self, name: &SubredditName) -> Result<FollowedSubreddit> {
        let tx = self.conn.transaction()?;
        let record = insert_record(&tx, name)?;
        tx.commit()?;
        Ok(record)
    }

    /// IMMEDIATE takes the write lock up front, so another process sharing
    /// the database file cannot interleave between the checks and the insert.
    fn follow_bounded(&mut self, name: &SubredditName) -> Result<FollowOutcome> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        if contains_name(&tx, name)? {
            return Ok(FollowOutcome::AlreadyFollowed);
        }

        // Unreadable rows are gone before capacity is counted
        purge_unreadable_rows(&tx)?;

        let mut evicted = Vec::new();
        while count_records(&tx)? >= CAPACITY {
            let old = evict_oldest_record(&tx)?;
            info!(name = %old.name, "evicted oldest followed subreddit");
            evicted.push(old);
        }

        let record = insert_record(&tx, name)?;
        tx.commit()?;
        info!(name = %record.name, "followed subreddit");

        Ok(FollowOutcome::Followed { record, evicted })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn name(s: &str) -> SubredditName {
        SubredditName::parse(s).unwrap()
    }

    fn seed(store: &SqliteFollowStore, entries: &[(&str, i64)]) {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        for (n, offset) in entries {
            store
                .conn
                .execute(
                    "INSERT INTO followed_subreddits (name, followed_at) VALUES (?1, ?2)",
                    params![n, encode_time(&(base + Duration::seconds(*offset)))],
                )
                .unwrap();
        }
    }

    fn names(store: &SqliteFollowStore) -> Vec<String> {
        store
            .list()
            .unwrap()
            .into_iter()
            .map(|r| r.name.to_string())
            .collect()
    }

    #[test]
    fn test_setup_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        setup_database(&conn).unwrap();
    }

    #[test]
    fn test_insert_list_contains() {
        let mut store = SqliteFollowStore::open_in_memory().unwrap();

        store.insert(&name("rust")).unwrap();
        store.insert(&name("programming")).unwrap();

        assert_eq!(store.count().unwrap(), 2);
        assert!(store.contains(&name("rust")).unwrap());
        assert!(!store.contains(&name("RUST")).unwrap());
        assert_eq!(names(&store), vec!["rust", "programming"]);
    }

    #[test]
    fn test_oldest_orders_by_followed_at() {
        let store = SqliteFollowStore::open_in_memory().unwrap();
        seed(&store, &[("late", 30), ("early", 10), ("middle", 20)]);

        assert_eq!(store.oldest().unwrap().unwrap().name.as_str(), "early");
        assert_eq!(names(&store), vec!["early", "middle", "late"]);
    }

    #[test]
    fn test_oldest_tie_goes_to_first_inserted() {
        let store = SqliteFollowStore::open_in_memory().unwrap();
        seed(&store, &[("first", 5), ("second", 5)]);

        assert_eq!(store.oldest().unwrap().unwrap().name.as_str(), "first");
    }

    #[test]
    fn test_evict_empty_store_errors() {
        let mut store = SqliteFollowStore::open_in_memory().unwrap();
        assert!(store.oldest().unwrap().is_none());
        assert!(store.evict_oldest().is_err());
    }

    #[test]
    fn test_follow_bounded_evicts_oldest() {
        let mut store = SqliteFollowStore::open_in_memory().unwrap();
        seed(&store, &[("A", 1), ("B", 2), ("C", 3), ("D", 4), ("E", 5)]);

        let outcome = store.follow_bounded(&name("F")).unwrap();

        match outcome {
            FollowOutcome::Followed { record, evicted } => {
                assert_eq!(record.name.as_str(), "F");
                assert_eq!(evicted.len(), 1);
                assert_eq!(evicted[0].name.as_str(), "A");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(names(&store), vec!["B", "C", "D", "E", "F"]);
    }

    #[test]
    fn test_follow_bounded_duplicate_leaves_store_untouched() {
        let mut store = SqliteFollowStore::open_in_memory().unwrap();
        seed(&store, &[("A", 1), ("B", 2)]);

        let outcome = store.follow_bounded(&name("B")).unwrap();

        assert_eq!(outcome, FollowOutcome::AlreadyFollowed);
        assert_eq!(store.count().unwrap(), 2);
        assert!(store.recent_events(10).unwrap().is_empty());
    }

    #[test]
    fn test_follow_and_eviction_are_audited() {
        let mut store = SqliteFollowStore::open_in_memory().unwrap();
        seed(&store, &[("A", 1), ("B", 2), ("C", 3), ("D", 4), ("E", 5)]);

        store.follow_bounded(&name("F")).unwrap();

        let events = store.recent_events(10).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, EVENT_FOLLOWED);
        assert_eq!(events[0].entity_id, "F");
        assert_eq!(events[1].event_type, EVENT_EVICTED);
        assert_eq!(events[1].entity_id, "A");
        assert_eq!(events[1].actor, "admission");
    }

    fn seed_bad_timestamp(store: &SqliteFollowStore, n: &str) {
        store
            .conn
            .execute(
                "INSERT INTO followed_subreddits (name, followed_at) VALUES (?1, 'yesterday')",
                params![n],
            )
            .unwrap();
    }

    #[test]
    fn test_unreadable_rows_are_skipped_on_read() {
        let store = SqliteFollowStore::open_in_memory().unwrap();
        let too_long = "x".repeat(crate::subreddit::MAX_NAME_LEN + 1);
        seed(&store, &[("", 1), (too_long.as_str(), 2), ("rust", 3)]);
        seed_bad_timestamp(&store, "golang");

        assert_eq!(names(&store), vec!["rust"]);
        assert_eq!(store.oldest().unwrap().unwrap().name.as_str(), "rust");
    }

    #[test]
    fn test_follow_bounded_recovers_from_unreadable_rows() {
        let mut store = SqliteFollowStore::open_in_memory().unwrap();
        let too_long = "x".repeat(crate::subreddit::MAX_NAME_LEN + 1);
        seed(&store, &[(too_long.as_str(), 1), ("", 2), ("A", 3), ("B", 4), ("C", 5)]);
        seed_bad_timestamp(&store, "D");

        let outcome = store.follow_bounded(&name("F")).unwrap();

        // Three unreadable rows made room; no valid record was evicted
        match outcome {
            FollowOutcome::Followed { record, evicted } => {
                assert_eq!(record.name.as_str(), "F");
                assert!(evicted.is_empty());
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(store.count().unwrap(), 4);
        assert_eq!(names(&store), vec!["A", "B", "C", "F"]);

        let purged: Vec<_> = store
            .recent_events(10)
            .unwrap()
            .into_iter()
            .filter(|e| e.event_type == EVENT_EVICTED)
            .collect();
        assert_eq!(purged.len(), 3);
        assert!(purged.iter().all(|e| e.data["reason"] == "unreadable"));
    }

    #[test]
    fn test_follow_bounded_stays_bounded_after_purge() {
        let mut store = SqliteFollowStore::open_in_memory().unwrap();
        seed(&store, &[("", 1), ("A", 2), ("B", 3), ("C", 4), ("D", 5), ("E", 6)]);

        store.follow_bounded(&name("F")).unwrap();

        assert_eq!(store.count().unwrap(), CAPACITY);
        assert_eq!(names(&store), vec!["B", "C", "D", "E", "F"]);
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = std::env::temp_dir().join(format!("follow-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("follows.db");

        {
            let mut store = SqliteFollowStore::open(&path).unwrap();
            store.follow_bounded(&name("rust")).unwrap();
            store.follow_bounded(&name("golang")).unwrap();
        }

        let store = SqliteFollowStore::open(&path).unwrap();
        assert_eq!(names(&store), vec!["rust", "golang"]);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
