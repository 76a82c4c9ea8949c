//! Post cache and scroll anchor persistence (`SQLite`)

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tokio::sync::Mutex;

use crate::error::Result;
use crate::models::{FeedEntry, ScrollAnchor};
use crate::paths;

/// Durable store of previously seen posts and the scroll anchor, per feed.
///
/// Best-effort: callers log failures and carry on.
#[async_trait]
pub trait PostCache: Send + Sync {
    /// Cached entries for a feed, newest first
    async fn load_cached_entries(&self, feed: &str) -> Result<Vec<FeedEntry>>;

    /// Store entries for a feed
    async fn cache_entries(&self, entries: &[FeedEntry], feed: &str) -> Result<()>;

    /// Saved scroll anchor, `None` if missing or unreadable
    async fn load_scroll_anchor(&self, feed: &str) -> Result<Option<ScrollAnchor>>;

    /// Persist the scroll anchor
    async fn save_scroll_anchor(&self, anchor: &ScrollAnchor, feed: &str) -> Result<()>;

    /// Forget the scroll anchor
    async fn clear_scroll_anchor(&self, feed: &str) -> Result<()>;
}

/// Database connection wrapper
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create the database at the default location
    pub fn open() -> anyhow::Result<Self> {
        let path = paths::database_path()?;
        Ok(Self::open_path(&path)?)
    }

    /// Open or create the database at a specific path
    pub fn open_path(path: &PathBuf) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| crate::Error::Storage(format!("create {}: {e}", parent.display())))?;
        }

        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Open a throwaway in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let db = Self {
            conn: Connection::open_in_memory()?,
        };
        db.init()?;
        Ok(db)
    }

    /// Initialize the database schema
    fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r"
            -- Post cache, one row per (feed, post URI)
            CREATE TABLE IF NOT EXISTS post_cache (
                feed TEXT NOT NULL,
                uri TEXT NOT NULL,
                created_at TEXT NOT NULL,
                entry_json TEXT NOT NULL,
                cached_at TEXT NOT NULL,
                PRIMARY KEY (feed, uri)
            );

            -- Last viewed post per feed
            CREATE TABLE IF NOT EXISTS scroll_anchors (
                feed TEXT PRIMARY KEY,
                uri TEXT NOT NULL,
                timestamp TEXT,
                saved_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_post_cache_feed_created ON post_cache(feed, created_at);
            CREATE INDEX IF NOT EXISTS idx_post_cache_cached_at ON post_cache(cached_at);
            ",
        )?;

        Ok(())
    }

    // ==================== Post Cache ====================

    /// Upsert entries for a feed, then keep only the newest `limit`
    pub fn cache_entries(&mut self, feed: &str, entries: &[FeedEntry], limit: usize) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r"INSERT OR REPLACE INTO post_cache (feed, uri, created_at, entry_json, cached_at)
                   VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for entry in entries {
                let json = serde_json::to_string(entry)?;
                stmt.execute(params![
                    feed,
                    entry.uri(),
                    entry.created_at().to_rfc3339(),
                    json,
                    now,
                ])?;
            }
        }
        tx.execute(
            r"DELETE FROM post_cache WHERE feed = ?1 AND uri NOT IN (
                SELECT uri FROM post_cache WHERE feed = ?1 ORDER BY created_at DESC LIMIT ?2
              )",
            params![feed, limit as i64],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Cached entries for a feed (most recent first)
    pub fn cached_entries(&self, feed: &str, limit: usize) -> Result<Vec<FeedEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT uri, entry_json FROM post_cache WHERE feed = ?1 ORDER BY created_at DESC LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![feed, limit as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (uri, json) = row?;
            match serde_json::from_str::<FeedEntry>(&json) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!("Skipping corrupt cache row {}: {}", uri, e),
            }
        }
        Ok(entries)
    }

    /// Clear old cache entries
    pub fn clear_old_cache(&self, max_age_hours: u64) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::hours(max_age_hours as i64);
        let count = self.conn.execute(
            "DELETE FROM post_cache WHERE cached_at < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        Ok(count)
    }

    // ==================== Scroll Anchors ====================

    /// Saved anchor for a feed. A corrupt timestamp reads back as `None`.
    pub fn scroll_anchor(&self, feed: &str) -> Result<Option<ScrollAnchor>> {
        let row = self
            .conn
            .query_row(
                "SELECT uri, timestamp FROM scroll_anchors WHERE feed = ?1",
                params![feed],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)),
            )
            .optional()?;

        Ok(row.and_then(|(uri, timestamp)| {
            if uri.trim().is_empty() {
                return None;
            }
            let timestamp = timestamp
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|dt| dt.with_timezone(&Utc));
            Some(ScrollAnchor { uri, timestamp })
        }))
    }

    /// Save the anchor for a feed
    pub fn save_scroll_anchor(&self, feed: &str, anchor: &ScrollAnchor) -> Result<()> {
        self.conn.execute(
            r"INSERT OR REPLACE INTO scroll_anchors (feed, uri, timestamp, saved_at)
               VALUES (?1, ?2, ?3, ?4)",
            params![
                feed,
                anchor.uri,
                anchor.timestamp.map(|dt| dt.to_rfc3339()),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Delete the anchor for a feed
    pub fn clear_scroll_anchor(&self, feed: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM scroll_anchors WHERE feed = ?1", params![feed])?;
        Ok(())
    }
}

/// [`PostCache`] backed by the `SQLite` [`Database`]
pub struct SqliteCache {
    db: Arc<Mutex<Database>>,
    limit: usize,
}

impl SqliteCache {
    /// Wrap a database, keeping at most `limit` entries per feed
    pub fn new(db: Database, limit: usize) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            limit,
        }
    }
}

#[async_trait]
impl PostCache for SqliteCache {
    async fn load_cached_entries(&self, feed: &str) -> Result<Vec<FeedEntry>> {
        self.db.lock().await.cached_entries(feed, self.limit)
    }

    async fn cache_entries(&self, entries: &[FeedEntry], feed: &str) -> Result<()> {
        self.db.lock().await.cache_entries(feed, entries, self.limit)
    }

    async fn load_scroll_anchor(&self, feed: &str) -> Result<Option<ScrollAnchor>> {
        self.db.lock().await.scroll_anchor(feed)
    }

    async fn save_scroll_anchor(&self, anchor: &ScrollAnchor, feed: &str) -> Result<()> {
        self.db.lock().await.save_scroll_anchor(feed, anchor)
    }

    async fn clear_scroll_anchor(&self, feed: &str) -> Result<()> {
        self.db.lock().await.clear_scroll_anchor(feed)
    }
}

/// Process-local [`PostCache`]; nothing survives a restart
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Vec<FeedEntry>>>,
    anchors: Mutex<HashMap<String, ScrollAnchor>>,
}

impl MemoryCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PostCache for MemoryCache {
    async fn load_cached_entries(&self, feed: &str) -> Result<Vec<FeedEntry>> {
        Ok(self
            .entries
            .lock()
            .await
            .get(feed)
            .cloned()
            .unwrap_or_default())
    }

    async fn cache_entries(&self, entries: &[FeedEntry], feed: &str) -> Result<()> {
        self.entries
            .lock()
            .await
            .insert(feed.to_string(), entries.to_vec());
        Ok(())
    }

    async fn load_scroll_anchor(&self, feed: &str) -> Result<Option<ScrollAnchor>> {
        Ok(self.anchors.lock().await.get(feed).cloned())
    }

    async fn save_scroll_anchor(&self, anchor: &ScrollAnchor, feed: &str) -> Result<()> {
        self.anchors
            .lock()
            .await
            .insert(feed.to_string(), anchor.clone());
        Ok(())
    }

    async fn clear_scroll_anchor(&self, feed: &str) -> Result<()> {
        self.anchors.lock().await.remove(feed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Post;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn entry(uri: &str, secs: i64) -> FeedEntry {
        FeedEntry::new(Post::new(uri, Utc.timestamp_opt(secs, 0).unwrap()))
    }

    #[test]
    fn test_database_init() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sqlite");
        let _db = Database::open_path(&path).unwrap();
        // Should create without error
    }

    #[test]
    fn test_cache_roundtrip_is_newest_first_and_trimmed() {
        let mut db = Database::open_in_memory().unwrap();
        let entries = vec![entry("a", 100), entry("b", 300), entry("c", 200)];
        db.cache_entries("following", &entries, 2).unwrap();

        let cached = db.cached_entries("following", 10).unwrap();
        let uris: Vec<_> = cached.iter().map(FeedEntry::uri).collect();
        assert_eq!(uris, vec!["b", "c"]);

        // Other feeds are untouched
        assert!(db.cached_entries("feed:x", 10).unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_cache_rows_are_skipped() {
        let mut db = Database::open_in_memory().unwrap();
        db.cache_entries("following", &[entry("a", 100)], 10).unwrap();
        db.conn
            .execute(
                "INSERT INTO post_cache VALUES ('following', 'bad', '2024-01-01T00:00:00Z', '{not json', '2024-01-01T00:00:00Z')",
                [],
            )
            .unwrap();

        let cached = db.cached_entries("following", 10).unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].uri(), "a");
    }

    #[test]
    fn test_scroll_anchor_roundtrip_and_clear() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.scroll_anchor("following").unwrap(), None);

        let anchor = ScrollAnchor::new("at://x/app.bsky.feed.post/1", Some(Utc.timestamp_opt(500, 0).unwrap()));
        db.save_scroll_anchor("following", &anchor).unwrap();
        assert_eq!(db.scroll_anchor("following").unwrap(), Some(anchor));

        db.clear_scroll_anchor("following").unwrap();
        assert_eq!(db.scroll_anchor("following").unwrap(), None);
    }

    #[test]
    fn test_corrupt_anchor_timestamp_reads_as_none() {
        let db = Database::open_in_memory().unwrap();
        db.conn
            .execute(
                "INSERT INTO scroll_anchors VALUES ('following', 'at://x/p/1', 'yesterday-ish', '2024-01-01T00:00:00Z')",
                [],
            )
            .unwrap();

        let anchor = db.scroll_anchor("following").unwrap().unwrap();
        assert_eq!(anchor.uri, "at://x/p/1");
        assert_eq!(anchor.timestamp, None);
    }

    #[tokio::test]
    async fn test_sqlite_cache_implements_post_cache() {
        let dir = tempdir().unwrap();
        let db = Database::open_path(&dir.path().join("cache.sqlite")).unwrap();
        let cache = SqliteCache::new(db, 50);

        cache
            .cache_entries(&[entry("a", 1), entry("b", 2)], "following")
            .await
            .unwrap();
        let loaded = cache.load_cached_entries("following").await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].uri(), "b");
    }
}
