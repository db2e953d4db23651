use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rusqlite_migration::{Migrations, M};

use crate::app::{Result, StashError};
use crate::domain::{ArticleContent, CachedState, SavedItem};
use crate::store::{CacheStore, ChangeNotifier, ListChange, Listener, SavedList, Subscription};

pub struct SqliteStore {
    conn: Mutex<Connection>,
    notifier: ChangeNotifier,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
            notifier: ChangeNotifier::new(),
        };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
            notifier: ChangeNotifier::new(),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        let migrations = Migrations::new(vec![M::up(include_str!(
            "../../migrations/001-initial/up.sql"
        ))]);

        let mut conn = self.conn()?;
        migrations
            .to_latest(&mut conn)
            .map_err(|_| StashError::Database(rusqlite::Error::InvalidQuery))?;

        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| {
            StashError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(1),
                Some(e.to_string()),
            ))
        })
    }

    fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| s.parse::<DateTime<Utc>>().ok())
    }

    fn saved_item_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SavedItem> {
        Ok(SavedItem {
            key: row.get(0)?,
            title: row.get(1)?,
            cached_state: CachedState::parse(&row.get::<_, String>(2)?),
            saved_at: row
                .get::<_, String>(3)
                .ok()
                .and_then(|s| Self::parse_datetime(&s))
                .unwrap_or_else(Utc::now),
        })
    }

    /// Add a key to the saved list. Returns false if it was already saved.
    ///
    /// Subscribers are notified after the row is committed and the connection
    /// lock is released.
    pub fn save(&self, item: &SavedItem) -> Result<bool> {
        let inserted = {
            let conn = self.conn()?;
            conn.execute(
                "INSERT OR IGNORE INTO saved_items (key, title, cached_state, saved_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    item.key,
                    item.title,
                    item.cached_state.as_str(),
                    item.saved_at.to_rfc3339()
                ],
            )?
        };

        if inserted > 0 {
            self.notifier.notify(&ListChange::added(item.key.clone()));
        }
        Ok(inserted > 0)
    }

    /// Remove a key from the saved list. Cached content is left to the engine.
    pub fn unsave(&self, key: &str) -> Result<bool> {
        let deleted = {
            let conn = self.conn()?;
            conn.execute("DELETE FROM saved_items WHERE key = ?1", params![key])?
        };

        if deleted > 0 {
            self.notifier.notify(&ListChange::removed(key));
        }
        Ok(deleted > 0)
    }

    pub fn get_saved_item(&self, key: &str) -> Result<Option<SavedItem>> {
        let conn = self.conn()?;

        let result = conn
            .query_row(
                "SELECT key, title, cached_state, saved_at FROM saved_items WHERE key = ?1",
                params![key],
                Self::saved_item_from_row,
            )
            .optional()?;

        Ok(result)
    }

    pub fn get_saved_items(&self) -> Result<Vec<SavedItem>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT key, title, cached_state, saved_at
             FROM saved_items ORDER BY saved_at DESC, key",
        )?;

        let items = stmt
            .query_map([], Self::saved_item_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(items)
    }
}

impl SavedList for SqliteStore {
    fn current_keys(&self) -> Result<BTreeSet<String>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare("SELECT key FROM saved_items")?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<BTreeSet<_>, _>>()?;

        Ok(keys)
    }

    fn subscribe(&self, listener: Listener) -> Subscription {
        self.notifier.subscribe(listener)
    }

    fn cached_state(&self, key: &str) -> Result<CachedState> {
        let conn = self.conn()?;

        let state = conn
            .query_row(
                "SELECT cached_state FROM saved_items WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        Ok(state
            .map(|s| CachedState::parse(&s))
            .unwrap_or(CachedState::Unknown))
    }

    fn set_cached_state(&self, key: &str, state: CachedState) -> Result<()> {
        let conn = self.conn()?;

        conn.execute(
            "UPDATE saved_items SET cached_state = ?1 WHERE key = ?2",
            params![state.as_str(), key],
        )?;

        Ok(())
    }
}

impl CacheStore for SqliteStore {
    fn exists(&self, key: &str) -> Result<bool> {
        let conn = self.conn()?;

        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM articles WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )?;

        Ok(count > 0)
    }

    fn get(&self, key: &str) -> Result<Option<ArticleContent>> {
        let conn = self.conn()?;

        let result = conn
            .query_row(
                "SELECT key, content, fetched_at FROM articles WHERE key = ?1",
                params![key],
                |row| {
                    Ok(ArticleContent {
                        key: row.get(0)?,
                        html: row.get(1)?,
                        fetched_at: row
                            .get::<_, String>(2)
                            .ok()
                            .and_then(|s| Self::parse_datetime(&s))
                            .unwrap_or_else(Utc::now),
                    })
                },
            )
            .optional()?;

        Ok(result)
    }

    fn put(&self, content: &ArticleContent) -> Result<()> {
        let conn = self.conn()?;

        conn.execute(
            "INSERT INTO articles (key, content, fetched_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET content = ?2, fetched_at = ?3",
            params![content.key, content.html, content.fetched_at.to_rfc3339()],
        )?;

        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let conn = self.conn()?;

        conn.execute("DELETE FROM articles WHERE key = ?1", params![key])?;
        Ok(())
    }
}
