//! `SQLite`-backed cache store.
//!
//! One row per cache key, with a column per context tag so that tag
//! invalidation is a single indexed `DELETE`. The schema is versioned through
//! a `schema_migrations` table.

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::store::{CacheEntry, CacheStats, CacheStore, TagFilter};
use crate::core::cache_key::CacheKey;
use crate::core::context::Context;
use crate::error::{ClientError, Result};

const CACHE_MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        sql: include_str!("../../migrations/001_cache_entries.sql"),
    },
    Migration {
        version: 2,
        sql: include_str!("../../migrations/002_cache_written_at_index.sql"),
    },
];

const SELECT_COLUMNS: &str = "cache_key, endpoint, value_json, written_at_ms, ttl_seconds, \
     user_id, institute_id, class_id, subject_id, role";

#[derive(Debug, Clone, Copy)]
struct Migration {
    version: i32,
    sql: &'static str,
}

/// Persistent cache store.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Create or open a cache database at `path`.
    ///
    /// # Errors
    /// Returns an error if the parent directory cannot be created, the
    /// database cannot be opened, or migrations fail.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut conn = Connection::open(path)
            .map_err(|e| ClientError::Store(format!("open {}: {e}", path.display())))?;
        run_migrations(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrations fail.
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()
            .map_err(|e| ClientError::Store(format!("open in-memory db: {e}")))?;
        run_migrations(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        f(&conn)
    }
}

impl CacheStore for SqliteStore {
    fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        self.with_conn(|conn| {
            let raw = conn
                .query_row(
                    &format!("SELECT {SELECT_COLUMNS} FROM cache_entries WHERE cache_key = ?1"),
                    [key.as_str()],
                    RawRow::from_row,
                )
                .optional()?;
            raw.map(RawRow::into_entry).transpose()
        })
    }

    fn set(&self, entry: CacheEntry) -> Result<()> {
        let value_json = serde_json::to_string(&entry.value)?;
        let ctx = &entry.context;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO cache_entries (cache_key, endpoint, value_json, \
                 written_at_ms, ttl_seconds, user_id, institute_id, class_id, subject_id, role) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    entry.key.as_str(),
                    entry.endpoint,
                    value_json,
                    entry.written_at.timestamp_millis(),
                    i64::try_from(entry.ttl_seconds).unwrap_or(i64::MAX),
                    ctx.user_id,
                    ctx.institute_id,
                    ctx.class_id,
                    ctx.subject_id,
                    ctx.role,
                ],
            )?;
            Ok(())
        })
    }

    fn remove_prefix(&self, prefix: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM cache_entries WHERE substr(cache_key, 1, length(?1)) = ?1",
                [prefix],
            )?;
            Ok(removed as u64)
        })
    }

    fn remove_matching(&self, filter: &TagFilter) -> Result<u64> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM cache_entries WHERE (?1 IS NULL OR user_id = ?1) \
                 AND (?2 IS NULL OR institute_id = ?2) \
                 AND (?3 IS NULL OR class_id = ?3) \
                 AND (?4 IS NULL OR subject_id = ?4)",
                params![
                    filter.user_id,
                    filter.institute_id,
                    filter.class_id,
                    filter.subject_id,
                ],
            )?;
            Ok(removed as u64)
        })
    }

    fn clear(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let removed = conn.execute("DELETE FROM cache_entries", [])?;
            Ok(removed as u64)
        })
    }

    fn stats(&self) -> Result<CacheStats> {
        let rows = self.with_conn(|conn| {
            let mut stmt =
                conn.prepare_cached(&format!("SELECT {SELECT_COLUMNS} FROM cache_entries"))?;
            let rows = stmt
                .query_map([], RawRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })?;

        let now = Utc::now();
        let mut stats = CacheStats::default();
        for raw in rows {
            stats.record(&raw.into_entry()?, now);
        }
        Ok(stats)
    }

    fn purge_expired(&self, retention_factor: f64) -> Result<u64> {
        let now_ms = Utc::now().timestamp_millis();
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM cache_entries \
                 WHERE written_at_ms + CAST(ttl_seconds * 1000 * ?2 AS INTEGER) <= ?1",
                params![now_ms, retention_factor.max(1.0)],
            )?;
            Ok(removed as u64)
        })
    }
}

struct RawRow {
    key: String,
    endpoint: String,
    value_json: String,
    written_at_ms: i64,
    ttl_seconds: i64,
    context: Context,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            key: row.get(0)?,
            endpoint: row.get(1)?,
            value_json: row.get(2)?,
            written_at_ms: row.get(3)?,
            ttl_seconds: row.get(4)?,
            context: Context {
                user_id: row.get(5)?,
                institute_id: row.get(6)?,
                class_id: row.get(7)?,
                subject_id: row.get(8)?,
                role: row.get(9)?,
            },
        })
    }

    fn into_entry(self) -> Result<CacheEntry> {
        let written_at = DateTime::<Utc>::from_timestamp_millis(self.written_at_ms)
            .ok_or_else(|| ClientError::Store(format!("bad timestamp for {}", self.key)))?;
        Ok(CacheEntry {
            key: CacheKey::from_raw(self.key),
            endpoint: self.endpoint,
            value: serde_json::from_str(&self.value_json)?,
            written_at,
            ttl_seconds: u64::try_from(self.ttl_seconds).unwrap_or(0),
            context: self.context,
        })
    }
}

/// Run schema migrations, returning the latest applied version.
///
/// # Errors
/// Returns an error if any migration fails.
pub fn run_migrations(conn: &mut Connection) -> Result<i32> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (\
            version INTEGER PRIMARY KEY,\
            applied_at TEXT DEFAULT (datetime('now'))\
        );",
    )
    .map_err(|e| ClientError::Store(format!("create schema_migrations: {e}")))?;

    let mut current: i32 = conn
        .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
            row.get::<_, Option<i32>>(0)
        })
        .map_err(|e| ClientError::Store(format!("read schema version: {e}")))?
        .unwrap_or(0);

    for migration in CACHE_MIGRATIONS {
        if migration.version > current {
            let tx = conn.transaction()?;
            tx.execute_batch(migration.sql).map_err(|e| {
                ClientError::Store(format!("apply migration {}: {e}", migration.version))
            })?;
            tx.execute(
                "INSERT INTO schema_migrations (version) VALUES (?1)",
                [migration.version],
            )?;
            tx.commit()?;
            current = migration.version;
        }
    }

    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cache_key::{build_key, endpoint_prefix};
    use crate::core::context::QueryParams;
    use chrono::Duration;
    use serde_json::json;
    use tempfile::TempDir;

    fn entry(endpoint: &str, page: i64, context: Context) -> CacheEntry {
        let params = QueryParams::new().with("page", page);
        let key = build_key(endpoint, Some(&params), &context);
        CacheEntry::new(key, json!({"page": page, "items": ["a", "b"]}), 300, context)
    }

    #[test]
    fn migrations_are_idempotent() {
        let mut conn = Connection::open_in_memory().expect("open");
        assert_eq!(run_migrations(&mut conn).expect("first"), 2);
        assert_eq!(run_migrations(&mut conn).expect("second"), 2);
        let count: i32 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
            .expect("count");
        assert_eq!(count, 2);
    }

    #[test]
    fn round_trips_entry_with_context() {
        let store = SqliteStore::open_in_memory().expect("open");
        let e = entry(
            "/attendance",
            3,
            Context::new().with_user("U1").with_class("C1").with_role("teacher"),
        );
        store.set(e.clone()).expect("set");

        let loaded = store.get(&e.key).expect("get").expect("present");
        assert_eq!(loaded.value, e.value);
        assert_eq!(loaded.context, e.context);
        assert_eq!(loaded.endpoint, "/attendance");
        assert_eq!(
            loaded.written_at.timestamp_millis(),
            e.written_at.timestamp_millis()
        );
    }

    #[test]
    fn set_replaces_existing_key() {
        let store = SqliteStore::open_in_memory().expect("open");
        let mut e = entry("/x", 1, Context::new());
        store.set(e.clone()).expect("set");
        e.value = json!({"v": 2});
        store.set(e.clone()).expect("replace");
        assert_eq!(store.get(&e.key).expect("get").expect("present").value, json!({"v": 2}));
        assert_eq!(store.stats().expect("stats").total_entries, 1);
    }

    #[test]
    fn tag_and_prefix_removal() {
        let store = SqliteStore::open_in_memory().expect("open");
        store.set(entry("/classes", 1, Context::new().with_institute("I1"))).expect("set");
        store.set(entry("/classes", 2, Context::new().with_institute("I1"))).expect("set");
        store.set(entry("/classes", 1, Context::new().with_institute("I2"))).expect("set");
        store.set(entry("/subjects", 1, Context::new().with_user("U1"))).expect("set");

        assert_eq!(store.clear_institute_cache("I1").expect("clear"), 2);
        assert_eq!(store.clear_user_cache("U1").expect("clear"), 1);
        assert_eq!(store.remove_prefix(&endpoint_prefix("/classes")).expect("prefix"), 1);
        assert_eq!(store.stats().expect("stats").total_entries, 0);
    }

    #[test]
    fn prefix_with_like_wildcards_is_literal() {
        let store = SqliteStore::open_in_memory().expect("open");
        store.set(entry("/a_b", 1, Context::new())).expect("set");
        store.set(entry("/axb", 1, Context::new())).expect("set");
        assert_eq!(store.remove_prefix(&endpoint_prefix("/a_b")).expect("prefix"), 1);
    }

    #[test]
    fn purge_and_stats() {
        let store = SqliteStore::open_in_memory().expect("open");
        let mut old = entry("/a", 1, Context::new());
        old.written_at = Utc::now() - Duration::seconds(1_000);
        store.set(old).expect("set");
        store.set(entry("/a", 2, Context::new())).expect("set");

        let stats = store.stats().expect("stats");
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.expired_entries, 1);

        assert_eq!(store.purge_expired(2.0).expect("purge"), 1);
        assert_eq!(store.stats().expect("stats").total_entries, 1);
    }

    #[test]
    fn persists_across_reopen() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("nested").join("cache.sqlite");
        let e = entry("/payments", 1, Context::new().with_institute("I9"));
        {
            let store = SqliteStore::open(&path).expect("open");
            store.set(e.clone()).expect("set");
        }
        let store = SqliteStore::open(&path).expect("reopen");
        assert!(store.get(&e.key).expect("get").is_some());
    }
}
