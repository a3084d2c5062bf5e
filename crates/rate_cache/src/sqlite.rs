//! SQLite-backed cache and settings store.
//!
//! A single connection behind a mutex; every statement runs on the blocking
//! pool so callers on the async runtime never stall on disk I/O.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::Error;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::store::{
    sort_counts, CacheEntry, CacheStats, CacheStore, EndpointCount, RecentEntry, SettingsStore,
};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS api_cache (
        endpoint TEXT PRIMARY KEY,
        payload TEXT NOT NULL,
        ttl_seconds INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_api_cache_updated_at ON api_cache(updated_at);
    CREATE TABLE IF NOT EXISTS settings (
        name TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        updated_at INTEGER NOT NULL
    );
";

fn storage(e: impl std::fmt::Display) -> Error {
    Error::Storage(e.to_string())
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    clock: Arc<dyn Clock>,
}

impl SqliteStore {
    /// Open (or create) the database file, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        Self::open_with_clock(path, Arc::new(SystemClock))
    }

    pub fn open_with_clock(path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Result<Self, Error> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(storage)?;

        // WAL so the stats reader does not block cache writers
        conn.execute_batch("PRAGMA journal_mode=WAL;").map_err(storage)?;
        conn.execute_batch(SCHEMA).map_err(storage)?;

        info!(path = %path.display(), "Cache store opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            clock,
        })
    }

    pub fn open_in_memory(clock: Arc<dyn Clock>) -> Result<Self, Error> {
        let conn = Connection::open_in_memory().map_err(storage)?;
        conn.execute_batch(SCHEMA).map_err(storage)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            clock,
        })
    }

    async fn with_conn<R, F>(&self, f: F) -> Result<R, Error>
    where
        R: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<R> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| storage("connection mutex poisoned"))?;
            f(&guard).map_err(storage)
        })
        .await
        .map_err(storage)?
    }
}

#[async_trait]
impl CacheStore for SqliteStore {
    async fn get(&self, endpoint: &str) -> Result<Option<CacheEntry>, Error> {
        let key = endpoint.to_string();
        let row = self
            .with_conn(move |conn| {
                conn.prepare_cached(
                    "SELECT endpoint, payload, ttl_seconds, updated_at FROM api_cache WHERE endpoint = ?1",
                )?
                .query_row([key], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                })
                .optional()
            })
            .await?;

        match row {
            Some((endpoint, payload, ttl, updated_at)) => Ok(Some(CacheEntry {
                endpoint,
                payload: serde_json::from_str(&payload)?,
                ttl_seconds: ttl.max(0) as u64,
                updated_at: from_millis(updated_at),
            })),
            None => Ok(None),
        }
    }

    async fn put(&self, endpoint: &str, payload: Value, ttl_seconds: u64) -> Result<(), Error> {
        let key = endpoint.to_string();
        let body = serde_json::to_string(&payload)?;
        let now = self.clock.now().timestamp_millis();
        let ttl = ttl_seconds.min(i64::MAX as u64) as i64;

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO api_cache (endpoint, payload, ttl_seconds, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(endpoint) DO UPDATE SET payload = ?2, ttl_seconds = ?3, updated_at = ?4",
                params![key, body, ttl, now],
            )
        })
        .await?;
        debug!(endpoint, "Cache entry written");
        Ok(())
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, Error> {
        let cutoff_ms = cutoff.timestamp_millis();
        let deleted = self
            .with_conn(move |conn| {
                conn.execute("DELETE FROM api_cache WHERE updated_at < ?1", [cutoff_ms])
            })
            .await?;
        Ok(deleted as u64)
    }

    async fn delete_group(&self, group: &str) -> Result<u64, Error> {
        let exact = group.to_string();
        let prefix = format!("{}:", group);
        let prefix_len = prefix.chars().count() as i64;
        let deleted = self
            .with_conn(move |conn| {
                conn.execute(
                    "DELETE FROM api_cache WHERE endpoint = ?1 OR substr(endpoint, 1, ?2) = ?3",
                    params![exact, prefix_len, prefix],
                )
            })
            .await?;
        Ok(deleted as u64)
    }

    async fn stats(&self, recent_limit: usize) -> Result<CacheStats, Error> {
        let limit = recent_limit as i64;
        let (total, groups, recent) = self
            .with_conn(move |conn| {
                let total: i64 =
                    conn.query_row("SELECT COUNT(*) FROM api_cache", [], |row| row.get(0))?;

                let mut stmt = conn.prepare(
                    "SELECT CASE WHEN instr(endpoint, ':') > 0
                                 THEN substr(endpoint, 1, instr(endpoint, ':') - 1)
                                 ELSE endpoint END AS grp,
                            COUNT(*)
                     FROM api_cache GROUP BY grp",
                )?;
                let groups = stmt
                    .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;

                let mut stmt = conn.prepare(
                    "SELECT endpoint, ttl_seconds, updated_at FROM api_cache
                     ORDER BY updated_at DESC, endpoint LIMIT ?1",
                )?;
                let recent = stmt
                    .query_map([limit], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, i64>(2)?,
                        ))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;

                Ok((total, groups, recent))
            })
            .await?;

        let now = self.clock.now();
        let mut by_endpoint: Vec<EndpointCount> = groups
            .into_iter()
            .map(|(endpoint, count)| EndpointCount {
                endpoint,
                count: count.max(0) as u64,
            })
            .collect();
        sort_counts(&mut by_endpoint);

        let recent_cache = recent
            .into_iter()
            .map(|(endpoint, ttl, updated_at)| {
                let updated_at = from_millis(updated_at);
                RecentEntry {
                    endpoint,
                    updated_at,
                    ttl_seconds: ttl.max(0) as u64,
                    age_seconds: (now - updated_at).num_seconds().max(0),
                }
            })
            .collect();

        Ok(CacheStats {
            total_entries: total.max(0) as u64,
            by_endpoint,
            recent_cache,
        })
    }
}

#[async_trait]
impl SettingsStore for SqliteStore {
    async fn get_setting(&self, name: &str) -> Result<Option<Value>, Error> {
        let key = name.to_string();
        let raw = self
            .with_conn(move |conn| {
                conn.query_row("SELECT value FROM settings WHERE name = ?1", [key], |row| {
                    row.get::<_, String>(0)
                })
                .optional()
            })
            .await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn put_setting(&self, name: &str, value: Value) -> Result<(), Error> {
        let key = name.to_string();
        let body = serde_json::to_string(&value)?;
        let now = self.clock.now().timestamp_millis();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO settings (name, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(name) DO UPDATE SET value = ?2, updated_at = ?3",
                params![key, body, now],
            )
        })
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ManualClock;
    use chrono::Duration;
    use serde_json::json;

    fn store_at(clock: &Arc<ManualClock>) -> SqliteStore {
        SqliteStore::open_in_memory(clock.clone()).expect("in-memory store")
    }

    #[tokio::test]
    async fn test_put_then_get_round_trip() {
        let clock = Arc::new(ManualClock::default());
        let store = store_at(&clock);
        let payload = json!([{"id": "1", "name": "BALI"}, {"id": "2", "name": "ACEH"}]);

        store.put("provinces", payload.clone(), 60).await.expect("put");
        let entry = store.get("provinces").await.expect("get").expect("present");

        assert_eq!(entry.payload, payload);
        assert_eq!(entry.ttl_seconds, 60);
        assert_eq!(entry.updated_at.timestamp_millis(), clock.now().timestamp_millis());
        assert!(store.get("cities:province=1").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn test_put_overwrites_in_place() {
        let clock = Arc::new(ManualClock::default());
        let store = store_at(&clock);

        store.put("provinces", json!([1]), 60).await.expect("put");
        clock.advance(Duration::seconds(30));
        store.put("provinces", json!([2]), 90).await.expect("put");

        let stats = store.stats(10).await.expect("stats");
        assert_eq!(stats.total_entries, 1);
        let entry = store.get("provinces").await.expect("get").expect("present");
        assert_eq!(entry.payload, json!([2]));
        assert_eq!(entry.ttl_seconds, 90);
        assert_eq!(entry.updated_at.timestamp_millis(), clock.now().timestamp_millis());
    }

    #[tokio::test]
    async fn test_delete_older_than_and_group() {
        let clock = Arc::new(ManualClock::default());
        let store = store_at(&clock);

        store.put("cities:province=1", json!([]), 60).await.expect("put");
        clock.advance(Duration::days(10));
        store.put("cities:province=2", json!([]), 60).await.expect("put");
        store.put("citiesx", json!([]), 60).await.expect("put");
        store.put("provinces", json!([]), 60).await.expect("put");

        let cutoff = clock.now() - Duration::days(5);
        assert_eq!(store.delete_older_than(cutoff).await.expect("sweep"), 1);
        assert!(store.get("cities:province=1").await.expect("get").is_none());

        assert_eq!(store.delete_group("cities").await.expect("clear"), 1);
        assert!(store.get("citiesx").await.expect("get").is_some());
        assert!(store.get("provinces").await.expect("get").is_some());
    }

    #[tokio::test]
    async fn test_stats_groups_and_recent() {
        let clock = Arc::new(ManualClock::default());
        let store = store_at(&clock);

        store.put("provinces", json!([]), 60).await.expect("put");
        for id in 1..=3 {
            clock.advance(Duration::seconds(1));
            store
                .put(&format!("cities:province={}", id), json!([]), 60)
                .await
                .expect("put");
        }
        clock.advance(Duration::seconds(5));

        let stats = store.stats(2).await.expect("stats");
        assert_eq!(stats.total_entries, 4);
        assert_eq!(
            stats.by_endpoint,
            vec![
                EndpointCount { endpoint: "cities".into(), count: 3 },
                EndpointCount { endpoint: "provinces".into(), count: 1 },
            ]
        );
        assert_eq!(stats.recent_cache.len(), 2);
        assert_eq!(stats.recent_cache[0].endpoint, "cities:province=3");
        assert_eq!(stats.recent_cache[0].age_seconds, 5);
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("cache.db");

        {
            let store = SqliteStore::open(&path).expect("open");
            store.put("provinces", json!(["x"]), 60).await.expect("put");
            store
                .put_setting("shipping_origin", json!({"cityId": "444"}))
                .await
                .expect("setting");
        }

        let store = SqliteStore::open(&path).expect("reopen");
        let entry = store.get("provinces").await.expect("get").expect("present");
        assert_eq!(entry.payload, json!(["x"]));
        let origin = store.get_setting("shipping_origin").await.expect("get");
        assert_eq!(origin, Some(json!({"cityId": "444"})));
    }
}
