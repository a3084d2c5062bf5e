//! Process-local store.
//!
//! Backs the fallback path when SQLite is unavailable and stands in for it
//! in tests. Uses `DashMap` so concurrent warmers never serialise on a lock.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::Error;
use dashmap::DashMap;
use serde_json::Value;

use crate::clock::{Clock, SystemClock};
use crate::keys;
use crate::store::{
    sort_counts, CacheEntry, CacheStats, CacheStore, EndpointCount, RecentEntry, SettingsStore,
};

#[derive(Clone)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, CacheEntry>>,
    settings: Arc<DashMap<String, Value>>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            settings: Arc::new(DashMap::new()),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, endpoint: &str) -> Result<Option<CacheEntry>, Error> {
        Ok(self.entries.get(endpoint).map(|e| e.value().clone()))
    }

    async fn put(&self, endpoint: &str, payload: Value, ttl_seconds: u64) -> Result<(), Error> {
        self.entries.insert(
            endpoint.to_string(),
            CacheEntry {
                endpoint: endpoint.to_string(),
                payload,
                ttl_seconds,
                updated_at: self.clock.now(),
            },
        );
        Ok(())
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, Error> {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.updated_at >= cutoff);
        Ok(before.saturating_sub(self.entries.len()) as u64)
    }

    async fn delete_group(&self, group: &str) -> Result<u64, Error> {
        let before = self.entries.len();
        self.entries.retain(|k, _| keys::group_of(k) != group);
        Ok(before.saturating_sub(self.entries.len()) as u64)
    }

    async fn stats(&self, recent_limit: usize) -> Result<CacheStats, Error> {
        let now = self.clock.now();
        let mut groups: HashMap<String, u64> = HashMap::new();
        let mut recent: Vec<RecentEntry> = Vec::with_capacity(self.entries.len());

        for item in self.entries.iter() {
            *groups.entry(keys::group_of(item.key()).to_string()).or_default() += 1;
            recent.push(RecentEntry {
                endpoint: item.endpoint.clone(),
                updated_at: item.updated_at,
                ttl_seconds: item.ttl_seconds,
                age_seconds: item.age_seconds(now),
            });
        }

        let mut by_endpoint: Vec<EndpointCount> = groups
            .into_iter()
            .map(|(endpoint, count)| EndpointCount { endpoint, count })
            .collect();
        sort_counts(&mut by_endpoint);

        recent.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.endpoint.cmp(&b.endpoint))
        });
        recent.truncate(recent_limit);

        Ok(CacheStats {
            total_entries: self.entries.len() as u64,
            by_endpoint,
            recent_cache: recent,
        })
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn get_setting(&self, name: &str) -> Result<Option<Value>, Error> {
        Ok(self.settings.get(name).map(|v| v.value().clone()))
    }

    async fn put_setting(&self, name: &str, value: Value) -> Result<(), Error> {
        self.settings.insert(name.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ManualClock;
    use chrono::Duration;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_store_matches_table_semantics() {
        let clock = Arc::new(ManualClock::default());
        let store = MemoryStore::with_clock(clock.clone());

        store.put("search:limit=10,offset=0,q=bali", json!([]), 60).await.expect("put");
        clock.advance(Duration::seconds(2));
        store.put("cost:origin=1", json!([]), 60).await.expect("put");
        store.put("cost:origin=2", json!([]), 60).await.expect("put");

        let stats = store.stats(1).await.expect("stats");
        assert_eq!(stats.total_entries, 3);
        assert_eq!(stats.by_endpoint[0], EndpointCount { endpoint: "cost".into(), count: 2 });
        assert_eq!(stats.recent_cache.len(), 1);
        assert_eq!(stats.recent_cache[0].endpoint, "cost:origin=1");

        let cutoff = clock.now() - Duration::seconds(1);
        assert_eq!(store.delete_older_than(cutoff).await.expect("sweep"), 1);
        assert_eq!(store.delete_group("cost").await.expect("clear"), 2);
        assert!(store.is_empty());
    }
}
