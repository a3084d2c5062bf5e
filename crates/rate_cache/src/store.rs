//! Storage ports for cached API responses and named settings.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::Error;
use serde::Serialize;
use serde_json::Value;

/// One cached upstream response.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub endpoint: String,
    pub payload: Value,
    pub ttl_seconds: u64,
    pub updated_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Fresh while strictly younger than its TTL.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        let age_ms = (now - self.updated_at).num_milliseconds();
        age_ms < (self.ttl_seconds as i64).saturating_mul(1000)
    }

    pub fn age_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.updated_at).num_seconds().max(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointCount {
    pub endpoint: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecentEntry {
    pub endpoint: String,
    pub updated_at: DateTime<Utc>,
    pub ttl_seconds: u64,
    pub age_seconds: i64,
}

/// Read-only aggregate over the cache table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub total_entries: u64,
    /// Entry counts per key group, largest first.
    pub by_endpoint: Vec<EndpointCount>,
    /// Most recently refreshed entries, newest first.
    pub recent_cache: Vec<RecentEntry>,
}

/// Durable key-value persistence with TTL metadata.
///
/// `put` is an upsert: one row per endpoint, `updated_at` set to now.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, endpoint: &str) -> Result<Option<CacheEntry>, Error>;

    async fn put(&self, endpoint: &str, payload: Value, ttl_seconds: u64) -> Result<(), Error>;

    /// Delete every entry last refreshed before `cutoff`.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, Error>;

    /// Delete every entry whose key group equals `group`.
    async fn delete_group(&self, group: &str) -> Result<u64, Error>;

    async fn stats(&self, recent_limit: usize) -> Result<CacheStats, Error>;
}

/// Named JSON settings, kept apart from the cache.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get_setting(&self, name: &str) -> Result<Option<Value>, Error>;

    async fn put_setting(&self, name: &str, value: Value) -> Result<(), Error>;
}

/// Sort group counts largest first, ties by name, for stable output.
pub(crate) fn sort_counts(counts: &mut [EndpointCount]) {
    counts.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.endpoint.cmp(&b.endpoint)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn test_entry_freshness_boundary() {
        let now = Utc::now();
        let entry = CacheEntry {
            endpoint: "provinces".into(),
            payload: json!([]),
            ttl_seconds: 60,
            updated_at: now - Duration::seconds(59),
        };
        assert!(entry.is_fresh(now));
        assert!(!entry.is_fresh(now + Duration::seconds(1)));
        assert_eq!(entry.age_seconds(now), 59);
    }
}
