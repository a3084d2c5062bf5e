//! Cache-aside fetcher.
//!
//! The single chokepoint for upstream calls. A lookup either returns a fresh
//! entry without touching the upstream, or calls the upstream exactly once:
//! success is written back (one write), failure falls back to the expired
//! entry when there is one.

use std::future::Future;
use std::sync::Arc;

use common::Error;
use dashmap::DashSet;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::store::{CacheEntry, CacheStore};

#[derive(Debug, Clone, Copy)]
pub struct FetchPolicy {
    /// Serve an expired entry when the upstream call fails.
    pub allow_stale_on_error: bool,
    /// Let [`CacheFetcher::fetch_revalidating`] answer from an expired entry
    /// and refresh it in the background.
    pub stale_while_revalidate: bool,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            allow_stale_on_error: true,
            stale_while_revalidate: false,
        }
    }
}

impl From<&common::config::CacheConfig> for FetchPolicy {
    fn from(cfg: &common::config::CacheConfig) -> Self {
        Self {
            allow_stale_on_error: cfg.allow_stale_on_error,
            stale_while_revalidate: cfg.stale_while_revalidate,
        }
    }
}

/// Outcome of probing the store.
enum Probe<T> {
    Fresh(T),
    Stale(CacheEntry),
    Miss,
}

/// Marks a key as refreshing until dropped, including when the refresh
/// task panics.
struct InFlight {
    keys: Arc<DashSet<String>>,
    key: String,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.keys.remove(&self.key);
    }
}

#[derive(Clone)]
pub struct CacheFetcher {
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    policy: FetchPolicy,
    /// Keys with a background refresh in flight.
    revalidating: Arc<DashSet<String>>,
}

impl CacheFetcher {
    pub fn new(store: Arc<dyn CacheStore>, policy: FetchPolicy) -> Self {
        Self::with_clock(store, Arc::new(SystemClock), policy)
    }

    pub fn with_clock(store: Arc<dyn CacheStore>, clock: Arc<dyn Clock>, policy: FetchPolicy) -> Self {
        Self {
            store,
            clock,
            policy,
            revalidating: Arc::new(DashSet::new()),
        }
    }

    /// Cache-aside lookup of `endpoint`.
    ///
    /// `upstream` is invoked at most once and only when there is no fresh
    /// entry. Without a usable cached value its failure becomes
    /// [`Error::Upstream`].
    pub async fn fetch<T, F, Fut>(&self, endpoint: &str, ttl_seconds: u64, upstream: F) -> Result<T, Error>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let stale = match self.probe::<T>(endpoint).await {
            Probe::Fresh(value) => return Ok(value),
            Probe::Stale(entry) => Some(entry),
            Probe::Miss => None,
        };

        match upstream().await {
            Ok(value) => {
                self.write(endpoint, &value, ttl_seconds).await;
                Ok(value)
            }
            Err(e) => self.degrade(endpoint, stale, e),
        }
    }

    /// Like [`fetch`](Self::fetch), but when stale-while-revalidate is on an
    /// expired entry is returned immediately and refreshed in a background
    /// task. Only one refresh per key runs at a time.
    pub async fn fetch_revalidating<T, F, Fut>(
        &self,
        endpoint: &str,
        ttl_seconds: u64,
        upstream: F,
    ) -> Result<T, Error>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, Error>> + Send + 'static,
    {
        if !self.policy.stale_while_revalidate {
            return self.fetch(endpoint, ttl_seconds, upstream).await;
        }

        let stale = match self.probe::<T>(endpoint).await {
            Probe::Fresh(value) => return Ok(value),
            Probe::Stale(entry) => entry,
            Probe::Miss => {
                return match upstream().await {
                    Ok(value) => {
                        self.write(endpoint, &value, ttl_seconds).await;
                        Ok(value)
                    }
                    Err(e) => self.degrade(endpoint, None, e),
                };
            }
        };

        let value: T = match serde_json::from_value(stale.payload.clone()) {
            Ok(value) => value,
            Err(e) => {
                warn!(endpoint, "Undecodable cache entry, refreshing inline: {}", e);
                return match upstream().await {
                    Ok(value) => {
                        self.write(endpoint, &value, ttl_seconds).await;
                        Ok(value)
                    }
                    Err(e) => self.degrade(endpoint, None, e),
                };
            }
        };

        if self.revalidating.insert(endpoint.to_string()) {
            debug!(endpoint, "Serving stale entry, refreshing in background");
            let fetcher = self.clone();
            let guard = InFlight {
                keys: Arc::clone(&self.revalidating),
                key: endpoint.to_string(),
            };
            tokio::spawn(async move {
                match upstream().await {
                    Ok(fresh) => fetcher.write(&guard.key, &fresh, ttl_seconds).await,
                    Err(e) => warn!(endpoint = %guard.key, "Background refresh failed: {}", e),
                }
                drop(guard);
            });
        } else {
            debug!(endpoint, "Serving stale entry, refresh already in flight");
        }

        Ok(value)
    }

    /// True while a background refresh for `endpoint` is running.
    #[cfg(test)]
    fn is_revalidating(&self, endpoint: &str) -> bool {
        self.revalidating.contains(endpoint)
    }

    async fn probe<T: DeserializeOwned>(&self, endpoint: &str) -> Probe<T> {
        let entry = match self.store.get(endpoint).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return Probe::Miss,
            Err(e) => {
                warn!(endpoint, "Cache read failed, treating as miss: {}", e);
                return Probe::Miss;
            }
        };

        if !entry.is_fresh(self.clock.now()) {
            return Probe::Stale(entry);
        }
        match serde_json::from_value(entry.payload.clone()) {
            Ok(value) => {
                debug!(endpoint, "Cache hit");
                Probe::Fresh(value)
            }
            Err(e) => {
                warn!(endpoint, "Undecodable cache entry, treating as miss: {}", e);
                Probe::Miss
            }
        }
    }

    async fn write<T: Serialize>(&self, endpoint: &str, value: &T, ttl_seconds: u64) {
        let payload = match serde_json::to_value(value) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(endpoint, "Failed to encode response for cache: {}", e);
                return;
            }
        };
        if let Err(e) = self.store.put(endpoint, payload, ttl_seconds).await {
            warn!(endpoint, "Cache write failed: {}", e);
        }
    }

    fn degrade<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        stale: Option<CacheEntry>,
        cause: Error,
    ) -> Result<T, Error> {
        if self.policy.allow_stale_on_error {
            if let Some(entry) = stale {
                let age_secs = entry.age_seconds(self.clock.now());
                match serde_json::from_value(entry.payload) {
                    Ok(value) => {
                        warn!(endpoint, age_secs, "Upstream failed, serving stale entry: {}", cause);
                        return Ok(value);
                    }
                    Err(e) => warn!(endpoint, "Stale entry undecodable: {}", e),
                }
            }
        }
        Err(Error::Upstream(format!("{}: {}", endpoint, cause)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::testing::{BrokenStore, ManualClock};
    use chrono::Duration;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    fn setup(policy: FetchPolicy) -> (CacheFetcher, Arc<MemoryStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let fetcher = CacheFetcher::with_clock(store.clone(), clock.clone(), policy);
        (fetcher, store, clock)
    }

    fn upstream_err() -> Error {
        Error::RajaOngkirApi {
            status: 503,
            message: "down".into(),
        }
    }

    #[tokio::test]
    async fn test_fresh_hit_never_calls_upstream() {
        let (fetcher, store, clock) = setup(FetchPolicy::default());
        store.put("provinces", json!(["cached"]), 60).await.expect("put");
        clock.advance(Duration::seconds(59));

        let calls = AtomicUsize::new(0);
        let value: Vec<String> = fetcher
            .fetch("provinces", 60, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(vec!["fresh".to_string()])
            })
            .await
            .expect("fetch");

        assert_eq!(value, vec!["cached".to_string()]);
        assert_eq!(calls.load(Ordering::SeqCst), 0, "upstream must not be called on a fresh hit");
    }

    #[tokio::test]
    async fn test_miss_calls_upstream_once_and_writes_once() {
        let (fetcher, store, _clock) = setup(FetchPolicy::default());
        let calls = AtomicUsize::new(0);

        let value: Vec<u32> = fetcher
            .fetch("provinces", 60, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(vec![1, 2])
            })
            .await
            .expect("fetch");

        assert_eq!(value, vec![1, 2]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.len(), 1);
        let entry = store.get("provinces").await.expect("get").expect("written");
        assert_eq!(entry.payload, json!([1, 2]));
        assert_eq!(entry.ttl_seconds, 60);
    }

    #[tokio::test]
    async fn test_expired_entry_refreshed_on_success() {
        let (fetcher, store, clock) = setup(FetchPolicy::default());
        store.put("provinces", json!([1]), 60).await.expect("put");
        clock.advance(Duration::seconds(60));

        let value: Vec<u32> = fetcher
            .fetch("provinces", 60, || async { Ok(vec![2]) })
            .await
            .expect("fetch");

        assert_eq!(value, vec![2]);
        let entry = store.get("provinces").await.expect("get").expect("present");
        assert_eq!(entry.payload, json!([2]));
        assert_eq!(entry.updated_at, clock.now());
    }

    #[tokio::test]
    async fn test_expired_entry_served_when_upstream_fails() {
        let (fetcher, store, clock) = setup(FetchPolicy::default());
        store.put("cost:x", json!([7]), 3600).await.expect("put");
        clock.advance(Duration::days(3));

        let value: Vec<u32> = fetcher
            .fetch("cost:x", 3600, || async { Err(upstream_err()) })
            .await
            .expect("stale entry should be served");
        assert_eq!(value, vec![7]);
    }

    #[tokio::test]
    async fn test_no_entry_and_upstream_failure_is_upstream_error() {
        let (fetcher, _store, _clock) = setup(FetchPolicy::default());
        let result: Result<Vec<u32>, Error> = fetcher
            .fetch("cost:x", 3600, || async { Err(upstream_err()) })
            .await;
        match result {
            Err(Error::Upstream(msg)) => assert!(msg.contains("cost:x")),
            other => panic!("expected Upstream error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stale_on_error_can_be_disabled() {
        let (fetcher, store, clock) = setup(FetchPolicy {
            allow_stale_on_error: false,
            stale_while_revalidate: false,
        });
        store.put("cost:x", json!([7]), 10).await.expect("put");
        clock.advance(Duration::seconds(11));

        let result: Result<Vec<u32>, Error> = fetcher
            .fetch("cost:x", 10, || async { Err(upstream_err()) })
            .await;
        assert!(matches!(result, Err(Error::Upstream(_))));
    }

    #[tokio::test]
    async fn test_storage_failure_falls_through_to_upstream() {
        let fetcher = CacheFetcher::new(Arc::new(BrokenStore), FetchPolicy::default());
        let value: Vec<u32> = fetcher
            .fetch("provinces", 60, || async { Ok(vec![3]) })
            .await
            .expect("upstream result despite broken store");
        assert_eq!(value, vec![3]);
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_a_miss() {
        let (fetcher, store, _clock) = setup(FetchPolicy::default());
        store.put("provinces", json!({"not": "a list"}), 60).await.expect("put");

        let value: Vec<u32> = fetcher
            .fetch("provinces", 60, || async { Ok(vec![4]) })
            .await
            .expect("fetch");
        assert_eq!(value, vec![4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_revalidation_serves_stale_and_dedupes_refresh() {
        let (fetcher, store, clock) = setup(FetchPolicy {
            allow_stale_on_error: true,
            stale_while_revalidate: true,
        });
        store.put("provinces", json!([1]), 60).await.expect("put");
        clock.advance(Duration::seconds(120));

        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let calls = calls.clone();
            let value: Vec<u32> = fetcher
                .fetch_revalidating("provinces", 60, move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(StdDuration::from_millis(50)).await;
                    Ok(vec![2])
                })
                .await
                .expect("stale value");
            assert_eq!(value, vec![1]);
        }
        assert!(fetcher.is_revalidating("provinces"));

        tokio::time::sleep(StdDuration::from_millis(100)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1, "one refresh per key");
        assert!(!fetcher.is_revalidating("provinces"));
        let entry = store.get("provinces").await.expect("get").expect("present");
        assert_eq!(entry.payload, json!([2]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_refresh_releases_key() {
        let (fetcher, store, clock) = setup(FetchPolicy {
            allow_stale_on_error: true,
            stale_while_revalidate: true,
        });
        store.put("provinces", json!([1]), 60).await.expect("put");
        clock.advance(Duration::seconds(120));

        let value: Vec<u32> = fetcher
            .fetch_revalidating("provinces", 60, || async {
                tokio::time::sleep(StdDuration::from_millis(10)).await;
                let refreshed: Result<Vec<u32>, Error> = Err(upstream_err());
                if refreshed.is_err() {
                    panic!("refresh blew up");
                }
                refreshed
            })
            .await
            .expect("stale value");
        assert_eq!(value, vec![1]);
        assert!(fetcher.is_revalidating("provinces"));

        tokio::time::sleep(StdDuration::from_millis(50)).await;
        assert!(!fetcher.is_revalidating("provinces"));

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let _: Vec<u32> = fetcher
            .fetch_revalidating("provinces", 60, move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(vec![2])
            })
            .await
            .expect("stale value");
        tokio::time::sleep(StdDuration::from_millis(50)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1, "a new refresh is scheduled");
        let entry = store.get("provinces").await.expect("get").expect("present");
        assert_eq!(entry.payload, json!([2]));
    }

    #[tokio::test]
    async fn test_revalidation_disabled_behaves_like_fetch() {
        let (fetcher, store, clock) = setup(FetchPolicy::default());
        store.put("provinces", json!([1]), 60).await.expect("put");
        clock.advance(Duration::seconds(120));

        let value: Vec<u32> = fetcher
            .fetch_revalidating("provinces", 60, || async { Ok(vec![2]) })
            .await
            .expect("fetch");
        assert_eq!(value, vec![2]);
    }
}
