//! Bulk cache pre-population.
//!
//! Every lookup goes through [`LocationClient`], so warming is an ordinary
//! cache-aside read: fresh entries are left alone, stale or missing ones are
//! refreshed. Running a warm twice, or alongside live traffic, only
//! re-upserts the same keys.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use common::config::WarmConfig;
use common::{CostQuery, Error};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{info, warn};

use crate::locations::LocationClient;

/// Page size used when warming search terms.
const SEARCH_WARM_LIMIT: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarmKind {
    /// Essential geography, popular cities and popular searches.
    All,
    Popular,
    Searches,
    /// Cost matrix from the given origin city.
    Origin(String),
}

impl WarmKind {
    pub fn parse(kind: Option<&str>, origin_city_id: Option<&str>) -> Result<Self, Error> {
        match kind.map(str::trim) {
            Some("all") => Ok(WarmKind::All),
            Some("popular") => Ok(WarmKind::Popular),
            Some("searches") => Ok(WarmKind::Searches),
            Some("origin") => match origin_city_id.map(str::trim).filter(|id| !id.is_empty()) {
                Some(id) => Ok(WarmKind::Origin(id.to_string())),
                None => Err(Error::Validation(
                    "origin_city_id is required for type=origin".into(),
                )),
            },
            Some(other) if !other.is_empty() => Err(Error::Validation(format!(
                "Invalid warm type '{}', expected all, popular, searches or origin",
                other
            ))),
            _ => Err(Error::Validation(
                "type is required (all, popular, searches or origin)".into(),
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WarmKind::All => "all",
            WarmKind::Popular => "popular",
            WarmKind::Searches => "searches",
            WarmKind::Origin(_) => "origin",
        }
    }
}

/// What one warming run did.
#[derive(Debug, Clone, Serialize)]
pub struct WarmReport {
    pub success: bool,
    pub message: String,
    pub duration_ms: u64,
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: DateTime<Utc>,
    pub attempted: usize,
    pub failed: usize,
}

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    attempted: usize,
    failed: usize,
}

impl Tally {
    fn merge(&mut self, other: Tally) {
        self.attempted += other.attempted;
        self.failed += other.failed;
    }
}

#[derive(Clone)]
pub struct CacheWarmer {
    locations: Arc<LocationClient>,
    config: WarmConfig,
}

impl CacheWarmer {
    /// Warming refreshes expired entries inline rather than serving them
    /// stale, so a finished run leaves the cache fresh.
    pub fn new(locations: Arc<LocationClient>, config: WarmConfig) -> Self {
        Self {
            locations: Arc::new(locations.refreshing()),
            config,
        }
    }

    pub async fn warm(&self, kind: &WarmKind) -> Result<WarmReport, Error> {
        let started = Instant::now();
        info!(kind = kind.as_str(), "Cache warming started");

        let (tally, headline) = match kind {
            WarmKind::All => {
                let mut tally = self.warm_essential().await?;
                tally.merge(self.warm_popular_cities().await);
                tally.merge(self.warm_popular_searches().await);
                (tally, "Full cache warming completed".to_string())
            }
            WarmKind::Popular => (
                self.warm_popular_cities().await,
                "Popular cities cache warming completed".to_string(),
            ),
            WarmKind::Searches => (
                self.warm_popular_searches().await,
                "Popular searches cache warming completed".to_string(),
            ),
            WarmKind::Origin(city_id) => (
                self.warm_origin(city_id).await,
                format!("Origin cache warming completed for city {}", city_id),
            ),
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        info!(
            kind = kind.as_str(),
            attempted = tally.attempted,
            failed = tally.failed,
            duration_ms,
            "Cache warming finished"
        );

        Ok(WarmReport {
            success: true,
            message: format!(
                "{} ({} lookups, {} failed)",
                headline, tally.attempted, tally.failed
            ),
            duration_ms,
            kind: kind.as_str().to_string(),
            timestamp: Utc::now(),
            attempted: tally.attempted,
            failed: tally.failed,
        })
    }

    /// Provinces, then the cities of every province.
    async fn warm_essential(&self) -> Result<Tally, Error> {
        let provinces = self.locations.provinces().await?;
        let ids: Vec<String> = provinces.into_iter().map(|p| p.id).collect();

        let locations = self.locations.clone();
        let (_, mut tally) = self
            .fan_out(ids, move |id| {
                let locations = locations.clone();
                async move { locations.cities(Some(&id)).await }
            })
            .await;
        tally.attempted += 1;
        Ok(tally)
    }

    /// Districts and subdistricts of the configured high-traffic cities.
    async fn warm_popular_cities(&self) -> Tally {
        let locations = self.locations.clone();
        let (districts, mut tally) = self
            .fan_out(self.config.popular_city_ids.clone(), move |id| {
                let locations = locations.clone();
                async move { locations.districts(&id).await }
            })
            .await;

        let district_ids: Vec<String> = districts.into_iter().flatten().map(|d| d.id).collect();
        let locations = self.locations.clone();
        let (_, subs) = self
            .fan_out(district_ids, move |id| {
                let locations = locations.clone();
                async move { locations.subdistricts(&id).await }
            })
            .await;
        tally.merge(subs);
        tally
    }

    async fn warm_popular_searches(&self) -> Tally {
        let locations = self.locations.clone();
        let (_, tally) = self
            .fan_out(self.config.popular_searches.clone(), move |term| {
                let locations = locations.clone();
                async move { locations.search(&term, SEARCH_WARM_LIMIT, 0).await }
            })
            .await;
        tally
    }

    /// The origin's districts, plus a quote from the origin to every popular
    /// city for every configured courier.
    async fn warm_origin(&self, origin: &str) -> Tally {
        let mut tally = Tally::default();
        tally.attempted += 1;
        if let Err(e) = self.locations.districts(origin).await {
            warn!(origin, "Origin districts warm failed: {}", e);
            tally.failed += 1;
        }

        let queries: Vec<CostQuery> = self
            .config
            .popular_city_ids
            .iter()
            .filter(|dest| dest.as_str() != origin)
            .flat_map(|dest| {
                self.config.couriers.iter().map(move |courier| {
                    CostQuery::new(origin, dest, self.config.sample_weight_grams, courier)
                })
            })
            .collect();

        let locations = self.locations.clone();
        let (_, quotes) = self
            .fan_out(queries, move |query| {
                let locations = locations.clone();
                async move { locations.shipping_cost(&query).await }
            })
            .await;
        tally.merge(quotes);
        tally
    }

    /// Run `lookup` over `items` with at most `warm.concurrency` in flight.
    /// Failures are logged and counted; successes are returned.
    async fn fan_out<I, T, F, Fut>(&self, items: Vec<I>, lookup: F) -> (Vec<T>, Tally)
    where
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let attempted = items.len();
        let results: Vec<Result<T, Error>> = stream::iter(items)
            .map(lookup)
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut ok = Vec::with_capacity(results.len());
        let mut failed = 0;
        for result in results {
            match result {
                Ok(value) => ok.push(value),
                Err(e) => {
                    warn!("Warm lookup failed: {}", e);
                    failed += 1;
                }
            }
        }
        (ok, Tally { attempted, failed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::{CacheFetcher, FetchPolicy};
    use crate::memory::MemoryStore;
    use crate::clock::Clock;
    use crate::store::CacheStore;
    use crate::testing::{CallKind, FakeLocationApi, ManualClock};
    use common::config::TtlConfig;
    use std::collections::HashMap;
    use std::time::Duration;

    fn warm_config() -> WarmConfig {
        WarmConfig {
            popular_city_ids: vec!["p1-c1".into(), "p1-c2".into(), "p2-c1".into()],
            popular_searches: vec!["Jakarta".into(), "Bandung".into()],
            couriers: vec!["jne".into(), "pos".into()],
            sample_weight_grams: 1000,
            concurrency: 2,
            interval_secs: 0,
        }
    }

    fn setup() -> (CacheWarmer, Arc<FakeLocationApi>, Arc<MemoryStore>) {
        let api = Arc::new(FakeLocationApi::new(2, 2));
        let store = Arc::new(MemoryStore::new());
        let fetcher = CacheFetcher::new(store.clone(), FetchPolicy::default());
        let locations = Arc::new(LocationClient::new(api.clone(), fetcher, TtlConfig::default()));
        (CacheWarmer::new(locations, warm_config()), api, store)
    }

    #[test]
    fn test_parse_kind() {
        assert_eq!(WarmKind::parse(Some("all"), None).expect("all"), WarmKind::All);
        assert_eq!(
            WarmKind::parse(Some("origin"), Some("152")).expect("origin"),
            WarmKind::Origin("152".into())
        );
        assert!(matches!(WarmKind::parse(None, None), Err(Error::Validation(_))));
        assert!(matches!(WarmKind::parse(Some("bogus"), None), Err(Error::Validation(_))));
        assert!(matches!(WarmKind::parse(Some("origin"), None), Err(Error::Validation(_))));
        assert!(matches!(WarmKind::parse(Some("origin"), Some(" ")), Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_warm_all_populates_tree_and_searches() {
        let (warmer, api, store) = setup();
        let report = warmer.warm(&WarmKind::All).await.expect("warm");

        assert!(report.success);
        assert_eq!(report.kind, "all");
        assert_eq!(report.failed, 0);
        assert_eq!(api.count(CallKind::Provinces), 1);
        assert_eq!(api.count(CallKind::Cities), 2);
        assert_eq!(api.count(CallKind::Districts), 3);
        assert_eq!(api.count(CallKind::Subdistricts), 6);
        assert_eq!(api.count(CallKind::Search), 2);
        // provinces + 2 cities + 3 districts + 6 subdistricts + 2 searches
        assert_eq!(store.len(), 14);
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let (warmer, api, store) = setup();
        warmer.warm(&WarmKind::All).await.expect("first");
        let calls = api.total_calls();
        let entries = store.len();

        warmer.warm(&WarmKind::All).await.expect("second");
        assert_eq!(store.len(), entries);
        assert_eq!(api.total_calls(), calls, "fresh entries are not refetched");
    }

    #[tokio::test]
    async fn test_origin_matrix_skips_origin_itself() {
        let (warmer, api, _store) = setup();
        let report = warmer
            .warm(&WarmKind::Origin("p1-c1".into()))
            .await
            .expect("warm");

        assert_eq!(api.count(CallKind::Districts), 1);
        // two destinations x two couriers
        assert_eq!(api.count(CallKind::Cost), 4);
        assert!(api
            .calls()
            .iter()
            .filter(|c| c.kind == CallKind::Cost)
            .all(|c| c.arg.starts_with("p1-c1>") && !c.arg.starts_with("p1-c1>p1-c1@")));
        assert_eq!(report.attempted, 5);
        assert!(report.message.contains("p1-c1"));
    }

    #[tokio::test]
    async fn test_failed_lookups_counted_not_fatal() {
        let (warmer, api, _store) = setup();
        api.fail_on(CallKind::Districts, "p1-c2");
        api.fail_on(CallKind::Search, "Bandung|10|0");

        let popular = warmer.warm(&WarmKind::Popular).await.expect("warm");
        assert_eq!(popular.failed, 1);
        assert_eq!(api.count(CallKind::Subdistricts), 4);

        let searches = warmer.warm(&WarmKind::Searches).await.expect("warm");
        assert_eq!(searches.attempted, 2);
        assert_eq!(searches.failed, 1);
    }

    #[tokio::test]
    async fn test_expired_entries_refreshed_before_report_with_revalidation() {
        let api = Arc::new(FakeLocationApi::new(2, 2));
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let policy = FetchPolicy {
            allow_stale_on_error: true,
            stale_while_revalidate: true,
        };
        let fetcher = CacheFetcher::with_clock(store.clone(), clock.clone(), policy);
        let locations = Arc::new(LocationClient::new(api.clone(), fetcher, TtlConfig::default()));
        let warmer = CacheWarmer::new(locations, warm_config());

        warmer.warm(&WarmKind::Popular).await.expect("first warm");
        clock.advance(chrono::Duration::days(31));
        warmer.warm(&WarmKind::Popular).await.expect("second warm");

        assert_eq!(api.count(CallKind::Districts), 6);
        let entry = store
            .get("districts:city=p1-c1")
            .await
            .expect("get")
            .expect("present");
        assert_eq!(entry.updated_at, clock.now(), "refreshed inline, not in the background");
    }

    #[tokio::test]
    async fn test_provinces_failure_fails_essential_warm() {
        let (warmer, api, _store) = setup();
        api.set_failing(true);
        assert!(warmer.warm(&WarmKind::All).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fan_out_respects_concurrency() {
        let (warmer, api, _store) = setup();
        api.set_latency(Duration::from_millis(100));

        warmer.warm(&WarmKind::Origin("p2-c1".into())).await.expect("warm");

        let mut per_instant: HashMap<tokio::time::Instant, usize> = HashMap::new();
        for call in api.calls().iter().filter(|c| c.kind == CallKind::Cost) {
            *per_instant.entry(call.at).or_default() += 1;
        }
        assert_eq!(per_instant.values().sum::<usize>(), 4);
        assert!(per_instant.values().all(|n| *n <= 2), "at most two in flight: {:?}", per_instant);
    }
}
