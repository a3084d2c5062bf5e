//! Test doubles: a scripted upstream, a settable clock and a broken store.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    City, CostDetail, CostOption, CostQuery, DestinationMatch, District, Error, Province,
    ServiceCost, Subdistrict,
};
use rajaongkir_client::LocationApi;
use serde_json::Value;
use tokio::time::Instant;

use crate::clock::Clock;
use crate::store::{CacheEntry, CacheStats, CacheStore, SettingsStore};

// ── Clock ─────────────────────────────────────────────────────────────

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Default for ManualClock {
    /// 2024-01-01T00:00:00Z
    fn default() -> Self {
        Self::at(DateTime::from_timestamp(1_704_067_200, 0).unwrap_or_default())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

// ── Upstream ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    Provinces,
    Cities,
    Districts,
    Subdistricts,
    Search,
    Cost,
}

#[derive(Debug, Clone)]
pub struct Call {
    pub kind: CallKind,
    pub arg: String,
    pub at: Instant,
}

/// Upstream with a generated tree: `fanout` children at every level.
///
/// Ids encode the path (`p1`, `p1-c2`, `p1-c2-d1`, `p1-c2-d1-s3`) so tests
/// can tell which parent a call was made for.
pub struct FakeLocationApi {
    provinces: usize,
    fanout: usize,
    latency: Mutex<Duration>,
    fail_all: AtomicBool,
    fail_on: Mutex<HashSet<(CallKind, String)>>,
    calls: Mutex<Vec<Call>>,
}

impl FakeLocationApi {
    pub fn new(provinces: usize, fanout: usize) -> Self {
        Self {
            provinces,
            fanout,
            latency: Mutex::new(Duration::ZERO),
            fail_all: AtomicBool::new(false),
            fail_on: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Make every subsequent call fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.fail_all.store(failing, Ordering::SeqCst);
    }

    /// Make calls of `kind` for `arg` fail.
    pub fn fail_on(&self, kind: CallKind, arg: &str) {
        self.fail_on.lock().unwrap().insert((kind, arg.to_string()));
    }

    /// Per-call delay, measured on the tokio clock.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, kind: CallKind) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.kind == kind)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    async fn record(&self, kind: CallKind, arg: &str) -> Result<(), Error> {
        self.calls.lock().unwrap().push(Call {
            kind,
            arg: arg.to_string(),
            at: Instant::now(),
        });

        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let targeted = self
            .fail_on
            .lock()
            .unwrap()
            .contains(&(kind, arg.to_string()));
        if targeted || self.fail_all.load(Ordering::SeqCst) {
            return Err(Error::RajaOngkirApi {
                status: 503,
                message: format!("{:?} {} unavailable", kind, arg),
            });
        }
        Ok(())
    }

    fn children(&self, parent: &str, tag: char) -> Vec<(String, String)> {
        (1..=self.fanout)
            .map(|i| {
                let id = format!("{}-{}{}", parent, tag, i);
                (id.clone(), format!("Name {}", id))
            })
            .collect()
    }
}

#[async_trait]
impl LocationApi for FakeLocationApi {
    async fn provinces(&self) -> Result<Vec<Province>, Error> {
        self.record(CallKind::Provinces, "").await?;
        Ok((1..=self.provinces)
            .map(|i| Province {
                id: format!("p{}", i),
                name: format!("Province {}", i),
            })
            .collect())
    }

    async fn cities(&self, province_id: &str) -> Result<Vec<City>, Error> {
        self.record(CallKind::Cities, province_id).await?;
        Ok(self
            .children(province_id, 'c')
            .into_iter()
            .map(|(id, name)| City {
                id,
                name,
                zip_code: String::new(),
                province_id: String::new(),
            })
            .collect())
    }

    async fn districts(&self, city_id: &str) -> Result<Vec<District>, Error> {
        self.record(CallKind::Districts, city_id).await?;
        Ok(self
            .children(city_id, 'd')
            .into_iter()
            .map(|(id, name)| District {
                id,
                name,
                zip_code: String::new(),
                city_id: String::new(),
            })
            .collect())
    }

    async fn subdistricts(&self, district_id: &str) -> Result<Vec<Subdistrict>, Error> {
        self.record(CallKind::Subdistricts, district_id).await?;
        Ok(self
            .children(district_id, 's')
            .into_iter()
            .map(|(id, name)| Subdistrict {
                id,
                name,
                zip_code: "10000".into(),
                district_id: String::new(),
            })
            .collect())
    }

    async fn search_destinations(
        &self,
        query: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<DestinationMatch>, Error> {
        self.record(CallKind::Search, &format!("{}|{}|{}", query, limit, offset))
            .await?;
        let hit = DestinationMatch {
            id: format!("dest-{}", query.to_lowercase()),
            city_name: query.to_string(),
            province_name: "Somewhere".into(),
            ..Default::default()
        };
        Ok(vec![hit.normalized()])
    }

    async fn shipping_cost(&self, query: &CostQuery) -> Result<Vec<CostOption>, Error> {
        let arg = format!("{}>{}@{}:{}", query.origin, query.destination, query.weight, query.courier);
        self.record(CallKind::Cost, &arg).await?;
        Ok(vec![CostOption {
            code: query.courier.clone(),
            name: query.courier.to_uppercase(),
            costs: vec![ServiceCost {
                service: "REG".into(),
                description: "Regular".into(),
                cost: vec![CostDetail {
                    value: i64::from(query.weight) * 10,
                    etd: "2-3".into(),
                    note: String::new(),
                }],
            }],
        }])
    }
}

// ── Store ─────────────────────────────────────────────────────────────

/// Store whose every operation fails, as a locked or missing database would.
#[derive(Debug, Default)]
pub struct BrokenStore;

fn broken() -> Error {
    Error::Storage("database is locked".into())
}

#[async_trait]
impl CacheStore for BrokenStore {
    async fn get(&self, _endpoint: &str) -> Result<Option<CacheEntry>, Error> {
        Err(broken())
    }

    async fn put(&self, _endpoint: &str, _payload: Value, _ttl: u64) -> Result<(), Error> {
        Err(broken())
    }

    async fn delete_older_than(&self, _cutoff: DateTime<Utc>) -> Result<u64, Error> {
        Err(broken())
    }

    async fn delete_group(&self, _group: &str) -> Result<u64, Error> {
        Err(broken())
    }

    async fn stats(&self, _recent_limit: usize) -> Result<CacheStats, Error> {
        Err(broken())
    }
}

#[async_trait]
impl SettingsStore for BrokenStore {
    async fn get_setting(&self, _name: &str) -> Result<Option<Value>, Error> {
        Err(broken())
    }

    async fn put_setting(&self, _name: &str, _value: Value) -> Result<(), Error> {
        Err(broken())
    }
}
