//! Typed, cached access to the location hierarchy and cost quotes.

use std::future::Future;
use std::sync::Arc;

use common::config::TtlConfig;
use common::{
    City, CostOption, CostQuery, DestinationMatch, District, Error, Province, Subdistrict,
};
use rajaongkir_client::LocationApi;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::fetcher::CacheFetcher;
use crate::keys;

/// Shortest search query, in characters, after trimming.
pub const MIN_SEARCH_LEN: usize = 2;
/// Largest page the upstream search accepts.
pub const MAX_SEARCH_LIMIT: u32 = 100;

fn required(value: &str, what: &str) -> Result<(), Error> {
    if value.trim().is_empty() {
        return Err(Error::Validation(format!("{} is required", what)));
    }
    Ok(())
}

/// Reject a search before it reaches the cache or the upstream.
pub fn validate_search(query: &str, limit: u32) -> Result<(), Error> {
    if query.trim().chars().count() < MIN_SEARCH_LEN {
        return Err(Error::Validation(format!(
            "Search query must be at least {} characters",
            MIN_SEARCH_LEN
        )));
    }
    if limit == 0 || limit > MAX_SEARCH_LIMIT {
        return Err(Error::Validation(format!(
            "limit must be between 1 and {}",
            MAX_SEARCH_LIMIT
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct LocationClient {
    api: Arc<dyn LocationApi>,
    fetcher: CacheFetcher,
    ttl: TtlConfig,
    /// Whether geography and search lookups may answer stale and refresh
    /// in the background.
    revalidate: bool,
}

impl LocationClient {
    pub fn new(api: Arc<dyn LocationApi>, fetcher: CacheFetcher, ttl: TtlConfig) -> Self {
        Self {
            api,
            fetcher,
            ttl,
            revalidate: true,
        }
    }

    /// Same cache, but every expired entry is refreshed inline before the
    /// lookup returns. Batch jobs use this so each upstream call completes
    /// before the next one starts.
    pub fn refreshing(&self) -> Self {
        Self {
            revalidate: false,
            ..self.clone()
        }
    }

    async fn lookup<T, F, Fut>(&self, endpoint: &str, ttl_seconds: u64, upstream: F) -> Result<T, Error>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, Error>> + Send + 'static,
    {
        if self.revalidate {
            self.fetcher.fetch_revalidating(endpoint, ttl_seconds, upstream).await
        } else {
            self.fetcher.fetch(endpoint, ttl_seconds, upstream).await
        }
    }

    pub async fn provinces(&self) -> Result<Vec<Province>, Error> {
        let api = Arc::clone(&self.api);
        self.lookup(&keys::provinces(), self.ttl.geography_secs, move || async move {
            api.provinces().await
        })
        .await
    }

    /// Cities of one province, or of every province when `province_id` is
    /// absent or blank.
    pub async fn cities(&self, province_id: Option<&str>) -> Result<Vec<City>, Error> {
        match province_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => self.cities_of(id).await,
            None => self.all_cities().await,
        }
    }

    async fn cities_of(&self, province_id: &str) -> Result<Vec<City>, Error> {
        let api = Arc::clone(&self.api);
        let parent = province_id.to_string();
        self.lookup(&keys::cities(province_id), self.ttl.geography_secs, move || async move {
            let mut cities = api.cities(&parent).await?;
            for city in cities.iter_mut().filter(|c| c.province_id.is_empty()) {
                city.province_id = parent.clone();
            }
            Ok(cities)
        })
        .await
    }

    /// National list, assembled from the per-province entries so it shares
    /// their cache. Any failure fails the whole list.
    async fn all_cities(&self) -> Result<Vec<City>, Error> {
        let provinces = self.provinces().await?;
        let mut all = Vec::new();
        for province in &provinces {
            all.extend(self.cities_of(&province.id).await?);
        }
        debug!(provinces = provinces.len(), cities = all.len(), "Assembled national city list");
        Ok(all)
    }

    pub async fn districts(&self, city_id: &str) -> Result<Vec<District>, Error> {
        required(city_id, "city")?;
        let api = Arc::clone(&self.api);
        let parent = city_id.trim().to_string();
        self.lookup(&keys::districts(city_id), self.ttl.geography_secs, move || async move {
            let mut districts = api.districts(&parent).await?;
            for district in districts.iter_mut().filter(|d| d.city_id.is_empty()) {
                district.city_id = parent.clone();
            }
            Ok(districts)
        })
        .await
    }

    pub async fn subdistricts(&self, district_id: &str) -> Result<Vec<Subdistrict>, Error> {
        required(district_id, "district")?;
        let api = Arc::clone(&self.api);
        let parent = district_id.trim().to_string();
        self.lookup(
            &keys::subdistricts(district_id),
            self.ttl.geography_secs,
            move || async move {
                let mut subdistricts = api.subdistricts(&parent).await?;
                for sub in subdistricts.iter_mut().filter(|s| s.district_id.is_empty()) {
                    sub.district_id = parent.clone();
                }
                Ok(subdistricts)
            },
        )
        .await
    }

    /// Cost quotes are volatile, so an expired quote is only ever served as
    /// a fallback for a failed refresh, never in place of one.
    pub async fn shipping_cost(&self, query: &CostQuery) -> Result<Vec<CostOption>, Error> {
        query.validate()?;
        let api = Arc::clone(&self.api);
        self.fetcher
            .fetch(&keys::cost(query), self.ttl.cost_secs, || async move {
                api.shipping_cost(query).await
            })
            .await
    }

    pub async fn search(
        &self,
        query: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<DestinationMatch>, Error> {
        validate_search(query, limit)?;
        let api = Arc::clone(&self.api);
        let term = query.trim().to_string();
        self.lookup(
            &keys::search(query, limit, offset),
            self.ttl.search_secs,
            move || async move { api.search_destinations(&term, limit, offset).await },
        )
        .await
    }
}
