//! The port every outbound rate-API call goes through.

use async_trait::async_trait;
use common::{City, CostOption, CostQuery, DestinationMatch, District, Error, Province, Subdistrict};

/// Raw (uncached) access to the location hierarchy and cost quotes.
///
/// Implementations perform exactly one upstream request per call and never
/// retry; callers decide what to do with failures.
#[async_trait]
pub trait LocationApi: Send + Sync {
    async fn provinces(&self) -> Result<Vec<Province>, Error>;

    async fn cities(&self, province_id: &str) -> Result<Vec<City>, Error>;

    async fn districts(&self, city_id: &str) -> Result<Vec<District>, Error>;

    async fn subdistricts(&self, district_id: &str) -> Result<Vec<Subdistrict>, Error>;

    async fn search_destinations(
        &self,
        query: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<DestinationMatch>, Error>;

    async fn shipping_cost(&self, query: &CostQuery) -> Result<Vec<CostOption>, Error>;
}
