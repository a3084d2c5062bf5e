//! HTTP client for the RajaOngkir (Komerce) v1 API.

use std::time::Duration;

use async_trait::async_trait;
use common::config::UpstreamConfig;
use common::{
    City, CostOption, CostQuery, DestinationMatch, District, Error, Province, Subdistrict,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::api::LocationApi;
use crate::cost::normalize_costs;
use crate::rate_limit::RateLimiter;

/// Key value shipped in sample `.env` files; never a real credential.
const PLACEHOLDER_KEY: &str = "your_rajaongkir_api_key_here";

/// Rate-limited client for the destination and cost endpoints.
#[derive(Debug, Clone)]
pub struct RajaOngkirClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    limiter: RateLimiter,
}

// ── Response envelope ─────────────────────────────────────────────────

/// Every endpoint wraps its payload as `{meta, data}`.
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    #[serde(default)]
    pub meta: Meta,
    pub data: Option<T>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Meta {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub code: Option<u16>,
    #[serde(default)]
    pub status: Value,
}

impl Meta {
    /// The API reports success as `"success"` on most endpoints and `true` on a few.
    pub fn is_success(&self) -> bool {
        match &self.status {
            Value::String(s) => s.eq_ignore_ascii_case("success"),
            Value::Bool(b) => *b,
            Value::Null => self.code.map_or(true, |c| c == 200),
            _ => false,
        }
    }
}

/// Unwrap an envelope body, treating a missing `data` as an empty list.
pub fn parse_envelope<T: DeserializeOwned>(status: u16, body: &str) -> Result<Vec<T>, Error> {
    let envelope: Envelope<Vec<T>> = serde_json::from_str(body)?;
    if !envelope.meta.is_success() {
        return Err(Error::RajaOngkirApi {
            status: envelope.meta.code.unwrap_or(status),
            message: envelope.meta.message,
        });
    }
    Ok(envelope.data.unwrap_or_default())
}

fn truncate(body: &str) -> String {
    body.chars().take(500).collect()
}

// ── Implementation ────────────────────────────────────────────────────

impl RajaOngkirClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self, Error> {
        let api_key = config.api_key.trim();
        if api_key.is_empty() || api_key == PLACEHOLDER_KEY {
            return Err(Error::Config(
                "RAJAONGKIR_API_KEY is not configured".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .user_agent("ongkir-cache/0.1")
            .pool_max_idle_per_host(4)
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| Error::Http(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            limiter: RateLimiter::per_second(config.requests_per_second),
        })
    }

    async fn send(&self, request: reqwest::RequestBuilder, path: &str) -> Result<(u16, String), Error> {
        self.limiter.wait().await;

        let resp = request
            .header("key", &self.api_key)
            .bearer_auth(&self.api_key)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| Error::Http(format!("{}: {}", path, e)))?;

        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| Error::Http(format!("{}: failed to read body: {}", path, e)))?;
        Ok((status, body))
    }

    fn interpret<T: DeserializeOwned>(path: &str, status: u16, body: &str) -> Result<Vec<T>, Error> {
        match status {
            200 => parse_envelope(status, body),
            404 => {
                debug!("{} returned 404, treating as empty", path);
                Ok(Vec::new())
            }
            _ => {
                let message = serde_json::from_str::<Envelope<Value>>(body)
                    .ok()
                    .map(|e| e.meta.message)
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| truncate(body));
                Err(Error::RajaOngkirApi { status, message })
            }
        }
    }

    async fn get_list<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, Error> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);
        let (status, body) = self.send(self.client.get(&url).query(query), path).await?;
        Self::interpret(path, status, &body)
    }
}

/// Form fields for a cost request, optional ones only when set.
pub fn cost_form(query: &CostQuery) -> Vec<(&'static str, String)> {
    let mut form = vec![
        ("origin", query.origin.clone()),
        ("destination", query.destination.clone()),
        ("weight", query.weight.to_string()),
        ("courier", query.courier.clone()),
    ];
    if let Some(price) = query.price {
        form.push(("price", price.as_str().to_string()));
    }
    if let Some(id) = &query.subdistrict_id {
        form.push(("subdistrict_id", id.clone()));
    }
    if let Some(zip) = &query.zip_code {
        form.push(("zip_code", zip.clone()));
    }
    form
}

#[async_trait]
impl LocationApi for RajaOngkirClient {
    async fn provinces(&self) -> Result<Vec<Province>, Error> {
        self.get_list("/destination/province", &[]).await
    }

    async fn cities(&self, province_id: &str) -> Result<Vec<City>, Error> {
        self.get_list(&format!("/destination/city/{}", province_id), &[])
            .await
    }

    async fn districts(&self, city_id: &str) -> Result<Vec<District>, Error> {
        self.get_list(&format!("/destination/district/{}", city_id), &[])
            .await
    }

    async fn subdistricts(&self, district_id: &str) -> Result<Vec<Subdistrict>, Error> {
        self.get_list(&format!("/destination/sub-district/{}", district_id), &[])
            .await
    }

    async fn search_destinations(
        &self,
        query: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<DestinationMatch>, Error> {
        let params = [
            ("search", query.to_string()),
            ("limit", limit.to_string()),
            ("offset", offset.to_string()),
        ];
        let hits: Vec<DestinationMatch> = self
            .get_list("/destination/domestic-destination", &params)
            .await?;
        Ok(hits.into_iter().map(DestinationMatch::normalized).collect())
    }

    async fn shipping_cost(&self, query: &CostQuery) -> Result<Vec<CostOption>, Error> {
        let path = if query.use_district {
            "/calculate/district/domestic-cost"
        } else {
            "/calculate/domestic-cost"
        };
        let url = format!("{}{}", self.base_url, path);
        debug!(
            "POST {} origin={} destination={} courier={}",
            url, query.origin, query.destination, query.courier
        );

        let form = cost_form(query);
        let (status, body) = self.send(self.client.post(&url).form(&form), path).await?;
        let items: Vec<Value> = Self::interpret(path, status, &body)?;
        Ok(normalize_costs(&items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::PriceTier;

    #[test]
    fn test_parse_province_envelope() {
        let body = r#"{
            "meta": {"message": "Success Get Province", "code": 200, "status": "success"},
            "data": [{"id": 1, "name": "BALI"}, {"id": "2", "name": "BANGKA BELITUNG"}]
        }"#;
        let provinces: Vec<Province> = parse_envelope(200, body).expect("should parse");
        assert_eq!(provinces.len(), 2);
        assert_eq!(provinces[0].id, "1");
        assert_eq!(provinces[1].name, "BANGKA BELITUNG");
    }

    #[test]
    fn test_null_data_is_empty() {
        let body = r#"{"meta": {"message": "ok", "code": 200, "status": "success"}, "data": null}"#;
        let cities: Vec<City> = parse_envelope(200, body).expect("should parse");
        assert!(cities.is_empty());
    }

    #[test]
    fn test_failed_meta_is_api_error() {
        let body = r#"{"meta": {"message": "Invalid Api key", "code": 401, "status": "error"}, "data": null}"#;
        let err = parse_envelope::<Province>(200, body).expect_err("should fail");
        match err {
            Error::RajaOngkirApi { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "Invalid Api key");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_404_is_empty_and_500_is_error() {
        let empty: Vec<District> = RajaOngkirClient::interpret(
            "/destination/district/9",
            404,
            r#"{"meta": {"message": "Data not found", "code": 404, "status": "failed"}}"#,
        )
        .expect("404 should be empty");
        assert!(empty.is_empty());

        let err = RajaOngkirClient::interpret::<District>("/destination/district/9", 500, "boom")
            .expect_err("500 should fail");
        assert!(err.is_upstream());
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_placeholder_key_rejected() {
        let mut cfg = UpstreamConfig::default();
        assert!(matches!(RajaOngkirClient::new(&cfg), Err(Error::Config(_))));

        cfg.api_key = PLACEHOLDER_KEY.to_string();
        assert!(matches!(RajaOngkirClient::new(&cfg), Err(Error::Config(_))));
    }

    #[test]
    fn test_cost_form_includes_optional_fields_when_set() {
        let mut query = CostQuery::new("152", "444", 1000, "jne:pos");
        assert_eq!(cost_form(&query).len(), 4);

        query.price = Some(PriceTier::Lowest);
        query.zip_code = Some("60111".into());
        let form = cost_form(&query);
        assert_eq!(form.len(), 6);
        assert!(form.contains(&("price", "lowest".to_string())));
        assert!(form.contains(&("zip_code", "60111".to_string())));
    }
}
