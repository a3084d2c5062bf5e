//! Route handlers.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::Json;
use common::{
    City, CostOption, CostQuery, DestinationMatch, District, Error, PriceTier, Province,
    ShippingOrigin, Subdistrict,
};
use rate_cache::{CacheStats, PreloadOptions, PreloadSummary, WarmKind, WarmReport};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::auth::AdminGuard;
use super::error::ApiError;
use super::AppState;

type ApiResult<T> = Result<Json<T>, ApiError>;

const RECENT_ENTRIES: usize = 10;
const DEFAULT_SEARCH_LIMIT: u32 = 10;

/// Parse an optional JSON body; an empty body yields `T::default()`.
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::bad_request(format!("Invalid JSON body: {}", e)))
}

fn parse_number<T: std::str::FromStr>(raw: Option<&str>, name: &str) -> Result<Option<T>, ApiError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => s
            .parse::<T>()
            .map(Some)
            .map_err(|_| ApiError::bad_request(format!("{} must be a number", name))),
    }
}

pub async fn health() -> &'static str {
    "OK"
}

// ── Admin ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct WarmParams {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub origin_city_id: Option<String>,
}

pub async fn warm_cache(
    _admin: AdminGuard,
    State(state): State<AppState>,
    Query(params): Query<WarmParams>,
) -> ApiResult<WarmReport> {
    let kind = WarmKind::parse(params.kind.as_deref(), params.origin_city_id.as_deref())?;
    Ok(Json(state.warmer.warm(&kind).await?))
}

pub async fn cache_stats(_admin: AdminGuard, State(state): State<AppState>) -> ApiResult<CacheStats> {
    Ok(Json(state.store.stats(RECENT_ENTRIES).await?))
}

#[derive(Debug, Deserialize)]
pub struct ClearParams {
    pub days: Option<String>,
    pub endpoint: Option<String>,
}

pub async fn clear_cache(
    _admin: AdminGuard,
    State(state): State<AppState>,
    Query(params): Query<ClearParams>,
) -> ApiResult<Value> {
    if let Some(group) = params.endpoint.as_deref().filter(|g| !g.trim().is_empty()) {
        let deleted = state.maintenance.clear_group(group).await?;
        return Ok(Json(serde_json::json!({
            "success": true,
            "deleted_count": deleted,
            "endpoint": group.trim(),
            "message": format!("Cleared {} cached {} entries", deleted, group.trim()),
        })));
    }

    let days = parse_number::<i64>(params.days.as_deref(), "days")?.unwrap_or(state.retention_days);
    let report = state.maintenance.clear_older_than(days).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "deleted_count": report.deleted_count,
        "cutoff_date": report.cutoff,
        "message": format!(
            "Cleared {} cache entries older than {} days",
            report.deleted_count, report.days
        ),
    })))
}

#[derive(Debug, Default, Deserialize)]
pub struct PreloadBody {
    #[serde(rename = "throttleMs")]
    pub throttle_ms: Option<i64>,
    pub depth: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct PreloadResponse {
    pub message: &'static str,
    pub summary: PreloadSummary,
}

pub async fn preload(
    _admin: AdminGuard,
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<PreloadResponse> {
    let body: PreloadBody = parse_body(&body)?;
    let options = PreloadOptions::new(body.throttle_ms, body.depth, &state.preload_defaults)?;
    let summary = state.crawler.run(options).await?;
    Ok(Json(PreloadResponse {
        message: "Preload complete",
        summary,
    }))
}

// ── Locations ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ParentParams {
    pub province: Option<String>,
    pub city: Option<String>,
    pub district: Option<String>,
}

pub async fn provinces(State(state): State<AppState>) -> ApiResult<Vec<Province>> {
    Ok(Json(state.locations.provinces().await?))
}

pub async fn cities(
    State(state): State<AppState>,
    Query(params): Query<ParentParams>,
) -> ApiResult<Vec<City>> {
    Ok(Json(state.locations.cities(params.province.as_deref()).await?))
}

pub async fn districts(
    State(state): State<AppState>,
    Query(params): Query<ParentParams>,
) -> ApiResult<Vec<District>> {
    let city = params.city.unwrap_or_default();
    Ok(Json(state.locations.districts(&city).await?))
}

pub async fn subdistricts(
    State(state): State<AppState>,
    Query(params): Query<ParentParams>,
) -> ApiResult<Vec<Subdistrict>> {
    let district = params.district.unwrap_or_default();
    Ok(Json(state.locations.subdistricts(&district).await?))
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
}

pub async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Vec<DestinationMatch>> {
    let limit = parse_number::<u32>(params.limit.as_deref(), "limit")?.unwrap_or(DEFAULT_SEARCH_LIMIT);
    let offset = parse_number::<u32>(params.offset.as_deref(), "offset")?.unwrap_or(0);
    let q = params.q.unwrap_or_default();
    Ok(Json(state.locations.search(&q, limit, offset).await?))
}

// ── Shipping cost ─────────────────────────────────────────────────────

/// Storefront clients send ids and weight as either numbers or strings.
#[derive(Debug, Default, Deserialize)]
pub struct CostBody {
    pub origin: Option<Value>,
    pub destination: Option<Value>,
    pub weight: Option<Value>,
    pub courier: Option<String>,
    pub price: Option<String>,
    pub subdistrict_id: Option<Value>,
    pub zip_code: Option<Value>,
    #[serde(rename = "useDistrict")]
    pub use_district: Option<bool>,
}

fn loose_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn loose_weight(value: Option<&Value>) -> u32 {
    match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f > 0.0).map(|f| f.ceil() as u64))
            .and_then(|w| u32::try_from(w).ok())
            .unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse::<u32>().unwrap_or(0),
        _ => 0,
    }
}

impl CostBody {
    fn into_query(self) -> Result<CostQuery, Error> {
        let price = match self.price.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
            None => None,
            Some("lowest") => Some(PriceTier::Lowest),
            Some("highest") => Some(PriceTier::Highest),
            Some(other) => {
                return Err(Error::Validation(format!(
                    "price must be 'lowest' or 'highest', got '{}'",
                    other
                )))
            }
        };
        Ok(CostQuery {
            origin: loose_string(self.origin.as_ref()).unwrap_or_default(),
            destination: loose_string(self.destination.as_ref()).unwrap_or_default(),
            weight: loose_weight(self.weight.as_ref()),
            courier: self.courier.unwrap_or_default().trim().to_string(),
            price,
            subdistrict_id: loose_string(self.subdistrict_id.as_ref()),
            zip_code: loose_string(self.zip_code.as_ref()),
            use_district: self.use_district.unwrap_or(false),
        })
    }
}

pub async fn shipping_cost(State(state): State<AppState>, body: Bytes) -> ApiResult<Vec<CostOption>> {
    let body: CostBody = parse_body(&body)?;
    let query = body.into_query()?;
    Ok(Json(state.locations.shipping_cost(&query).await?))
}

// ── Settings ──────────────────────────────────────────────────────────

pub async fn get_origin(State(state): State<AppState>) -> Json<ShippingOrigin> {
    Json(state.settings.get().await)
}

pub async fn put_origin(
    _admin: AdminGuard,
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<ShippingOrigin> {
    let origin: ShippingOrigin = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("Invalid shipping origin: {}", e)))?;
    let saved = state.settings.set(origin).await?;
    info!(city_id = %saved.city_id, "Shipping origin updated");
    Ok(Json(saved))
}
