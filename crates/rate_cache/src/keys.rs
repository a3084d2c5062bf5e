//! Cache keys.
//!
//! A key is `group:params` where params are rendered in a fixed order, so
//! identical inputs always probe the same entry. The group (text before the
//! first `:`) is what stats and ad hoc clears operate on.

use common::CostQuery;

pub const PROVINCES: &str = "provinces";
pub const CITIES: &str = "cities";
pub const DISTRICTS: &str = "districts";
pub const SUBDISTRICTS: &str = "subdistricts";
pub const SEARCH: &str = "search";
pub const COST: &str = "cost";

/// Every group the service writes.
pub const GROUPS: [&str; 6] = [PROVINCES, CITIES, DISTRICTS, SUBDISTRICTS, SEARCH, COST];

pub fn provinces() -> String {
    PROVINCES.to_string()
}

pub fn cities(province_id: &str) -> String {
    format!("{}:province={}", CITIES, province_id.trim())
}

pub fn districts(city_id: &str) -> String {
    format!("{}:city={}", DISTRICTS, city_id.trim())
}

pub fn subdistricts(district_id: &str) -> String {
    format!("{}:district={}", SUBDISTRICTS, district_id.trim())
}

/// Search keys are case-insensitive on the query. The query goes last so a
/// `,` inside it cannot be confused with a separator.
pub fn search(query: &str, limit: u32, offset: u32) -> String {
    format!(
        "{}:limit={},offset={},q={}",
        SEARCH,
        limit,
        offset,
        query.trim().to_lowercase()
    )
}

pub fn cost(query: &CostQuery) -> String {
    format!(
        "{}:origin={},dest={},weight={},courier={},price={},subdistrict={},zip={},district={}",
        COST,
        query.origin.trim(),
        query.destination.trim(),
        query.weight,
        query.courier.trim().to_lowercase(),
        query.price.map(|p| p.as_str()).unwrap_or("-"),
        query.subdistrict_id.as_deref().map(str::trim).unwrap_or("-"),
        query.zip_code.as_deref().map(str::trim).unwrap_or("-"),
        query.use_district,
    )
}

/// Group of a key: the text before the first `:`, or the whole key.
pub fn group_of(endpoint: &str) -> &str {
    endpoint.split(':').next().unwrap_or(endpoint)
}
