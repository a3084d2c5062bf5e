//! Service configuration types.

use serde::{Deserialize, Serialize};

use crate::types::ShippingOrigin;

/// Top-level service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// SQLite file holding the cache and settings tables.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Bearer token for privileged endpoints. Empty disables them.
    #[serde(default)]
    pub admin_token: String,

    /// Rate API connection parameters.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Per-endpoint cache lifetimes.
    #[serde(default)]
    pub ttl: TtlConfig,

    /// Cache-aside behaviour.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Defaults for the full-tree crawler.
    #[serde(default)]
    pub preload: PreloadConfig,

    /// Curated warming inputs.
    #[serde(default)]
    pub warm: WarmConfig,

    /// Origin returned when no shipping origin has been saved.
    #[serde(default)]
    pub default_origin: ShippingOrigin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

/// Connection parameters for the RajaOngkir (Komerce) API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Outbound request budget shared by every caller.
    #[serde(default = "default_rps")]
    pub requests_per_second: u32,
}

/// Cache lifetimes (seconds).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TtlConfig {
    /// Provinces, cities, districts and subdistricts.
    #[serde(default = "default_geography_ttl")]
    pub geography_secs: u64,

    /// Free-text destination searches.
    #[serde(default = "default_search_ttl")]
    pub search_secs: u64,

    /// Shipping-cost quotes.
    #[serde(default = "default_cost_ttl")]
    pub cost_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Serve an expired entry when the upstream call fails.
    #[serde(default = "default_true")]
    pub allow_stale_on_error: bool,

    /// Serve expired reference data immediately and refresh it in the background.
    #[serde(default)]
    pub stale_while_revalidate: bool,

    /// Keep a process-local copy when the database is unavailable.
    #[serde(default = "default_true")]
    pub memory_fallback: bool,

    /// Age (days) after which maintenance deletes an entry.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreloadConfig {
    /// Delay between consecutive lookups.
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,

    /// 1 = cities, 2 = +districts, 3 = +subdistricts.
    #[serde(default = "default_depth")]
    pub depth: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmConfig {
    /// High-traffic cities whose districts and subdistricts are warmed.
    #[serde(default = "default_popular_city_ids")]
    pub popular_city_ids: Vec<String>,

    /// Common destination search terms.
    #[serde(default = "default_popular_searches")]
    pub popular_searches: Vec<String>,

    /// Couriers quoted when warming the origin cost matrix.
    #[serde(default = "default_couriers")]
    pub couriers: Vec<String>,

    /// Parcel weight used for representative quotes.
    #[serde(default = "default_sample_weight")]
    pub sample_weight_grams: u32,

    /// Max lookups in flight during one warming run.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Scheduled warming period; 0 disables the schedule.
    #[serde(default)]
    pub interval_secs: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────

const DAY_SECS: u64 = 24 * 60 * 60;

fn default_true() -> bool {
    true
}

fn default_database_path() -> String {
    "data/ongkir-cache.db".into()
}
fn default_bind_addr() -> String {
    "0.0.0.0:8080".into()
}

fn default_base_url() -> String {
    "https://rajaongkir.komerce.id/api/v1".into()
}
fn default_timeout() -> u64 {
    15
}
fn default_rps() -> u32 {
    5
}

fn default_geography_ttl() -> u64 {
    30 * DAY_SECS
}
fn default_search_ttl() -> u64 {
    7 * DAY_SECS
}
fn default_cost_ttl() -> u64 {
    60 * 60
}

fn default_retention_days() -> u32 {
    60
}

fn default_throttle_ms() -> u64 {
    200
}
fn default_depth() -> u8 {
    3
}

fn default_popular_city_ids() -> Vec<String> {
    // Jakarta (5 cities), Bandung, Surabaya, Medan, Semarang, Makassar, Yogyakarta, Denpasar.
    ["151", "152", "153", "154", "155", "23", "444", "278", "399", "254", "501", "114"]
        .iter()
        .map(|id| id.to_string())
        .collect()
}

fn default_popular_searches() -> Vec<String> {
    [
        "Jakarta",
        "Surabaya",
        "Bandung",
        "Medan",
        "Semarang",
        "Makassar",
        "Palembang",
        "Tangerang",
        "Depok",
        "Bekasi",
        "Bogor",
        "Yogyakarta",
        "Malang",
        "Denpasar",
        "Batam",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_couriers() -> Vec<String> {
    vec!["jne".into(), "pos".into(), "tiki".into()]
}
fn default_sample_weight() -> u32 {
    1000
}
fn default_concurrency() -> usize {
    4
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_base_url(),
            timeout_secs: default_timeout(),
            requests_per_second: default_rps(),
        }
    }
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            geography_secs: default_geography_ttl(),
            search_secs: default_search_ttl(),
            cost_secs: default_cost_ttl(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            allow_stale_on_error: true,
            stale_while_revalidate: false,
            memory_fallback: true,
            retention_days: default_retention_days(),
        }
    }
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            throttle_ms: default_throttle_ms(),
            depth: default_depth(),
        }
    }
}

impl Default for WarmConfig {
    fn default() -> Self {
        Self {
            popular_city_ids: default_popular_city_ids(),
            popular_searches: default_popular_searches(),
            couriers: default_couriers(),
            sample_weight_grams: default_sample_weight(),
            concurrency: default_concurrency(),
            interval_secs: 0,
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database_path: default_database_path(),
            admin_token: String::new(),
            upstream: UpstreamConfig::default(),
            ttl: TtlConfig::default(),
            cache: CacheConfig::default(),
            preload: PreloadConfig::default(),
            warm: WarmConfig::default(),
            default_origin: ShippingOrigin::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let cfg: ServiceConfig = serde_json::from_str(
            r#"{"ttl": {"cost_secs": 120}, "warm": {"couriers": ["jne"]}}"#,
        )
        .expect("partial config should deserialize");

        assert_eq!(cfg.ttl.cost_secs, 120);
        assert_eq!(cfg.ttl.geography_secs, 30 * DAY_SECS);
        assert_eq!(cfg.warm.couriers, vec!["jne".to_string()]);
        assert_eq!(cfg.warm.popular_searches.len(), 15);
        assert_eq!(cfg.preload.throttle_ms, 200);
        assert_eq!(cfg.default_origin.city_id, "152");
    }
}
