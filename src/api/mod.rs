//! HTTP surface: admin cache controls and public location/cost lookups.

pub mod auth;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use common::config::PreloadConfig;
use rate_cache::{
    CacheStore, CacheWarmer, LocationClient, Maintenance, OriginSettings, PreloadCrawler,
};
use tower_http::trace::TraceLayer;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub locations: Arc<LocationClient>,
    pub warmer: Arc<CacheWarmer>,
    pub crawler: Arc<PreloadCrawler>,
    pub maintenance: Arc<Maintenance>,
    pub settings: Arc<OriginSettings>,
    pub store: Arc<dyn CacheStore>,
    /// Empty means privileged routes always answer 401.
    pub admin_token: Arc<str>,
    pub preload_defaults: PreloadConfig,
    pub retention_days: i64,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route(
            "/cache/warm",
            get(routes::cache_stats).post(routes::warm_cache),
        )
        .route("/cache/clear", post(routes::clear_cache))
        .route("/cache/preload", post(routes::preload))
        .route("/locations/provinces", get(routes::provinces))
        .route("/locations/cities", get(routes::cities))
        .route("/locations/districts", get(routes::districts))
        .route("/locations/subdistricts", get(routes::subdistricts))
        .route("/locations/search", get(routes::search))
        .route("/shipping/cost", post(routes::shipping_cost))
        .route(
            "/settings/shipping-origin",
            get(routes::get_origin).put(routes::put_origin),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
