//! Wiring: stores, fetcher and the services built on them.

use std::sync::Arc;

use common::config::ServiceConfig;
use common::Error;
use rajaongkir_client::{LocationApi, RajaOngkirClient};
use rate_cache::{
    CacheFetcher, CacheStore, CacheWarmer, FallbackStore, FetchPolicy, LocationClient,
    Maintenance, MemoryStore, OriginSettings, PreloadCrawler, SettingsStore, SqliteStore,
};
use tracing::{info, warn};

use crate::api::AppState;

/// The cache and settings stores, usually the same object behind two ports.
#[derive(Clone)]
pub struct Stores {
    pub cache: Arc<dyn CacheStore>,
    pub settings: Arc<dyn SettingsStore>,
}

impl Stores {
    pub fn memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            cache: store.clone(),
            settings: store,
        }
    }
}

/// Open the SQLite store, wrapped in the in-memory fallback when enabled.
pub fn open_stores(config: &ServiceConfig) -> Result<Stores, Error> {
    let fallback = config.cache.memory_fallback;
    match SqliteStore::open(&config.database_path) {
        Ok(sqlite) if fallback => {
            let store = Arc::new(FallbackStore::new(sqlite, MemoryStore::new()));
            Ok(Stores {
                cache: store.clone(),
                settings: store,
            })
        }
        Ok(sqlite) => {
            let store = Arc::new(sqlite);
            Ok(Stores {
                cache: store.clone(),
                settings: store,
            })
        }
        Err(e) if fallback => {
            warn!(
                path = %config.database_path,
                "Cache database unavailable, running on in-memory cache: {}", e
            );
            Ok(Stores::memory())
        }
        Err(e) => Err(e),
    }
}

pub fn upstream_client(config: &ServiceConfig) -> Result<Arc<dyn LocationApi>, Error> {
    let client = RajaOngkirClient::new(&config.upstream)?;
    info!(
        base_url = %config.upstream.base_url,
        rps = config.upstream.requests_per_second,
        "Rate API client ready"
    );
    Ok(Arc::new(client))
}

/// Build every service from already-constructed dependencies.
pub fn build_state(config: &ServiceConfig, api: Arc<dyn LocationApi>, stores: Stores) -> AppState {
    let fetcher = CacheFetcher::new(stores.cache.clone(), FetchPolicy::from(&config.cache));
    let locations = Arc::new(LocationClient::new(api, fetcher, config.ttl));

    AppState {
        warmer: Arc::new(CacheWarmer::new(locations.clone(), config.warm.clone())),
        crawler: Arc::new(PreloadCrawler::new(locations.clone())),
        maintenance: Arc::new(Maintenance::new(stores.cache.clone())),
        settings: Arc::new(OriginSettings::new(
            stores.settings,
            config.default_origin.clone(),
        )),
        store: stores.cache,
        locations,
        admin_token: Arc::from(config.admin_token.as_str()),
        preload_defaults: config.preload.clone(),
        retention_days: i64::from(config.cache.retention_days),
    }
}
