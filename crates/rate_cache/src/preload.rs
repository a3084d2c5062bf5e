//! Full-tree crawler.
//!
//! Walks province -> cities -> districts -> subdistricts strictly in order,
//! one lookup at a time, sleeping `throttle` between consecutive lookups.
//! A failing node is logged and counted; its subtree is skipped and the
//! walk continues. Only a provinces failure aborts.

use std::sync::Arc;
use std::time::Duration;

use common::config::PreloadConfig;
use common::Error;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::locations::LocationClient;

pub const MAX_THROTTLE_MS: i64 = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreloadOptions {
    pub throttle: Duration,
    /// 1 = cities, 2 = +districts, 3 = +subdistricts.
    pub depth: u8,
}

impl PreloadOptions {
    /// Validate caller-supplied values, filling gaps from `defaults`.
    pub fn new(
        throttle_ms: Option<i64>,
        depth: Option<i64>,
        defaults: &PreloadConfig,
    ) -> Result<Self, Error> {
        let throttle_ms = throttle_ms.unwrap_or(defaults.throttle_ms as i64);
        if !(0..=MAX_THROTTLE_MS).contains(&throttle_ms) {
            return Err(Error::Validation(format!(
                "throttleMs must be between 0 and {}",
                MAX_THROTTLE_MS
            )));
        }

        let depth = depth.unwrap_or(i64::from(defaults.depth));
        if !(1..=3).contains(&depth) {
            return Err(Error::Validation("depth must be 1, 2 or 3".into()));
        }

        Ok(Self {
            throttle: Duration::from_millis(throttle_ms as u64),
            depth: depth as u8,
        })
    }
}

impl Default for PreloadOptions {
    fn default() -> Self {
        Self {
            throttle: Duration::from_millis(200),
            depth: 3,
        }
    }
}

/// Nodes fetched per level, plus lookups that failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PreloadSummary {
    pub provinces: usize,
    pub cities: usize,
    pub districts: usize,
    pub subdistricts: usize,
    pub failed: usize,
}

/// Sleeps before every lookup except the first.
struct Throttle {
    delay: Duration,
    primed: bool,
}

impl Throttle {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            primed: false,
        }
    }

    async fn pace(&mut self) {
        if self.primed && !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.primed = true;
    }
}

#[derive(Clone)]
pub struct PreloadCrawler {
    locations: Arc<LocationClient>,
}

impl PreloadCrawler {
    /// Lookups never answer stale with a background refresh, so each
    /// upstream call finishes before the next one is paced and issued.
    pub fn new(locations: Arc<LocationClient>) -> Self {
        Self {
            locations: Arc::new(locations.refreshing()),
        }
    }

    pub async fn run(&self, options: PreloadOptions) -> Result<PreloadSummary, Error> {
        info!(
            throttle_ms = options.throttle.as_millis() as u64,
            depth = options.depth,
            "Preload started"
        );
        let mut throttle = Throttle::new(options.throttle);
        let mut summary = PreloadSummary::default();

        throttle.pace().await;
        let provinces = self.locations.provinces().await?;
        summary.provinces = provinces.len();

        for province in &provinces {
            throttle.pace().await;
            let cities = match self.locations.cities(Some(&province.id)).await {
                Ok(cities) => cities,
                Err(e) => {
                    warn!(province = %province.id, "Preload cities failed: {}", e);
                    summary.failed += 1;
                    continue;
                }
            };
            summary.cities += cities.len();
            debug!(province = %province.id, cities = cities.len(), "Preloaded cities");

            if options.depth < 2 {
                continue;
            }
            for city in &cities {
                throttle.pace().await;
                let districts = match self.locations.districts(&city.id).await {
                    Ok(districts) => districts,
                    Err(e) => {
                        warn!(city = %city.id, "Preload districts failed: {}", e);
                        summary.failed += 1;
                        continue;
                    }
                };
                summary.districts += districts.len();

                if options.depth < 3 {
                    continue;
                }
                for district in &districts {
                    throttle.pace().await;
                    match self.locations.subdistricts(&district.id).await {
                        Ok(subs) => summary.subdistricts += subs.len(),
                        Err(e) => {
                            warn!(district = %district.id, "Preload subdistricts failed: {}", e);
                            summary.failed += 1;
                        }
                    }
                }
            }
        }

        info!(
            provinces = summary.provinces,
            cities = summary.cities,
            districts = summary.districts,
            subdistricts = summary.subdistricts,
            failed = summary.failed,
            "Preload complete"
        );
        Ok(summary)
    }
}
