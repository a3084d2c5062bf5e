//! Age-based sweep and ad hoc clears.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use common::Error;
use serde::Serialize;
use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::keys;
use crate::store::CacheStore;

pub const DEFAULT_RETENTION_DAYS: i64 = 60;
pub const MAX_RETENTION_DAYS: i64 = 3650;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClearReport {
    pub deleted_count: u64,
    pub cutoff: DateTime<Utc>,
    pub days: i64,
}

#[derive(Clone)]
pub struct Maintenance {
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
}

impl Maintenance {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn CacheStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Delete entries last refreshed more than `days` days ago.
    pub async fn clear_older_than(&self, days: i64) -> Result<ClearReport, Error> {
        if !(1..=MAX_RETENTION_DAYS).contains(&days) {
            return Err(Error::Validation(format!(
                "days must be between 1 and {}",
                MAX_RETENTION_DAYS
            )));
        }
        let cutoff = self.clock.now() - Duration::days(days);
        let deleted_count = self.store.delete_older_than(cutoff).await?;
        info!(days, deleted_count, cutoff = %cutoff, "Cache sweep complete");
        Ok(ClearReport {
            deleted_count,
            cutoff,
            days,
        })
    }

    /// Delete every entry in one key group (`provinces`, `cost`, ...).
    pub async fn clear_group(&self, group: &str) -> Result<u64, Error> {
        let group = group.trim();
        if !keys::GROUPS.contains(&group) {
            return Err(Error::Validation(format!(
                "Unknown endpoint group '{}', expected one of {}",
                group,
                keys::GROUPS.join(", ")
            )));
        }
        let deleted = self.store.delete_group(group).await?;
        info!(group, deleted, "Cache group cleared");
        Ok(deleted)
    }
}
