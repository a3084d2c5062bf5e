//! Primary store with an in-process safety net.
//!
//! Reads and writes go to the primary. When it fails, the operation is
//! logged and served from a [`MemoryStore`] instead, so a locked or missing
//! database degrades to a per-process cache rather than an error.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::Error;
use serde_json::Value;
use tracing::warn;

use crate::memory::MemoryStore;
use crate::store::{CacheEntry, CacheStats, CacheStore, SettingsStore};

pub struct FallbackStore<P> {
    primary: P,
    memory: MemoryStore,
}

impl<P> FallbackStore<P> {
    pub fn new(primary: P, memory: MemoryStore) -> Self {
        Self { primary, memory }
    }
}

fn newer(a: Option<CacheEntry>, b: Option<CacheEntry>) -> Option<CacheEntry> {
    match (a, b) {
        (Some(a), Some(b)) => Some(if b.updated_at > a.updated_at { b } else { a }),
        (a, b) => a.or(b),
    }
}

#[async_trait]
impl<P: CacheStore> CacheStore for FallbackStore<P> {
    async fn get(&self, endpoint: &str) -> Result<Option<CacheEntry>, Error> {
        let local = self.memory.get(endpoint).await?;
        match self.primary.get(endpoint).await {
            Ok(found) => Ok(newer(found, local)),
            Err(e) => {
                warn!(endpoint, "Cache read failed, using memory fallback: {}", e);
                Ok(local)
            }
        }
    }

    async fn put(&self, endpoint: &str, payload: Value, ttl_seconds: u64) -> Result<(), Error> {
        match self.primary.put(endpoint, payload.clone(), ttl_seconds).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(endpoint, "Cache write failed, using memory fallback: {}", e);
                self.memory.put(endpoint, payload, ttl_seconds).await
            }
        }
    }

    /// The memory map is swept even when the primary fails; the local count
    /// is logged then, since the error carries no count.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, Error> {
        let primary = self.primary.delete_older_than(cutoff).await;
        let local = self.memory.delete_older_than(cutoff).await?;
        match primary {
            Ok(deleted) => Ok(deleted + local),
            Err(e) => {
                warn!(%cutoff, local_deleted = local, "Cache sweep failed on primary store: {}", e);
                Err(e)
            }
        }
    }

    async fn delete_group(&self, group: &str) -> Result<u64, Error> {
        let primary = self.primary.delete_group(group).await;
        let local = self.memory.delete_group(group).await?;
        match primary {
            Ok(deleted) => Ok(deleted + local),
            Err(e) => {
                warn!(group, local_deleted = local, "Cache clear failed on primary store: {}", e);
                Err(e)
            }
        }
    }

    async fn stats(&self, recent_limit: usize) -> Result<CacheStats, Error> {
        match self.primary.stats(recent_limit).await {
            Ok(stats) => Ok(stats),
            Err(e) => {
                warn!("Cache stats unavailable, reporting memory fallback: {}", e);
                self.memory.stats(recent_limit).await
            }
        }
    }
}

#[async_trait]
impl<P: SettingsStore> SettingsStore for FallbackStore<P> {
    async fn get_setting(&self, name: &str) -> Result<Option<Value>, Error> {
        match self.primary.get_setting(name).await {
            Ok(Some(value)) => Ok(Some(value)),
            Ok(None) => self.memory.get_setting(name).await,
            Err(e) => {
                warn!(name, "Settings read failed, using memory fallback: {}", e);
                self.memory.get_setting(name).await
            }
        }
    }

    async fn put_setting(&self, name: &str, value: Value) -> Result<(), Error> {
        match self.primary.put_setting(name, value.clone()).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(name, "Settings write failed, using memory fallback: {}", e);
                self.memory.put_setting(name, value).await
            }
        }
    }
}
