//! Cache-aside layer in front of the shipping-rate API.
//!
//! Everything that reaches the upstream goes through [`CacheFetcher`], which
//! reads and writes a [`CacheStore`]. The location client, warmer and preload
//! crawler are thin drivers on top of it.

pub mod clock;
pub mod fallback;
pub mod fetcher;
pub mod keys;
pub mod locations;
pub mod maintenance;
pub mod memory;
pub mod preload;
pub mod settings;
pub mod sqlite;
pub mod store;
pub mod warmer;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use clock::{Clock, SystemClock};
pub use fallback::FallbackStore;
pub use fetcher::{CacheFetcher, FetchPolicy};
pub use locations::LocationClient;
pub use maintenance::{ClearReport, Maintenance};
pub use memory::MemoryStore;
pub use preload::{PreloadCrawler, PreloadOptions, PreloadSummary};
pub use settings::OriginSettings;
pub use sqlite::SqliteStore;
pub use store::{CacheEntry, CacheStats, CacheStore, EndpointCount, RecentEntry, SettingsStore};
pub use warmer::{CacheWarmer, WarmKind, WarmReport};
