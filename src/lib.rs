//! Two-tier caching for the Harvest marketplace platform.
//!
//! Provides a read-through/write-through cache with an in-process LRU layer
//! (L1) in front of Redis (L2), plus the key registry, pattern invalidation,
//! transparent compression, loader de-duplication, statistics, warming, and
//! an HTTP caching layer built on top of it.
//!
//! # Features
//!
//! - `redis` - Enable the Redis L2 tier (enabled by default). Without it, or
//!   without a configured Redis URL, the cache runs in L1-only mode with an
//!   unchanged API.
//!
//! # Examples
//!
//! ## Read-through loading
//!
//! ```no_run
//! use harvest_cache::{keys, ttl, CacheConfig, MultiLayerCache};
//!
//! # async fn example() -> harvest_cache::CacheResult<()> {
//! let cache = MultiLayerCache::new(CacheConfig::from_env());
//!
//! let details: serde_json::Value = cache
//!     .get_or_load(&keys::farm::details("farm-42"), ttl::LONG, || async {
//!         // load from the database
//!         Ok(serde_json::json!({"name": "Green Acres"}))
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Pattern invalidation
//!
//! ```no_run
//! # async fn example(cache: harvest_cache::MultiLayerCache) {
//! use harvest_cache::keys::patterns;
//!
//! // A farm edited its profile: drop every view derived from it
//! cache.invalidate_pattern(&patterns::all_farm_data("farm-42")).await;
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod keys;
pub mod memory;
pub mod middleware;
#[cfg(feature = "redis")]
pub mod redis_cache;
pub mod stats;
pub mod tiered;

pub use config::{ttl, CacheConfig};
pub use error::{CacheError, CacheResult};
pub use memory::MemoryCache;
#[cfg(feature = "redis")]
pub use redis_cache::{ConnectionState, RedisCache};
pub use stats::StatsSnapshot;
pub use tiered::MultiLayerCache;

pub mod prelude {
    pub use crate::config::{ttl, CacheConfig};
    pub use crate::error::{CacheError, CacheResult};
    pub use crate::keys::{self, KeyPattern};
    pub use crate::middleware::{HttpCacheLayer, HttpRequest, HttpResponse};
    pub use crate::stats::StatsSnapshot;
    pub use crate::tiered::MultiLayerCache;
}
