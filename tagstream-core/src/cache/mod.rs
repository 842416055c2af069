//! Cache-aside storage for tag values.
//!
//! Two key spaces per tag: instantaneous values keyed by timestamp, and
//! aggregates keyed by a composite range string (see
//! [`range_key`](crate::aggregation::range_key)). Caches never fail a store
//! operation: an unreachable or poisoned cache reports a miss and drops the
//! write.

mod hashed;
mod memory;
mod redis;

pub use self::hashed::HashedMemoryCache;
pub use self::memory::MemoryCache;
pub use self::redis::RedisCache;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::sync::Arc;
use tracing::info;

use crate::config::{CacheConfig, CacheTechnology};
use crate::dates::format_canonical;
use crate::error::Result;

#[async_trait]
pub trait Cache: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Opens the cache; networked variants verify the server responds.
    async fn connect(&self) -> Result<()>;

    /// Releases resources and forgets cached entries held in process.
    async fn disconnect(&self) -> Result<()>;

    async fn get(&self, tag: &str, date: NaiveDateTime) -> Option<f32>;

    async fn set(&self, tag: &str, date: NaiveDateTime, value: f32);

    async fn get_str(&self, tag: &str, key: &str) -> Option<f32>;

    async fn set_str(&self, tag: &str, key: &str, value: f32);
}

/// Cache that never holds anything.
#[derive(Debug, Default, Clone)]
pub struct NoCache;

#[async_trait]
impl Cache for NoCache {
    fn name(&self) -> &str {
        "none"
    }

    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    async fn get(&self, _tag: &str, _date: NaiveDateTime) -> Option<f32> {
        None
    }

    async fn set(&self, _tag: &str, _date: NaiveDateTime, _value: f32) {}

    async fn get_str(&self, _tag: &str, _key: &str) -> Option<f32> {
        None
    }

    async fn set_str(&self, _tag: &str, _key: &str, _value: f32) {}
}

/// Builds and connects the cache described by `config`.
pub async fn from_config(config: &CacheConfig) -> Result<Arc<dyn Cache>> {
    let cache: Arc<dyn Cache> = match config.technology {
        CacheTechnology::None => Arc::new(NoCache),
        CacheTechnology::Memory => Arc::new(MemoryCache::new(config.shards)),
        CacheTechnology::Hashed => Arc::new(HashedMemoryCache::new(config.shards)),
        CacheTechnology::Redis => Arc::new(RedisCache::new(config)?),
    };
    cache.connect().await?;
    info!(cache = %config.name, technology = cache.name(), "cache ready");
    Ok(cache)
}

/// Cache field for a point value. Every cache variant keys points at whole
/// seconds, the precision timestamps are rendered with in queries.
pub(crate) fn point_key(date: NaiveDateTime) -> String {
    format_canonical(date)
}

/// Shard index for `key` among `shards` stripes.
pub(crate) fn shard_of<K: std::hash::Hash + ?Sized>(key: &K, shards: usize) -> usize {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::Hasher;
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % shards.max(1) as u64) as usize
}
