use async_trait::async_trait;
use chrono::NaiveDateTime;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::warn;

use super::{point_key, Cache};
use crate::error::Result;

/// Truncated SHA-256 digest.
type Key = [u8; 16];

/// In-process cache with fixed-size digest keys.
///
/// Keys are `sha256(tag \0 timestamp)` or `sha256(tag \0 range_key)`
/// truncated to 16 bytes, so an entry costs the same memory however long the
/// tag name is. Point and range keys share one map; the separator keeps
/// them from colliding with each other for the same tag.
pub struct HashedMemoryCache {
    shards: Vec<RwLock<HashMap<Key, f32>>>,
}

impl HashedMemoryCache {
    pub fn new(shards: usize) -> Self {
        Self {
            shards: (0..shards.max(1)).map(|_| RwLock::default()).collect(),
        }
    }

    fn digest(tag: &str, suffix: &str) -> Key {
        let mut hasher = Sha256::new();
        hasher.update(tag.as_bytes());
        hasher.update([0u8]);
        hasher.update(suffix.as_bytes());
        let digest = hasher.finalize();
        let mut key = [0u8; 16];
        key.copy_from_slice(&digest[..16]);
        key
    }

    fn shard(&self, key: &Key) -> &RwLock<HashMap<Key, f32>> {
        &self.shards[key[0] as usize % self.shards.len()]
    }

    fn lookup(&self, key: Key) -> Option<f32> {
        match self.shard(&key).read() {
            Ok(guard) => guard.get(&key).copied(),
            Err(_) => {
                warn!("hashed cache shard poisoned, treating as miss");
                None
            }
        }
    }

    fn store(&self, key: Key, value: f32) {
        match self.shard(&key).write() {
            Ok(mut guard) => {
                guard.insert(key, value);
            }
            Err(_) => warn!("hashed cache shard poisoned, dropping write"),
        }
    }
}

#[async_trait]
impl Cache for HashedMemoryCache {
    fn name(&self) -> &str {
        "hashed"
    }

    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        for shard in &self.shards {
            if let Ok(mut guard) = shard.write() {
                guard.clear();
            }
        }
        Ok(())
    }

    async fn get(&self, tag: &str, date: NaiveDateTime) -> Option<f32> {
        self.lookup(Self::digest(tag, &point_key(date)))
    }

    async fn set(&self, tag: &str, date: NaiveDateTime, value: f32) {
        self.store(Self::digest(tag, &point_key(date)), value);
    }

    async fn get_str(&self, tag: &str, key: &str) -> Option<f32> {
        self.lookup(Self::digest(tag, key))
    }

    async fn set_str(&self, tag: &str, key: &str, value: f32) {
        self.store(Self::digest(tag, key), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_separates_tag_and_suffix() {
        assert_ne!(
            HashedMemoryCache::digest("AB", "C"),
            HashedMemoryCache::digest("A", "BC")
        );
        assert_eq!(
            HashedMemoryCache::digest("A", "x"),
            HashedMemoryCache::digest("A", "x")
        );
    }
}
