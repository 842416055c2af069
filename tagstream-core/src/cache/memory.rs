use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::warn;

use super::{point_key, shard_of, Cache};
use crate::error::Result;

#[derive(Debug, Default)]
struct TagEntry {
    points: HashMap<String, f32>,
    ranges: HashMap<String, f32>,
}

type Shard = RwLock<HashMap<String, TagEntry>>;

/// In-process cache keyed by tag name, with locks striped by `hash(tag)`.
pub struct MemoryCache {
    shards: Vec<Shard>,
}

impl MemoryCache {
    pub fn new(shards: usize) -> Self {
        Self {
            shards: (0..shards.max(1)).map(|_| RwLock::default()).collect(),
        }
    }

    fn shard(&self, tag: &str) -> &Shard {
        &self.shards[shard_of(tag, self.shards.len())]
    }

    fn read<T>(&self, tag: &str, f: impl FnOnce(&TagEntry) -> Option<T>) -> Option<T> {
        match self.shard(tag).read() {
            Ok(guard) => guard.get(tag).and_then(f),
            Err(_) => {
                warn!(tag, "memory cache shard poisoned, treating as miss");
                None
            }
        }
    }

    fn write(&self, tag: &str, f: impl FnOnce(&mut TagEntry)) {
        match self.shard(tag).write() {
            Ok(mut guard) => f(guard.entry(tag.to_string()).or_default()),
            Err(_) => warn!(tag, "memory cache shard poisoned, dropping write"),
        }
    }
}

#[async_trait]
impl Cache for MemoryCache {
    fn name(&self) -> &str {
        "memory"
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
        self.read(tag, |entry| entry.points.get(&point_key(date)).copied())
    }

    async fn set(&self, tag: &str, date: NaiveDateTime, value: f32) {
        self.write(tag, |entry| {
            entry.points.insert(point_key(date), value);
        });
    }

    async fn get_str(&self, tag: &str, key: &str) -> Option<f32> {
        self.read(tag, |entry| entry.ranges.get(key).copied())
    }

    async fn set_str(&self, tag: &str, key: &str, value: f32) {
        self.write(tag, |entry| {
            entry.ranges.insert(key.to_string(), value);
        });
    }
}
