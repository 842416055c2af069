use ::redis::aio::MultiplexedConnection;
use ::redis::Client;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::{point_key, Cache};
use crate::config::CacheConfig;
use crate::error::{Result, StoreError};

/// Networked cache: one Redis hash per tag.
///
/// Fields are canonical timestamps for point values and range keys for
/// aggregates. Every read or write refreshes the tag's TTL, so hot tags stay
/// resident and idle ones expire as a whole.
pub struct RedisCache {
    client: Client,
    ttl_secs: i64,
    conn: RwLock<Option<MultiplexedConnection>>,
}

impl RedisCache {
    pub fn new(config: &CacheConfig) -> Result<Self> {
        let client = Client::open(config.redis_url())?;
        Ok(Self {
            client,
            ttl_secs: config.ttl_secs as i64,
            conn: RwLock::new(None),
        })
    }

    async fn connection(&self) -> Option<MultiplexedConnection> {
        self.conn.read().await.clone()
    }

    async fn hget(&self, tag: &str, field: &str) -> Option<f32> {
        let mut conn = self.connection().await?;
        let result = ::redis::pipe()
            .hget(tag, field)
            .expire(tag, self.ttl_secs)
            .ignore()
            .query_async::<(Option<f32>,)>(&mut conn)
            .await;
        match result {
            Ok((value,)) => value,
            Err(e) => {
                warn!(tag, field, error = %e, "redis cache read failed");
                None
            }
        }
    }

    async fn hset(&self, tag: &str, field: &str, value: f32) {
        let Some(mut conn) = self.connection().await else {
            return;
        };
        let result = ::redis::pipe()
            .hset(tag, field, value)
            .ignore()
            .expire(tag, self.ttl_secs)
            .ignore()
            .query_async::<()>(&mut conn)
            .await;
        if let Err(e) = result {
            warn!(tag, field, error = %e, "redis cache write failed");
        }
    }
}

#[async_trait]
impl Cache for RedisCache {
    fn name(&self) -> &str {
        "redis"
    }

    async fn connect(&self) -> Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let pong = ::redis::cmd("PING").query_async::<String>(&mut conn).await?;
        if pong != "PONG" {
            return Err(StoreError::Cache(format!("unexpected PING reply '{}'", pong)));
        }
        debug!(ttl_secs = self.ttl_secs, "redis cache connected");
        *self.conn.write().await = Some(conn);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.conn.write().await.take();
        Ok(())
    }

    async fn get(&self, tag: &str, date: NaiveDateTime) -> Option<f32> {
        self.hget(tag, &point_key(date)).await
    }

    async fn set(&self, tag: &str, date: NaiveDateTime, value: f32) {
        self.hset(tag, &point_key(date), value).await;
    }

    async fn get_str(&self, tag: &str, key: &str) -> Option<f32> {
        self.hget(tag, key).await
    }

    async fn set_str(&self, tag: &str, key: &str, value: f32) {
        self.hset(tag, key, value).await;
    }
}
