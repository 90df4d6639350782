//! Shared records stored as Redis hashes.
//!
//! # Layout
//!
//! One hash per process, keyed by cache key. Fields are plain scalars
//! (`dynos`, `quieted_to`, `quieted_at`, `updated_at`). A cleared field is
//! removed with `HDEL`; nothing is stored for "unset".

use std::collections::HashMap;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::store::{Record, SharedStateStore};

/// Record store shared across OS processes through Redis.
#[derive(Clone)]
pub struct RedisStateStore {
    /// Redis connection manager (handles reconnection automatically).
    redis: ConnectionManager,
}

impl RedisStateStore {
    /// Connect to Redis at `redis_url` (e.g. `redis://localhost:6379`).
    pub async fn connect(redis_url: &str) -> StateResult<Self> {
        let client = redis::Client::open(redis_url).map_err(|e| StateError::Open(e.to_string()))?;
        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| StateError::Open(e.to_string()))?;
        debug!(url = %redis_url, "redis state store connected");
        Ok(Self { redis })
    }

    /// Build a store from an existing connection manager.
    ///
    /// Useful when the host application already holds a Redis pool.
    pub fn from_connection(redis: ConnectionManager) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl SharedStateStore for RedisStateStore {
    async fn read(&self, key: &str) -> StateResult<Record> {
        let mut conn = self.redis.clone();
        let fields: HashMap<String, String> = conn.hgetall(key).await?;
        Ok(fields.into_iter().collect())
    }

    async fn write(&self, key: &str, fields: &Record, deletions: &[&str]) -> StateResult<()> {
        let Some(pipe) = write_pipeline(key, fields, deletions) else {
            return Ok(());
        };

        let mut conn = self.redis.clone();
        pipe.query_async::<_, ()>(&mut conn).await?;
        debug!(%key, set = fields.len(), deleted = deletions.len(), "record written");
        Ok(())
    }

    async fn clear(&self, key: &str) -> StateResult<bool> {
        let mut conn = self.redis.clone();
        let removed: i64 = conn.del(key).await?;
        Ok(removed > 0)
    }
}

/// One `MULTI` block upserting `fields` and deleting `deletions`, or `None`
/// when there is nothing to send.
fn write_pipeline(key: &str, fields: &Record, deletions: &[&str]) -> Option<redis::Pipeline> {
    if fields.is_empty() && deletions.is_empty() {
        return None;
    }

    let items: Vec<(&str, &str)> = fields
        .iter()
        .map(|(field, value)| (field.as_str(), value.as_str()))
        .collect();

    let mut pipe = redis::pipe();
    pipe.atomic();
    if !items.is_empty() {
        pipe.hset_multiple(key, &items).ignore();
    }
    if !deletions.is_empty() {
        pipe.hdel(key, deletions).ignore();
    }
    Some(pipe)
}
