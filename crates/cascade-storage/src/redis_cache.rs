//! Redis-backed cache and pub/sub

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::Value;

use crate::cache::{Cache, CacheError, EventStream};

/// Redis implementation of the cache collaborator.
///
/// Key-value commands go through a [`ConnectionManager`] (reconnects
/// transparently); each subscription opens its own pub/sub connection.
#[derive(Clone)]
pub struct RedisCache {
    client: redis::Client,
    conn: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { client, conn })
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get_json(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key).await?;
        // An unparseable stored value reads as absent
        Ok(raw.and_then(|s| serde_json::from_str(&s).ok()))
    }

    async fn set_json(
        &self,
        key: &str,
        value: &Value,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let serialized = serde_json::to_string(value)?;
        match ttl {
            Some(ttl) => {
                let _: () = conn.set_ex(key, serialized, ttl.as_secs()).await?;
            }
            None => {
                let _: () = conn.set(key, serialized).await?;
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &Value) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let serialized = serde_json::to_string(payload)?;
        let _: () = conn.publish(channel, serialized).await?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<EventStream, CacheError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;
        let stream = pubsub
            .into_on_message()
            .filter_map(|msg| async move {
                msg.get_payload::<String>()
                    .ok()
                    .and_then(|s| serde_json::from_str(&s).ok())
            })
            .boxed();
        Ok(stream)
    }
}

// Note: exercising this against a live Redis is covered by deployment
// smoke tests; unit tests use MemoryCache, which mirrors the semantics.
