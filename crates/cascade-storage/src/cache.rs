//! Cache / pub-sub collaborator trait and the in-process implementation
//!
//! The engine memoizes workflow definitions (`workflow:<id>`) and last
//! executions (`workflow:<id>:last_execution`) here, and the mailer uses
//! the pub/sub side for the `email_events` channel.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

/// Errors from cache operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Redis error
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Stream of JSON payloads from a pub/sub channel.
pub type EventStream = BoxStream<'static, Value>;

/// Key-value JSON store with TTL plus publish/subscribe channels.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Fetch and parse a JSON value. An unparseable stored value reads as
    /// absent rather than an error.
    async fn get_json(&self, key: &str) -> Result<Option<Value>, CacheError>;

    async fn set_json(
        &self,
        key: &str,
        value: &Value,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    async fn publish(&self, channel: &str, payload: &Value) -> Result<(), CacheError>;

    async fn subscribe(&self, channel: &str) -> Result<EventStream, CacheError>;
}

/// In-process cache backed by a map and broadcast channels.
///
/// Used by tests and by deployments without a Redis; semantics match
/// [`crate::RedisCache`] except that subscriptions do not cross processes.
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (Value, Option<Instant>)>>,
    channels: Mutex<HashMap<String, broadcast::Sender<Value>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            channels: Mutex::new(HashMap::new()),
        }
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<Value> {
        self.channels
            .lock()
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(256).0)
            .clone()
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get_json(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((_, Some(expires_at))) if Instant::now() >= *expires_at => {
                entries.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn set_json(
        &self,
        key: &str,
        value: &Value,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let expires_at = ttl.map(|d| Instant::now() + d);
        self.entries
            .lock()
            .insert(key.to_string(), (value.clone(), expires_at));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &Value) -> Result<(), CacheError> {
        // A send with no receivers is fine; pub/sub is fire-and-forget
        let _ = self.sender(channel).send(payload.clone());
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<EventStream, CacheError> {
        let rx = self.sender(channel).subscribe();
        let stream = BroadcastStream::new(rx)
            .filter_map(|item| async move { item.ok() })
            .boxed();
        Ok(stream)
    }
}
