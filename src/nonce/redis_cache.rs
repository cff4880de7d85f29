//! Redis implementation of [`CacheBackend`].

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tracing::info;

use super::cache::{CacheBackend, CacheError};

/// Redis cache reached through a multiplexed, auto-reconnecting connection.
#[derive(Clone)]
pub struct RedisCache {
    connection_manager: ConnectionManager,
}

impl RedisCache {
    /// Connect to `url` and verify the connection with `PING`.
    ///
    /// Connection setup and the ping are each bounded by `connect_timeout`.
    pub async fn connect(url: &str, connect_timeout: Duration) -> Result<Self, CacheError> {
        let client = Client::open(url)
            .map_err(|e| CacheError::Connection(format!("invalid Redis URL: {e}")))?;

        let connection_manager = tokio::time::timeout(connect_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| {
                CacheError::Connection(format!(
                    "connection timed out after {}ms",
                    connect_timeout.as_millis()
                ))
            })?
            .map_err(|e| CacheError::Connection(e.to_string()))?;

        let cache = Self { connection_manager };
        tokio::time::timeout(connect_timeout, cache.ping())
            .await
            .map_err(|_| CacheError::Connection("PING timed out".to_string()))??;

        info!("Connected to Redis nonce cache");
        Ok(cache)
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.connection_manager.clone();
        let result: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;

        if result == "PONG" {
            Ok(())
        } else {
            Err(CacheError::Command(format!(
                "unexpected PING response: {result}"
            )))
        }
    }
}

fn command_error(e: redis::RedisError) -> CacheError {
    CacheError::Command(e.to_string())
}

#[async_trait]
impl CacheBackend for RedisCache {
    fn name(&self) -> &'static str {
        "redis"
    }

    fn ttl_supported(&self) -> bool {
        true
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection_manager.clone();
        conn.get(key).await.map_err(command_error)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection_manager.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
            .await
            .map_err(command_error)
    }

    async fn add(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError> {
        let mut conn = self.connection_manager.clone();
        // SET NX replies OK when stored and nil when the key exists.
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.connection_manager.clone();
        conn.del::<_, ()>(key).await.map_err(command_error)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_url_is_rejected() {
        let result = RedisCache::connect("not a url", Duration::from_millis(100)).await;
        assert!(matches!(result, Err(CacheError::Connection(_))));
    }

    #[tokio::test]
    async fn test_unreachable_server_fails_within_timeout() {
        let started = std::time::Instant::now();
        let result = RedisCache::connect("redis://127.0.0.1:1/", Duration::from_millis(300)).await;
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
