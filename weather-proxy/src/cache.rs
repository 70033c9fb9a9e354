use async_trait::async_trait;
use common::errors::AppError;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tracing::{error, info, instrument};

use crate::rate_limit::{RateLimitStore, WindowHit};

/// Remote key-value store holding serialized upstream responses.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError>;

    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), AppError>;
}

/// Redis-backed cache sharing one multiplexed connection across requests.
pub struct RedisCache {
    conn: Option<MultiplexedConnection>,
}

impl RedisCache {
    /// Connect once at startup. A failure is logged and yields a disconnected
    /// cache on which every operation errors, so the server still comes up.
    pub async fn connect(redis_url: &str) -> Self {
        let conn = match Self::try_connect(redis_url).await {
            Ok(conn) => {
                info!("Connected to Redis");
                Some(conn)
            }
            Err(e) => {
                error!(error = %e, "Redis connection error");
                None
            }
        };

        Self { conn }
    }

    async fn try_connect(redis_url: &str) -> Result<MultiplexedConnection, redis::RedisError> {
        let client = redis::Client::open(redis_url)?;
        client.get_multiplexed_async_connection().await
    }

    fn connection(&self) -> Result<MultiplexedConnection, AppError> {
        self.conn
            .clone()
            .ok_or_else(|| AppError::cache("Redis client is not connected"))
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        let mut conn = self.connection()?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    #[instrument(skip(self, value))]
    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), AppError> {
        let mut conn = self.connection()?;
        let _: () = conn.set_ex(key, value, ttl_seconds).await?;
        Ok(())
    }
}

#[async_trait]
impl RateLimitStore for RedisCache {
    #[instrument(skip(self))]
    async fn hit(&self, key: &str, window_secs: u64) -> Result<WindowHit, AppError> {
        let mut conn = self.connection()?;
        let (count, ttl): (u64, i64) = redis::pipe()
            .atomic()
            .incr(key, 1)
            .ttl(key)
            .query_async(&mut conn)
            .await?;

        // No expiry means the counter was just created (or an earlier EXPIRE was lost).
        let reset_after_secs = if ttl < 0 {
            let _: () = conn.expire(key, window_secs as i64).await?;
            window_secs
        } else {
            ttl as u64
        };

        Ok(WindowHit {
            count,
            reset_after_secs,
        })
    }
}
