//! Redis-backed lease store.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use redis::aio::ConnectionManager;
use std::future::Future;
use std::time::Duration;
use warden_redis::RedisConfig;

use crate::error::{LockError, LockResult};
use crate::store::LeaseStore;

// Scripts are loaded once per connection and invoked by SHA afterwards.
static RELEASE_SCRIPT: Lazy<redis::Script> = Lazy::new(|| {
    redis::Script::new(
        r#"
        if redis.call("GET", KEYS[1]) == ARGV[1] then
            return redis.call("DEL", KEYS[1])
        else
            return 0
        end
    "#,
    )
});

static RENEW_SCRIPT: Lazy<redis::Script> = Lazy::new(|| {
    redis::Script::new(
        r#"
        if redis.call("GET", KEYS[1]) == ARGV[1] then
            return redis.call("PEXPIRE", KEYS[1], ARGV[2])
        else
            return 0
        end
    "#,
    )
});

/// Lease store speaking to a single Redis server.
#[derive(Clone)]
pub struct RedisLeaseStore {
    conn: ConnectionManager,
    command_timeout: Option<Duration>,
}

impl RedisLeaseStore {
    /// Wrap an existing connection.
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            command_timeout: None,
        }
    }

    /// Connect using `config`, bounding every command by its command timeout.
    pub async fn connect(config: &RedisConfig) -> LockResult<Self> {
        let conn = warden_redis::connect(config).await?;
        Ok(Self {
            conn,
            command_timeout: Some(config.command_timeout),
        })
    }

    /// Bound every command by `timeout`.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    async fn bounded<T, F>(&self, fut: F) -> LockResult<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match self.command_timeout {
            Some(timeout) => tokio::time::timeout(timeout, fut)
                .await
                .map_err(|_| LockError::Timeout)?
                .map_err(LockError::from),
            None => fut.await.map_err(LockError::from),
        }
    }
}

fn millis(ttl: Duration) -> u64 {
    ttl.as_millis().clamp(1, u64::MAX as u128) as u64
}

#[async_trait]
impl LeaseStore for RedisLeaseStore {
    async fn set_if_absent(&self, key: &str, token: &str, ttl: Duration) -> LockResult<bool> {
        let mut conn = self.conn.clone();

        // Use SET NX PX for atomic acquire with TTL
        let result: Option<String> = self
            .bounded(
                redis::cmd("SET")
                    .arg(key)
                    .arg(token)
                    .arg("NX") // Only set if not exists
                    .arg("PX") // Set expiry in milliseconds
                    .arg(millis(ttl))
                    .query_async(&mut conn),
            )
            .await?;

        Ok(result.is_some())
    }

    async fn refresh(&self, key: &str, ttl: Duration) -> LockResult<bool> {
        let mut conn = self.conn.clone();
        let result: i64 = self
            .bounded(
                redis::cmd("PEXPIRE")
                    .arg(key)
                    .arg(millis(ttl))
                    .query_async(&mut conn),
            )
            .await?;
        Ok(result == 1)
    }

    async fn compare_and_refresh(&self, key: &str, token: &str, ttl: Duration) -> LockResult<bool> {
        let mut conn = self.conn.clone();
        let result: i64 = self
            .bounded(
                RENEW_SCRIPT
                    .key(key)
                    .arg(token)
                    .arg(millis(ttl))
                    .invoke_async(&mut conn),
            )
            .await?;
        Ok(result == 1)
    }

    async fn compare_and_delete(&self, key: &str, token: &str) -> LockResult<bool> {
        let mut conn = self.conn.clone();
        let result: i64 = self
            .bounded(RELEASE_SCRIPT.key(key).arg(token).invoke_async(&mut conn))
            .await?;
        Ok(result == 1)
    }
}
