//! Connection setup.

use redis::aio::ConnectionManager;
use tracing::info;

use crate::{RedisConfig, RedisError, Result};

/// Open a reconnecting connection and verify it with `PING`.
pub async fn connect(config: &RedisConfig) -> Result<ConnectionManager> {
    let client = redis::Client::open(config.connection_url())
        .map_err(|e| RedisError::Config(e.to_string()))?;

    let mut conn = tokio::time::timeout(config.connection_timeout, client.get_connection_manager())
        .await
        .map_err(|_| RedisError::Timeout)?
        .map_err(|e| RedisError::Connection(e.to_string()))?;

    let _: String = redis::cmd("PING")
        .query_async(&mut conn)
        .await
        .map_err(|e| RedisError::Connection(e.to_string()))?;

    if let Some(name) = &config.connection_name {
        let _: () = redis::cmd("CLIENT")
            .arg("SETNAME")
            .arg(name)
            .query_async(&mut conn)
            .await?;
    }

    info!(url = %config.url, "Redis connection established");

    Ok(conn)
}
