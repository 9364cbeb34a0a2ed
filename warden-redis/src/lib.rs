//! # Warden Redis
//!
//! Redis connection setup for Warden distributed locks.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use warden_redis::{RedisConfig, connect};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RedisConfig::builder()
//!         .url("redis://localhost:6379")
//!         .database(2)
//!         .connection_name("order-service")
//!         .build();
//!
//!     // Reconnecting connection, verified with PING
//!     let conn = connect(&config).await?;
//!     Ok(())
//! }
//! ```
//!
//! Configuration can also come from `REDIS_URL`, `REDIS_DATABASE`,
//! `REDIS_USERNAME` and `REDIS_PASSWORD`:
//!
//! ```rust
//! use warden_redis::RedisConfig;
//!
//! let config = RedisConfig::from_env().build();
//! assert!(!config.url.is_empty());
//! ```

mod config;
mod connection;
mod error;

pub use config::{RedisConfig, RedisConfigBuilder};
pub use connection::connect;
pub use error::{RedisError, Result};

// Re-export redis crate for convenience
pub use redis;
pub use redis::aio::ConnectionManager;

/// Prelude for common imports.
///
/// ```
/// use warden_redis::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{RedisConfig, RedisConfigBuilder};
    pub use crate::connection::connect;
    pub use crate::error::{RedisError, Result};
    pub use redis::aio::ConnectionManager;
}
