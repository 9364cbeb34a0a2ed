//! Lease-based Distributed Locks for Warden
//!
//! This crate provides mutual exclusion across processes through a lease
//! kept in a shared key/value store.
//!
//! ## Features
//!
//! - **Distributed Lock** - `SET NX PX` acquire, token-checked release
//! - **Lease Renewal** - Background renewer extends the lease every `ttl / 2`
//! - **Pluggable Stores** - Redis in production, in-memory for tests
//! - **RAII Pattern** - Guards release the lease on drop
//! - **Diagnostics** - Optional stall reports while waiting for a lease
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use warden_distributed::*;
//! use warden_redis::RedisConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = RedisLeaseStore::connect(&RedisConfig::from_env().build()).await?;
//!
//!     let lock = LockBuilder::new("order-42")
//!         .with_ttl(Duration::from_secs(10))
//!         .build(std::sync::Arc::new(store));
//!
//!     if lock.try_lock_in_time(Duration::from_secs(1)).await {
//!         // Critical section; the lease is renewed in the background.
//!         lock.unlock().await;
//!     }
//!
//!     // Or hold it through a guard
//!     let guard = lock.acquire_timeout(Duration::from_secs(5)).await?;
//!     guard.release().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Testing without Redis
//!
//! ```rust
//! use std::time::Duration;
//! use warden_distributed::{DistributedLock, MemoryLeaseStore};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let store = MemoryLeaseStore::new();
//! let a = DistributedLock::new("order-42", Duration::from_secs(10), store.clone());
//! let b = DistributedLock::new("order-42", Duration::from_secs(10), store.clone());
//!
//! assert!(a.try_lock().await);
//! assert!(!b.try_lock().await);
//! a.unlock().await;
//! assert!(b.try_lock().await);
//! b.unlock().await;
//! # }
//! ```

pub mod config;
pub mod error;
pub mod lock;
pub mod memory;
pub mod redis_store;
mod renewer;
pub mod store;

pub use config::{DEFAULT_TTL, LockConfig, RenewalPolicy};
pub use error::{LockError, LockResult};
pub use lock::{AsyncLocker, DistributedLock, LeaseGuard, LockBuilder};
pub use memory::MemoryLeaseStore;
pub use redis_store::RedisLeaseStore;
pub use store::{KEY_PREFIX, LeaseStore, lease_key};

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::{LockConfig, RenewalPolicy};
    pub use crate::error::{LockError, LockResult};
    pub use crate::lock::{AsyncLocker, DistributedLock, LeaseGuard, LockBuilder};
    pub use crate::store::LeaseStore;
}
