//! Coordination-service protocol consumed by [`DistributedLock`](crate::DistributedLock).

use async_trait::async_trait;
use std::time::Duration;

use crate::error::LockResult;

/// Namespace prepended to every resource name.
pub const KEY_PREFIX: &str = "_redis_lock:";

/// Remote key for `resource` under `namespace`.
pub fn lease_key(namespace: &str, resource: &str) -> String {
    format!("{}{}", namespace, resource)
}

/// Key/value store with per-key expiry and atomic conditional operations.
///
/// Every method reports success as `true`. A lock treats `Ok(false)` and
/// `Err(_)` alike when acquiring; errors only matter for logging.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Set `key = token` expiring after `ttl`, only if `key` is absent.
    async fn set_if_absent(&self, key: &str, token: &str, ttl: Duration) -> LockResult<bool>;

    /// Reset the remaining lifetime of `key` to `ttl`. `false` if `key` is gone.
    async fn refresh(&self, key: &str, ttl: Duration) -> LockResult<bool>;

    /// Reset the lifetime of `key` only while it still stores `token`.
    async fn compare_and_refresh(&self, key: &str, token: &str, ttl: Duration) -> LockResult<bool>;

    /// Delete `key` only while it still stores `token`.
    async fn compare_and_delete(&self, key: &str, token: &str) -> LockResult<bool>;
}
