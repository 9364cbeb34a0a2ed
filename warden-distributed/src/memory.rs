//! In-process lease store.
//!
//! Behaves like a single Redis server for the four lease operations and adds
//! knobs to simulate early expiry, competing writers and service failures.
//! Expiry follows the tokio clock, so tests can drive it with paused time.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{LockError, LockResult};
use crate::store::LeaseStore;

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct MemoryInner {
    entries: Mutex<HashMap<String, Entry>>,
    reject_refresh: AtomicBool,
    unavailable: AtomicBool,
    refreshes: AtomicUsize,
}

/// Shared in-memory lease store. Clones see the same keys.
#[derive(Debug, Clone, Default)]
pub struct MemoryLeaseStore {
    inner: Arc<MemoryInner>,
}

impl MemoryLeaseStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_live_entries<R>(&self, f: impl FnOnce(&mut HashMap<String, Entry>) -> R) -> R {
        let now = Instant::now();
        let mut entries = self.inner.entries.lock();
        entries.retain(|_, entry| entry.expires_at > now);
        f(&mut entries)
    }

    fn check_available(&self) -> LockResult<()> {
        if self.inner.unavailable.load(Ordering::Acquire) {
            return Err(LockError::Store("lease store unavailable".to_string()));
        }
        Ok(())
    }

    /// Current value of `key`.
    pub fn get(&self, key: &str) -> Option<String> {
        self.with_live_entries(|entries| entries.get(key).map(|entry| entry.value.clone()))
    }

    /// Whether `key` is present and unexpired.
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Remaining lifetime of `key`.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.with_live_entries(|entries| entries.get(key).map(|entry| entry.expires_at - now))
    }

    /// Expire `key` immediately, as if its lease ran out.
    pub fn expire_now(&self, key: &str) {
        self.inner.entries.lock().remove(key);
    }

    /// Store `value` under `key` regardless of the current owner.
    pub fn insert(&self, key: &str, value: &str, ttl: Duration) {
        self.inner.entries.lock().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Make every refresh fail until switched back.
    pub fn reject_refreshes(&self, reject: bool) {
        self.inner.reject_refresh.store(reject, Ordering::Release);
    }

    /// Make every operation return a store error until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::Release);
    }

    /// Number of refresh requests received, successful or not.
    pub fn refresh_count(&self) -> usize {
        self.inner.refreshes.load(Ordering::Acquire)
    }

    fn begin_refresh(&self) -> LockResult<bool> {
        self.check_available()?;
        self.inner.refreshes.fetch_add(1, Ordering::AcqRel);
        Ok(!self.inner.reject_refresh.load(Ordering::Acquire))
    }
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn set_if_absent(&self, key: &str, token: &str, ttl: Duration) -> LockResult<bool> {
        self.check_available()?;
        let expires_at = Instant::now() + ttl;
        Ok(self.with_live_entries(|entries| {
            if entries.contains_key(key) {
                return false;
            }
            entries.insert(
                key.to_string(),
                Entry {
                    value: token.to_string(),
                    expires_at,
                },
            );
            true
        }))
    }

    async fn refresh(&self, key: &str, ttl: Duration) -> LockResult<bool> {
        if !self.begin_refresh()? {
            return Ok(false);
        }
        let expires_at = Instant::now() + ttl;
        Ok(self.with_live_entries(|entries| match entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at = expires_at;
                true
            }
            None => false,
        }))
    }

    async fn compare_and_refresh(&self, key: &str, token: &str, ttl: Duration) -> LockResult<bool> {
        if !self.begin_refresh()? {
            return Ok(false);
        }
        let expires_at = Instant::now() + ttl;
        Ok(self.with_live_entries(|entries| match entries.get_mut(key) {
            Some(entry) if entry.value == token => {
                entry.expires_at = expires_at;
                true
            }
            _ => false,
        }))
    }

    async fn compare_and_delete(&self, key: &str, token: &str) -> LockResult<bool> {
        self.check_available()?;
        Ok(self.with_live_entries(|entries| {
            if entries.get(key).is_some_and(|entry| entry.value == token) {
                entries.remove(key);
                true
            } else {
                false
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_set_if_absent_respects_existing_key() {
        let store = MemoryLeaseStore::new();
        let ttl = Duration::from_secs(10);
        assert!(store.set_if_absent("k", "a", ttl).await.unwrap());
        assert!(!store.set_if_absent("k", "b", ttl).await.unwrap());
        assert_eq!(store.get("k").as_deref(), Some("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_expire_with_clock() {
        let store = MemoryLeaseStore::new();
        store.set_if_absent("k", "a", Duration::from_secs(2)).await.unwrap();

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(store.contains("k"));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!store.contains("k"));
        assert!(!store.refresh("k", Duration::from_secs(2)).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_extends_lifetime() {
        let store = MemoryLeaseStore::new();
        store.set_if_absent("k", "a", Duration::from_secs(2)).await.unwrap();
        tokio::time::advance(Duration::from_millis(1500)).await;

        assert!(store.refresh("k", Duration::from_secs(2)).await.unwrap());
        tokio::time::advance(Duration::from_millis(1500)).await;
        assert!(store.contains("k"));
        assert_eq!(store.refresh_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_compare_operations_check_token() {
        let store = MemoryLeaseStore::new();
        let ttl = Duration::from_secs(5);
        store.insert("k", "other", ttl);

        assert!(!store.compare_and_refresh("k", "mine", ttl).await.unwrap());
        assert!(!store.compare_and_delete("k", "mine").await.unwrap());
        assert!(store.contains("k"));

        assert!(store.compare_and_refresh("k", "other", ttl).await.unwrap());
        assert!(store.compare_and_delete("k", "other").await.unwrap());
        assert!(!store.contains("k"));
    }

    #[tokio::test]
    async fn test_unavailable_store_errors() {
        let store = MemoryLeaseStore::new();
        store.set_unavailable(true);
        let result = store.set_if_absent("k", "a", Duration::from_secs(1)).await;
        assert!(matches!(result, Err(LockError::Store(_))));
    }

    #[tokio::test]
    async fn test_rejected_refresh_is_counted() {
        let store = MemoryLeaseStore::new();
        store.insert("k", "a", Duration::from_secs(5));
        store.reject_refreshes(true);
        assert!(!store.refresh("k", Duration::from_secs(5)).await.unwrap());
        assert_eq!(store.refresh_count(), 1);
    }
}
