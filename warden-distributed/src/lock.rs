//! Lease-based distributed locks

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use std::fmt;
use std::future::Future;
use std::panic::Location;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;
use warden_log::DiagnosticSink;
use warden_sync::{
    AcquisitionRecord, AcquisitionRecorder, Backoff, CallSite, LockObserver, NoopObserver,
    SpinLock, StallWatch,
};

use crate::config::{LockConfig, RenewalPolicy};
use crate::error::{LockError, LockResult};
use crate::redis_store::RedisLeaseStore;
use crate::renewer::{Lease, LeaseRenewer};
use crate::store::{LeaseStore, lease_key};

/// Task-based counterpart of [`warden_sync::Locker`].
///
/// "Blocking" operations suspend the calling task instead of the thread.
#[async_trait]
pub trait AsyncLocker: Send + Sync {
    /// Wait until the lock is acquired.
    async fn lock(&self);

    /// Single attempt.
    async fn try_lock(&self) -> bool;

    /// Retry until acquired or `timeout` elapses.
    async fn try_lock_in_time(&self, timeout: Duration) -> bool;

    /// Release the lock.
    async fn unlock(&self);
}

struct Inner {
    resource: String,
    lease: Arc<Lease>,
    gate: SpinLock<Arc<dyn LockObserver>>,
    renewer: Mutex<Option<LeaseRenewer>>,
}

/// Unlocks the gate when dropped, unless forgotten.
struct GateRelease<'a>(&'a SpinLock<Arc<dyn LockObserver>>);

impl Drop for GateRelease<'_> {
    fn drop(&mut self) {
        self.0.unlock();
    }
}

/// Mutual exclusion across processes through a lease in a shared store.
///
/// A handle owns a random token, generated once and reused for every
/// lock cycle. Holding the lock means the store maps the lease key to that
/// token; a background renewer extends the lease every `ttl / 2` until
/// [`unlock`](Self::unlock) or until a renewal fails, after which
/// [`is_held`](Self::is_held) reports `false`.
///
/// Clones share one handle: the same token, and a local gate so only one
/// task per handle runs a lock cycle at a time. Independent handles for the
/// same resource compete through the store only.
///
/// # Examples
///
/// ```rust,ignore
/// use std::time::Duration;
/// use warden_distributed::{DistributedLock, RedisLeaseStore};
/// use warden_redis::RedisConfig;
///
/// let store = RedisLeaseStore::connect(&RedisConfig::from_env().build()).await?;
/// let lock = DistributedLock::new("order-42", Duration::from_secs(10), store);
///
/// let guard = lock.acquire().await;
/// // critical section
/// guard.release().await?;
/// ```
#[derive(Clone)]
pub struct DistributedLock {
    inner: Arc<Inner>,
}

impl DistributedLock {
    /// Create a lock for `resource` under the default namespace with checked
    /// renewal. A zero `ttl` means the 30 s default.
    pub fn new(resource: impl Into<String>, ttl: Duration, store: impl LeaseStore + 'static) -> Self {
        LockBuilder::new(resource)
            .with_ttl(ttl)
            .build(Arc::new(store))
    }

    /// Create a lock backed by an existing Redis connection.
    pub fn with_redis(resource: impl Into<String>, ttl: Duration, conn: ConnectionManager) -> Self {
        Self::new(resource, ttl, RedisLeaseStore::new(conn))
    }

    /// Get a builder
    pub fn builder(resource: impl Into<String>) -> LockBuilder {
        LockBuilder::new(resource)
    }

    /// Resource name this lock guards.
    pub fn resource(&self) -> &str {
        &self.inner.resource
    }

    /// Remote key of the lease.
    pub fn key(&self) -> &str {
        &self.inner.lease.key
    }

    /// Owner token written to the store.
    pub fn token(&self) -> &str {
        &self.inner.lease.token
    }

    /// Lease lifetime.
    pub fn ttl(&self) -> Duration {
        self.inner.lease.ttl
    }

    /// Renewal policy in effect.
    pub fn renewal(&self) -> RenewalPolicy {
        self.inner.lease.policy
    }

    /// Whether this handle currently believes it owns the lease.
    ///
    /// Becomes `false` on unlock and as soon as a renewal fails.
    pub fn is_held(&self) -> bool {
        self.inner.lease.is_held()
    }

    /// Single attempt to take the lease.
    ///
    /// Store errors count as "not acquired". Dropping the returned future
    /// before it completes releases the local gate.
    #[track_caller]
    pub fn try_lock(&self) -> impl Future<Output = bool> + Send + '_ {
        self.try_lock_at(Location::caller())
    }

    /// Single attempt on behalf of `site`.
    pub async fn try_lock_at(&self, site: CallSite) -> bool {
        let inner = &*self.inner;
        if !inner.gate.try_lock_at(site) {
            return false;
        }
        let gate = GateRelease(&inner.gate);

        let lease = &inner.lease;
        let acquired = match lease.store.set_if_absent(&lease.key, &lease.token, lease.ttl).await {
            Ok(acquired) => acquired,
            Err(e) => {
                debug!(key = %lease.key, error = %e, "lease acquire failed");
                false
            }
        };
        if !acquired {
            return false;
        }

        lease.set_held(true);
        let renewer = LeaseRenewer::start(Arc::clone(lease)).await;
        *inner.renewer.lock() = Some(renewer);
        std::mem::forget(gate);

        debug!(key = %lease.key, "acquired lease");
        true
    }

    /// Wait until the lease is acquired.
    #[track_caller]
    pub fn lock(&self) -> impl Future<Output = ()> + Send + '_ {
        self.lock_at(Location::caller())
    }

    /// Wait on behalf of `site`.
    pub async fn lock_at(&self, site: CallSite) {
        let mut backoff = Backoff::new();
        let mut stall = StallWatch::new(self.stall_threshold());
        while !self.try_lock_at(site).await {
            for _ in 0..backoff.step() {
                tokio::task::yield_now().await;
            }
            if let Some(waited) = stall.poll() {
                self.report_stall(waited, site);
            }
        }
    }

    /// Retry until acquired or `timeout` elapses.
    #[track_caller]
    pub fn try_lock_in_time(&self, timeout: Duration) -> impl Future<Output = bool> + Send + '_ {
        self.try_lock_in_time_at(timeout, Location::caller())
    }

    /// Bounded acquire on behalf of `site`.
    pub async fn try_lock_in_time_at(&self, timeout: Duration, site: CallSite) -> bool {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            self.lock_at(site).await;
            return true;
        };

        let mut backoff = Backoff::new();
        loop {
            // A store call that never answers must not outlive the deadline.
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, self.try_lock_at(site)).await {
                Ok(true) => return true,
                Ok(false) => {}
                Err(_) => {
                    debug!(key = %self.key(), "lease acquire outlived the deadline");
                    return false;
                }
            }
            if Instant::now() >= deadline {
                return false;
            }
            for _ in 0..backoff.step() {
                tokio::task::yield_now().await;
            }
        }
    }

    /// End the current lock cycle.
    ///
    /// Deletes the lease only if it still carries this handle's token, stops
    /// the renewer and waits for it, then opens the local gate. Store errors
    /// are logged. Without an active cycle this does nothing.
    pub async fn unlock(&self) {
        if let Err(e) = self.release_lease().await {
            warn!(key = %self.key(), error = %e, "lease release failed");
        }
    }

    /// `Ok(true)` if the lease was deleted, `Ok(false)` if there was no
    /// cycle or the lease was no longer ours.
    async fn release_lease(&self) -> LockResult<bool> {
        let inner = &*self.inner;
        let Some(renewer) = inner.renewer.lock().take() else {
            return Ok(false);
        };
        let _gate = GateRelease(&inner.gate);

        let lease = &inner.lease;
        lease.set_held(false);
        let deleted = lease.store.compare_and_delete(&lease.key, &lease.token).await;
        renewer.stop().await;

        match &deleted {
            Ok(true) => debug!(key = %lease.key, "released lease"),
            Ok(false) => debug!(key = %lease.key, "lease already expired or taken over"),
            Err(_) => {}
        }
        deleted
    }

    /// Tear down a cycle without talking to the store. The lease is left to
    /// expire on its own.
    fn abandon(&self) {
        let inner = &*self.inner;
        inner.lease.set_held(false);
        if inner.renewer.lock().take().is_some() {
            inner.gate.unlock();
        }
    }

    fn stall_threshold(&self) -> Option<Duration> {
        self.inner.gate.observer().stall_threshold().or_else(|| {
            self.inner
                .lease
                .sink
                .as_ref()
                .filter(|sink| sink.is_enabled())
                .map(DiagnosticSink::stall_threshold)
        })
    }

    fn report_stall(&self, waited: Duration, site: CallSite) {
        let inner = &*self.inner;
        if inner.gate.is_locked() {
            inner.gate.observer().on_stall(waited, site);
            return;
        }

        warn!(
            key = %inner.lease.key,
            waited_ms = waited.as_millis() as u64,
            "lease held by another process"
        );
        if let Some(sink) = &inner.lease.sink {
            sink.warn(&format!(
                "dead lock[{:.2} s]\nlock on:\n\t-> held by another process ({})\ncalling on:\n\t{}",
                waited.as_secs_f64(),
                inner.lease.key,
                AcquisitionRecord::here(site)
            ));
        }
    }

    /// Wait for the lease and return a guard that releases it on drop.
    #[track_caller]
    pub fn acquire(&self) -> impl Future<Output = LeaseGuard> + Send + '_ {
        let site = Location::caller();
        async move {
            self.lock_at(site).await;
            LeaseGuard::new(self.clone())
        }
    }

    /// Single attempt returning a guard on success.
    #[track_caller]
    pub fn try_acquire(&self) -> impl Future<Output = Option<LeaseGuard>> + Send + '_ {
        let site = Location::caller();
        async move {
            self.try_lock_at(site)
                .await
                .then(|| LeaseGuard::new(self.clone()))
        }
    }

    /// Bounded attempt; [`LockError::Timeout`] when `timeout` elapses first.
    #[track_caller]
    pub fn acquire_timeout(
        &self,
        timeout: Duration,
    ) -> impl Future<Output = LockResult<LeaseGuard>> + Send + '_ {
        let site = Location::caller();
        async move {
            if self.try_lock_in_time_at(timeout, site).await {
                Ok(LeaseGuard::new(self.clone()))
            } else {
                Err(LockError::Timeout)
            }
        }
    }
}

impl fmt::Debug for DistributedLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributedLock")
            .field("key", &self.key())
            .field("ttl", &self.ttl())
            .field("renewal", &self.renewal())
            .field("held", &self.is_held())
            .finish()
    }
}

#[async_trait]
impl AsyncLocker for DistributedLock {
    async fn lock(&self) {
        DistributedLock::lock(self).await
    }

    async fn try_lock(&self) -> bool {
        DistributedLock::try_lock(self).await
    }

    async fn try_lock_in_time(&self, timeout: Duration) -> bool {
        DistributedLock::try_lock_in_time(self, timeout).await
    }

    async fn unlock(&self) {
        DistributedLock::unlock(self).await
    }
}

/// Lease guard that releases on drop
///
/// Dropping spawns the release on the current tokio runtime. Call
/// [`release`](Self::release) to wait for it and learn whether the lease
/// was still ours.
#[must_use = "if unused the lease will immediately be released"]
pub struct LeaseGuard {
    lock: DistributedLock,
    released: bool,
}

impl LeaseGuard {
    fn new(lock: DistributedLock) -> Self {
        Self {
            lock,
            released: false,
        }
    }

    /// The lock this guard holds.
    pub fn lock(&self) -> &DistributedLock {
        &self.lock
    }

    /// Whether the lease is still believed held.
    pub fn is_held(&self) -> bool {
        self.lock.is_held()
    }

    /// Release now. [`LockError::NotHeld`] if the lease expired or was taken
    /// over before the release.
    pub async fn release(mut self) -> LockResult<()> {
        self.released = true;
        if self.lock.release_lease().await? {
            Ok(())
        } else {
            warn!(key = %self.lock.key(), "lease was lost before release");
            Err(LockError::NotHeld)
        }
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let lock = self.lock.clone();
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { lock.unlock().await });
            }
            Err(_) => {
                warn!(key = %lock.key(), "lease guard dropped outside a runtime, leaving lease to expire");
                lock.abandon();
            }
        }
    }
}

/// Distributed lock builder
pub struct LockBuilder {
    resource: String,
    config: LockConfig,
    token: Option<String>,
    sink: Option<DiagnosticSink>,
}

impl LockBuilder {
    /// Create new lock builder
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            config: LockConfig::default(),
            token: None,
            sink: None,
        }
    }

    /// Set TTL
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.config.ttl = ttl;
        self
    }

    /// Set the key namespace
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.config.namespace = namespace.into();
        self
    }

    /// Set the renewal policy
    pub fn with_renewal(mut self, renewal: RenewalPolicy) -> Self {
        self.config.renewal = renewal;
        self
    }

    /// Replace TTL, namespace and renewal policy at once
    pub fn with_config(mut self, config: LockConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a fixed owner token instead of a random one
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Record acquisition sites and report stalls and renewal failures
    pub fn with_diagnostics(mut self, sink: DiagnosticSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Build the lock on top of `store`
    pub fn build(self, store: Arc<dyn LeaseStore>) -> DistributedLock {
        let ttl = self.config.effective_ttl();
        let key = lease_key(&self.config.namespace, &self.resource);
        let token = self
            .token
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

        let observer: Arc<dyn LockObserver> = match &self.sink {
            Some(sink) => Arc::new(AcquisitionRecorder::new(sink.clone())),
            None => Arc::new(NoopObserver),
        };

        let lease = Lease::new(key, token, ttl, self.config.renewal, store, self.sink);
        DistributedLock {
            inner: Arc::new(Inner {
                resource: self.resource,
                lease: Arc::new(lease),
                gate: SpinLock::with_observer(observer),
                renewer: Mutex::new(None),
            }),
        }
    }

    /// Build the lock on top of a Redis connection
    pub fn build_redis(self, conn: ConnectionManager) -> DistributedLock {
        self.build(Arc::new(RedisLeaseStore::new(conn)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryLeaseStore;

    #[test]
    fn test_lock_builder() {
        let lock = LockBuilder::new("test-lock")
            .with_ttl(Duration::from_secs(60))
            .with_namespace("app:")
            .with_renewal(RenewalPolicy::Unchecked)
            .build(Arc::new(MemoryLeaseStore::new()));

        assert_eq!(lock.resource(), "test-lock");
        assert_eq!(lock.key(), "app:test-lock");
        assert_eq!(lock.ttl(), Duration::from_secs(60));
        assert_eq!(lock.renewal(), RenewalPolicy::Unchecked);
        assert!(!lock.is_held());
    }

    #[test]
    fn test_zero_ttl_uses_default() {
        let lock = DistributedLock::new("r", Duration::ZERO, MemoryLeaseStore::new());
        assert_eq!(lock.ttl(), crate::config::DEFAULT_TTL);
        assert_eq!(lock.key(), "_redis_lock:r");
    }

    #[test]
    fn test_handles_get_distinct_tokens() {
        let store = MemoryLeaseStore::new();
        let a = DistributedLock::new("r", Duration::from_secs(1), store.clone());
        let b = DistributedLock::new("r", Duration::from_secs(1), store);
        assert_ne!(a.token(), b.token());
        assert_eq!(a.clone().token(), a.token());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unlock_without_cycle_is_noop() {
        let store = MemoryLeaseStore::new();
        store.insert("_redis_lock:r", "someone-else", Duration::from_secs(5));
        let lock = DistributedLock::new("r", Duration::from_secs(5), store.clone());

        lock.unlock().await;
        assert!(store.contains("_redis_lock:r"));
        assert!(!lock.try_lock().await);
    }

    /// Store whose acquire never answers.
    struct StalledStore;

    #[async_trait]
    impl LeaseStore for StalledStore {
        async fn set_if_absent(&self, _key: &str, _token: &str, _ttl: Duration) -> LockResult<bool> {
            std::future::pending().await
        }

        async fn refresh(&self, _key: &str, _ttl: Duration) -> LockResult<bool> {
            Ok(false)
        }

        async fn compare_and_refresh(&self, _key: &str, _token: &str, _ttl: Duration) -> LockResult<bool> {
            Ok(false)
        }

        async fn compare_and_delete(&self, _key: &str, _token: &str) -> LockResult<bool> {
            Ok(false)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_try_lock_releases_gate() {
        let lock = DistributedLock::new("r", Duration::from_secs(5), StalledStore);

        let attempt = tokio::time::timeout(Duration::from_secs(1), lock.try_lock()).await;
        assert!(attempt.is_err());

        assert!(!lock.inner.gate.is_locked());
        assert!(!lock.is_held());
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_lock_in_time_bounds_stalled_store() {
        let lock = DistributedLock::new("r", Duration::from_secs(5), StalledStore);
        let started = Instant::now();

        let attempt = tokio::time::timeout(
            Duration::from_secs(2),
            lock.try_lock_in_time(Duration::from_millis(50)),
        )
        .await;
        assert_eq!(attempt, Ok(false));
        assert!(started.elapsed() < Duration::from_millis(100));

        assert!(!lock.inner.gate.is_locked());
        assert!(!lock.is_held());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_timeout_against_stalled_store() {
        let lock = DistributedLock::new("r", Duration::from_secs(5), StalledStore);
        let result = lock.acquire_timeout(Duration::from_millis(50)).await;
        assert!(matches!(result, Err(LockError::Timeout)));
    }

    #[test]
    fn test_guard_dropped_outside_runtime_abandons_cycle() {
        let store = MemoryLeaseStore::new();
        let lock = DistributedLock::new("r", Duration::from_secs(5), store.clone());
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let guard = runtime.block_on(lock.acquire());
        assert!(lock.is_held());
        drop(guard);
        assert!(!lock.is_held());

        // The lease itself stays until it expires.
        assert!(store.contains("_redis_lock:r"));
        store.expire_now("_redis_lock:r");
        assert!(runtime.block_on(lock.try_lock()));
        runtime.block_on(lock.unlock());
    }
}
