//! Busy-wait spin lock.

use std::fmt;
use std::panic::Location;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use warden_log::DiagnosticSink;

use crate::backoff::{Backoff, StallWatch, deadline_after};
use crate::locker::Locker;
use crate::observer::{AcquisitionRecorder, CallSite, LockObserver, NoopObserver};

/// Unfair, non-reentrant spin lock.
///
/// Waiters retry a single compare-and-swap, yielding the processor between
/// attempts with an exponentially growing number of yields (capped at 64).
/// Locking twice from the same thread without unlocking spins forever.
///
/// # Examples
///
/// ```rust
/// use warden_sync::SpinLock;
///
/// let lock = SpinLock::new();
/// {
///     let _guard = lock.acquire();
///     assert!(!lock.try_lock());
/// }
/// assert!(lock.try_lock());
/// lock.unlock();
/// ```
pub struct SpinLock<O = NoopObserver> {
    locked: AtomicBool,
    observer: O,
}

impl SpinLock {
    /// Create an unlocked spin lock without diagnostics.
    pub const fn new() -> Self {
        Self::with_observer(NoopObserver)
    }
}

impl Default for SpinLock {
    fn default() -> Self {
        Self::new()
    }
}

impl SpinLock<AcquisitionRecorder> {
    /// Create a spin lock that records acquisition sites and reports stalls
    /// to `sink`.
    pub fn with_diagnostics(sink: DiagnosticSink) -> Self {
        Self::with_observer(AcquisitionRecorder::new(sink))
    }
}

impl<O> SpinLock<O> {
    /// Create an unlocked spin lock reporting to `observer`.
    pub const fn with_observer(observer: O) -> Self {
        Self {
            locked: AtomicBool::new(false),
            observer,
        }
    }

    /// The observer attached at construction.
    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// Whether the lock is currently held by anyone.
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    /// Release the lock. Releasing an unlocked lock is a no-op.
    pub fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }
}

impl<O: LockObserver> SpinLock<O> {
    /// Attempt a single acquire.
    #[track_caller]
    pub fn try_lock(&self) -> bool {
        self.try_lock_at(Location::caller())
    }

    /// Attempt a single acquire on behalf of `site`.
    pub fn try_lock_at(&self, site: CallSite) -> bool {
        let acquired = self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok();
        if acquired {
            self.observer.on_acquire(site);
        }
        acquired
    }

    /// Spin until the lock is acquired.
    #[track_caller]
    pub fn lock(&self) {
        self.lock_at(Location::caller());
    }

    /// Spin until the lock is acquired on behalf of `site`.
    pub fn lock_at(&self, site: CallSite) {
        let mut backoff = Backoff::new();
        let mut stall = StallWatch::new(self.observer.stall_threshold());
        while !self.try_lock_at(site) {
            backoff.snooze();
            if let Some(waited) = stall.poll() {
                self.observer.on_stall(waited, site);
            }
        }
    }

    /// Spin until the lock is acquired or `timeout` elapses.
    #[track_caller]
    pub fn try_lock_in_time(&self, timeout: Duration) -> bool {
        self.try_lock_in_time_at(timeout, Location::caller())
    }

    /// Bounded acquire on behalf of `site`.
    pub fn try_lock_in_time_at(&self, timeout: Duration, site: CallSite) -> bool {
        let Some(deadline) = deadline_after(timeout) else {
            self.lock_at(site);
            return true;
        };

        let mut backoff = Backoff::new();
        loop {
            if self.try_lock_at(site) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            backoff.snooze();
        }
    }

    /// Acquire and return a guard that unlocks on drop.
    #[track_caller]
    pub fn acquire(&self) -> SpinGuard<'_, O> {
        self.lock_at(Location::caller());
        SpinGuard { lock: self }
    }

    /// Single attempt returning a guard on success.
    #[track_caller]
    pub fn try_acquire(&self) -> Option<SpinGuard<'_, O>> {
        self.try_lock_at(Location::caller())
            .then(|| SpinGuard { lock: self })
    }

    /// Bounded attempt returning a guard on success.
    #[track_caller]
    pub fn try_acquire_for(&self, timeout: Duration) -> Option<SpinGuard<'_, O>> {
        self.try_lock_in_time_at(timeout, Location::caller())
            .then(|| SpinGuard { lock: self })
    }
}

impl<O> fmt::Debug for SpinLock<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpinLock")
            .field("locked", &self.is_locked())
            .finish()
    }
}

impl<O: LockObserver> Locker for SpinLock<O> {
    #[track_caller]
    fn lock(&self) {
        self.lock_at(Location::caller());
    }

    #[track_caller]
    fn try_lock(&self) -> bool {
        self.try_lock_at(Location::caller())
    }

    #[track_caller]
    fn try_lock_in_time(&self, timeout: Duration) -> bool {
        self.try_lock_in_time_at(timeout, Location::caller())
    }

    fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }
}

/// Proof of holding a [`SpinLock`]; unlocks on drop.
#[must_use = "if unused the SpinLock will immediately unlock"]
pub struct SpinGuard<'a, O = NoopObserver> {
    lock: &'a SpinLock<O>,
}

impl<O> SpinGuard<'_, O> {
    /// Unlock now.
    pub fn release(self) {}

    /// Keep the lock held after the guard goes away. The caller becomes
    /// responsible for a matching [`SpinLock::unlock`].
    pub fn leak(self) {
        std::mem::forget(self);
    }
}

impl<O> Drop for SpinGuard<'_, O> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_lock_fails_while_held() {
        let lock = SpinLock::new();
        assert!(lock.try_lock());
        assert!(lock.is_locked());
        assert!(!lock.try_lock());
        lock.unlock();
        assert!(lock.try_lock());
    }

    #[test]
    fn test_double_unlock_is_accepted() {
        let lock = SpinLock::new();
        lock.lock();
        lock.unlock();
        lock.unlock();
        assert!(!lock.is_locked());
        assert!(lock.try_lock());
    }

    #[test]
    fn test_not_reentrant() {
        let lock = SpinLock::new();
        lock.lock();
        assert!(!lock.try_lock_in_time(Duration::from_millis(20)));
        lock.unlock();
    }

    #[test]
    fn test_guard_unlocks_on_drop() {
        let lock = SpinLock::new();
        {
            let guard = lock.try_acquire().expect("free lock");
            assert!(lock.try_acquire().is_none());
            drop(guard);
        }
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_leaked_guard_keeps_lock() {
        let lock = SpinLock::new();
        lock.acquire().leak();
        assert!(lock.is_locked());
        lock.unlock();
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_huge_timeout_acquires() {
        let lock = SpinLock::new();
        assert!(lock.try_lock_in_time(Duration::MAX));
        lock.unlock();
    }

    #[test]
    fn test_diagnostics_record_last_acquirer() {
        let lock = SpinLock::with_diagnostics(DiagnosticSink::disabled());
        lock.lock();
        lock.unlock();
        let line = line!() + 1;
        lock.lock();

        let records = lock.observer().records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].site.line(), line);
        assert_eq!(records[0].site.file(), file!());
        lock.unlock();
    }
}
