//! Reentrant lock built on [`SpinLock`].

use std::fmt;
use std::marker::PhantomData;
use std::panic::Location;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use warden_log::DiagnosticSink;

use crate::backoff::{Backoff, StallWatch, deadline_after};
use crate::locker::Locker;
use crate::observer::{AcquisitionRecorder, CallSite, LockObserver, NoopObserver};
use crate::spin::SpinLock;
use crate::thread::{NO_THREAD, ThreadIdentity};

/// Spin lock that the owning thread may acquire again without blocking.
///
/// Each acquire by the owner bumps a recursion count; the embedded spin lock
/// is released when the count returns to zero. `unlock` must be called by
/// the owning thread, once per successful acquire. [`ReentrantGuard`] is
/// `!Send`, so the guard API enforces this.
///
/// # Examples
///
/// ```rust
/// use warden_sync::ReentrantLock;
///
/// let lock = ReentrantLock::new();
/// let outer = lock.acquire();
/// let inner = lock.acquire();
/// assert_eq!(lock.recursion_count(), 2);
/// drop(inner);
/// drop(outer);
/// assert!(!lock.is_locked());
/// ```
pub struct ReentrantLock<O = NoopObserver> {
    lock: SpinLock<O>,
    owner: AtomicU64,
    count: AtomicUsize,
}

impl ReentrantLock {
    /// Create an unlocked reentrant lock without diagnostics.
    pub const fn new() -> Self {
        Self::with_observer(NoopObserver)
    }
}

impl Default for ReentrantLock {
    fn default() -> Self {
        Self::new()
    }
}

impl ReentrantLock<AcquisitionRecorder> {
    /// Create a reentrant lock that records every nested acquisition site and
    /// reports stalls to `sink`.
    pub fn with_diagnostics(sink: DiagnosticSink) -> Self {
        Self::with_observer(AcquisitionRecorder::new(sink))
    }
}

impl<O> ReentrantLock<O> {
    /// Create an unlocked reentrant lock reporting to `observer`.
    pub const fn with_observer(observer: O) -> Self {
        Self {
            lock: SpinLock::with_observer(observer),
            owner: AtomicU64::new(NO_THREAD),
            count: AtomicUsize::new(0),
        }
    }

    /// The observer attached at construction.
    pub fn observer(&self) -> &O {
        self.lock.observer()
    }

    /// Whether any thread holds the lock.
    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }

    /// Whether the calling thread holds the lock.
    pub fn is_owned_by_current_thread(&self) -> bool {
        self.owner.load(Ordering::Relaxed) == ThreadIdentity::current_id()
    }

    /// Nesting depth. Only meaningful when read by the owning thread.
    pub fn recursion_count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    /// Release one level of ownership.
    pub fn unlock(&self) {
        // Only the owner reaches here; the spin lock orders the hand-off.
        match self.count.load(Ordering::Relaxed) {
            0 => {}
            1 => {
                self.count.store(0, Ordering::Relaxed);
                self.owner.store(NO_THREAD, Ordering::Relaxed);
                self.lock.unlock();
            }
            n => self.count.store(n - 1, Ordering::Relaxed),
        }
    }
}

impl<O: LockObserver> ReentrantLock<O> {
    fn try_reenter(&self, me: u64, site: CallSite) -> bool {
        // A thread can only ever read its own id here if it stored it.
        if self.owner.load(Ordering::Relaxed) != me {
            return false;
        }
        self.count.fetch_add(1, Ordering::Relaxed);
        self.lock.observer().on_reenter(site);
        true
    }

    fn try_take(&self, me: u64, site: CallSite) -> bool {
        if !self.lock.try_lock_at(site) {
            return false;
        }
        self.owner.store(me, Ordering::Relaxed);
        self.count.store(1, Ordering::Relaxed);
        true
    }

    /// Attempt once, re-entering if the caller already owns the lock.
    #[track_caller]
    pub fn try_lock(&self) -> bool {
        self.try_lock_at(Location::caller())
    }

    /// [`try_lock`](Self::try_lock) on behalf of `site`.
    pub fn try_lock_at(&self, site: CallSite) -> bool {
        let me = ThreadIdentity::current_id();
        self.try_reenter(me, site) || self.try_take(me, site)
    }

    /// Block until acquired.
    #[track_caller]
    pub fn lock(&self) {
        self.lock_at(Location::caller());
    }

    /// [`lock`](Self::lock) on behalf of `site`.
    pub fn lock_at(&self, site: CallSite) {
        let me = ThreadIdentity::current_id();
        if self.try_reenter(me, site) {
            return;
        }

        let mut backoff = Backoff::new();
        let mut stall = StallWatch::new(self.lock.observer().stall_threshold());
        while !self.try_take(me, site) {
            backoff.snooze();
            if let Some(waited) = stall.poll() {
                self.lock.observer().on_stall(waited, site);
            }
        }
    }

    /// Keep trying until `timeout` elapses.
    #[track_caller]
    pub fn try_lock_in_time(&self, timeout: Duration) -> bool {
        self.try_lock_in_time_at(timeout, Location::caller())
    }

    /// [`try_lock_in_time`](Self::try_lock_in_time) on behalf of `site`.
    pub fn try_lock_in_time_at(&self, timeout: Duration, site: CallSite) -> bool {
        let me = ThreadIdentity::current_id();
        if self.try_reenter(me, site) {
            return true;
        }
        let Some(deadline) = deadline_after(timeout) else {
            self.lock_at(site);
            return true;
        };

        let mut backoff = Backoff::new();
        loop {
            if self.try_take(me, site) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            backoff.snooze();
        }
    }

    /// Acquire and return a guard that releases one level on drop.
    #[track_caller]
    pub fn acquire(&self) -> ReentrantGuard<'_, O> {
        self.lock_at(Location::caller());
        ReentrantGuard::new(self)
    }

    /// Single attempt returning a guard on success.
    #[track_caller]
    pub fn try_acquire(&self) -> Option<ReentrantGuard<'_, O>> {
        self.try_lock_at(Location::caller())
            .then(|| ReentrantGuard::new(self))
    }

    /// Bounded attempt returning a guard on success.
    #[track_caller]
    pub fn try_acquire_for(&self, timeout: Duration) -> Option<ReentrantGuard<'_, O>> {
        self.try_lock_in_time_at(timeout, Location::caller())
            .then(|| ReentrantGuard::new(self))
    }
}

impl<O> fmt::Debug for ReentrantLock<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReentrantLock")
            .field("locked", &self.is_locked())
            .field("owner", &self.owner.load(Ordering::Relaxed))
            .finish()
    }
}

impl<O: LockObserver> Locker for ReentrantLock<O> {
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
        ReentrantLock::<O>::unlock(self);
    }
}

/// One level of ownership of a [`ReentrantLock`]; released on drop.
///
/// Not `Send`: a level must be released by the thread that acquired it.
#[must_use = "if unused the ReentrantLock will immediately unlock"]
pub struct ReentrantGuard<'a, O = NoopObserver> {
    lock: &'a ReentrantLock<O>,
    _not_send: PhantomData<*const ()>,
}

impl<'a, O> ReentrantGuard<'a, O> {
    fn new(lock: &'a ReentrantLock<O>) -> Self {
        Self {
            lock,
            _not_send: PhantomData,
        }
    }

    /// Release this level now.
    pub fn release(self) {}
}

impl<O> Drop for ReentrantGuard<'_, O> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}
