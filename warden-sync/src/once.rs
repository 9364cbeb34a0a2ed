//! Run-once helper guarded by a [`SpinLock`].

use std::sync::atomic::{AtomicBool, Ordering};

use crate::spin::SpinLock;

/// Runs a closure at most once until [`reset`](Once::reset).
///
/// Unlike `std::sync::Once` it can be re-armed, and a panicking closure
/// leaves it incomplete so the next caller runs again.
#[derive(Debug, Default)]
pub struct Once {
    done: AtomicBool,
    lock: SpinLock,
}

impl Once {
    /// Create an armed `Once`.
    pub const fn new() -> Self {
        Self {
            done: AtomicBool::new(false),
            lock: SpinLock::new(),
        }
    }

    /// Run `f` if no call has completed yet.
    pub fn call_once<F: FnOnce()>(&self, f: F) {
        if !self.done.load(Ordering::Acquire) {
            self.call_slow(f);
        }
    }

    #[cold]
    fn call_slow<F: FnOnce()>(&self, f: F) {
        let _guard = self.lock.acquire();
        if !self.done.load(Ordering::Relaxed) {
            f();
            self.done.store(true, Ordering::Release);
        }
    }

    /// Mark complete without running anything.
    pub fn mark_done(&self) {
        self.done.store(true, Ordering::Release);
    }

    /// Re-arm so the next [`call_once`](Self::call_once) runs again.
    pub fn reset(&self) {
        self.done.store(false, Ordering::Release);
    }

    /// Whether a call has completed.
    pub fn is_completed(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_runs_once() {
        let once = Once::new();
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            once.call_once(|| {
                calls.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(once.is_completed());
    }

    #[test]
    fn test_reset_rearms() {
        let once = Once::new();
        let calls = AtomicUsize::new(0);
        once.call_once(|| {
            calls.fetch_add(1, Ordering::SeqCst);
        });
        once.reset();
        once.call_once(|| {
            calls.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_mark_done_skips_closure() {
        let once = Once::new();
        once.mark_done();
        once.call_once(|| panic!("must not run"));
        assert!(once.is_completed());
    }

    #[test]
    fn test_panic_leaves_once_armed() {
        let once = Once::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            once.call_once(|| panic!("boom"));
        }));
        assert!(result.is_err());
        assert!(!once.is_completed());

        let calls = AtomicUsize::new(0);
        once.call_once(|| {
            calls.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
