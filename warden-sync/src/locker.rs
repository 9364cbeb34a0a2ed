//! The capability set shared by every Warden lock.

use std::time::Duration;

/// Raw lock operations.
///
/// None of the implementations are fair: whichever waiter wins the race
/// acquires. `unlock` must pair with a successful acquire by the same
/// caller; prefer the guard-returning methods on each lock, which make an
/// unmatched unlock impossible.
pub trait Locker {
    /// Block until the lock is acquired.
    fn lock(&self);

    /// Acquire without waiting. Returns whether the lock was taken.
    fn try_lock(&self) -> bool;

    /// Keep trying until `timeout` elapses. Returns whether the lock was taken.
    fn try_lock_in_time(&self, timeout: Duration) -> bool;

    /// Release a lock taken by one of the acquire operations.
    fn unlock(&self);
}
