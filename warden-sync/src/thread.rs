//! Stable per-thread identity used for lock ownership and diagnostics.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identity value that never belongs to a thread.
pub const NO_THREAD: u64 = 0;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: ThreadIdentity = ThreadIdentity::allocate();
}

/// Process-unique thread id plus the thread's name, if it has one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadIdentity {
    id: u64,
    name: Option<Arc<str>>,
}

impl ThreadIdentity {
    fn allocate() -> Self {
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            name: std::thread::current().name().map(Arc::from),
        }
    }

    /// Identity of the calling thread.
    pub fn current() -> Self {
        CURRENT.with(Clone::clone)
    }

    /// Numeric id of the calling thread. Never [`NO_THREAD`].
    pub fn current_id() -> u64 {
        CURRENT.with(|identity| identity.id)
    }

    /// Numeric id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Thread name.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl fmt::Display for ThreadIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "tid:{} {}", self.id, name),
            None => write!(f, "tid:{}", self.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_stable_within_thread() {
        assert_eq!(ThreadIdentity::current_id(), ThreadIdentity::current_id());
        assert_ne!(ThreadIdentity::current_id(), NO_THREAD);
    }

    #[test]
    fn test_identity_differs_across_threads() {
        let here = ThreadIdentity::current_id();
        let there = std::thread::spawn(ThreadIdentity::current_id).join().unwrap();
        assert_ne!(here, there);
    }

    #[test]
    fn test_display_includes_name() {
        let identity = std::thread::Builder::new()
            .name("worker-7".into())
            .spawn(ThreadIdentity::current)
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(identity.name(), Some("worker-7"));
        assert!(identity.to_string().ends_with("worker-7"));
    }
}
