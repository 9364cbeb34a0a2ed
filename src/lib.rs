// Warden - Spin, reentrant and distributed locks for Rust
//
// This library bundles in-process lock primitives with optional deadlock
// diagnostics and a Redis-lease distributed lock behind one facade.

// Re-export in-process primitives
pub use warden_sync::*;

// Re-export optional crates
#[cfg(feature = "log")]
pub use warden_log;

#[cfg(feature = "redis")]
pub use warden_redis;

#[cfg(feature = "distributed")]
pub use warden_distributed;

#[cfg(feature = "distributed")]
pub use warden_distributed::{
    AsyncLocker, DistributedLock, LeaseGuard, LeaseStore, LockBuilder, LockConfig, LockError,
    LockResult, MemoryLeaseStore, RedisLeaseStore, RenewalPolicy,
};

// Prelude for common imports
pub mod prelude {
    pub use crate::{Locker, Once, ReentrantGuard, ReentrantLock, SpinGuard, SpinLock};

    #[cfg(feature = "log")]
    pub use warden_log::{DiagnosticSink, DiagnosticsConfig};

    #[cfg(feature = "redis")]
    pub use warden_redis::RedisConfig;

    #[cfg(feature = "distributed")]
    pub use crate::{
        AsyncLocker, DistributedLock, LeaseGuard, LeaseStore, LockBuilder, LockError,
        RenewalPolicy,
    };
}
