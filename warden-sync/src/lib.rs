//! In-process locking primitives for Warden
//!
//! ## Features
//!
//! - **Spin Lock** - Compare-and-swap lock with exponential yield backoff
//! - **Reentrant Lock** - Owner-tracking lock the holder may take again
//! - **Once** - Re-armable run-once helper
//! - **Deadlock Diagnostics** - Optional acquisition-site recording and
//!   stall reports, selected per lock at construction
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use warden_sync::{ReentrantLock, SpinLock};
//!
//! let counter = Arc::new(SpinLock::new());
//! let guard = counter.acquire();
//! assert!(counter.try_acquire_for(Duration::from_millis(1)).is_none());
//! drop(guard);
//!
//! let reentrant = ReentrantLock::new();
//! let _outer = reentrant.acquire();
//! let _inner = reentrant.acquire();
//! ```
//!
//! ## Diagnostics
//!
//! ```rust,no_run
//! use warden_log::{DiagnosticSink, DiagnosticsConfig};
//! use warden_sync::SpinLock;
//!
//! let sink = DiagnosticSink::open(
//!     DiagnosticsConfig::enabled("orders").with_log_dir("."),
//! )?;
//! let lock = SpinLock::with_diagnostics(sink);
//! // Waiters spinning for more than 5 s now write a stall report naming
//! // the holder's acquisition site.
//! # Ok::<(), warden_log::LogError>(())
//! ```

pub mod backoff;
pub mod locker;
pub mod observer;
pub mod once;
pub mod reentrant;
pub mod spin;
pub mod thread;

pub use backoff::{Backoff, MAX_YIELDS, StallWatch};
pub use locker::Locker;
pub use observer::{AcquisitionRecord, AcquisitionRecorder, CallSite, LockObserver, NoopObserver};
pub use once::Once;
pub use reentrant::{ReentrantGuard, ReentrantLock};
pub use spin::{SpinGuard, SpinLock};
pub use thread::ThreadIdentity;
