//! Background lease renewal.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};
use warden_log::DiagnosticSink;

use crate::config::RenewalPolicy;
use crate::error::LockResult;
use crate::store::LeaseStore;

/// Shortest gap between two renewals.
const MIN_RENEW_INTERVAL: Duration = Duration::from_millis(1);

/// Remote lease identity shared between a lock handle and its renewer.
pub(crate) struct Lease {
    pub(crate) key: String,
    pub(crate) token: String,
    pub(crate) ttl: Duration,
    pub(crate) policy: RenewalPolicy,
    pub(crate) store: Arc<dyn LeaseStore>,
    pub(crate) sink: Option<DiagnosticSink>,
    held: AtomicBool,
}

impl Lease {
    pub(crate) fn new(
        key: String,
        token: String,
        ttl: Duration,
        policy: RenewalPolicy,
        store: Arc<dyn LeaseStore>,
        sink: Option<DiagnosticSink>,
    ) -> Self {
        Self {
            key,
            token,
            ttl,
            policy,
            store,
            sink,
            held: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }

    pub(crate) fn set_held(&self, held: bool) {
        self.held.store(held, Ordering::Release);
    }

    async fn refresh(&self) -> LockResult<bool> {
        match self.policy {
            RenewalPolicy::Checked => {
                self.store
                    .compare_and_refresh(&self.key, &self.token, self.ttl)
                    .await
            }
            RenewalPolicy::Unchecked => self.store.refresh(&self.key, self.ttl).await,
        }
    }

    fn renewal_failed(&self, reason: &str) {
        warn!(key = %self.key, reason, "lease renewal failed");
        if let Some(sink) = &self.sink {
            sink.warn(&format!("redis key[{}] expire failed: {}", self.key, reason));
        }
    }
}

/// Handle to the task that keeps one held lease alive.
///
/// Dropping the handle without [`stop`](Self::stop) aborts the task and
/// leaves the held flag to the caller.
pub(crate) struct LeaseRenewer {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl LeaseRenewer {
    /// Spawn the renewer and wait until its first timer is armed.
    pub(crate) async fn start(lease: Arc<Lease>) -> Self {
        let (started_tx, started_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(run(lease, started_tx, stop_rx));
        let _ = started_rx.await;
        Self {
            stop: Some(stop_tx),
            task,
        }
    }

    /// Signal the task and wait for it to finish.
    pub(crate) async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(e) = (&mut self.task).await
            && e.is_panic() {
                warn!(error = %e, "lease renewer panicked");
            }
    }
}

impl Drop for LeaseRenewer {
    fn drop(&mut self) {
        if self.stop.is_some() {
            self.task.abort();
        }
    }
}

async fn run(lease: Arc<Lease>, started: oneshot::Sender<()>, mut stop: oneshot::Receiver<()>) {
    let interval = (lease.ttl / 2).max(MIN_RENEW_INTERVAL);
    let timer = tokio::time::sleep(interval);
    tokio::pin!(timer);
    let _ = started.send(());

    loop {
        tokio::select! {
            _ = &mut stop => {
                debug!(key = %lease.key, "lease renewer stopped");
                break;
            }
            _ = &mut timer => {
                if !lease.is_held() {
                    break;
                }
                match lease.refresh().await {
                    Ok(true) => {
                        trace!(key = %lease.key, "lease renewed");
                        timer.as_mut().reset(Instant::now() + interval);
                    }
                    Ok(false) => {
                        lease.renewal_failed("lease no longer owned");
                        break;
                    }
                    Err(e) => {
                        lease.renewal_failed(&e.to_string());
                        break;
                    }
                }
            }
        }
    }

    lease.set_held(false);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryLeaseStore;

    fn lease(store: &MemoryLeaseStore, ttl: Duration) -> Arc<Lease> {
        Arc::new(Lease::new(
            "_redis_lock:unit".to_string(),
            "token".to_string(),
            ttl,
            RenewalPolicy::Checked,
            Arc::new(store.clone()),
            None,
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_renews_every_half_ttl() {
        let store = MemoryLeaseStore::new();
        let ttl = Duration::from_secs(4);
        store.insert("_redis_lock:unit", "token", ttl);
        let lease = lease(&store, ttl);
        lease.set_held(true);

        let renewer = LeaseRenewer::start(Arc::clone(&lease)).await;
        tokio::time::sleep(Duration::from_millis(4500)).await;
        assert_eq!(store.refresh_count(), 2);
        assert!(store.contains("_redis_lock:unit"));

        renewer.stop().await;
        assert!(!lease.is_held());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_clears_held() {
        let store = MemoryLeaseStore::new();
        let ttl = Duration::from_secs(2);
        let lease = lease(&store, ttl);
        lease.set_held(true);

        let renewer = LeaseRenewer::start(Arc::clone(&lease)).await;
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(!lease.is_held());
        assert!(renewer.task.is_finished());
        renewer.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_tiny_ttl_renews_at_most_every_millisecond() {
        let store = MemoryLeaseStore::new();
        let ttl = Duration::from_nanos(1);
        store.insert("_redis_lock:unit", "token", Duration::from_secs(60));
        let lease = lease(&store, ttl);
        lease.set_held(true);

        let renewer = LeaseRenewer::start(Arc::clone(&lease)).await;
        tokio::time::sleep(Duration::from_micros(500)).await;
        assert_eq!(store.refresh_count(), 0);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(store.refresh_count(), 1);

        renewer.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_aborts_task() {
        let store = MemoryLeaseStore::new();
        let ttl = Duration::from_secs(2);
        store.insert("_redis_lock:unit", "token", ttl);
        let lease = lease(&store, ttl);
        lease.set_held(true);

        let renewer = LeaseRenewer::start(Arc::clone(&lease)).await;
        drop(renewer);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(store.refresh_count(), 0);
        assert!(!store.contains("_redis_lock:unit"));
    }
}
