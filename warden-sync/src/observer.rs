//! Acquisition observers.
//!
//! Every lock carries an observer chosen at construction. [`NoopObserver`]
//! is the lean configuration; [`AcquisitionRecorder`] records who holds the
//! lock and reports waiters that spin past the stall threshold.

use parking_lot::Mutex;
use std::fmt::{self, Write};
use std::panic::Location;
use std::sync::Arc;
use std::time::Duration;
use warden_log::DiagnosticSink;

use crate::thread::ThreadIdentity;

/// Source location of a lock call.
pub type CallSite = &'static Location<'static>;

/// Hooks invoked by the lock primitives.
pub trait LockObserver: Send + Sync {
    /// The lock moved from unlocked to locked.
    fn on_acquire(&self, _site: CallSite) {}

    /// The owning thread re-entered a reentrant lock.
    fn on_reenter(&self, _site: CallSite) {}

    /// How long a waiter may spin before [`on_stall`](Self::on_stall) fires.
    fn stall_threshold(&self) -> Option<Duration> {
        None
    }

    /// A waiter at `site` has been spinning for `waited`.
    fn on_stall(&self, _waited: Duration, _site: CallSite) {}
}

/// Observer that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl LockObserver for NoopObserver {}

impl<T: LockObserver + ?Sized> LockObserver for Arc<T> {
    fn on_acquire(&self, site: CallSite) {
        (**self).on_acquire(site)
    }

    fn on_reenter(&self, site: CallSite) {
        (**self).on_reenter(site)
    }

    fn stall_threshold(&self) -> Option<Duration> {
        (**self).stall_threshold()
    }

    fn on_stall(&self, waited: Duration, site: CallSite) {
        (**self).on_stall(waited, site)
    }
}

/// Where and by whom a lock was taken.
#[derive(Debug, Clone)]
pub struct AcquisitionRecord {
    /// Call site of the acquire
    pub site: CallSite,
    /// Thread that acquired
    pub thread: ThreadIdentity,
}

impl AcquisitionRecord {
    /// Record for the calling thread at `site`.
    pub fn here(site: CallSite) -> Self {
        Self {
            site,
            thread: ThreadIdentity::current(),
        }
    }
}

impl fmt::Display for AcquisitionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}:{}:{}",
            self.thread,
            self.site.file(),
            self.site.line(),
            self.site.column()
        )
    }
}

/// Records acquisition sites and writes stall reports to a diagnostic sink.
///
/// A plain spin lock keeps exactly one record. A reentrant lock appends one
/// record per nested acquisition, so the list mirrors the reentrancy stack.
#[derive(Debug)]
pub struct AcquisitionRecorder {
    records: Mutex<Vec<AcquisitionRecord>>,
    sink: DiagnosticSink,
}

impl AcquisitionRecorder {
    /// Recorder reporting to `sink`.
    pub fn new(sink: DiagnosticSink) -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            sink,
        }
    }

    /// Snapshot of the current holder's records.
    pub fn records(&self) -> Vec<AcquisitionRecord> {
        self.records.lock().clone()
    }

    /// The sink reports are written to.
    pub fn sink(&self) -> &DiagnosticSink {
        &self.sink
    }

    /// Render the stall report for `waiter` after `waited`.
    pub fn render_stall(&self, waited: Duration, waiter: &AcquisitionRecord) -> String {
        let mut report = String::new();
        let _ = writeln!(report, "dead lock[{:.2} s]", waited.as_secs_f64());
        let _ = writeln!(report, "lock on:");
        let records = self.records.lock();
        if records.is_empty() {
            let _ = writeln!(report, "\t-> held by another process");
        }
        for (n, record) in records.iter().enumerate() {
            let _ = writeln!(report, "\t-> [{}]{}", n, record);
        }
        drop(records);
        let _ = writeln!(report, "calling on:");
        let _ = write!(report, "\t{}", waiter);
        report
    }
}

impl LockObserver for AcquisitionRecorder {
    fn on_acquire(&self, site: CallSite) {
        let record = AcquisitionRecord::here(site);
        let mut records = self.records.lock();
        records.clear();
        records.push(record);
    }

    fn on_reenter(&self, site: CallSite) {
        let record = AcquisitionRecord::here(site);
        self.records.lock().push(record);
    }

    fn stall_threshold(&self) -> Option<Duration> {
        self.sink
            .is_enabled()
            .then(|| self.sink.stall_threshold())
    }

    fn on_stall(&self, waited: Duration, site: CallSite) {
        let report = self.render_stall(waited, &AcquisitionRecord::here(site));
        tracing::warn!(waited_ms = waited.as_millis() as u64, "lock acquisition stalled");
        self.sink.warn(&report);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_log::DiagnosticsConfig;

    #[test]
    fn test_acquire_replaces_records() {
        let recorder = AcquisitionRecorder::new(DiagnosticSink::disabled());
        recorder.on_acquire(Location::caller());
        recorder.on_acquire(Location::caller());
        assert_eq!(recorder.records().len(), 1);
    }

    #[test]
    fn test_reenter_appends_records() {
        let recorder = AcquisitionRecorder::new(DiagnosticSink::disabled());
        recorder.on_acquire(Location::caller());
        recorder.on_reenter(Location::caller());
        recorder.on_reenter(Location::caller());
        assert_eq!(recorder.records().len(), 3);
    }

    #[test]
    fn test_threshold_follows_sink() {
        let disabled = AcquisitionRecorder::new(DiagnosticSink::disabled());
        assert!(disabled.stall_threshold().is_none());

        let sink = DiagnosticSink::open(
            DiagnosticsConfig::enabled("observer").with_stall_threshold(Duration::from_secs(2)),
        )
        .unwrap();
        let enabled = AcquisitionRecorder::new(sink);
        assert_eq!(enabled.stall_threshold(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_render_stall_lists_holder_and_waiter() {
        let recorder = AcquisitionRecorder::new(DiagnosticSink::disabled());
        recorder.on_acquire(Location::caller());

        let waiter = AcquisitionRecord::here(Location::caller());
        let report = recorder.render_stall(Duration::from_millis(5250), &waiter);

        assert!(report.starts_with("dead lock[5.25 s]"));
        assert!(report.contains("lock on:\n\t-> [0]"));
        assert!(report.contains("calling on:"));
        assert!(report.contains(file!()));
    }

    #[test]
    fn test_render_stall_without_local_holder() {
        let recorder = AcquisitionRecorder::new(DiagnosticSink::disabled());
        let waiter = AcquisitionRecord::here(Location::caller());
        let report = recorder.render_stall(Duration::from_secs(6), &waiter);
        assert!(report.contains("held by another process"));
    }
}
