//! Yield backoff and stall detection shared by the spinning acquire loops.

use std::time::{Duration, Instant};

/// Upper bound on processor yields per failed round.
pub const MAX_YIELDS: u32 = 64;

/// Exponential yield backoff: 1, 2, 4, ... capped at [`MAX_YIELDS`].
#[derive(Debug, Clone)]
pub struct Backoff {
    yields: u32,
}

impl Backoff {
    /// Start a fresh backoff at one yield per round.
    pub const fn new() -> Self {
        Self { yields: 1 }
    }

    /// Number of yields for the current round, advancing to the next one.
    pub fn step(&mut self) -> u32 {
        let yields = self.yields;
        if self.yields < MAX_YIELDS {
            self.yields <<= 1;
        }
        yields
    }

    /// Yield the current thread for one round.
    pub fn snooze(&mut self) {
        for _ in 0..self.step() {
            std::thread::yield_now();
        }
    }

    /// Yields the next round will perform.
    pub fn yields(&self) -> u32 {
        self.yields
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks how long a waiter has been spinning and when a stall report is due.
///
/// At most one report is produced per threshold window.
#[derive(Debug)]
pub struct StallWatch {
    started: Instant,
    window: Instant,
    threshold: Option<Duration>,
}

impl StallWatch {
    /// Start watching. `None` disables reporting.
    pub fn new(threshold: Option<Duration>) -> Self {
        let now = Instant::now();
        Self {
            started: now,
            window: now,
            threshold,
        }
    }

    /// Total wait so far when a report is due, re-arming the window.
    pub fn poll(&mut self) -> Option<Duration> {
        let threshold = self.threshold?;
        let now = Instant::now();
        if now.duration_since(self.window) > threshold {
            self.window = now;
            Some(now.duration_since(self.started))
        } else {
            None
        }
    }
}

/// Deadline `timeout` from now; `None` when it does not fit in an `Instant`.
pub(crate) fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}
