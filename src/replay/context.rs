//! Per-run counter and clock

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use tokio::sync::Notify;

/// State shared between the drive routine and a client's event handler
///
/// The counter only ever increases. The run completes exactly once, when the
/// counter first equals the target; the elapsed time is frozen at that point.
#[derive(Debug)]
pub struct RunContext {
    processed: AtomicU64,
    target: u64,
    started_at: OnceLock<Instant>,
    elapsed: OnceLock<Duration>,
    done: Notify,
}

impl RunContext {
    /// Create a context expecting `target` events, with `seed` already
    /// counted
    #[must_use]
    pub fn new(target: u64, seed: u64) -> Self {
        Self {
            processed: AtomicU64::new(seed),
            target,
            started_at: OnceLock::new(),
            elapsed: OnceLock::new(),
            done: Notify::new(),
        }
    }

    /// Start the clock
    ///
    /// A run whose seed already covers the target finishes here.
    pub fn begin(&self) {
        let started = *self.started_at.get_or_init(Instant::now);
        if self.processed.load(Ordering::Acquire) >= self.target {
            self.complete(started);
        }
    }

    /// Count one logical event
    pub fn record_event(&self) {
        let processed = self.processed.fetch_add(1, Ordering::AcqRel) + 1;
        if processed == self.target {
            if let Some(&started) = self.started_at.get() {
                self.complete(started);
            }
        }
    }

    fn complete(&self, started: Instant) {
        if self.elapsed.set(started.elapsed()).is_ok() {
            self.done.notify_one();
        }
    }

    /// Wait until the target is reached
    pub async fn finished(&self) {
        loop {
            let notified = self.done.notified();
            if self.elapsed.get().is_some() {
                return;
            }
            notified.await;
        }
    }

    /// Whether the target has been reached
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.elapsed.get().is_some()
    }

    /// Events counted so far, including the seed
    #[must_use]
    pub fn events(&self) -> u64 {
        self.processed.load(Ordering::Acquire)
    }

    /// Expected event count
    #[must_use]
    pub fn target(&self) -> u64 {
        self.target
    }

    /// Metrics of a finished run
    #[must_use]
    pub fn metrics(&self) -> Option<RunMetrics> {
        self.elapsed.get().map(|&elapsed| RunMetrics {
            elapsed,
            events_processed: self.target,
        })
    }
}

/// Result of one replay run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunMetrics {
    /// Time from first pushed frame to the last expected event
    pub elapsed: Duration,
    /// Events the run waited for
    pub events_processed: u64,
}

impl RunMetrics {
    /// Events per second
    #[must_use]
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.events_processed as f64 / secs
        } else {
            f64::INFINITY
        }
    }

    /// Elapsed milliseconds with sub-millisecond precision
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed.as_secs_f64() * 1000.0
    }
}
