//! Cumulative timing profile for hot paths (steps, script evaluations).

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::{Duration, Instant};

/// Accumulated measurements for one label.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timing {
    pub count: u64,
    pub total: Duration,
    pub max: Duration,
}

impl Timing {
    pub fn mean(&self) -> Duration {
        if self.count == 0 {
            return Duration::ZERO;
        }
        self.total / self.count.min(u32::MAX as u64) as u32
    }
}

/// Thread-safe timing profile keyed by static labels.
#[derive(Debug, Default)]
pub struct Timings {
    entries: Mutex<BTreeMap<&'static str, Timing>>,
}

/// Records the elapsed time for its label when dropped.
#[must_use = "the measurement ends when the guard is dropped"]
pub struct TimingGuard<'a> {
    timings: &'a Timings,
    label: &'static str,
    started: Instant,
}

impl Drop for TimingGuard<'_> {
    fn drop(&mut self) {
        self.timings.record(self.label, self.started.elapsed());
    }
}

impl Timings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts measuring `label`.
    pub fn start(&self, label: &'static str) -> TimingGuard<'_> {
        TimingGuard {
            timings: self,
            label,
            started: Instant::now(),
        }
    }

    pub fn record(&self, label: &'static str, elapsed: Duration) {
        let mut entries = self.entries.lock();
        let entry = entries.entry(label).or_default();
        entry.count += 1;
        entry.total += elapsed;
        entry.max = entry.max.max(elapsed);
    }

    pub fn count(&self, label: &str) -> u64 {
        self.entries.lock().get(label).map(|t| t.count).unwrap_or(0)
    }

    pub fn snapshot(&self) -> BTreeMap<&'static str, Timing> {
        self.entries.lock().clone()
    }

    pub fn reset(&self) {
        self.entries.lock().clear();
    }

    /// One line per label, sorted by label.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        for (label, t) in self.snapshot() {
            let _ = writeln!(
                out,
                "{:<18} count={:<8} total={:?} mean={:?} max={:?}",
                label,
                t.count,
                t.total,
                t.mean(),
                t.max
            );
        }
        out
    }
}
