//! Run metrics.
//!
//! Counters are shared by reference with every action of a run, including
//! concurrently running parallel children, so they are atomics.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of the counters of one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    /// Actions whose work ran
    pub actions_executed: u64,
    /// Actions skipped by a condition or sheet guard
    pub actions_skipped: u64,
    /// Jumps taken by block interpreters
    pub jumps: u64,
    /// Loop passes
    pub loop_passes: u64,
    /// Parallel children started
    pub parallel_tasks: u64,
}

impl Metrics {
    /// Actions looked at, run or skipped
    #[must_use]
    pub fn actions_seen(&self) -> u64 {
        self.actions_executed + self.actions_skipped
    }

    /// Share of looked-at actions that were skipped (0.0 - 1.0)
    #[must_use]
    pub fn skip_rate(&self) -> f64 {
        if self.actions_seen() == 0 {
            return 0.0;
        }
        self.actions_skipped as f64 / self.actions_seen() as f64
    }
}

/// Live counters of one run
#[derive(Debug, Default)]
pub struct RunMetrics {
    actions_executed: AtomicU64,
    actions_skipped: AtomicU64,
    jumps: AtomicU64,
    loop_passes: AtomicU64,
    parallel_tasks: AtomicU64,
}

impl RunMetrics {
    /// Fresh counters
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an action that ran
    pub fn record_execution(&self) {
        self.actions_executed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a skipped action
    pub fn record_skip(&self) {
        self.actions_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a jump
    pub fn record_jump(&self) {
        self.jumps.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a loop pass
    pub fn record_loop_pass(&self) {
        self.loop_passes.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a parallel child start
    pub fn record_parallel_task(&self) {
        self.parallel_tasks.fetch_add(1, Ordering::Relaxed);
    }

    /// Current values
    #[must_use]
    pub fn snapshot(&self) -> Metrics {
        Metrics {
            actions_executed: self.actions_executed.load(Ordering::Relaxed),
            actions_skipped: self.actions_skipped.load(Ordering::Relaxed),
            jumps: self.jumps.load(Ordering::Relaxed),
            loop_passes: self.loop_passes.load(Ordering::Relaxed),
            parallel_tasks: self.parallel_tasks.load(Ordering::Relaxed),
        }
    }
}
