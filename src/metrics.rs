//! Optional performance metrics for the scheduler.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Internal scheduler counters, updated with relaxed atomics on the hot
/// path.
#[derive(Debug)]
pub struct Metrics {
    /// Tasks popped from the queues and executed.
    pub tasks_executed: AtomicU64,
    /// Tasks taken from a sibling worker's deque.
    pub tasks_stolen: AtomicU64,
    /// Fibers taken from the pool to run a task.
    pub fibers_acquired: AtomicU64,
    /// Fibers returned to the pool after their task completed.
    pub fibers_released: AtomicU64,
    /// Fibers parked in a counter's waiter slots.
    pub fibers_parked: AtomicU64,
    /// Fibers resumed off the ready list.
    pub fibers_resumed: AtomicU64,
    /// Time when metrics collection started.
    pub start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            tasks_executed: AtomicU64::new(0),
            tasks_stolen: AtomicU64::new(0),
            fibers_acquired: AtomicU64::new(0),
            fibers_released: AtomicU64::new(0),
            fibers_parked: AtomicU64::new(0),
            fibers_resumed: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Returns a snapshot of the current values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tasks_executed: self.tasks_executed.load(Ordering::Relaxed),
            tasks_stolen: self.tasks_stolen.load(Ordering::Relaxed),
            fibers_acquired: self.fibers_acquired.load(Ordering::Relaxed),
            fibers_released: self.fibers_released.load(Ordering::Relaxed),
            fibers_parked: self.fibers_parked.load(Ordering::Relaxed),
            fibers_resumed: self.fibers_resumed.load(Ordering::Relaxed),
            elapsed_seconds: self.start_time.elapsed().as_secs_f64(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics::new()
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub tasks_executed: u64,
    pub tasks_stolen: u64,
    pub fibers_acquired: u64,
    pub fibers_released: u64,
    pub fibers_parked: u64,
    pub fibers_resumed: u64,
    pub elapsed_seconds: f64,
}

impl MetricsSnapshot {
    /// Calculates task throughput.
    pub fn tasks_per_second(&self) -> f64 {
        if self.elapsed_seconds > 0.0 {
            self.tasks_executed as f64 / self.elapsed_seconds
        } else {
            0.0
        }
    }

    /// Fibers currently out of the pool (acquired minus released).
    pub fn fibers_in_flight(&self) -> i64 {
        self.fibers_acquired as i64 - self.fibers_released as i64
    }

    /// Parked fibers not yet resumed.
    pub fn fibers_waiting(&self) -> i64 {
        self.fibers_parked as i64 - self.fibers_resumed as i64
    }
}
