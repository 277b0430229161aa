//! Scheduler error types.

use std::io;
use thiserror::Error;

/// Failures reported from [`Scheduler::run`](crate::Scheduler::run).
///
/// These cover platform-level setup problems and worker-thread panics.
/// Sizing and usage violations (fiber-pool exhaustion, counter waiter-slot
/// exhaustion, waiting off-fiber) are not recoverable and terminate
/// instead, with diagnostics on stderr.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A fiber stack could not be allocated while building the pool.
    #[error("failed to allocate fiber stack: {0}")]
    StackAllocation(#[source] io::Error),

    /// An OS worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    ThreadSpawn(#[source] io::Error),

    /// One or more worker threads panicked during the run.
    #[error("{count} worker thread(s) panicked")]
    WorkerPanicked { count: usize },
}
