//! # taskfiber - Fiber-Based Task Scheduler
//!
//! A task-based multithreading runtime built around stackful user-space
//! fibers scheduled across a pool of worker threads. Tasks are fine-grained
//! units of work that may depend on each other through shared counters; a
//! task that waits for its dependencies suspends the fiber it runs on
//! instead of blocking a worker thread, and the parked fiber resumes on
//! whichever worker becomes free once the counter hits its target.
//!
//! ## Architecture
//!
//! The system follows an M:N model where M fibers are multiplexed onto N
//! worker threads. Key components:
//!
//! - **Fibers**: lightweight execution contexts that can be parked and
//!   resumed on any worker
//! - **Task queue**: work-stealing MPMC queues for pending tasks
//! - **Counters**: the synchronization primitive tasks wait on
//! - **Workers**: OS threads driving one fiber at a time
//!
//! ## Example
//!
//! ```no_run
//! use taskfiber::{Scheduler, SchedulerConfig, Task};
//!
//! fn hello(_scheduler: &Scheduler, _arg: *mut ()) {
//!     println!("hello from a fiber task");
//! }
//!
//! let scheduler = Scheduler::new(SchedulerConfig::default());
//! scheduler.run(Task::new(hello, std::ptr::null_mut())).unwrap();
//! ```

pub mod counter;
pub mod error;
pub mod iter;
pub mod scheduler;
pub mod task;

mod fiber;
mod fiber_pool;
mod worker;

#[cfg(feature = "metrics")]
pub mod metrics;
#[cfg(feature = "profile")]
pub mod profile;

pub use counter::Counter;
pub use error::SchedulerError;
pub use scheduler::{Scheduler, SchedulerConfig};
pub use task::{Task, TaskFn};
