//! Task definitions and execution logic.
//!
//! A task is the unit of work the scheduler executes: a plain function
//! pointer plus an opaque argument pointer. The scheduler copies tasks by
//! value on submission and never dereferences or frees the argument.

use crate::counter::Counter;
use crate::scheduler::Scheduler;

/// Signature of a task body.
///
/// The scheduler reference is valid for the duration of the call and may be
/// used to submit more tasks or wait on counters.
pub type TaskFn = fn(&Scheduler, *mut ());

/// A unit of work: a function pointer and an opaque argument.
///
/// The argument is owned by the submitter. It must stay valid until the task
/// has run; the scheduler itself places no other lifetime requirement on it.
#[derive(Clone, Copy)]
pub struct Task {
    pub func: TaskFn,
    pub arg: *mut (),
}

// SAFETY: a Task is a function pointer plus a pointer the scheduler never
// dereferences. Whether the pointee tolerates access from another thread is
// the submitter's contract with its own task body.
unsafe impl Send for Task {}

impl Task {
    pub fn new(func: TaskFn, arg: *mut ()) -> Self {
        Task { func, arg }
    }

    /// Wraps a closure as a task.
    ///
    /// The closure is boxed; the box is reclaimed and dropped when the task
    /// runs. A task built this way that is never submitted leaks the box.
    pub fn from_closure<F>(work: F) -> Self
    where
        F: FnOnce(&Scheduler) + Send + 'static,
    {
        fn trampoline<F>(scheduler: &Scheduler, arg: *mut ())
        where
            F: FnOnce(&Scheduler) + Send + 'static,
        {
            // SAFETY: `arg` is the box leaked by `from_closure` and the
            // scheduler invokes every task exactly once.
            let work = unsafe { Box::from_raw(arg as *mut F) };
            work(scheduler);
        }

        Task::new(trampoline::<F>, Box::into_raw(Box::new(work)) as *mut ())
    }
}

/// A task as it sits in the queue: the user's record plus the counter that
/// tracks the batch it was submitted in.
pub(crate) struct ScheduledTask {
    task: Task,
    counter: Option<Counter>,
    /// Set on the task passed to `run`; its completion stops the workers.
    shutdown_on_exit: bool,
}

impl ScheduledTask {
    pub(crate) fn new(task: Task, counter: Option<Counter>) -> Self {
        ScheduledTask {
            task,
            counter,
            shutdown_on_exit: false,
        }
    }

    pub(crate) fn main(task: Task) -> Self {
        ScheduledTask {
            task,
            counter: None,
            shutdown_on_exit: true,
        }
    }

    /// Runs the task body, then decrements the batch counter.
    ///
    /// The decrement happens after the body returns, so writes made by the
    /// task are visible to any fiber woken by the counter reaching its
    /// target.
    pub(crate) fn run(self, scheduler: &Scheduler) {
        // The main task must stop the workers even if its body panics;
        // otherwise the run would never drain.
        struct ShutdownGuard<'a> {
            scheduler: &'a Scheduler,
            armed: bool,
        }
        impl Drop for ShutdownGuard<'_> {
            fn drop(&mut self) {
                if self.armed {
                    self.scheduler.request_shutdown();
                }
            }
        }
        let _guard = ShutdownGuard {
            scheduler,
            armed: self.shutdown_on_exit,
        };

        (self.task.func)(scheduler, self.task.arg);

        if let Some(counter) = &self.counter {
            counter.fetch_sub(1);
        }
    }
}
