//! Fibers: stackful user-space execution contexts.
//!
//! A fiber owns one stack for its whole lifetime and runs a dispatch loop:
//! execute a task, switch back out with a disposition, wait for the next
//! input. Suspended fibers may be resumed from any worker thread; the switch
//! itself is a full memory fence (`corosensei` guarantees both).

use crate::counter::Counter;
use crate::scheduler::Scheduler;
use crate::task::ScheduledTask;
use corosensei::stack::DefaultStack;
use corosensei::{Coroutine, CoroutineResult, Yielder};
use std::cell::Cell;
use std::io;

/// Raw handle to a fiber that is parked or queued for resumption.
///
/// A handle created by `Box::into_raw` carries unique ownership of the boxed
/// fiber; whoever pops it from a counter slot or the ready list reclaims the
/// box with `Box::from_raw`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FiberHandle(pub(crate) *mut Fiber);

// SAFETY: ownership of the pointee is transferred along with the handle; the
// park/ready protocol guarantees a single owner at any instant.
unsafe impl Send for FiberHandle {}
unsafe impl Sync for FiberHandle {}

/// Delivered to a fiber when a worker switches into it.
pub(crate) enum FiberInput {
    /// Begin executing `task` on this fiber.
    Run {
        task: ScheduledTask,
        /// Address of the owning `Scheduler`, stable for the whole run.
        scheduler: usize,
        fiber: *mut Fiber,
    },
    /// Continue a fiber that suspended inside `wait_for_counter`.
    Resume,
}

/// What must be done with the fiber that just switched away.
///
/// Recorded by the outgoing fiber and executed by the worker after the
/// switch has completed, on the worker's own stack. A fiber cannot publish
/// itself as resumable while its stack is still running, so the hand-off is
/// always deferred to this point.
pub(crate) enum Disposition {
    /// The task ran to completion; the fiber is idle again.
    Release,
    /// Park the fiber on `counter` until it reaches `target`.
    Park { counter: Counter, target: usize },
}

/// Result of driving a fiber for one slice.
pub(crate) enum FiberState {
    Suspended(Disposition),
    Panicked(Box<dyn std::any::Any + Send>),
}

thread_local! {
    static CURRENT_FIBER: Cell<Option<FiberHandle>> = const { Cell::new(None) };
}

/// A stackful execution context that can be parked and resumed on any
/// worker.
pub struct Fiber {
    coroutine: Coroutine<FiberInput, Disposition, ()>,

    /// Suspension point for the dispatch loop running on this fiber's stack.
    /// Installed on first entry; valid for the fiber's lifetime. Only read
    /// while the fiber is the current fiber of some worker.
    yielder: *const Yielder<FiberInput, Disposition>,
}

// SAFETY: a fiber is only ever driven by one worker at a time, and the
// context switch fences all writes made on its stack.
unsafe impl Send for Fiber {}

impl Fiber {
    /// Allocates a stack of `stack_size` bytes and sets up the dispatch loop
    /// on it. Nothing executes until the first `resume`.
    pub(crate) fn new(stack_size: usize) -> io::Result<Fiber> {
        let stack = DefaultStack::new(stack_size)?;

        let coroutine = Coroutine::with_stack(stack, |yielder, mut input: FiberInput| loop {
            match input {
                FiberInput::Run {
                    task,
                    scheduler,
                    fiber,
                } => {
                    // First entry on this stack: record the yielder so the
                    // task can suspend from arbitrarily deep call frames.
                    // SAFETY: `fiber` is the boxed Fiber driving this
                    // coroutine, pinned for the fiber's lifetime.
                    unsafe {
                        (*fiber).yielder = yielder as *const _;
                    }

                    debug_assert_ne!(scheduler, 0, "scheduler pointer cannot be null");
                    debug_assert!(
                        scheduler % std::mem::align_of::<Scheduler>() == 0,
                        "scheduler pointer must be properly aligned"
                    );
                    // SAFETY: the scheduler outlives every worker; workers
                    // are joined before `run` returns.
                    let scheduler = unsafe { &*(scheduler as *const Scheduler) };

                    task.run(scheduler);
                    input = yielder.suspend(Disposition::Release);
                }
                FiberInput::Resume => {
                    // Resumed without a pending task: worker-loop logic
                    // error. Hand the fiber straight back.
                    input = yielder.suspend(Disposition::Release);
                }
            }
        });

        Ok(Fiber {
            coroutine,
            yielder: std::ptr::null(),
        })
    }

    /// Switches into the fiber and runs it until it switches back out.
    pub(crate) fn resume(&mut self, input: FiberInput) -> FiberState {
        let self_ptr = self as *mut Fiber;
        CURRENT_FIBER.set(Some(FiberHandle(self_ptr)));

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.coroutine.resume(input)
        }));

        CURRENT_FIBER.set(None);

        match result {
            Ok(CoroutineResult::Yield(disposition)) => FiberState::Suspended(disposition),
            Ok(CoroutineResult::Return(())) => unreachable!("fiber dispatch loop returned"),
            Err(payload) => FiberState::Panicked(payload),
        }
    }

    /// Suspends the fiber currently running on this thread, delivering
    /// `disposition` to the worker that drove it. Returns when the fiber is
    /// next resumed, possibly on a different worker thread.
    pub(crate) fn park_current(disposition: Disposition) {
        let handle = CURRENT_FIBER
            .get()
            .expect("fiber suspension requested outside a scheduler fiber");

        // SAFETY: `handle` is the fiber executing this very call; its
        // yielder was installed on first entry and lives as long as the
        // fiber does.
        unsafe {
            let fiber = &*handle.0;
            debug_assert!(!fiber.yielder.is_null());
            let yielder = &*fiber.yielder;
            let _input = yielder.suspend(disposition);
            debug_assert!(matches!(_input, FiberInput::Resume));
        }
    }

    /// Handle of the fiber currently running on this thread, if any.
    pub(crate) fn current() -> Option<FiberHandle> {
        CURRENT_FIBER.get()
    }
}
