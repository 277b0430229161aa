//! Worker thread implementation.
//!
//! Each worker drives one fiber at a time on top of its own OS thread.
//! Ready fibers take precedence over new tasks; new tasks come from the
//! worker's local deque, then the global injector, then from stealing.
//! After every switch back out of a fiber the worker executes the
//! disposition the fiber recorded for itself.

use crate::counter::AddWaiter;
use crate::fiber::{Disposition, Fiber, FiberHandle, FiberInput, FiberState};
use crate::scheduler::Shared;
use crate::task::ScheduledTask;
use core_affinity::CoreId;
use crossbeam::deque::{Steal, Stealer, Worker as TaskDeque};
use crossbeam::utils::Backoff;
use std::sync::Arc;

pub(crate) struct WorkerParams {
    pub(crate) index: usize,
    pub(crate) local: TaskDeque<ScheduledTask>,
    pub(crate) stealers: Arc<Vec<Stealer<ScheduledTask>>>,
    pub(crate) shared: Arc<Shared>,
    /// Address of the `Scheduler` owning this run; stable until every
    /// worker has been joined.
    pub(crate) scheduler: usize,
    pub(crate) core_id: Option<CoreId>,
}

/// Main execution loop. Runs on the spawned worker threads and, for worker
/// 0, on the thread that called `run`.
pub(crate) fn run_loop(params: WorkerParams) {
    let WorkerParams {
        index,
        local,
        stealers,
        shared,
        scheduler,
        core_id,
    } = params;

    if let Some(core_id) = core_id {
        core_affinity::set_for_current(core_id);
    }

    let backoff = Backoff::new();
    loop {
        // Fibers whose wait was satisfied take precedence over new tasks.
        if let Some(handle) = shared.ready.pop() {
            #[cfg(feature = "profile")]
            let _span = crate::profile::SpanGuard::new("resume_fiber", index);
            #[cfg(feature = "metrics")]
            shared
                .metrics
                .fibers_resumed
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

            // SAFETY: a handle on the ready list carries unique ownership
            // of the boxed fiber, relinquished by the worker that parked it.
            let mut fiber = unsafe { Box::from_raw(handle.0) };
            let state = fiber.resume(FiberInput::Resume);
            dispose(fiber, state, &shared);
            backoff.reset();
            continue;
        }

        if let Some(task) = next_task(&local, &shared, &stealers, index) {
            #[cfg(feature = "profile")]
            let _span = crate::profile::SpanGuard::new("run_task", index);
            #[cfg(feature = "metrics")]
            shared
                .metrics
                .tasks_executed
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

            let Some(mut fiber) = shared.pool.acquire() else {
                eprintln!(
                    "taskfiber: fiber pool exhausted (pool size {}): every fiber is running or parked",
                    shared.pool.capacity()
                );
                std::process::abort();
            };
            #[cfg(feature = "metrics")]
            shared
                .metrics
                .fibers_acquired
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

            let fiber_ptr: *mut Fiber = &mut *fiber;
            let state = fiber.resume(FiberInput::Run {
                task,
                scheduler,
                fiber: fiber_ptr,
            });
            dispose(fiber, state, &shared);
            backoff.reset();
            continue;
        }

        if shared.shutdown_requested()
            && local.is_empty()
            && shared.injector.is_empty()
            && shared.ready.is_empty()
        {
            break;
        }
        backoff.snooze();
    }

    #[cfg(feature = "profile")]
    crate::profile::flush_thread();
}

/// Pops the next task: local deque, then a batch from the global injector,
/// then a steal from a sibling.
fn next_task(
    local: &TaskDeque<ScheduledTask>,
    shared: &Shared,
    stealers: &[Stealer<ScheduledTask>],
    index: usize,
) -> Option<ScheduledTask> {
    if let Some(task) = local.pop() {
        return Some(task);
    }

    const MAX_RETRIES: usize = 3;
    let mut retries = 0;
    loop {
        match shared.injector.steal_batch_and_pop(local) {
            Steal::Success(task) => return Some(task),
            Steal::Empty => break,
            Steal::Retry => {
                retries += 1;
                if retries >= MAX_RETRIES {
                    break;
                }
            }
        }
    }

    for (sibling, stealer) in stealers.iter().enumerate() {
        if sibling == index {
            continue;
        }
        if let Steal::Success(task) = stealer.steal() {
            #[cfg(feature = "metrics")]
            shared
                .metrics
                .tasks_stolen
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            return Some(task);
        }
    }
    None
}

/// Executes the disposition the outgoing fiber recorded for itself.
///
/// Runs on the worker's own stack, strictly after the switch out of the
/// fiber has completed, so the fiber is never visible to another worker
/// while its stack is still live.
fn dispose(fiber: Box<Fiber>, state: FiberState, shared: &Shared) {
    match state {
        FiberState::Suspended(Disposition::Release) => {
            shared.pool.release(fiber);
            #[cfg(feature = "metrics")]
            shared
                .metrics
                .fibers_released
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
        FiberState::Suspended(Disposition::Park { counter, target }) => {
            let handle = FiberHandle(Box::into_raw(fiber));
            match counter.add_waiter(handle, target) {
                AddWaiter::Parked => {
                    #[cfg(feature = "metrics")]
                    shared
                        .metrics
                        .fibers_parked
                        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                }
                AddWaiter::AlreadySatisfied => {
                    // The counter hit the target while we were switching
                    // away; the fiber goes straight back to runnable.
                    shared.ready.push(handle);
                }
                AddWaiter::Full => {
                    eprintln!(
                        "taskfiber: counter waiter slots exhausted \
                         ({} slots, counter value {}, requested target {})",
                        crate::counter::MAX_WAITERS,
                        counter.value(),
                        target
                    );
                    std::process::abort();
                }
            }
        }
        FiberState::Panicked(payload) => {
            let msg = if let Some(s) = payload.downcast_ref::<&str>() {
                *s
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.as_str()
            } else {
                "non-string panic payload"
            };
            eprintln!("taskfiber: task panicked: {}", msg);
            // The unwound fiber's coroutine is finished; replace it to keep
            // the pool population constant.
            drop(fiber);
            shared.pool.replace_poisoned();
        }
    }
}
