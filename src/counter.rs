//! Counter-based synchronization primitives for task completion tracking.
//!
//! Counters are the synchronization mechanism exposed to tasks: an atomic
//! value plus a small set of waiting slots. A task waits for a counter to
//! reach a target value; the fiber it runs on is parked in a slot and any
//! later modification that hits the target moves it to the scheduler's
//! ready list, where the next free worker picks it up.

use crate::fiber::FiberHandle;
use crate::scheduler::Shared;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Maximum number of fibers that may wait on one counter at the same time.
///
/// This is a design bound on per-counter fan-in, not a tunable. Exceeding it
/// means the dependency structure is outside what the scheduler was sized
/// for and aborts the process with a diagnostic.
pub const MAX_WAITERS: usize = 4;

struct WaitSlot {
    fiber: FiberHandle,
    target: usize,
}

struct CounterInner {
    value: AtomicUsize,

    /// Update-and-scan and check-and-install both run under this lock, which
    /// is what rules out lost wakeups.
    waiters: Mutex<[Option<WaitSlot>; MAX_WAITERS]>,

    /// Ready list destination for woken fibers.
    shared: Arc<Shared>,
}

/// A thread-safe counter with attached waiter slots.
///
/// Counters are created through [`Scheduler::counter`] and are cheap to
/// clone; clones share the same value and slots. The value never goes below
/// zero: batches store the task count up front and each completed task
/// subtracts one.
///
/// [`Scheduler::counter`]: crate::Scheduler::counter
#[derive(Clone)]
pub struct Counter {
    inner: Arc<CounterInner>,
}

/// Outcome of trying to park a fiber on a counter.
pub(crate) enum AddWaiter {
    Parked,
    /// The counter already holds the target; the fiber must not be parked.
    AlreadySatisfied,
    /// All waiter slots are occupied. Fatal at the call site.
    Full,
}

impl Counter {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Counter {
            inner: Arc::new(CounterInner {
                value: AtomicUsize::new(0),
                waiters: Mutex::new(std::array::from_fn(|_| None)),
                shared,
            }),
        }
    }

    /// Returns the current value.
    pub fn value(&self) -> usize {
        self.inner.value.load(Ordering::SeqCst)
    }

    /// Sets the counter to `value`, waking waiters whose target matches.
    pub fn store(&self, value: usize) {
        let mut waiters = self.inner.waiters.lock().unwrap();
        self.inner.value.store(value, Ordering::SeqCst);
        self.wake_matching(&mut waiters, value);
    }

    /// Adds `n`, waking matching waiters. Returns the previous value.
    pub fn fetch_add(&self, n: usize) -> usize {
        let mut waiters = self.inner.waiters.lock().unwrap();
        let old = self.inner.value.fetch_add(n, Ordering::SeqCst);
        self.wake_matching(&mut waiters, old + n);
        old
    }

    /// Subtracts `n`, waking matching waiters. Returns the previous value.
    ///
    /// Driving the counter below zero is a usage bug and aborts the
    /// process: a wrapped value would satisfy no waiter and the run would
    /// deadlock silently.
    pub fn fetch_sub(&self, n: usize) -> usize {
        let mut waiters = self.inner.waiters.lock().unwrap();
        // Every modification happens under the lock, so this read cannot
        // race another update.
        let current = self.inner.value.load(Ordering::SeqCst);
        if current < n {
            eprintln!(
                "taskfiber: counter underflow (value {}, subtracting {})",
                current, n
            );
            std::process::abort();
        }
        let old = self.inner.value.fetch_sub(n, Ordering::SeqCst);
        self.wake_matching(&mut waiters, old - n);
        old
    }

    fn wake_matching(&self, waiters: &mut [Option<WaitSlot>; MAX_WAITERS], value: usize) {
        for slot in waiters.iter_mut() {
            if slot.as_ref().is_some_and(|w| w.target == value) {
                let woken = slot.take().unwrap();
                self.inner.shared.ready.push(woken.fiber);
            }
        }
    }

    /// Reserves a waiter slot for `fiber`, to be woken when the value hits
    /// `target`.
    ///
    /// Called by the worker loop on behalf of a fiber that has already fully
    /// switched away. The value is re-checked under the slot lock: an update
    /// that landed between the caller's last observation and this call
    /// reports `AlreadySatisfied` instead of parking, so no wakeup is lost.
    pub(crate) fn add_waiter(&self, fiber: FiberHandle, target: usize) -> AddWaiter {
        let mut waiters = self.inner.waiters.lock().unwrap();

        if self.inner.value.load(Ordering::SeqCst) == target {
            return AddWaiter::AlreadySatisfied;
        }

        for slot in waiters.iter_mut() {
            if slot.is_none() {
                *slot = Some(WaitSlot { fiber, target });
                return AddWaiter::Parked;
            }
        }
        AddWaiter::Full
    }

    /// Number of occupied waiter slots. Diagnostic only.
    pub(crate) fn waiter_count(&self) -> usize {
        let waiters = self.inner.waiters.lock().unwrap();
        waiters.iter().filter(|slot| slot.is_some()).count()
    }
}

impl fmt::Debug for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Counter")
            .field("value", &self.value())
            .field("waiters", &self.waiter_count())
            .finish()
    }
}

impl Drop for CounterInner {
    fn drop(&mut self) {
        // Reclaim fibers still parked here so their stacks are freed even if
        // the application abandoned the wait.
        let waiters = self.waiters.get_mut().unwrap();
        for slot in waiters.iter_mut() {
            if let Some(woken) = slot.take() {
                drop(unsafe { Box::from_raw(woken.fiber.0) });
            }
        }
    }
}
