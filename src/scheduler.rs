//! High-level scheduler interface.
//!
//! The `Scheduler` is the primary entry point: it owns the task queue, the
//! ready-fiber list and the fiber pool, and drives a pool of worker threads
//! for the duration of a [`run`](Scheduler::run).

use crate::counter::Counter;
use crate::error::SchedulerError;
use crate::fiber::{Disposition, Fiber, FiberHandle};
use crate::fiber_pool::FiberPool;
use crate::task::{ScheduledTask, Task};
use crate::worker::{self, WorkerParams};
use crossbeam::deque::{Injector, Stealer, Worker as TaskDeque};
use crossbeam::queue::SegQueue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

/// Tuning knobs recognised by [`Scheduler::run`].
pub struct SchedulerConfig {
    /// Number of OS worker threads, including the thread that calls `run`.
    /// Defaults to the number of logical CPUs.
    pub worker_threads: usize,

    /// Number of fibers created up front. Bounds the number of tasks that
    /// can be in flight (running or suspended in a wait) at once.
    pub fiber_pool_size: usize,

    /// Stack size per fiber, in bytes. Working-set memory for the run is
    /// `fiber_pool_size * fiber_stack_size`.
    pub fiber_stack_size: usize,

    /// Pin each worker thread to a CPU core.
    pub pin_worker_threads: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            worker_threads: thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            fiber_pool_size: 128,
            fiber_stack_size: 512 * 1024,
            pin_worker_threads: false,
        }
    }
}

/// State shared by the workers, the counters, and the public handle.
pub(crate) struct Shared {
    /// Global FIFO of submitted tasks; workers refill their local deques
    /// from here.
    pub(crate) injector: Injector<ScheduledTask>,

    /// Fibers whose wait predicate has been satisfied, in wake order.
    /// Consumed by every worker ahead of the task queue.
    pub(crate) ready: SegQueue<FiberHandle>,

    pub(crate) pool: FiberPool,

    shutdown: AtomicBool,

    #[cfg(feature = "metrics")]
    pub(crate) metrics: crate::metrics::Metrics,
}

impl Shared {
    pub(crate) fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub(crate) fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

/// The task scheduler.
///
/// Construct one with [`Scheduler::new`], submit work with
/// [`add_tasks`](Scheduler::add_tasks) or [`spawn`](Scheduler::spawn), and
/// start execution with [`run`](Scheduler::run), which blocks the calling
/// thread until the main task and everything it scheduled have completed.
///
/// Multiple schedulers may coexist in one process; there is no global state.
pub struct Scheduler {
    shared: Arc<Shared>,
    worker_threads: usize,
    pin_worker_threads: bool,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Scheduler {
            shared: Arc::new(Shared {
                injector: Injector::new(),
                ready: SegQueue::new(),
                pool: FiberPool::new(config.fiber_pool_size, config.fiber_stack_size),
                shutdown: AtomicBool::new(false),
                #[cfg(feature = "metrics")]
                metrics: crate::metrics::Metrics::new(),
            }),
            worker_threads: config.worker_threads.max(1),
            pin_worker_threads: config.pin_worker_threads,
        }
    }

    /// Number of worker threads a run will use.
    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    /// Creates a counter bound to this scheduler.
    pub fn counter(&self) -> Counter {
        Counter::new(Arc::clone(&self.shared))
    }

    /// Submits a batch of tasks.
    ///
    /// When `counter` is given it is set to the batch size before the first
    /// task is enqueued, so a task that completes early can never drive the
    /// counter to a value the batch has not logically reached. The task
    /// slice is copied; the caller may reuse or free it immediately.
    ///
    /// Callable from inside a task or from the application thread before
    /// `run`.
    pub fn add_tasks(&self, tasks: &[Task], counter: Option<&Counter>) {
        if let Some(counter) = counter {
            counter.store(tasks.len());
        }
        for &task in tasks {
            self.shared
                .injector
                .push(ScheduledTask::new(task, counter.cloned()));
        }
    }

    /// Submits a closure as a single task. Returns a counter that reaches
    /// zero when it has run.
    pub fn spawn<F>(&self, work: F) -> Counter
    where
        F: FnOnce(&Scheduler) + Send + 'static,
    {
        let counter = self.counter();
        let task = Task::from_closure(work);
        self.add_tasks(std::slice::from_ref(&task), Some(&counter));
        counter
    }

    /// Submits a batch of closures. Returns a counter that reaches zero when
    /// all of them have run.
    pub fn spawn_batch<I, F>(&self, work: I) -> Counter
    where
        I: IntoIterator<Item = F>,
        F: FnOnce(&Scheduler) + Send + 'static,
    {
        let tasks: Vec<Task> = work.into_iter().map(Task::from_closure).collect();
        let counter = self.counter();
        self.add_tasks(&tasks, Some(&counter));
        counter
    }

    /// Suspends the calling task until `counter` holds `target`.
    ///
    /// Returns immediately when the counter already matches; no fiber
    /// traffic happens in that case. Otherwise the current fiber is parked
    /// in one of the counter's waiter slots and the worker moves on to other
    /// work; once a counter update hits the target, the fiber resumes on
    /// whichever worker picks it up. Thread-local state is therefore not
    /// preserved across this call.
    ///
    /// # Panics
    ///
    /// Must be called from a task running on this scheduler. Waiting from an
    /// ordinary thread is a usage error.
    pub fn wait_for_counter(&self, counter: &Counter, target: usize) {
        if counter.value() == target {
            return;
        }

        assert!(
            Fiber::current().is_some(),
            "wait_for_counter called outside a scheduler task"
        );

        Fiber::park_current(Disposition::Park {
            counter: counter.clone(),
            target,
        });
    }

    /// Runs `main_task` to completion, along with every task the run
    /// schedules, then stops the workers and returns.
    ///
    /// The calling thread becomes worker 0 and `worker_threads - 1`
    /// additional OS threads are spawned. The fiber pool is allocated here
    /// and torn down before returning. Completion of `main_task` requests
    /// shutdown; workers drain the remaining queues and exit.
    ///
    /// Must not be called from two threads at once on the same scheduler.
    pub fn run(&self, main_task: Task) -> Result<(), SchedulerError> {
        self.shared.shutdown.store(false, Ordering::SeqCst);

        if let Err(err) = self.shared.pool.populate() {
            self.shared.pool.drain();
            return Err(SchedulerError::StackAllocation(err));
        }

        let locals: Vec<TaskDeque<ScheduledTask>> = (0..self.worker_threads)
            .map(|_| TaskDeque::new_fifo())
            .collect();
        let stealers: Arc<Vec<Stealer<ScheduledTask>>> =
            Arc::new(locals.iter().map(|deque| deque.stealer()).collect());

        let core_ids = if self.pin_worker_threads {
            core_affinity::get_core_ids().unwrap_or_default()
        } else {
            Vec::new()
        };
        let core_for = |index: usize| core_ids.get(index % core_ids.len().max(1)).copied();

        // Stable for the whole run: workers are joined before we return.
        let scheduler_addr = self as *const Scheduler as usize;

        let mut locals = locals.into_iter();
        let local0 = locals.next().expect("at least one worker");

        let mut handles = Vec::with_capacity(self.worker_threads - 1);
        let mut spawn_error = None;
        for (offset, local) in locals.enumerate() {
            let index = offset + 1;
            let params = WorkerParams {
                index,
                local,
                stealers: Arc::clone(&stealers),
                shared: Arc::clone(&self.shared),
                scheduler: scheduler_addr,
                core_id: core_for(index),
            };
            let spawned = thread::Builder::new()
                .name(format!("taskfiber-worker-{index}"))
                .spawn(move || worker::run_loop(params));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    spawn_error = Some(err);
                    break;
                }
            }
        }

        if let Some(err) = spawn_error {
            // Partially initialised: nothing has been enqueued yet, so the
            // started workers stop as soon as they see the flag.
            self.shared.request_shutdown();
            for handle in handles {
                let _ = handle.join();
            }
            self.shared.pool.drain();
            return Err(SchedulerError::ThreadSpawn(err));
        }

        // The main task goes in only once every worker is up; its completion
        // is what requests shutdown.
        self.shared.injector.push(ScheduledTask::main(main_task));

        worker::run_loop(WorkerParams {
            index: 0,
            local: local0,
            stealers,
            shared: Arc::clone(&self.shared),
            scheduler: scheduler_addr,
            core_id: core_for(0),
        });

        let mut panicked = 0;
        for handle in handles {
            if handle.join().is_err() {
                panicked += 1;
            }
        }

        // All workers have stopped. Reclaim anything still on the ready list
        // (only possible after a worker panic) and destroy the pool.
        while let Some(handle) = self.shared.ready.pop() {
            drop(unsafe { Box::from_raw(handle.0) });
        }
        self.shared.pool.drain();

        if panicked > 0 {
            return Err(SchedulerError::WorkerPanicked { count: panicked });
        }
        Ok(())
    }

    pub(crate) fn request_shutdown(&self) {
        self.shared.request_shutdown();
    }

    /// Snapshot of the scheduler's internal counters.
    #[cfg(feature = "metrics")]
    pub fn metrics(&self) -> crate::metrics::MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    #[cfg(test)]
    pub(crate) fn pop_ready_for_test(&self) -> Option<FiberHandle> {
        self.shared.ready.pop()
    }

    #[cfg(test)]
    pub(crate) fn idle_fibers_for_test(&self) -> usize {
        self.shared.pool.idle_count()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Scheduler::new(SchedulerConfig::default())
    }
}
