//! End-to-end scheduler scenarios over the public API.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use taskfiber::{Scheduler, SchedulerConfig, Task};

#[test]
fn test_single_task_run_returns_promptly() {
    fn main_task(scheduler: &Scheduler, arg: *mut ()) {
        // The scheduler handle must be usable from inside the task.
        assert!(scheduler.worker_threads() >= 1);
        let flag = unsafe { &*(arg as *const AtomicUsize) };
        flag.store(1, Ordering::SeqCst);
    }

    let flag = AtomicUsize::new(0);
    let scheduler = Scheduler::new(SchedulerConfig::default());
    scheduler
        .run(Task::new(main_task, &flag as *const _ as *mut ()))
        .unwrap();

    assert_eq!(flag.load(Ordering::SeqCst), 1);
}

#[test]
fn test_fan_out_fan_in_ten_thousand_tasks() {
    struct Ctx {
        hits: AtomicUsize,
        counter_value_after_wait: AtomicUsize,
    }

    fn bump(_scheduler: &Scheduler, arg: *mut ()) {
        let ctx = unsafe { &*(arg as *const Ctx) };
        ctx.hits.fetch_add(1, Ordering::SeqCst);
    }

    fn main_task(scheduler: &Scheduler, arg: *mut ()) {
        let ctx = unsafe { &*(arg as *const Ctx) };

        let tasks: Vec<Task> = (0..10_000).map(|_| Task::new(bump, arg)).collect();
        let counter = scheduler.counter();
        scheduler.add_tasks(&tasks, Some(&counter));
        scheduler.wait_for_counter(&counter, 0);

        ctx.counter_value_after_wait
            .store(counter.value(), Ordering::SeqCst);
    }

    let ctx = Ctx {
        hits: AtomicUsize::new(0),
        counter_value_after_wait: AtomicUsize::new(usize::MAX),
    };
    let scheduler = Scheduler::new(SchedulerConfig::default());
    scheduler
        .run(Task::new(main_task, &ctx as *const _ as *mut ()))
        .unwrap();

    assert_eq!(ctx.hits.load(Ordering::SeqCst), 10_000);
    assert_eq!(ctx.counter_value_after_wait.load(Ordering::SeqCst), 0);
}

#[test]
fn test_nested_waits_across_many_fibers() {
    fn main_task(scheduler: &Scheduler, arg: *mut ()) {
        let completed = unsafe { &*(arg as *const Arc<AtomicUsize>) };

        let branch = |completed: &Arc<AtomicUsize>| {
            let completed = Arc::clone(completed);
            move |scheduler: &Scheduler| {
                let leaves = scheduler.spawn_batch((0..2).map(|_| {
                    let completed = Arc::clone(&completed);
                    move |_: &Scheduler| {
                        completed.fetch_add(1, Ordering::SeqCst);
                    }
                }));
                scheduler.wait_for_counter(&leaves, 0);
                completed.fetch_add(1, Ordering::SeqCst);
            }
        };

        let a = scheduler.spawn(branch(completed));
        let b = scheduler.spawn(branch(completed));
        scheduler.wait_for_counter(&a, 0);
        scheduler.wait_for_counter(&b, 0);

        // Two branches plus four leaves.
        assert_eq!(completed.load(Ordering::SeqCst), 6);
    }

    let completed = Arc::new(AtomicUsize::new(0));
    let scheduler = Scheduler::new(SchedulerConfig::default());
    scheduler
        .run(Task::new(main_task, &completed as *const _ as *mut ()))
        .unwrap();

    assert_eq!(completed.load(Ordering::SeqCst), 6);
}

#[test]
fn test_wait_on_already_satisfied_counter_returns_immediately() {
    fn main_task(scheduler: &Scheduler, arg: *mut ()) {
        let flag = unsafe { &*(arg as *const AtomicUsize) };

        let counter = scheduler.counter();
        counter.store(7);
        scheduler.wait_for_counter(&counter, 7);

        // A fresh counter already sits at zero.
        let fresh = scheduler.counter();
        scheduler.wait_for_counter(&fresh, 0);

        flag.store(1, Ordering::SeqCst);
    }

    let flag = AtomicUsize::new(0);
    let scheduler = Scheduler::new(SchedulerConfig::default());
    scheduler
        .run(Task::new(main_task, &flag as *const _ as *mut ()))
        .unwrap();

    assert_eq!(flag.load(Ordering::SeqCst), 1);
}

#[test]
fn test_writes_before_decrement_visible_after_wait() {
    // The counter decrement must publish the writes the task made before
    // completing; the woken waiter reads them without any extra
    // synchronization.
    struct Ctx {
        data: UnsafeCell<u64>,
    }
    unsafe impl Sync for Ctx {}

    fn writer(_scheduler: &Scheduler, arg: *mut ()) {
        let ctx = unsafe { &*(arg as *const Ctx) };
        unsafe { *ctx.data.get() = 0xDEAD_BEEF };
    }

    fn main_task(scheduler: &Scheduler, arg: *mut ()) {
        let ctx = unsafe { &*(arg as *const Ctx) };

        let counter = scheduler.counter();
        scheduler.add_tasks(&[Task::new(writer, arg)], Some(&counter));
        scheduler.wait_for_counter(&counter, 0);

        assert_eq!(unsafe { *ctx.data.get() }, 0xDEAD_BEEF);
    }

    let ctx = Ctx {
        data: UnsafeCell::new(0),
    };
    let scheduler = Scheduler::new(SchedulerConfig::default());
    scheduler
        .run(Task::new(main_task, &ctx as *const _ as *mut ()))
        .unwrap();

    assert_eq!(unsafe { *ctx.data.get() }, 0xDEAD_BEEF);
}

#[test]
fn test_waiting_on_intermediate_target_value() {
    // A waiter may watch for any value, not just zero.
    fn worker_task(_scheduler: &Scheduler, arg: *mut ()) {
        let counter = unsafe { &*(arg as *const taskfiber::Counter) };
        counter.fetch_add(1);
    }

    fn main_task(scheduler: &Scheduler, arg: *mut ()) {
        let flag = unsafe { &*(arg as *const AtomicUsize) };

        let watched = scheduler.counter();
        let batch = scheduler.counter();
        let tasks: Vec<Task> = (0..3)
            .map(|_| Task::new(worker_task, &watched as *const _ as *mut ()))
            .collect();
        scheduler.add_tasks(&tasks, Some(&batch));

        scheduler.wait_for_counter(&watched, 3);
        assert_eq!(watched.value(), 3);

        scheduler.wait_for_counter(&batch, 0);
        flag.store(1, Ordering::SeqCst);
    }

    let flag = AtomicUsize::new(0);
    let scheduler = Scheduler::new(SchedulerConfig::default());
    scheduler
        .run(Task::new(main_task, &flag as *const _ as *mut ()))
        .unwrap();

    assert_eq!(flag.load(Ordering::SeqCst), 1);
}

#[test]
#[should_panic(expected = "outside a scheduler task")]
fn test_wait_off_fiber_is_a_precondition_violation() {
    let scheduler = Scheduler::default();
    let counter = scheduler.counter();
    counter.store(1);
    scheduler.wait_for_counter(&counter, 0);
}
