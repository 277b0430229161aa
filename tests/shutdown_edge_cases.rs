use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use taskfiber::{Scheduler, SchedulerConfig, Task};

#[test]
fn test_run_drains_fire_and_forget_tasks() {
    fn slow_bump(_scheduler: &Scheduler, arg: *mut ()) {
        std::thread::sleep(Duration::from_millis(10));
        let hits = unsafe { &*(arg as *const AtomicUsize) };
        hits.fetch_add(1, Ordering::SeqCst);
    }

    fn main_task(scheduler: &Scheduler, arg: *mut ()) {
        // Submit without a counter and return immediately; the run must
        // still not finish until the workers have drained the queue.
        let tasks: Vec<Task> = (0..10).map(|_| Task::new(slow_bump, arg)).collect();
        scheduler.add_tasks(&tasks, None);
    }

    let hits = AtomicUsize::new(0);
    let scheduler = Scheduler::new(SchedulerConfig::default());
    scheduler
        .run(Task::new(main_task, &hits as *const _ as *mut ()))
        .unwrap();

    assert_eq!(hits.load(Ordering::SeqCst), 10);
}

#[test]
fn test_tasks_spawned_from_tasks_are_drained() {
    fn main_task(scheduler: &Scheduler, arg: *mut ()) {
        let hits = unsafe { &*(arg as *const AtomicUsize) };
        let addr = hits as *const AtomicUsize as usize;

        // Two generations of fire-and-forget work.
        scheduler.spawn(move |scheduler| {
            let hits = unsafe { &*(addr as *const AtomicUsize) };
            hits.fetch_add(1, Ordering::SeqCst);
            scheduler.spawn(move |_| {
                let hits = unsafe { &*(addr as *const AtomicUsize) };
                hits.fetch_add(1, Ordering::SeqCst);
            });
        });
    }

    let hits = AtomicUsize::new(0);
    let scheduler = Scheduler::new(SchedulerConfig::default());
    scheduler
        .run(Task::new(main_task, &hits as *const _ as *mut ()))
        .unwrap();

    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[test]
fn test_back_to_back_runs() {
    fn main_task(_scheduler: &Scheduler, arg: *mut ()) {
        let runs = unsafe { &*(arg as *const AtomicUsize) };
        runs.fetch_add(1, Ordering::SeqCst);
    }

    let runs = AtomicUsize::new(0);
    let scheduler = Scheduler::new(SchedulerConfig::default());

    for _ in 0..3 {
        scheduler
            .run(Task::new(main_task, &runs as *const _ as *mut ()))
            .unwrap();
    }

    assert_eq!(runs.load(Ordering::SeqCst), 3);
}
