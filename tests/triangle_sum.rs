//! Fan-out / fan-in at scale: the triangle number of a large N computed by
//! thousands of range-summing tasks.

use std::sync::atomic::{AtomicU64, Ordering};
use taskfiber::{Scheduler, SchedulerConfig, Task};

const N: u64 = 47_593_243;
const CHUNK: u64 = 10_000;
const EXPECTED: u64 = 1_132_495_607_948_546;

struct Ctx {
    total: AtomicU64,
}

struct RangeArg {
    ctx: *const Ctx,
    start: u64,
    end: u64,
}

fn sum_range(_scheduler: &Scheduler, arg: *mut ()) {
    let range = unsafe { Box::from_raw(arg as *mut RangeArg) };
    let ctx = unsafe { &*range.ctx };

    let mut partial = 0u64;
    for n in range.start..range.end {
        partial += n;
    }
    ctx.total.fetch_add(partial, Ordering::Relaxed);
}

fn main_task(scheduler: &Scheduler, arg: *mut ()) {
    let ctx = arg as *const Ctx;

    let tasks: Vec<Task> = (1..=N)
        .step_by(CHUNK as usize)
        .map(|start| {
            let end = (start + CHUNK).min(N + 1);
            let range = Box::new(RangeArg { ctx, start, end });
            Task::new(sum_range, Box::into_raw(range) as *mut ())
        })
        .collect();

    assert_eq!(tasks.len() as u64, N.div_ceil(CHUNK));

    let counter = scheduler.counter();
    scheduler.add_tasks(&tasks, Some(&counter));
    scheduler.wait_for_counter(&counter, 0);
}

#[test]
fn test_triangle_number() {
    let ctx = Ctx {
        total: AtomicU64::new(0),
    };

    let scheduler = Scheduler::new(SchedulerConfig::default());
    scheduler
        .run(Task::new(main_task, &ctx as *const _ as *mut ()))
        .unwrap();

    assert_eq!(EXPECTED, N * (N + 1) / 2);
    assert_eq!(ctx.total.load(Ordering::Relaxed), EXPECTED);
}
