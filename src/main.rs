use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use taskfiber::{Scheduler, SchedulerConfig, Task};

const TRIANGLE_N: u64 = 47_593_243;
const CHUNK: u64 = 10_000;

struct TriangleCtx {
    total: AtomicU64,
}

struct RangeArg {
    ctx: *const TriangleCtx,
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

fn triangle_main(scheduler: &Scheduler, arg: *mut ()) {
    let ctx = arg as *const TriangleCtx;

    let tasks: Vec<Task> = (1..=TRIANGLE_N)
        .step_by(CHUNK as usize)
        .map(|start| {
            let end = (start + CHUNK).min(TRIANGLE_N + 1);
            let range = Box::new(RangeArg { ctx, start, end });
            Task::new(sum_range, Box::into_raw(range) as *mut ())
        })
        .collect();

    let counter = scheduler.counter();
    println!("  Splitting into {} range tasks", tasks.len());
    scheduler.add_tasks(&tasks, Some(&counter));
    scheduler.wait_for_counter(&counter, 0);
}

fn chain_main(scheduler: &Scheduler, _arg: *mut ()) {
    fn stage(scheduler: &Scheduler, depth: usize) {
        if depth == 0 {
            return;
        }
        let counter = scheduler.spawn(move |scheduler| stage(scheduler, depth - 1));
        scheduler.wait_for_counter(&counter, 0);
    }

    stage(scheduler, 50);
}

fn main() {
    println!("taskfiber - fiber-based task scheduler\n");

    let scheduler = Scheduler::new(SchedulerConfig::default());
    println!(
        "Initialized scheduler with {} worker threads\n",
        scheduler.worker_threads()
    );

    // Example 1: fan-out / fan-in triangle number
    println!("Example 1: triangle number T({})", TRIANGLE_N);
    let ctx = TriangleCtx {
        total: AtomicU64::new(0),
    };

    let start = Instant::now();
    scheduler
        .run(Task::new(triangle_main, &ctx as *const _ as *mut ()))
        .expect("run failed");
    let duration = start.elapsed();

    let expected = TRIANGLE_N * (TRIANGLE_N + 1) / 2;
    println!(
        "  T({}) = {} (expected {}) in {:?}\n",
        TRIANGLE_N,
        ctx.total.load(Ordering::Relaxed),
        expected,
        duration
    );
    assert_eq!(ctx.total.load(Ordering::Relaxed), expected);

    // Example 2: a chain of dependent stages, each waiting on the next
    println!("Example 2: chain of 50 dependent stages");
    let start = Instant::now();
    scheduler
        .run(Task::new(chain_main, std::ptr::null_mut()))
        .expect("run failed");
    println!("  Chain completed in {:?}\n", start.elapsed());

    println!("Done!");
}
