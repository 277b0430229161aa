//! Parallel slice helpers built on the task and counter primitives.
//!
//! `fiber_iter` / `fiber_iter_mut` split a slice into chunks, submit one
//! task per chunk, and wait on the batch counter. Because the wait suspends
//! the calling fiber, these helpers must be called from within a running
//! task.

use crate::scheduler::Scheduler;
use crate::task::Task;
use std::ops::Range;

pub trait ParallelSlice<T> {
    fn fiber_iter<'a>(&'a self, scheduler: &'a Scheduler) -> ParallelIter<'a, T>;
}

pub trait ParallelSliceMut<T> {
    fn fiber_iter_mut<'a>(&'a mut self, scheduler: &'a Scheduler) -> ParallelIterMut<'a, T>;
}

impl<T: Sync> ParallelSlice<T> for [T] {
    fn fiber_iter<'a>(&'a self, scheduler: &'a Scheduler) -> ParallelIter<'a, T> {
        ParallelIter {
            slice: self,
            scheduler,
        }
    }
}

impl<T: Send> ParallelSliceMut<T> for [T] {
    fn fiber_iter_mut<'a>(&'a mut self, scheduler: &'a Scheduler) -> ParallelIterMut<'a, T> {
        ParallelIterMut {
            slice: self,
            scheduler,
        }
    }
}

pub struct ParallelIter<'a, T> {
    slice: &'a [T],
    scheduler: &'a Scheduler,
}

pub struct ParallelIterMut<'a, T> {
    slice: &'a mut [T],
    scheduler: &'a Scheduler,
}

// Trampolines for type erasure
unsafe fn trampoline<T, F>(op_ptr: *const (), slice_ptr: *const (), range: Range<usize>)
where
    F: Fn(&T) + Sync,
{
    unsafe {
        let op = &*(op_ptr as *const F);
        let slice_base = slice_ptr as *const T;
        let sub_slice = std::slice::from_raw_parts(slice_base.add(range.start), range.len());
        for item in sub_slice {
            op(item);
        }
    }
}

unsafe fn trampoline_mut<T, F>(op_ptr: *const (), slice_ptr: *const (), range: Range<usize>)
where
    F: Fn(&mut T) + Sync,
{
    unsafe {
        let op = &*(op_ptr as *const F);
        let slice_base = slice_ptr as *mut T;
        let sub_slice = std::slice::from_raw_parts_mut(slice_base.add(range.start), range.len());
        for item in sub_slice {
            op(item);
        }
    }
}

/// Type-erased call context shared by every chunk of one `for_each`.
///
/// Raw addresses are only dereferenced while `for_each` is blocked on the
/// batch counter, which keeps the closure and slice alive.
#[derive(Clone, Copy)]
struct CallContext {
    op_addr: usize,
    slice_addr: usize,
    trampoline: unsafe fn(*const (), *const (), Range<usize>),
}

struct Chunk {
    ctx: CallContext,
    range: Range<usize>,
}

fn run_chunk(_scheduler: &Scheduler, arg: *mut ()) {
    // SAFETY: `arg` is the chunk box leaked by `dispatch`, run exactly once.
    let chunk = unsafe { Box::from_raw(arg as *mut Chunk) };
    unsafe {
        (chunk.ctx.trampoline)(
            chunk.ctx.op_addr as *const (),
            chunk.ctx.slice_addr as *const (),
            chunk.range,
        )
    };
}

/// Splits `0..len` into roughly four chunks per worker, submits them as a
/// batch, and waits for the batch counter to drain.
fn dispatch(scheduler: &Scheduler, ctx: CallContext, len: usize) {
    if len == 0 {
        return;
    }

    let chunks = (scheduler.worker_threads() * 4).clamp(1, len);
    let chunk_len = len.div_ceil(chunks);

    let tasks: Vec<Task> = (0..len)
        .step_by(chunk_len)
        .map(|start| {
            let end = (start + chunk_len).min(len);
            let chunk = Box::new(Chunk {
                ctx,
                range: start..end,
            });
            Task::new(run_chunk, Box::into_raw(chunk) as *mut ())
        })
        .collect();

    let counter = scheduler.counter();
    scheduler.add_tasks(&tasks, Some(&counter));
    scheduler.wait_for_counter(&counter, 0);
}

impl<'a, T: Sync> ParallelIter<'a, T> {
    /// Applies `op` to every element in parallel. Must be called from
    /// within a running task.
    pub fn for_each<F>(self, op: F)
    where
        F: Fn(&T) + Sync,
    {
        let ctx = CallContext {
            op_addr: &op as *const F as usize,
            slice_addr: self.slice.as_ptr() as usize,
            trampoline: trampoline::<T, F>,
        };
        dispatch(self.scheduler, ctx, self.slice.len());
    }
}

impl<'a, T: Send> ParallelIterMut<'a, T> {
    /// Applies `op` to every element in parallel. Chunks never overlap, so
    /// the mutable borrows are disjoint. Must be called from within a
    /// running task.
    pub fn for_each<F>(self, op: F)
    where
        F: Fn(&mut T) + Sync,
    {
        let ctx = CallContext {
            op_addr: &op as *const F as usize,
            slice_addr: self.slice.as_mut_ptr() as usize,
            trampoline: trampoline_mut::<T, F>,
        };
        dispatch(self.scheduler, ctx, self.slice.len());
    }
}
