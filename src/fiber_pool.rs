//! Free-list of idle fibers, shared by every worker.
//!
//! The population is fixed for the duration of a run: fibers are created up
//! front by `populate` and only leave permanently through `drain`. The pool
//! size therefore bounds how many tasks can be in flight (running or
//! suspended) at once; an empty pool when a task needs a fiber is a sizing
//! violation and fatal at the call site.

use crate::fiber::Fiber;
use crossbeam::queue::SegQueue;
use std::io;

pub(crate) struct FiberPool {
    fibers: SegQueue<Box<Fiber>>,
    capacity: usize,
    stack_size: usize,
}

impl FiberPool {
    pub(crate) fn new(capacity: usize, stack_size: usize) -> Self {
        FiberPool {
            fibers: SegQueue::new(),
            capacity,
            stack_size,
        }
    }

    /// Creates the full fiber population. On allocation failure the pool is
    /// left partially filled; the caller drains it before reporting.
    pub(crate) fn populate(&self) -> io::Result<()> {
        for _ in 0..self.capacity {
            self.fibers.push(Box::new(Fiber::new(self.stack_size)?));
        }
        Ok(())
    }

    pub(crate) fn acquire(&self) -> Option<Box<Fiber>> {
        self.fibers.pop()
    }

    pub(crate) fn release(&self, fiber: Box<Fiber>) {
        self.fibers.push(fiber);
    }

    /// Restores the population after a fiber was lost to an escaped task
    /// panic.
    pub(crate) fn replace_poisoned(&self) {
        match Fiber::new(self.stack_size) {
            Ok(fiber) => self.fibers.push(Box::new(fiber)),
            Err(err) => eprintln!("taskfiber: failed to replace poisoned fiber: {}", err),
        }
    }

    /// Destroys every idle fiber.
    pub(crate) fn drain(&self) {
        while self.fibers.pop().is_some() {}
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    #[cfg(test)]
    pub(crate) fn idle_count(&self) -> usize {
        self.fibers.len()
    }
}
