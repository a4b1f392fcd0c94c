#![forbid(unsafe_code)]

//! Deferred-execution primitive.
//!
//! The scheduler never flushes on the stack that caused a mutation. It hands a
//! flush task to the thread's [`Executor`], which must run it exactly once,
//! after the current synchronous stack unwinds and before the host's next
//! externally visible step.
//!
//! The default executor is a [`TickQueue`]: tasks accumulate until the host
//! drains them with [`runtime::tick`](crate::runtime::tick). An optional waker
//! fires once per idle-to-pending transition so an event loop can arrange the
//! drain; repeated schedules before the drain coalesce into that one wake.

use std::cell::{Cell, RefCell};
use std::fmt;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce()>;

/// Runs tasks after the current synchronous stack unwinds.
pub trait Executor {
    /// Queue `task` to run once, later.
    fn schedule(&self, task: Task);
}

/// Task queue drained explicitly by the host.
#[derive(Default)]
pub struct TickQueue {
    tasks: RefCell<Vec<Task>>,
    pending: Cell<bool>,
    waker: RefCell<Option<Box<dyn Fn()>>>,
}

impl TickQueue {
    /// Create an empty queue with no waker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a queue that calls `waker` whenever it goes from idle to
    /// pending.
    #[must_use]
    pub fn with_waker(waker: impl Fn() + 'static) -> Self {
        let queue = Self::new();
        queue.set_waker(waker);
        queue
    }

    /// Install or replace the waker.
    pub fn set_waker(&self, waker: impl Fn() + 'static) {
        *self.waker.borrow_mut() = Some(Box::new(waker));
    }

    /// Remove the waker, if any.
    pub fn clear_waker(&self) {
        self.waker.borrow_mut().take();
    }

    /// Whether tasks are waiting for a drain.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.get()
    }

    /// Number of queued tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.borrow().len()
    }

    /// Whether no tasks are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.borrow().is_empty()
    }

    /// Run every task queued so far and return how many ran.
    ///
    /// Tasks scheduled while draining wait for the next drain.
    pub fn drain(&self) -> usize {
        self.pending.set(false);
        let batch = std::mem::take(&mut *self.tasks.borrow_mut());
        let ran = batch.len();
        for task in batch {
            task();
        }
        ran
    }

    /// Discard queued tasks without running them.
    pub fn clear(&self) {
        self.pending.set(false);
        self.tasks.borrow_mut().clear();
    }
}

impl Executor for TickQueue {
    fn schedule(&self, task: Task) {
        self.tasks.borrow_mut().push(task);
        if self.pending.replace(true) {
            return;
        }
        if let Some(waker) = self.waker.borrow().as_ref() {
            waker();
        }
    }
}

impl fmt::Debug for TickQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TickQueue")
            .field("tasks", &self.len())
            .field("pending", &self.pending.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn tasks_wait_for_drain() {
        let queue = TickQueue::new();
        let hits = Rc::new(Cell::new(0));

        for _ in 0..3 {
            let hits = Rc::clone(&hits);
            queue.schedule(Box::new(move || hits.set(hits.get() + 1)));
        }
        assert_eq!(hits.get(), 0);
        assert_eq!(queue.len(), 3);
        assert!(queue.is_pending());

        assert_eq!(queue.drain(), 3);
        assert_eq!(hits.get(), 3);
        assert!(!queue.is_pending());
        assert!(queue.is_empty());
    }

    #[test]
    fn waker_fires_once_per_pending_transition() {
        let wakes = Rc::new(Cell::new(0));
        let wakes_clone = Rc::clone(&wakes);
        let queue = TickQueue::with_waker(move || wakes_clone.set(wakes_clone.get() + 1));

        queue.schedule(Box::new(|| {}));
        queue.schedule(Box::new(|| {}));
        assert_eq!(wakes.get(), 1);

        queue.drain();
        queue.schedule(Box::new(|| {}));
        assert_eq!(wakes.get(), 2);
    }

    #[test]
    fn tasks_scheduled_during_drain_run_next_time() {
        let queue = Rc::new(TickQueue::new());
        let order = Rc::new(RefCell::new(Vec::new()));

        let q = Rc::clone(&queue);
        let o = Rc::clone(&order);
        queue.schedule(Box::new(move || {
            o.borrow_mut().push("first");
            let o2 = Rc::clone(&o);
            q.schedule(Box::new(move || o2.borrow_mut().push("second")));
        }));

        assert_eq!(queue.drain(), 1);
        assert_eq!(*order.borrow(), vec!["first"]);
        assert_eq!(queue.drain(), 1);
        assert_eq!(*order.borrow(), vec!["first", "second"]);
    }

    #[test]
    fn clear_discards() {
        let queue = TickQueue::new();
        queue.schedule(Box::new(|| panic!("must not run")));
        queue.clear();
        assert_eq!(queue.drain(), 0);
    }
}
