#![forbid(unsafe_code)]

//! Thread-confined engine context.
//!
//! Everything the engine shares between otherwise unrelated call sites lives
//! here, in one thread-local [`Runtime`]:
//!
//! - the evaluation cursor (the node currently evaluating, if any);
//! - the installed [`Config`];
//! - the diagnostics sink;
//! - the deferred executor and the default [`TickQueue`];
//! - the no-conversion flag used by [`without_conversion`].
//!
//! # Invariants
//!
//! 1. At most one node is the cursor at any instant. Entering a nested
//!    evaluation saves the previous cursor; leaving restores it, including
//!    when the evaluation function returns an error.
//! 2. Evaluation is strictly single-threaded and non-interleaved. Engine
//!    handles are `!Send`, so a node can never be evaluated from a thread
//!    other than the one whose cursor attributes its reads.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::config::Config;
use crate::diagnostics::{Diagnostic, DiagnosticsSink, TracingSink};
use crate::executor::{Executor, Task, TickQueue};
use crate::node::Node;
use crate::scheduler;

struct Runtime {
    config: RefCell<Config>,
    sink: RefCell<Rc<dyn DiagnosticsSink>>,
    executor: RefCell<Rc<dyn Executor>>,
    ticks: Rc<TickQueue>,
    current: RefCell<Option<Node>>,
    convert: Cell<bool>,
}

impl Runtime {
    fn new() -> Self {
        let ticks = Rc::new(TickQueue::new());
        Self {
            config: RefCell::new(Config::default()),
            sink: RefCell::new(Rc::new(TracingSink)),
            executor: RefCell::new(ticks.clone()),
            ticks,
            current: RefCell::new(None),
            convert: Cell::new(true),
        }
    }
}

thread_local! {
    static RUNTIME: Runtime = Runtime::new();
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Install `config` for this thread.
pub fn configure(config: Config) {
    RUNTIME.with(|rt| *rt.config.borrow_mut() = config);
}

/// The configuration installed for this thread.
#[must_use]
pub fn config() -> Config {
    RUNTIME.with(|rt| rt.config.borrow().clone())
}

pub(crate) fn with_config<R>(f: impl FnOnce(&Config) -> R) -> R {
    RUNTIME.with(|rt| f(&rt.config.borrow()))
}

/// Restore this thread's engine to its initial state: default configuration,
/// tracing sink, default executor with an empty tick queue and no waker, no
/// cursor, and an idle scheduler.
pub fn reset() {
    RUNTIME.with(|rt| {
        *rt.config.borrow_mut() = Config::default();
        *rt.sink.borrow_mut() = Rc::new(TracingSink);
        *rt.executor.borrow_mut() = rt.ticks.clone();
        rt.ticks.clear();
        rt.ticks.clear_waker();
        rt.current.replace(None);
        rt.convert.set(true);
    });
    scheduler::reset();
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

/// Install a diagnostics sink, returning the previous one.
pub fn set_diagnostics_sink(sink: Rc<dyn DiagnosticsSink>) -> Rc<dyn DiagnosticsSink> {
    RUNTIME.with(|rt| rt.sink.replace(sink))
}

pub(crate) fn report(diagnostic: Diagnostic) {
    let sink = RUNTIME.with(|rt| Rc::clone(&rt.sink.borrow()));
    sink.report(diagnostic);
}

// ---------------------------------------------------------------------------
// Deferred execution
// ---------------------------------------------------------------------------

/// Route deferred work to `executor` instead of the default tick queue.
pub fn set_executor(executor: Rc<dyn Executor>) {
    RUNTIME.with(|rt| *rt.executor.borrow_mut() = executor);
}

/// The default tick queue of this thread.
#[must_use]
pub fn tick_queue() -> Rc<TickQueue> {
    RUNTIME.with(|rt| Rc::clone(&rt.ticks))
}

/// Drain the default tick queue once. Returns the number of tasks run.
pub fn tick() -> usize {
    tick_queue().drain()
}

pub(crate) fn schedule(task: Task) {
    let executor = RUNTIME.with(|rt| Rc::clone(&rt.executor.borrow()));
    executor.schedule(task);
}

// ---------------------------------------------------------------------------
// Evaluation cursor
// ---------------------------------------------------------------------------

/// The node currently evaluating on this thread, if any.
#[must_use]
pub fn current_node() -> Option<Node> {
    RUNTIME.with(|rt| rt.current.borrow().clone())
}

/// Whether a node is currently evaluating on this thread.
#[must_use]
pub fn is_tracking() -> bool {
    RUNTIME.with(|rt| rt.current.borrow().is_some())
}

/// Restores the previous cursor on drop.
pub(crate) struct CursorGuard {
    previous: Option<Node>,
}

/// Make `node` the cursor until the returned guard drops.
pub(crate) fn enter(node: Node) -> CursorGuard {
    let previous = RUNTIME.with(|rt| rt.current.replace(Some(node)));
    CursorGuard { previous }
}

/// Clear the cursor until the returned guard drops. Reads in between are
/// not attributed to any node.
pub(crate) fn untracked() -> CursorGuard {
    let previous = RUNTIME.with(|rt| rt.current.replace(None));
    CursorGuard { previous }
}

impl Drop for CursorGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        let _ = RUNTIME.try_with(|rt| rt.current.replace(previous));
    }
}

// ---------------------------------------------------------------------------
// Conversion mode
// ---------------------------------------------------------------------------

/// Run `f` with recursive containerization suppressed.
///
/// Writes performed inside `f` store structured values as-is instead of
/// attaching containers to them. Use this for pass-through bindings over
/// shared or frozen structures the producer does not want converted.
pub fn without_conversion<R>(f: impl FnOnce() -> R) -> R {
    struct Restore(bool);
    impl Drop for Restore {
        fn drop(&mut self) {
            let previous = self.0;
            let _ = RUNTIME.try_with(|rt| rt.convert.set(previous));
        }
    }

    let _restore = Restore(RUNTIME.with(|rt| rt.convert.replace(false)));
    f()
}

pub(crate) fn should_convert() -> bool {
    RUNTIME.with(|rt| rt.convert.get())
}
