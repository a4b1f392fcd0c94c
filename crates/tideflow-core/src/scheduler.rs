#![forbid(unsafe_code)]

//! Update batching.
//!
//! Triggered nodes are collected into two deduplicated queues, one for
//! framework-origin nodes and one for user-origin nodes, and flushed together
//! on the next deferred tick. A flush runs the framework queue, then the user
//! queue, and repeats while the framework queue refilled, so the engine
//! settles to a fixed point before control returns to the host.
//!
//! # Invariants
//!
//! 1. A node id is pending at most once: `enqueue` of a pending node is a
//!    no-op.
//! 2. Within one pass every framework-origin node runs before any
//!    user-origin node.
//! 3. Queues are iterated by live index, so nodes enqueued during a pass
//!    run in that same pass.
//! 4. At most one flush is scheduled on the executor at a time.
//!
//! # Failure Modes
//!
//! - **Runaway update**: with runaway detection on, every time a node that
//!   already ran in the current flush is enqueued again its counter goes up,
//!   whichever node caused the re-entry. Past `max_update_count` the
//!   scheduler reports [`ReactiveError::RunawayUpdate`] once, refuses further
//!   re-entries of that node for the flush, and abandons the rest of the
//!   running queue.

use std::cell::RefCell;

use ahash::{AHashMap, AHashSet};

use crate::diagnostics::Diagnostic;
use crate::error::ReactiveError;
use crate::node::{Node, NodeId};
use crate::runtime;

/// Which queue a node runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// Engine-internal bindings. Always run first.
    Framework,
    /// Watchers registered through [`Scope::watch`](crate::Scope::watch).
    User,
}

#[derive(Default)]
struct Scheduler {
    framework: Vec<Node>,
    user: Vec<Node>,
    pending: AHashSet<NodeId>,
    /// Nodes that ran during the current flush.
    ran: AHashSet<NodeId>,
    circular: AHashMap<NodeId, usize>,
    /// First node to cross the runaway limit since the last check.
    runaway: Option<(Node, usize)>,
    waiting: bool,
    flushing: bool,
}

impl Scheduler {
    fn queue(&mut self, origin: Origin) -> &mut Vec<Node> {
        match origin {
            Origin::Framework => &mut self.framework,
            Origin::User => &mut self.user,
        }
    }
}

thread_local! {
    static SCHEDULER: RefCell<Scheduler> = RefCell::new(Scheduler::default());
}

/// Queue `node` for the next flush. No-op if it is already pending.
pub(crate) fn enqueue(node: &Node) {
    let (detect, limit) = runtime::with_config(|c| (c.detect_runaway, c.max_update_count));
    let outcome = SCHEDULER.with(|cell| {
        let mut state = cell.borrow_mut();
        let id = node.id();
        if state.pending.contains(&id) {
            return Enqueued::Pending;
        }
        if detect && state.flushing && state.ran.contains(&id) {
            let count = state.circular.entry(id).or_insert(0);
            *count += 1;
            let count = *count;
            if count > limit {
                if count == limit + 1 && state.runaway.is_none() {
                    state.runaway = Some((node.clone(), count));
                }
                return Enqueued::Refused;
            }
        }
        state.pending.insert(id);
        state.queue(node.origin()).push(node.clone());
        if std::mem::replace(&mut state.waiting, true) {
            Enqueued::Pending
        } else {
            Enqueued::Scheduled
        }
    });
    match outcome {
        Enqueued::Scheduled => runtime::schedule(Box::new(flush)),
        Enqueued::Refused => node.clear_queued(),
        Enqueued::Pending => {}
    }
}

enum Enqueued {
    /// Queued, or already pending, with a flush already scheduled.
    Pending,
    /// Queued and a flush must be scheduled.
    Scheduled,
    /// Re-entry past the runaway limit.
    Refused,
}

/// Run every pending node until the queues settle.
///
/// Normally called from the deferred executor. Hosts without an event loop
/// may call it directly. Calling it while a flush is already running is a
/// no-op; the running flush picks up anything enqueued meanwhile.
pub fn flush() {
    let start = SCHEDULER.with(|cell| {
        let mut state = cell.borrow_mut();
        !std::mem::replace(&mut state.flushing, true)
    });
    if !start {
        return;
    }

    let mut passes = 0usize;
    let mut ran = 0usize;
    loop {
        passes += 1;
        ran += run_queue(Origin::Framework);
        ran += run_queue(Origin::User);
        if SCHEDULER.with(|cell| cell.borrow().framework.is_empty()) {
            break;
        }
    }

    SCHEDULER.with(|cell| {
        let mut state = cell.borrow_mut();
        state.pending.clear();
        state.ran.clear();
        state.circular.clear();
        state.runaway = None;
        state.waiting = false;
        state.flushing = false;
    });
    if ran > 0 {
        tracing::debug!(target: "tideflow::scheduler", passes, ran, "flush settled");
    }
}

/// Run one queue by live index, then clear it. Returns the number of runs.
fn run_queue(origin: Origin) -> usize {
    let mut index = 0;

    loop {
        let next = SCHEDULER.with(|cell| {
            let mut state = cell.borrow_mut();
            let node = state.queue(origin).get(index).cloned()?;
            state.pending.remove(&node.id());
            state.ran.insert(node.id());
            Some(node)
        });
        let Some(node) = next else {
            break;
        };
        index += 1;
        node.run();

        let runaway = SCHEDULER.with(|cell| cell.borrow_mut().runaway.take());
        if let Some((node, count)) = runaway {
            let context = node.scope().map(|scope| scope.label().to_owned());
            tracing::warn!(
                target: "tideflow::scheduler",
                expression = node.expression(),
                count,
                "runaway update, abandoning queue"
            );
            runtime::report(Diagnostic::new(
                ReactiveError::RunawayUpdate {
                    expression: node.expression().to_owned(),
                    count,
                },
                context,
            ));
            break;
        }
    }

    let dropped: Vec<Node> = SCHEDULER.with(|cell| {
        let mut state = cell.borrow_mut();
        let queue = std::mem::take(state.queue(origin));
        let dropped: Vec<Node> = queue.into_iter().skip(index).collect();
        for node in &dropped {
            state.pending.remove(&node.id());
        }
        dropped
    });
    for node in dropped {
        node.clear_queued();
    }
    index
}

/// Whether a flush is waiting on the executor.
#[must_use]
pub fn is_flush_scheduled() -> bool {
    SCHEDULER.with(|cell| cell.borrow().waiting)
}

/// Number of pending nodes across both queues.
#[must_use]
pub fn pending_count() -> usize {
    SCHEDULER.with(|cell| cell.borrow().pending.len())
}

pub(crate) fn reset() {
    let _ = SCHEDULER.try_with(|cell| *cell.borrow_mut() = Scheduler::default());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::diagnostics::RecordingSink;
    use crate::scope::Scope;
    use crate::value::Value;
    use serde_json::json;
    use std::rc::Rc;

    fn scope(data: serde_json::Value) -> Scope {
        runtime::reset();
        Scope::new("sched", Value::from_json(data).as_record().cloned().unwrap_or_default())
    }

    #[test]
    fn enqueue_dedupes_and_schedules_once() {
        let scope = scope(json!({"a": 1}));
        let node = scope.node("a", |s| Ok(s.get("a"))).build();
        assert!(!is_flush_scheduled());

        node.trigger(false);
        node.trigger(false);
        assert_eq!(pending_count(), 1);
        assert!(is_flush_scheduled());
        assert_eq!(runtime::tick_queue().len(), 1);

        assert_eq!(runtime::tick(), 1);
        assert_eq!(pending_count(), 0);
        assert!(!is_flush_scheduled());
        assert!(!node.is_queued());
    }

    #[test]
    fn framework_runs_before_user() {
        let scope = scope(json!({"a": 1}));
        let order = Rc::new(RefCell::new(Vec::new()));
        let user_order = Rc::clone(&order);
        scope.watch("user", |s| Ok(s.get("a")), move |_, _| user_order.borrow_mut().push("user"));
        let fw_order = Rc::clone(&order);
        scope
            .node("framework", |s| Ok(s.get("a")))
            .callback(move |_, _| fw_order.borrow_mut().push("framework"))
            .build();

        scope.set("a", Value::from(2));
        flush();
        assert_eq!(*order.borrow(), vec!["framework", "user"]);
    }

    #[test]
    fn framework_refill_from_user_runs_another_pass() {
        let scope = scope(json!({"a": 1, "b": 1}));
        let seen_b = Rc::new(RefCell::new(Value::Null));
        let seen = Rc::clone(&seen_b);
        scope
            .node("b", |s| Ok(s.get("b")))
            .callback(move |new, _| *seen.borrow_mut() = new.clone())
            .build();
        scope.watch(
            "a",
            |s| Ok(s.get("a")),
            {
                let scope = scope.clone();
                move |new, _| scope.set("b", Value::from(new.as_i64().unwrap_or(0) * 10))
            },
        );

        scope.set("a", Value::from(4));
        flush();
        assert_eq!(*seen_b.borrow(), Value::from(40));
        assert_eq!(pending_count(), 0);
        scope.destroy();
    }

    #[test]
    fn runaway_is_reported_and_contained() {
        let scope = scope(json!({"n": 0}));
        runtime::configure(
            Config::default()
                .with_detect_runaway(true)
                .with_max_update_count(5),
        );
        let sink = Rc::new(RecordingSink::new());
        runtime::set_diagnostics_sink(sink.clone());
        scope.watch(
            "n",
            |s| Ok(s.get("n")),
            {
                let scope = scope.clone();
                move |new, _| scope.set("n", Value::from(new.as_i64().unwrap_or(0) + 1))
            },
        );

        scope.set("n", Value::from(1));
        flush();
        assert_eq!(sink.count_kind("runaway_update"), 1);
        let entry = &sink.entries()[0];
        assert_eq!(entry.error.expression(), "n");
        assert_eq!(entry.context.as_deref(), Some("sched"));
        assert_eq!(pending_count(), 0);
        assert!(!is_flush_scheduled());
        scope.destroy();
    }

    #[test]
    fn reentry_caused_by_another_node_is_counted() {
        let scope = scope(json!({"a": 0, "b": 0}));
        runtime::configure(
            Config::default()
                .with_detect_runaway(true)
                .with_max_update_count(3),
        );
        let sink = Rc::new(RecordingSink::new());
        runtime::set_diagnostics_sink(sink.clone());
        let writer = |target: &'static str| {
            let scope = scope.clone();
            move |new: &Value, _: &Value| scope.set(target, Value::from(new.as_i64().unwrap_or(0) + 1))
        };
        let a = scope.watch("a", |s| Ok(s.get("a")), writer("b"));
        let b = scope.watch("b", |s| Ok(s.get("b")), writer("a"));

        scope.set("a", Value::from(1));
        flush();
        assert_eq!(sink.count_kind("runaway_update"), 1);
        assert_eq!(a.evaluations() + b.evaluations(), 2 + 2 * 4);
        assert_eq!(pending_count(), 0);
        assert!(!a.is_queued());
        assert!(!b.is_queued());
        assert!(!is_flush_scheduled());
        scope.destroy();
    }

    #[test]
    fn nested_flush_is_noop() {
        let scope = scope(json!({"a": 1}));
        let runs = Rc::new(RefCell::new(0));
        let runs_clone = Rc::clone(&runs);
        scope
            .node("a", |s| Ok(s.get("a")))
            .callback(move |_, _| {
                *runs_clone.borrow_mut() += 1;
                flush();
            })
            .build();
        scope.set("a", Value::from(2));
        flush();
        assert_eq!(*runs.borrow(), 1);
    }
}
