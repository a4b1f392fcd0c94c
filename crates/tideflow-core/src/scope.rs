#![forbid(unsafe_code)]

//! Computation hosts.
//!
//! A [`Scope`] owns a reactive data [`Record`] and every node registered on
//! it. Evaluation functions receive the scope, read through it, and so pick
//! up dependencies on its data. Destroying the scope tears its nodes down in
//! reverse registration order and releases its ownership of the data.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::computed::Computed;
use crate::container::{Record, observe_with_owner};
use crate::error::EvalError;
use crate::node::{Callback, Node, NodeBuilder};
use crate::value::Value;

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

/// Monotonic scope identity. Used as the owner handle on containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(u64);

impl ScopeId {
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// Options for [`Scope::watch_with`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchOptions {
    /// Depend on every nested property of the watched value.
    pub deep: bool,
    /// Run on trigger instead of queueing.
    pub sync: bool,
    /// Call the callback once at registration with `(value, Null)`.
    pub immediate: bool,
}

impl WatchOptions {
    #[must_use]
    pub fn deep(mut self) -> Self {
        self.deep = true;
        self
    }

    #[must_use]
    pub fn sync(mut self) -> Self {
        self.sync = true;
        self
    }

    #[must_use]
    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }
}

pub(crate) struct ScopeInner {
    id: ScopeId,
    label: String,
    data: Record,
    nodes: RefCell<Vec<Node>>,
    being_destroyed: Cell<bool>,
    destroyed: Cell<bool>,
}

impl Drop for ScopeInner {
    fn drop(&mut self) {
        if self.destroyed.get() {
            return;
        }
        self.being_destroyed.set(true);
        let nodes = std::mem::take(self.nodes.get_mut());
        for node in nodes.iter().rev() {
            node.teardown();
        }
        if let Some(container) = self.data.container() {
            container.remove_owner(self.id);
        }
    }
}

/// Shared handle to a computation host.
#[derive(Clone)]
pub struct Scope {
    inner: Rc<ScopeInner>,
}

#[derive(Clone, Default)]
pub(crate) struct WeakScope(Weak<ScopeInner>);

impl WeakScope {
    pub(crate) fn upgrade(&self) -> Option<Scope> {
        self.0.upgrade().map(|inner| Scope { inner })
    }
}

impl Scope {
    /// Create a scope over `data`, attaching it and registering the scope as
    /// an owner.
    #[must_use]
    pub fn new(label: &str, data: Record) -> Self {
        let id = ScopeId(NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed));
        observe_with_owner(&Value::Record(data.clone()), id);
        Self {
            inner: Rc::new(ScopeInner {
                id,
                label: label.to_owned(),
                data,
                nodes: RefCell::new(Vec::new()),
                being_destroyed: Cell::new(false),
                destroyed: Cell::new(false),
            }),
        }
    }

    /// A scope with an empty data record.
    #[must_use]
    pub fn empty(label: &str) -> Self {
        Self::new(label, Record::new())
    }

    #[must_use]
    pub fn id(&self) -> ScopeId {
        self.inner.id
    }

    /// Label used as diagnostic context.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// The scope's data record.
    #[must_use]
    pub fn data(&self) -> Record {
        self.inner.data.clone()
    }

    /// Tracked read of a data key. Missing keys read as `Null`.
    #[must_use]
    pub fn get(&self, key: &str) -> Value {
        self.inner.data.get(key).unwrap_or_default()
    }

    /// Write a data key.
    pub fn set(&self, key: &str, value: Value) {
        self.inner.data.set(key, value);
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Start building a framework-origin node over this scope.
    pub fn node(
        &self,
        expression: &str,
        getter: impl Fn(&Scope) -> Result<Value, EvalError> + 'static,
    ) -> NodeBuilder {
        NodeBuilder::new(self, expression, getter)
    }

    /// Register a user-origin watcher.
    pub fn watch(
        &self,
        expression: &str,
        getter: impl Fn(&Scope) -> Result<Value, EvalError> + 'static,
        callback: impl Fn(&Value, &Value) + 'static,
    ) -> Node {
        self.watch_with(expression, getter, callback, WatchOptions::default())
    }

    /// [`watch`](Self::watch) with options.
    pub fn watch_with(
        &self,
        expression: &str,
        getter: impl Fn(&Scope) -> Result<Value, EvalError> + 'static,
        callback: impl Fn(&Value, &Value) + 'static,
        options: WatchOptions,
    ) -> Node {
        let callback: Rc<Callback> = Rc::new(callback);
        let mut builder = self
            .node(expression, getter)
            .user()
            .shared_callback(Rc::clone(&callback));
        if options.deep {
            builder = builder.deep();
        }
        if options.sync {
            builder = builder.sync();
        }
        let node = builder.build();
        if options.immediate {
            callback(&node.value(), &Value::Null);
        }
        node
    }

    /// Register a lazily evaluated derived value.
    pub fn computed(
        &self,
        expression: &str,
        getter: impl Fn(&Scope) -> Result<Value, EvalError> + 'static,
    ) -> Computed {
        Computed::new(self.node(expression, getter).lazy().build())
    }

    /// [`computed`](Self::computed) with an inverse function.
    pub fn computed_with_setter(
        &self,
        expression: &str,
        getter: impl Fn(&Scope) -> Result<Value, EvalError> + 'static,
        setter: impl Fn(&Scope, Value) -> Result<(), EvalError> + 'static,
    ) -> Computed {
        Computed::new(self.node(expression, getter).lazy().setter(setter).build())
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Shallow-trigger every node of this scope.
    pub fn digest(&self) {
        for node in self.nodes() {
            node.trigger(true);
        }
    }

    /// Registered nodes, in registration order.
    #[must_use]
    pub fn nodes(&self) -> Vec<Node> {
        self.inner.nodes.borrow().clone()
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.inner.nodes.borrow().len()
    }

    /// Tear down every node (newest first) and release the data. Idempotent.
    pub fn destroy(&self) {
        if self.inner.being_destroyed.replace(true) {
            return;
        }
        let nodes = std::mem::take(&mut *self.inner.nodes.borrow_mut());
        for node in nodes.iter().rev() {
            node.teardown();
        }
        if let Some(container) = self.inner.data.container() {
            container.remove_owner(self.inner.id);
        }
        self.inner.destroyed.set(true);
        tracing::trace!(
            target: "tideflow::node",
            scope = self.label(),
            nodes = nodes.len(),
            "scope destroyed"
        );
    }

    #[must_use]
    pub fn is_being_destroyed(&self) -> bool {
        self.inner.being_destroyed.get()
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }

    pub(crate) fn register(&self, node: &Node) {
        self.inner.nodes.borrow_mut().push(node.clone());
    }

    pub(crate) fn unregister(&self, node: &Node) {
        let mut nodes = self.inner.nodes.borrow_mut();
        if let Some(pos) = nodes.iter().position(|n| n == node) {
            nodes.remove(pos);
        }
    }

    pub(crate) fn downgrade(&self) -> WeakScope {
        WeakScope(Rc::downgrade(&self.inner))
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.inner.id.0)
            .field("label", &self.inner.label)
            .field("nodes", &self.node_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::runtime;
    use crate::scheduler;
    use serde_json::json;

    fn scope(data: serde_json::Value) -> Scope {
        runtime::reset();
        Scope::new("scope", Value::from_json(data).as_record().cloned().unwrap_or_default())
    }

    #[test]
    fn data_is_attached_and_owned() {
        let scope = scope(json!({"a": 1}));
        let container = scope.data().container().expect("attached");
        assert_eq!(container.owners(), vec![scope.id()]);
        assert!(scope.data().channel_of("a").is_some());
        assert!(scope.get("missing").is_null());
    }

    #[test]
    fn immediate_watch_fires_at_registration() {
        let scope = scope(json!({"a": 3}));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = Rc::clone(&seen);
        let node = scope.watch_with(
            "a",
            |s| Ok(s.get("a")),
            move |new, old| seen_clone.borrow_mut().push((new.clone(), old.clone())),
            WatchOptions::default().immediate(),
        );
        assert!(node.is_user());
        assert_eq!(*seen.borrow(), vec![(Value::from(3), Value::Null)]);
    }

    #[test]
    fn sync_watch_runs_inline() {
        let scope = scope(json!({"a": 1}));
        let seen = Rc::new(Cell::new(0));
        let seen_clone = Rc::clone(&seen);
        scope.watch_with(
            "a",
            |s| Ok(s.get("a")),
            move |new, _| seen_clone.set(new.as_i64().unwrap_or(0)),
            WatchOptions::default().sync(),
        );
        scope.set("a", Value::from(9));
        assert_eq!(seen.get(), 9);
        assert_eq!(scheduler::pending_count(), 0);
    }

    #[test]
    fn digest_reruns_without_forcing_callbacks() {
        let scope = scope(json!({"obj": {}}));
        let calls = Rc::new(Cell::new(0));
        let calls_clone = Rc::clone(&calls);
        let node = scope.watch(
            "obj",
            |s| Ok(s.get("obj")),
            move |_, _| calls_clone.set(calls_clone.get() + 1),
        );
        let before = node.evaluations();
        scope.digest();
        scheduler::flush();
        assert_eq!(node.evaluations(), before + 1);
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn destroy_tears_down_everything_once() {
        let scope = scope(json!({"a": 1}));
        runtime::configure(Config::default().with_async_updates(false));
        let first = scope.node("a", |s| Ok(s.get("a"))).build();
        let second = scope.watch("a", |s| Ok(s.get("a")), |_, _| {});
        let channel = scope.data().channel_of("a").expect("a");
        assert_eq!(channel.subscriber_count(), 2);

        scope.destroy();
        scope.destroy();
        assert!(scope.is_destroyed());
        assert!(!first.is_active());
        assert!(!second.is_active());
        assert_eq!(channel.subscriber_count(), 0);
        assert_eq!(scope.node_count(), 0);
        assert!(scope.data().container().expect("attached").owners().is_empty());
    }

    #[test]
    fn dropping_the_scope_releases_nodes() {
        runtime::reset();
        let data = Record::from_entries([("a", Value::from(1))]);
        let node = {
            let scope = Scope::new("short", data.clone());
            scope.node("a", |s| Ok(s.get("a"))).build()
        };
        assert!(!node.is_active());
        assert_eq!(data.channel_of("a").expect("a").subscriber_count(), 0);
    }

    #[test]
    fn computed_setter_writes_through() {
        let scope = scope(json!({"first": "Ada", "last": "Lovelace"}));
        let full = scope.computed_with_setter(
            "full",
            |s| {
                Ok(Value::from(format!(
                    "{} {}",
                    s.get("first").as_str().unwrap_or_default(),
                    s.get("last").as_str().unwrap_or_default()
                )))
            },
            |s, v| {
                let text = v.as_str().ok_or("expected a string")?.to_owned();
                let (first, last) = text.split_once(' ').ok_or("expected two words")?;
                s.set("first", Value::from(first));
                s.set("last", Value::from(last));
                Ok(())
            },
        );
        assert_eq!(full.get(), Value::from("Ada Lovelace"));
        full.set(Value::from("Grace Hopper"));
        assert_eq!(scope.get("first"), Value::from("Grace"));
        assert_eq!(full.get(), Value::from("Grace Hopper"));
    }
}
