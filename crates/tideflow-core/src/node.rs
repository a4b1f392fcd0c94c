#![forbid(unsafe_code)]

//! Computation nodes.
//!
//! A [`Node`] wraps an evaluation function over a [`Scope`] and caches its
//! last value. While the function runs the node is the thread's cursor, so
//! every tracked read lands in the node's *in-flight* dependency set. When
//! the pass ends the in-flight set replaces the *confirmed* set and channels
//! that were not read again are unsubscribed.
//!
//! # Invariants
//!
//! 1. After any completed evaluation (successful or not) the confirmed set
//!    equals exactly the channels read during that evaluation.
//! 2. A node is subscribed at most once per channel: `add_dep` dedupes by
//!    in-flight id and skips channels already confirmed.
//! 3. `teardown` is idempotent and leaves the node subscribed nowhere.
//!
//! # Failure Modes
//!
//! - **Evaluation error**: reported as [`ReactiveError::Evaluation`]; the
//!   cached value is kept, the callback does not fire for that pass, and a
//!   lazy node stays dirty so the next read retries.
//! - **Setter error**: reported as [`ReactiveError::Setter`]; the write is
//!   abandoned.
//! - **Scope dropped**: the node tears itself down on its next evaluation.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashSet;
use bitflags::bitflags;

use crate::channel::{Channel, ChannelId};
use crate::diagnostics::Diagnostic;
use crate::error::{EvalError, ReactiveError};
use crate::runtime;
use crate::scheduler::{self, Origin};
use crate::scope::{Scope, WeakScope};
use crate::value::Value;

/// Evaluation function.
pub type Getter = dyn Fn(&Scope) -> Result<Value, EvalError>;
/// Inverse (write) function.
pub type Setter = dyn Fn(&Scope, Value) -> Result<(), EvalError>;
/// Change callback, called with `(new, old)`.
pub type Callback = dyn Fn(&Value, &Value);
/// Value transform applied after evaluation.
pub type Transform = dyn Fn(Value) -> Value;

bitflags! {
    /// Node state and options.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct NodeFlags: u16 {
        /// Evaluate on demand; triggers only mark dirty.
        const LAZY    = 1 << 0;
        /// Run immediately on trigger instead of queueing.
        const SYNC    = 1 << 1;
        /// Touch every nested property of the value.
        const DEEP    = 1 << 2;
        /// Queued in the user-origin queue.
        const USER    = 1 << 3;
        const ACTIVE  = 1 << 4;
        /// Cached value is stale (lazy nodes only).
        const DIRTY   = 1 << 5;
        const QUEUED  = 1 << 6;
        /// The pending run came only from shallow triggers.
        const SHALLOW = 1 << 7;
    }
}

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Monotonic node identity. Also the scheduler's dedup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    fn next() -> Self {
        Self(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

#[derive(Clone)]
struct Hooks {
    getter: Rc<Getter>,
    setter: Option<Rc<Setter>>,
    callback: Option<Rc<Callback>>,
    pre_process: Option<Rc<Transform>>,
    post_process: Option<Rc<Transform>>,
}

#[derive(Default)]
struct DepSet {
    ids: AHashSet<ChannelId>,
    channels: Vec<Channel>,
}

impl DepSet {
    fn insert(&mut self, channel: &Channel) -> bool {
        if !self.ids.insert(channel.id()) {
            return false;
        }
        self.channels.push(channel.clone());
        true
    }

    fn contains(&self, id: ChannelId) -> bool {
        self.ids.contains(&id)
    }

    fn clear(&mut self) {
        self.ids.clear();
        self.channels.clear();
    }
}

struct NodeInner {
    id: NodeId,
    expression: Rc<str>,
    scope: RefCell<WeakScope>,
    flags: Cell<NodeFlags>,
    hooks: RefCell<Option<Hooks>>,
    value: RefCell<Option<Value>>,
    deps: RefCell<DepSet>,
    new_deps: RefCell<DepSet>,
    evaluations: Cell<u64>,
}

/// Shared handle to a computation node.
#[derive(Clone)]
pub struct Node {
    inner: Rc<NodeInner>,
}

/// Non-owning node handle held by channel subscriber lists.
#[derive(Clone)]
pub(crate) struct WeakNode(Weak<NodeInner>);

impl WeakNode {
    pub(crate) fn upgrade(&self) -> Option<Node> {
        self.0.upgrade().map(|inner| Node { inner })
    }

    pub(crate) fn is(&self, node: &Node) -> bool {
        std::ptr::eq(self.0.as_ptr(), Rc::as_ptr(&node.inner))
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

impl Node {
    pub(crate) fn downgrade(&self) -> WeakNode {
        WeakNode(Rc::downgrade(&self.inner))
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Expression text used in diagnostics.
    #[must_use]
    pub fn expression(&self) -> &str {
        &self.inner.expression
    }

    #[must_use]
    pub fn flags(&self) -> NodeFlags {
        self.inner.flags.get()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.flags().contains(NodeFlags::ACTIVE)
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.flags().contains(NodeFlags::DIRTY)
    }

    #[must_use]
    pub fn is_lazy(&self) -> bool {
        self.flags().contains(NodeFlags::LAZY)
    }

    #[must_use]
    pub fn is_user(&self) -> bool {
        self.flags().contains(NodeFlags::USER)
    }

    #[must_use]
    pub fn is_queued(&self) -> bool {
        self.flags().contains(NodeFlags::QUEUED)
    }

    /// Which scheduler queue this node runs in.
    #[must_use]
    pub fn origin(&self) -> Origin {
        if self.is_user() {
            Origin::User
        } else {
            Origin::Framework
        }
    }

    /// The cached value, `Null` before the first successful evaluation.
    #[must_use]
    pub fn value(&self) -> Value {
        self.inner.value.borrow().clone().unwrap_or_default()
    }

    /// Ids of the confirmed dependency set, in first-read order.
    #[must_use]
    pub fn dependency_ids(&self) -> Vec<ChannelId> {
        self.inner
            .deps
            .borrow()
            .channels
            .iter()
            .map(Channel::id)
            .collect()
    }

    #[must_use]
    pub fn dependency_count(&self) -> usize {
        self.inner.deps.borrow().channels.len()
    }

    /// Whether `channel` is in the confirmed dependency set.
    #[must_use]
    pub fn depends_on(&self, channel: &Channel) -> bool {
        self.inner.deps.borrow().contains(channel.id())
    }

    /// The owning scope, while it is alive and the node is not torn down.
    #[must_use]
    pub fn scope(&self) -> Option<Scope> {
        self.inner.scope.borrow().upgrade()
    }

    /// Number of successful evaluations so far.
    #[must_use]
    pub fn evaluations(&self) -> u64 {
        self.inner.evaluations.get()
    }

    fn insert_flags(&self, flags: NodeFlags) {
        self.inner.flags.set(self.flags() | flags);
    }

    fn remove_flags(&self, flags: NodeFlags) {
        self.inner.flags.set(self.flags() - flags);
    }

    // -----------------------------------------------------------------------
    // Evaluation
    // -----------------------------------------------------------------------

    /// One tracked pass of the evaluation function. `None` when the pass
    /// failed or the node could not evaluate.
    fn get(&self) -> Option<Value> {
        let hooks = self.inner.hooks.borrow().clone()?;
        let Some(scope) = self.scope() else {
            self.teardown();
            return None;
        };

        let outcome = {
            let _cursor = runtime::enter(self.clone());
            self.inner.new_deps.borrow_mut().clear();
            (hooks.getter)(&scope).map(|mut value| {
                if self.flags().contains(NodeFlags::DEEP) {
                    traverse(&value);
                }
                if let Some(pre) = &hooks.pre_process {
                    value = pre(value);
                }
                if let Some(post) = &hooks.post_process {
                    value = post(value);
                }
                value
            })
        };

        self.cleanup_deps();
        if !self.is_active() {
            // Torn down from inside its own evaluation.
            self.unsubscribe_all();
        }

        match outcome {
            Ok(value) => {
                self.inner.evaluations.set(self.inner.evaluations.get() + 1);
                Some(value)
            }
            Err(source) => {
                if runtime::with_config(|c| c.report_expression_errors) {
                    runtime::report(Diagnostic::new(
                        ReactiveError::Evaluation {
                            expression: self.expression().to_owned(),
                            source,
                        },
                        Some(scope.label().to_owned()),
                    ));
                }
                None
            }
        }
    }

    fn cleanup_deps(&self) {
        let stale: Vec<Channel> = {
            let deps = self.inner.deps.borrow();
            let fresh = self.inner.new_deps.borrow();
            deps.channels
                .iter()
                .filter(|channel| !fresh.contains(channel.id()))
                .cloned()
                .collect()
        };
        for channel in &stale {
            channel.remove_subscriber(self);
        }
        let mut deps = self.inner.deps.borrow_mut();
        let mut fresh = self.inner.new_deps.borrow_mut();
        std::mem::swap(&mut *deps, &mut *fresh);
        fresh.clear();
    }

    fn unsubscribe_all(&self) {
        let deps = std::mem::take(&mut *self.inner.deps.borrow_mut());
        let fresh = std::mem::take(&mut *self.inner.new_deps.borrow_mut());
        for channel in &deps.channels {
            channel.remove_subscriber(self);
        }
        for channel in fresh.channels.iter().filter(|c| !deps.contains(c.id())) {
            channel.remove_subscriber(self);
        }
    }

    /// Evaluate now and cache the result.
    ///
    /// On success the dirty flag clears. On failure the previous value is
    /// kept. Returns the cached value either way.
    pub fn evaluate(&self) -> Value {
        if self.is_active() {
            if let Some(value) = self.get() {
                if self.is_active() {
                    self.inner.value.replace(Some(value));
                    self.remove_flags(NodeFlags::DIRTY);
                }
            }
        }
        self.value()
    }

    /// React to a change of one of this node's dependencies.
    ///
    /// Lazy nodes only mark themselves dirty. Sync nodes, and every node
    /// while async updates are disabled, run immediately. Everything else is
    /// queued; `shallow` survives only if every trigger since the node was
    /// queued was shallow.
    pub fn trigger(&self, shallow: bool) {
        let flags = self.flags();
        if !flags.contains(NodeFlags::ACTIVE) {
            return;
        }
        if flags.contains(NodeFlags::LAZY) {
            self.insert_flags(NodeFlags::DIRTY);
            return;
        }
        if flags.contains(NodeFlags::SYNC) || !runtime::with_config(|c| c.async_updates) {
            let mut next = flags;
            next.set(NodeFlags::SHALLOW, shallow);
            self.inner.flags.set(next);
            self.run();
            return;
        }

        let merged = if flags.contains(NodeFlags::QUEUED) {
            shallow && flags.contains(NodeFlags::SHALLOW)
        } else {
            shallow
        };
        let mut next = flags | NodeFlags::QUEUED;
        next.set(NodeFlags::SHALLOW, merged);
        self.inner.flags.set(next);
        scheduler::enqueue(self);
    }

    /// Re-evaluate and fire the callback when the value changed, or when the
    /// value is structured (or the node deep) and the run was not shallow.
    pub fn run(&self) {
        if !self.is_active() {
            return;
        }
        let shallow = self.flags().contains(NodeFlags::SHALLOW);
        self.remove_flags(NodeFlags::QUEUED | NodeFlags::SHALLOW);

        let Some(value) = self.get() else {
            return;
        };
        if !self.is_active() {
            return;
        }

        let old = self
            .inner
            .value
            .replace(Some(value.clone()))
            .unwrap_or_default();
        let changed = !value.same(&old);
        let forced = !shallow && (value.is_structured() || self.flags().contains(NodeFlags::DEEP));
        if !(changed || forced) {
            return;
        }

        let callback = self
            .inner
            .hooks
            .borrow()
            .as_ref()
            .and_then(|hooks| hooks.callback.clone());
        if let Some(callback) = callback {
            callback(&value, &old);
        }
    }

    /// Write through the inverse function, if the node has one.
    pub fn set(&self, value: Value) {
        let setter = self
            .inner
            .hooks
            .borrow()
            .as_ref()
            .and_then(|hooks| hooks.setter.clone());
        let (Some(setter), Some(scope)) = (setter, self.scope()) else {
            return;
        };
        if let Err(source) = setter(&scope, value) {
            if runtime::with_config(|c| c.report_expression_errors) {
                runtime::report(Diagnostic::new(
                    ReactiveError::Setter {
                        expression: self.expression().to_owned(),
                        source,
                    },
                    Some(scope.label().to_owned()),
                ));
            }
        }
    }

    /// Subscribe the currently evaluating node to every channel this node
    /// depends on.
    pub fn depend(&self) {
        let channels = self.inner.deps.borrow().channels.clone();
        for channel in channels {
            channel.depend();
        }
    }

    /// Forget a pending run the scheduler dropped.
    pub(crate) fn clear_queued(&self) {
        self.remove_flags(NodeFlags::QUEUED | NodeFlags::SHALLOW);
    }

    /// Record a read of `channel` during the current pass.
    pub(crate) fn add_dep(&self, channel: &Channel) {
        if !self.inner.new_deps.borrow_mut().insert(channel) {
            return;
        }
        if !self.inner.deps.borrow().contains(channel.id()) {
            channel.add_subscriber(self);
        }
    }

    /// Unsubscribe everywhere and deactivate permanently. Idempotent.
    pub fn teardown(&self) {
        if !self.is_active() {
            return;
        }
        if let Some(scope) = self.scope() {
            if !scope.is_being_destroyed() {
                scope.unregister(self);
            }
        }
        self.unsubscribe_all();
        self.remove_flags(NodeFlags::ACTIVE | NodeFlags::QUEUED | NodeFlags::SHALLOW);
        self.inner.hooks.replace(None);
        self.inner.value.replace(None);
        self.inner.scope.replace(WeakScope::default());
        tracing::trace!(
            target: "tideflow::node",
            id = self.inner.id.0,
            expression = %self.inner.expression,
            "node torn down"
        );
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Node {}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.inner.id.0)
            .field("expression", &self.inner.expression)
            .field("flags", &self.flags())
            .field("deps", &self.dependency_count())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Deep traversal
// ---------------------------------------------------------------------------

#[derive(PartialEq, Eq, Hash)]
enum Visit {
    Channel(ChannelId),
    Handle(usize),
}

/// Touch every nested property of `value` through tracked reads, so the
/// evaluating node depends on all of them. Cycles and shared substructures
/// are visited once.
fn traverse(value: &Value) {
    let mut seen = AHashSet::new();
    walk(value, &mut seen);
}

fn walk(value: &Value, seen: &mut AHashSet<Visit>) {
    let visit = |container: Option<Rc<crate::container::Container>>, addr: usize| {
        container.map_or(Visit::Handle(addr), |c| Visit::Channel(c.channel().id()))
    };
    match value {
        Value::Record(record) => {
            if !record.is_extensible() || !seen.insert(visit(record.container(), record.addr())) {
                return;
            }
            for key in record.keys() {
                if let Some(child) = record.get(&key) {
                    walk(&child, seen);
                }
            }
        }
        Value::List(list) => {
            if !list.is_extensible() || !seen.insert(visit(list.container(), list.addr())) {
                return;
            }
            for child in list.to_vec() {
                walk(&child, seen);
            }
        }
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for nodes registered on a [`Scope`].
///
/// ```ignore
/// let node = scope
///     .node("a + 1", |s| Ok(Value::from(s.get("a").as_i64().unwrap_or(0) + 1)))
///     .callback(|new, old| println!("{old:?} -> {new:?}"))
///     .build();
/// ```
#[must_use = "a node builder does nothing until `build` is called"]
pub struct NodeBuilder {
    scope: Scope,
    expression: Rc<str>,
    flags: NodeFlags,
    hooks: Hooks,
}

impl NodeBuilder {
    pub fn new(
        scope: &Scope,
        expression: &str,
        getter: impl Fn(&Scope) -> Result<Value, EvalError> + 'static,
    ) -> Self {
        Self {
            scope: scope.clone(),
            expression: expression.into(),
            flags: NodeFlags::empty(),
            hooks: Hooks {
                getter: Rc::new(getter),
                setter: None,
                callback: None,
                pre_process: None,
                post_process: None,
            },
        }
    }

    pub fn lazy(mut self) -> Self {
        self.flags |= NodeFlags::LAZY;
        self
    }

    pub fn sync(mut self) -> Self {
        self.flags |= NodeFlags::SYNC;
        self
    }

    pub fn deep(mut self) -> Self {
        self.flags |= NodeFlags::DEEP;
        self
    }

    /// Queue in the user-origin queue.
    pub fn user(mut self) -> Self {
        self.flags |= NodeFlags::USER;
        self
    }

    pub fn setter(mut self, setter: impl Fn(&Scope, Value) -> Result<(), EvalError> + 'static) -> Self {
        self.hooks.setter = Some(Rc::new(setter));
        self
    }

    pub fn callback(mut self, callback: impl Fn(&Value, &Value) + 'static) -> Self {
        self.hooks.callback = Some(Rc::new(callback));
        self
    }

    pub(crate) fn shared_callback(mut self, callback: Rc<Callback>) -> Self {
        self.hooks.callback = Some(callback);
        self
    }

    pub fn pre_process(mut self, transform: impl Fn(Value) -> Value + 'static) -> Self {
        self.hooks.pre_process = Some(Rc::new(transform));
        self
    }

    pub fn post_process(mut self, transform: impl Fn(Value) -> Value + 'static) -> Self {
        self.hooks.post_process = Some(Rc::new(transform));
        self
    }

    /// Register the node on its scope and evaluate it unless lazy.
    pub fn build(self) -> Node {
        let mut flags = self.flags | NodeFlags::ACTIVE;
        if flags.contains(NodeFlags::LAZY) {
            flags |= NodeFlags::DIRTY;
        }
        let node = Node {
            inner: Rc::new(NodeInner {
                id: NodeId::next(),
                expression: self.expression,
                scope: RefCell::new(self.scope.downgrade()),
                flags: Cell::new(flags),
                hooks: RefCell::new(Some(self.hooks)),
                value: RefCell::new(None),
                deps: RefCell::new(DepSet::default()),
                new_deps: RefCell::new(DepSet::default()),
                evaluations: Cell::new(0),
            }),
        };
        self.scope.register(&node);
        if !node.is_lazy() {
            node.evaluate();
        }
        node
    }
}
