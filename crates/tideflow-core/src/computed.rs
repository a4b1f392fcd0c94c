#![forbid(unsafe_code)]

//! Lazily evaluated derived values.
//!
//! A [`Computed`] is a lazy [`Node`] read through a memoizing accessor.
//! Dependency changes only mark it dirty; the next [`get`](Computed::get)
//! re-evaluates. When another node reads a computed value it inherits the
//! computed's dependencies, so it re-runs whenever the computed would change.
//!
//! # Invariants
//!
//! 1. `get()` returns a value consistent with the current state of all
//!    dependencies.
//! 2. The evaluation function runs at most once per dependency change.
//! 3. `version()` increments by exactly 1 per successful recomputation.
//!
//! # Failure Modes
//!
//! - **Evaluation error**: the cached value remains from the last successful
//!   computation and the dirty flag stays set, so the next `get()` retries.

use crate::node::Node;
use crate::runtime;
use crate::value::Value;

/// Handle to a lazily evaluated derived value.
///
/// Cloning creates another handle to the **same** node.
#[derive(Clone, Debug)]
pub struct Computed {
    node: Node,
}

impl Computed {
    pub(crate) fn new(node: Node) -> Self {
        Self { node }
    }

    /// Current value, recomputing first if a dependency changed.
    #[must_use]
    pub fn get(&self) -> Value {
        if self.node.is_dirty() {
            self.node.evaluate();
        }
        if runtime::is_tracking() {
            self.node.depend();
        }
        self.node.value()
    }

    /// Write through the inverse function, if one was registered.
    pub fn set(&self, value: Value) {
        self.node.set(value);
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.node.is_dirty()
    }

    /// Number of successful recomputations.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.node.evaluations()
    }

    /// Force recomputation on the next `get()`.
    pub fn invalidate(&self) {
        self.node.trigger(false);
    }

    /// The underlying lazy node.
    #[must_use]
    pub fn node(&self) -> &Node {
        &self.node
    }
}
