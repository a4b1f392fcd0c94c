#![forbid(unsafe_code)]

//! Callback probes.

use std::cell::RefCell;
use std::rc::Rc;

use tideflow_core::Value;

/// One recorded callback invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub label: String,
    pub new: Value,
    pub old: Value,
}

/// Shared, append-only record of callback invocations across nodes.
///
/// Clones share the same log, so one log can collect calls from several
/// watchers and expose their global order.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Rc<RefCell<Vec<Call>>>,
}

impl CallLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A callback that appends `(label, new, old)` to this log.
    pub fn recorder(&self, label: &str) -> impl Fn(&Value, &Value) + 'static {
        let calls = Rc::clone(&self.calls);
        let label = label.to_owned();
        move |new, old| {
            calls.borrow_mut().push(Call {
                label: label.clone(),
                new: new.clone(),
                old: old.clone(),
            });
        }
    }

    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    /// Labels in invocation order.
    #[must_use]
    pub fn labels(&self) -> Vec<String> {
        self.calls.borrow().iter().map(|c| c.label.clone()).collect()
    }

    /// Number of calls recorded for `label`.
    #[must_use]
    pub fn count(&self, label: &str) -> usize {
        self.calls.borrow().iter().filter(|c| c.label == label).count()
    }

    #[must_use]
    pub fn last(&self) -> Option<Call> {
        self.calls.borrow().last().cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.calls.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calls.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.calls.borrow_mut().clear();
    }
}
