#![forbid(unsafe_code)]

//! Reactive containers: the instrumentation that makes structured values
//! observable.
//!
//! Attaching a [`Container`] to a [`Record`] or [`List`] gives it a
//! *structural* channel ("the shape changed") and, for records, one property
//! channel per key. From then on tracked reads register the evaluating node
//! and writes notify. Attachment is recursive: nested records and lists are
//! attached too, and so is every structured value written later.
//!
//! # Invariants
//!
//! 1. Attachment is idempotent. The container marker on a structure is set
//!    before its children are walked, so re-attaching (including through a
//!    cycle) returns the existing container.
//! 2. Exactly one property channel exists per key per attached record.
//! 3. Scalars, non-extensible structures, and scopes are never attached.
//! 4. Owners are bookkeeping only: adding or removing one never notifies.

mod list;
mod record;

pub use list::{List, Locate, MAX_SET_AT_GROWTH};
pub use record::Record;

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::channel::Channel;
use crate::scope::ScopeId;
use crate::value::Value;

/// Instrumentation attached to one record or list.
pub struct Container {
    channel: Channel,
    owners: RefCell<Vec<ScopeId>>,
}

impl Container {
    pub(crate) fn new() -> Self {
        Self {
            channel: Channel::new(),
            owners: RefCell::new(Vec::new()),
        }
    }

    /// The structural channel.
    #[must_use]
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Record `owner` as an owner of this container.
    pub fn add_owner(&self, owner: ScopeId) {
        self.owners.borrow_mut().push(owner);
    }

    /// Remove the first entry for `owner`. No-op if absent.
    pub fn remove_owner(&self, owner: ScopeId) {
        let mut owners = self.owners.borrow_mut();
        if let Some(pos) = owners.iter().position(|o| *o == owner) {
            owners.remove(pos);
        }
    }

    /// Current owners, in registration order.
    #[must_use]
    pub fn owners(&self) -> Vec<ScopeId> {
        self.owners.borrow().clone()
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("channel", &self.channel)
            .field("owners", &self.owners.borrow().len())
            .finish()
    }
}

/// Attach a container to `value`, or return the one already attached.
///
/// Returns `None` for scalars, scopes, and non-extensible structures, and
/// for not-yet-attached structures while conversion is suppressed by
/// [`without_conversion`](crate::runtime::without_conversion).
pub fn observe(value: &Value) -> Option<Rc<Container>> {
    match value {
        Value::Record(record) => record.observe(),
        Value::List(list) => list.observe(),
        _ => None,
    }
}

/// [`observe`], then register `owner` on the resulting container.
pub fn observe_with_owner(value: &Value, owner: ScopeId) -> Option<Rc<Container>> {
    let container = observe(value)?;
    container.add_owner(owner);
    Some(container)
}

/// Register the evaluating node on every channel a read of `value` through
/// `property` implies: the property itself, the value's own container, and
/// for lists, each element's container.
pub(crate) fn track_read(property: &Channel, value: &Value) {
    property.depend();
    if let Some(container) = value.container() {
        container.channel().depend();
    }
    if let Value::List(list) = value {
        for item in list.items_untracked() {
            if let Some(container) = item.container() {
                container.channel().depend();
            }
        }
    }
}
