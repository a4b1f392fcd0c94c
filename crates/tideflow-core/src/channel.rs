#![forbid(unsafe_code)]

//! Dependency channels: one change-notification endpoint per observable
//! quantity.
//!
//! A [`Channel`] keeps an ordered list of subscriber nodes. Reading the
//! quantity calls [`Channel::depend`], which attributes the read to the node
//! currently evaluating; changing it calls [`Channel::notify`], which triggers
//! every subscriber.
//!
//! # Invariants
//!
//! 1. The channel does not deduplicate: `add_subscriber` twice means two
//!    entries. Nodes guarantee at-most-once subscription themselves.
//! 2. `notify` iterates a snapshot, so subscribers added or removed by a
//!    triggered node do not affect the ongoing broadcast.
//! 3. Subscribers are held weakly. A node dropped without teardown is pruned
//!    on the next broadcast.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::node::{Node, WeakNode};
use crate::runtime;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

fn next_channel_id() -> ChannelId {
    ChannelId(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed))
}

/// Monotonic channel identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl ChannelId {
    /// Raw id value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

struct ChannelInner {
    id: ChannelId,
    subscribers: RefCell<Vec<WeakNode>>,
}

/// Shared handle to a dependency channel.
///
/// Cloning yields another handle to the same channel.
#[derive(Clone)]
pub struct Channel {
    inner: Rc<ChannelInner>,
}

impl Channel {
    /// Create a channel with a fresh id and no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(ChannelInner {
                id: next_channel_id(),
                subscribers: RefCell::new(Vec::new()),
            }),
        }
    }

    /// This channel's id.
    #[must_use]
    pub fn id(&self) -> ChannelId {
        self.inner.id
    }

    /// Append `node` to the subscriber list.
    pub fn add_subscriber(&self, node: &Node) {
        self.inner.subscribers.borrow_mut().push(node.downgrade());
    }

    /// Remove the first entry for `node`. No-op if absent.
    pub fn remove_subscriber(&self, node: &Node) {
        let mut subscribers = self.inner.subscribers.borrow_mut();
        if let Some(pos) = subscribers.iter().position(|weak| weak.is(node)) {
            subscribers.remove(pos);
        }
    }

    /// Trigger every current subscriber, in subscription order.
    pub fn notify(&self) {
        let snapshot: Vec<Node> = {
            let mut subscribers = self.inner.subscribers.borrow_mut();
            subscribers.retain(WeakNode::is_alive);
            subscribers.iter().filter_map(WeakNode::upgrade).collect()
        };
        for node in snapshot {
            node.trigger(false);
        }
    }

    /// Attribute a read of this channel to the currently evaluating node.
    pub fn depend(&self) {
        if let Some(node) = runtime::current_node() {
            node.add_dep(self);
        }
    }

    /// Number of live subscriber entries.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .borrow()
            .iter()
            .filter(|weak| weak.is_alive())
            .count()
    }

    /// Whether `node` is subscribed.
    #[must_use]
    pub fn has_subscriber(&self, node: &Node) -> bool {
        self.inner
            .subscribers
            .borrow()
            .iter()
            .any(|weak| weak.is(node))
    }
}

impl Default for Channel {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Channel {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Channel {}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.inner.id.0)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
