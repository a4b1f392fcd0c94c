#![forbid(unsafe_code)]

//! Keyed, insertion-ordered records.
//!
//! Before attachment a [`Record`] is a plain shared map. Once a
//! [`Container`] is attached every key owns a property [`Channel`]:
//!
//! - `get` attributes the read to the evaluating node (property channel, the
//!   value's own container, and each element container of a list value);
//! - `set` skips values that are [`same`](Value::same) as the stored one,
//!   otherwise stores, attaches the new value, and notifies the property;
//! - inserting a new key or removing one notifies the structural channel;
//! - reading a missing key depends on the structural channel, so a later
//!   insertion re-runs the reader.

use std::cell::{Cell, OnceCell, RefCell};
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use super::{Container, observe, track_read};
use crate::channel::Channel;
use crate::value::Value;

struct Property {
    value: Value,
    channel: Option<Channel>,
}

struct RecordInner {
    entries: RefCell<IndexMap<String, Property>>,
    container: OnceCell<Rc<Container>>,
    extensible: Cell<bool>,
}

/// Shared handle to a keyed record.
#[derive(Clone)]
pub struct Record {
    inner: Rc<RecordInner>,
}

enum WriteOutcome {
    Unchanged,
    Plain,
    Updated(Channel),
    Inserted,
    Refused,
}

impl Record {
    /// Create an empty, unattached record.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RecordInner {
                entries: RefCell::new(IndexMap::new()),
                container: OnceCell::new(),
                extensible: Cell::new(true),
            }),
        }
    }

    /// Create an unattached record from key/value pairs.
    pub fn from_entries<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        let record = Self::new();
        {
            let mut map = record.inner.entries.borrow_mut();
            for (key, value) in entries {
                map.insert(
                    key.into(),
                    Property {
                        value,
                        channel: None,
                    },
                );
            }
        }
        record
    }

    /// Whether both handles point at the same record.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.inner) as usize
    }

    /// The attached container, if any.
    #[must_use]
    pub fn container(&self) -> Option<Rc<Container>> {
        self.inner.container.get().cloned()
    }

    /// Whether a container is attached.
    #[must_use]
    pub fn is_observed(&self) -> bool {
        self.inner.container.get().is_some()
    }

    /// Mark the record non-extensible: it will never be attached and refuses
    /// new keys. Existing keys stay writable.
    pub fn prevent_extensions(&self) {
        self.inner.extensible.set(false);
    }

    /// Whether new keys may be added.
    #[must_use]
    pub fn is_extensible(&self) -> bool {
        self.inner.extensible.get()
    }

    pub(crate) fn observe(&self) -> Option<Rc<Container>> {
        if let Some(container) = self.inner.container.get() {
            return Some(Rc::clone(container));
        }
        if !crate::runtime::should_convert() || !self.is_extensible() {
            return None;
        }
        let container = Rc::new(Container::new());
        // Marker first: a cycle back to this record must short-circuit.
        let _ = self.inner.container.set(Rc::clone(&container));

        let children: Vec<Value> = {
            let mut entries = self.inner.entries.borrow_mut();
            entries
                .values_mut()
                .map(|prop| {
                    prop.channel.get_or_insert_with(Channel::new);
                    prop.value.clone()
                })
                .collect()
        };
        for child in &children {
            observe(child);
        }
        Some(container)
    }

    fn track_structure(&self) {
        if let Some(container) = self.inner.container.get() {
            container.channel().depend();
        }
    }

    /// Read `key`, attributing the read to the evaluating node.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        let found = self
            .inner
            .entries
            .borrow()
            .get(key)
            .map(|prop| (prop.value.clone(), prop.channel.clone()));
        match found {
            Some((value, Some(channel))) => {
                track_read(&channel, &value);
                Some(value)
            }
            Some((value, None)) => Some(value),
            None => {
                self.track_structure();
                None
            }
        }
    }

    /// Whether `key` is present. Tracked like a structural read.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.track_structure();
        self.inner.entries.borrow().contains_key(key)
    }

    /// Write `key`.
    ///
    /// On an attached record an existing key notifies its property channel
    /// unless the value is unchanged; a new key becomes a reactive property
    /// and notifies the structural channel. A non-extensible record ignores
    /// new keys.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        let key = key.into();
        let observed = self.is_observed();
        let outcome = {
            let mut entries = self.inner.entries.borrow_mut();
            match entries.get_mut(&key) {
                Some(prop) => match &prop.channel {
                    Some(_) if prop.value.same(&value) => WriteOutcome::Unchanged,
                    Some(channel) => {
                        let channel = channel.clone();
                        prop.value = value.clone();
                        WriteOutcome::Updated(channel)
                    }
                    None => {
                        prop.value = value.clone();
                        WriteOutcome::Plain
                    }
                },
                None if !self.is_extensible() => WriteOutcome::Refused,
                None => {
                    entries.insert(
                        key.clone(),
                        Property {
                            value: value.clone(),
                            channel: observed.then(Channel::new),
                        },
                    );
                    if observed {
                        WriteOutcome::Inserted
                    } else {
                        WriteOutcome::Plain
                    }
                }
            }
        };

        match outcome {
            WriteOutcome::Updated(channel) => {
                observe(&value);
                channel.notify();
            }
            WriteOutcome::Inserted => {
                observe(&value);
                self.notify_structure();
            }
            WriteOutcome::Refused => {
                tracing::debug!(
                    target: "tideflow::container",
                    key = key.as_str(),
                    "refused new key on non-extensible record"
                );
            }
            WriteOutcome::Unchanged | WriteOutcome::Plain => {}
        }
    }

    /// Remove `key`, returning its value. On an attached record this
    /// notifies the property's readers and the structural channel.
    pub fn remove(&self, key: &str) -> Option<Value> {
        let removed = self.inner.entries.borrow_mut().shift_remove(key)?;
        if let Some(channel) = &removed.channel {
            channel.notify();
            self.notify_structure();
        }
        Some(removed.value)
    }

    fn notify_structure(&self) {
        if let Some(container) = self.container() {
            container.channel().notify();
        }
    }

    /// Keys in insertion order. Tracked like a structural read.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.track_structure();
        self.inner.entries.borrow().keys().cloned().collect()
    }

    /// Number of keys. Tracked like a structural read.
    #[must_use]
    pub fn len(&self) -> usize {
        self.track_structure();
        self.inner.entries.borrow().len()
    }

    /// Whether the record has no keys. Tracked like a structural read.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The property channel of `key`, when the record is attached.
    #[must_use]
    pub fn channel_of(&self, key: &str) -> Option<Channel> {
        self.inner
            .entries
            .borrow()
            .get(key)
            .and_then(|prop| prop.channel.clone())
    }

    pub(crate) fn entries_untracked(&self) -> Vec<(String, Value)> {
        self.inner
            .entries
            .borrow()
            .iter()
            .map(|(k, prop)| (k.clone(), prop.value.clone()))
            .collect()
    }
}

impl Default for Record {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Record({})", Value::Record(self.clone()).to_json())
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self::from_entries(iter)
    }
}
