#![forbid(unsafe_code)]

//! Ordered lists with intercepted mutation.
//!
//! Every structural mutation on an attached [`List`] (push, pop, splice,
//! sort, reverse, ...) runs the underlying operation, attaches whatever it
//! inserted, and notifies the structural channel exactly once. Whole-list
//! reads depend on that channel.
//!
//! Direct index writes are not intercepted. [`List::set_unobserved`] and
//! [`List::truncate`] mutate storage without notifying; use
//! [`List::set_at`] or [`List::remove`] when readers must see the change.

use std::cell::{Cell, OnceCell, RefCell};
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use super::{Container, observe};
use crate::value::Value;

/// Most `Null` slots a single [`List::set_at`] may append.
pub const MAX_SET_AT_GROWTH: usize = 1 << 20;

/// Which element [`List::remove`] should drop.
#[derive(Debug, Clone)]
pub enum Locate {
    /// The element at this index.
    At(usize),
    /// The first element [`same`](Value::same) as this value.
    Item(Value),
}

struct ListInner {
    items: RefCell<Vec<Value>>,
    container: OnceCell<Rc<Container>>,
    extensible: Cell<bool>,
}

/// Shared handle to an ordered list.
#[derive(Clone)]
pub struct List {
    inner: Rc<ListInner>,
}

impl List {
    #[must_use]
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    #[must_use]
    pub fn from_vec(items: Vec<Value>) -> Self {
        Self {
            inner: Rc::new(ListInner {
                items: RefCell::new(items),
                container: OnceCell::new(),
                extensible: Cell::new(true),
            }),
        }
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.inner) as usize
    }

    #[must_use]
    pub fn container(&self) -> Option<Rc<Container>> {
        self.inner.container.get().cloned()
    }

    #[must_use]
    pub fn is_observed(&self) -> bool {
        self.inner.container.get().is_some()
    }

    /// Mark the list as never-attachable.
    pub fn prevent_extensions(&self) {
        self.inner.extensible.set(false);
    }

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
        let _ = self.inner.container.set(Rc::clone(&container));
        for item in self.items_untracked() {
            observe(&item);
        }
        Some(container)
    }

    fn track(&self) {
        if let Some(container) = self.inner.container.get() {
            container.channel().depend();
        }
    }

    fn after_mutation(&self, inserted: &[Value]) {
        let Some(container) = self.container() else {
            return;
        };
        for value in inserted {
            observe(value);
        }
        container.channel().notify();
    }

    // -----------------------------------------------------------------------
    // Tracked reads
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn len(&self) -> usize {
        self.track();
        self.inner.items.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<Value> {
        self.track();
        self.inner.items.borrow().get(index).cloned()
    }

    /// Snapshot of all elements.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Value> {
        self.track();
        self.items_untracked()
    }

    /// Iterate a snapshot of the elements.
    pub fn iter(&self) -> std::vec::IntoIter<Value> {
        self.to_vec().into_iter()
    }

    pub(crate) fn items_untracked(&self) -> Vec<Value> {
        self.inner.items.borrow().clone()
    }

    // -----------------------------------------------------------------------
    // Intercepted mutations
    // -----------------------------------------------------------------------

    pub fn push(&self, value: Value) {
        self.inner.items.borrow_mut().push(value.clone());
        self.after_mutation(&[value]);
    }

    pub fn extend(&self, values: impl IntoIterator<Item = Value>) {
        let values: Vec<Value> = values.into_iter().collect();
        self.inner.items.borrow_mut().extend(values.iter().cloned());
        self.after_mutation(&values);
    }

    pub fn push_front(&self, value: Value) {
        self.inner.items.borrow_mut().insert(0, value.clone());
        self.after_mutation(&[value]);
    }

    /// Remove the last element. Notifies even when the list was empty.
    pub fn pop(&self) -> Option<Value> {
        let popped = self.inner.items.borrow_mut().pop();
        self.after_mutation(&[]);
        popped
    }

    /// Remove the first element. Notifies even when the list was empty.
    pub fn pop_front(&self) -> Option<Value> {
        let popped = {
            let mut items = self.inner.items.borrow_mut();
            (!items.is_empty()).then(|| items.remove(0))
        };
        self.after_mutation(&[]);
        popped
    }

    /// Remove `delete_count` elements at `start` and insert `insert` in their
    /// place, returning the removed elements. Both bounds are clamped.
    pub fn splice(&self, start: usize, delete_count: usize, insert: Vec<Value>) -> Vec<Value> {
        let removed: Vec<Value> = {
            let mut items = self.inner.items.borrow_mut();
            let start = start.min(items.len());
            let end = start.saturating_add(delete_count).min(items.len());
            items.splice(start..end, insert.iter().cloned()).collect()
        };
        self.after_mutation(&insert);
        removed
    }

    /// Stable sort by [`Value::sort_order`].
    pub fn sort(&self) {
        self.sort_by(Value::sort_order);
    }

    /// Stable sort with a caller comparator. The comparator runs on a
    /// detached copy, so it may read this or any other list.
    pub fn sort_by(&self, compare: impl FnMut(&Value, &Value) -> Ordering) {
        let mut items = self.inner.items.borrow().clone();
        items.sort_by(compare);
        self.inner.items.replace(items);
        self.after_mutation(&[]);
    }

    pub fn reverse(&self) {
        self.inner.items.borrow_mut().reverse();
        self.after_mutation(&[]);
    }

    /// Replace the element at `index`, growing the list with `Null` if
    /// needed. Notifies through [`splice`](Self::splice).
    ///
    /// Growth is bounded by [`MAX_SET_AT_GROWTH`]: an index further than
    /// that past the end is rejected with `None` and nothing changes.
    pub fn set_at(&self, index: usize, value: Value) -> Option<Value> {
        {
            let mut items = self.inner.items.borrow_mut();
            if index >= items.len() {
                let len = index.checked_add(1)?;
                if len - items.len() > MAX_SET_AT_GROWTH {
                    return None;
                }
                items.resize(len, Value::Null);
            }
        }
        self.splice(index, 1, vec![value]).into_iter().next()
    }

    /// Remove one element, located by index or by identity. Returns `None`
    /// (and does not notify) when nothing matches.
    pub fn remove(&self, locate: Locate) -> Option<Value> {
        let index = {
            let items = self.inner.items.borrow();
            match &locate {
                Locate::At(i) => (*i < items.len()).then_some(*i),
                Locate::Item(target) => items.iter().position(|v| v.same(target)),
            }
        }?;
        self.splice(index, 1, Vec::new()).into_iter().next()
    }

    // -----------------------------------------------------------------------
    // Non-observable writes
    // -----------------------------------------------------------------------

    /// Overwrite `index` without notifying or attaching. Returns `false` if
    /// the index is out of bounds.
    pub fn set_unobserved(&self, index: usize, value: Value) -> bool {
        match self.inner.items.borrow_mut().get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Shorten the list without notifying.
    pub fn truncate(&self, len: usize) {
        self.inner.items.borrow_mut().truncate(len);
    }
}

impl Default for List {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for List {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "List({})", Value::List(self.clone()).to_json())
    }
}

impl From<Vec<Value>> for List {
    fn from(items: Vec<Value>) -> Self {
        Self::from_vec(items)
    }
}

impl FromIterator<Value> for List {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self::from_vec(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::runtime;
    use crate::scope::Scope;
    use serde_json::json;

    fn ints(list: &List) -> Vec<i64> {
        list.items_untracked()
            .iter()
            .filter_map(Value::as_i64)
            .collect()
    }

    /// An attached list plus a sync node counting how often it re-reads
    /// the list length.
    fn watched(items: &[i64]) -> (List, Rc<Cell<u32>>, Scope) {
        runtime::reset();
        runtime::configure(Config::default().with_async_updates(false));
        let list: List = items.iter().copied().map(Value::from).collect();
        observe(&Value::from(list.clone()));
        let scope = Scope::empty("test");
        let runs = Rc::new(Cell::new(0u32));
        let runs_clone = Rc::clone(&runs);
        let l = list.clone();
        scope
            .node("len", move |_| {
                runs_clone.set(runs_clone.get() + 1);
                Ok(Value::from(l.len() as i64))
            })
            .build();
        (list, runs, scope)
    }

    #[test]
    fn each_mutation_notifies_once() {
        let (list, runs, _scope) = watched(&[3, 1, 2]);
        assert_eq!(runs.get(), 1);

        list.push(Value::from(4));
        assert_eq!(runs.get(), 2);
        list.sort();
        assert_eq!(runs.get(), 3);
        assert_eq!(ints(&list), vec![1, 2, 3, 4]);
        list.reverse();
        list.pop();
        list.pop_front();
        assert_eq!(runs.get(), 6);
        assert_eq!(ints(&list), vec![3, 2]);
        list.extend([Value::from(7), Value::from(8)]);
        assert_eq!(runs.get(), 7);
    }

    #[test]
    fn pop_on_empty_still_notifies() {
        let (list, runs, _scope) = watched(&[]);
        assert_eq!(list.pop(), None);
        assert_eq!(list.pop_front(), None);
        assert_eq!(runs.get(), 3);
    }

    #[test]
    fn splice_clamps_and_returns_removed() {
        runtime::reset();
        let list: List = [1, 2, 3].into_iter().map(Value::from).collect();
        let removed = list.splice(1, 10, vec![Value::from(9)]);
        assert_eq!(removed.len(), 2);
        assert_eq!(ints(&list), vec![1, 9]);

        let removed = list.splice(99, 1, vec![Value::from(5)]);
        assert!(removed.is_empty());
        assert_eq!(ints(&list), vec![1, 9, 5]);
    }

    #[test]
    fn inserted_structures_are_attached() {
        let (list, _runs, _scope) = watched(&[]);
        let item = Value::from_json(json!({"k": 1}));
        list.push(item.clone());
        assert!(item.container().is_some());

        let spliced = Value::from_json(json!([1]));
        list.splice(0, 0, vec![spliced.clone()]);
        assert!(spliced.container().is_some());
    }

    #[test]
    fn set_at_grows_and_notifies() {
        let (list, runs, _scope) = watched(&[1]);
        let old = list.set_at(3, Value::from(4));
        assert!(old.is_some_and(|v| v.is_null()));
        assert_eq!(list.items_untracked().len(), 4);
        assert_eq!(runs.get(), 2);
        assert_eq!(list.set_at(0, Value::from(10)), Some(Value::from(1)));
    }

    #[test]
    fn set_at_rejects_unreachable_index() {
        let (list, runs, _scope) = watched(&[1]);
        assert_eq!(list.set_at(usize::MAX, Value::from(2)), None);
        assert_eq!(list.set_at(1 + MAX_SET_AT_GROWTH, Value::from(2)), None);
        assert_eq!(ints(&list), vec![1]);
        assert_eq!(runs.get(), 1);

        assert!(list.set_at(MAX_SET_AT_GROWTH, Value::from(2)).is_some());
        assert_eq!(list.items_untracked().len(), MAX_SET_AT_GROWTH + 1);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn sort_comparator_may_read_the_list() {
        let (list, runs, _scope) = watched(&[3, 1, 2]);
        let reader = list.clone();
        list.sort_by(|a, b| {
            assert_eq!(reader.len(), 3);
            b.sort_order(a)
        });
        assert_eq!(ints(&list), vec![3, 2, 1]);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn remove_by_index_and_identity() {
        let (list, runs, _scope) = watched(&[1, 2, 3]);
        assert_eq!(list.remove(Locate::At(0)), Some(Value::from(1)));
        assert_eq!(list.remove(Locate::Item(Value::from(3))), Some(Value::from(3)));
        assert_eq!(runs.get(), 3);
        assert_eq!(list.remove(Locate::At(5)), None);
        assert_eq!(list.remove(Locate::Item(Value::from(42))), None);
        assert_eq!(runs.get(), 3);
        assert_eq!(ints(&list), vec![2]);
    }

    #[test]
    fn unobserved_writes_do_not_notify() {
        let (list, runs, _scope) = watched(&[1, 2, 3]);
        assert!(list.set_unobserved(0, Value::from(5)));
        assert!(!list.set_unobserved(10, Value::from(5)));
        list.truncate(1);
        assert_eq!(runs.get(), 1);
        assert_eq!(ints(&list), vec![5]);
    }

    #[test]
    fn plain_list_mutates_silently() {
        runtime::reset();
        let list = List::new();
        list.push(Value::from(1));
        assert!(list.container().is_none());
        assert_eq!(list.len(), 1);
    }
}
