//! Live children sources.
//!
//! A resolver may hand the model a source that keeps changing after the
//! initial load. Two flavours exist:
//!
//! - [`LiveChildren`]: a shared collection that reports incremental
//!   [`ChildrenChange`]s (insert, remove, replace, move, reset).
//! - [`ChildrenFeed`]: a stream of full snapshots; every publish replaces the
//!   whole child list.
//!
//! The model subscribes while the owning node's children are materialized
//! and drops the subscription when they are dematerialized.
//!
//! # Example
//!
//! ```
//! use horizon_arbor::LiveChildren;
//!
//! let children = LiveChildren::from_vec(vec!["a", "b"]);
//! children.push("c");
//! assert!(children.move_item(2, 0));
//! assert_eq!(children.snapshot(), vec!["c", "a", "b"]);
//! ```

use std::sync::Arc;

use horizon_arbor_core::{ConnectionGuard, Signal};
use parking_lot::RwLock;

/// An incremental change to a live child collection.
///
/// Indices refer to the source collection, not to the model's children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildrenChange<T> {
    /// `items` were inserted starting at `index`.
    Insert { index: usize, items: Vec<T> },
    /// `count` items were removed starting at `index`.
    Remove { index: usize, count: usize },
    /// The item at `index` was replaced.
    Replace { index: usize, item: T },
    /// The item at `from` was removed and reinserted at `to`.
    ///
    /// `to` is the position in the list after the removal.
    Move { from: usize, to: usize },
    /// The collection now holds exactly these items.
    Reset(Vec<T>),
}

struct SourceState<T> {
    items: RwLock<Vec<T>>,
    changed: Arc<Signal<ChildrenChange<T>>>,
}

impl<T: Clone + Send + 'static> SourceState<T> {
    fn new(items: Vec<T>) -> Self {
        Self {
            items: RwLock::new(items),
            changed: Arc::new(Signal::new()),
        }
    }

    /// Apply `mutate` under the write lock, then emit its change once the
    /// lock is released.
    fn update<F>(&self, mutate: F) -> bool
    where
        F: FnOnce(&mut Vec<T>) -> Option<ChildrenChange<T>>,
    {
        let change = mutate(&mut self.items.write());
        match change {
            Some(change) => {
                self.changed.emit(change);
                true
            }
            None => false,
        }
    }
}

/// A shared, observable child collection reporting incremental changes.
///
/// Cloning yields another handle to the same collection.
#[derive(Clone)]
pub struct LiveChildren<T> {
    state: Arc<SourceState<T>>,
}

impl<T: Clone + Send + 'static> LiveChildren<T> {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    /// Create a collection holding `items`.
    pub fn from_vec(items: Vec<T>) -> Self {
        Self {
            state: Arc::new(SourceState::new(items)),
        }
    }

    /// A copy of the current items.
    pub fn snapshot(&self) -> Vec<T> {
        self.state.items.read().clone()
    }

    pub fn len(&self) -> usize {
        self.state.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append an item.
    pub fn push(&self, item: T) {
        self.state.update(|items| {
            let index = items.len();
            items.push(item.clone());
            Some(ChildrenChange::Insert {
                index,
                items: vec![item],
            })
        });
    }

    /// Insert an item at `index`. Returns `false` if `index > len`.
    pub fn insert(&self, index: usize, item: T) -> bool {
        self.insert_many(index, vec![item])
    }

    /// Insert several items starting at `index`. Returns `false` if
    /// `index > len`.
    pub fn insert_many(&self, index: usize, new_items: Vec<T>) -> bool {
        if new_items.is_empty() {
            return index <= self.len();
        }
        self.state.update(|items| {
            if index > items.len() {
                return None;
            }
            items.splice(index..index, new_items.iter().cloned());
            Some(ChildrenChange::Insert {
                index,
                items: new_items,
            })
        })
    }

    /// Remove the item at `index`.
    pub fn remove(&self, index: usize) -> Option<T> {
        let mut removed = None;
        self.state.update(|items| {
            if index >= items.len() {
                return None;
            }
            removed = Some(items.remove(index));
            Some(ChildrenChange::Remove { index, count: 1 })
        });
        removed
    }

    /// Remove `count` items starting at `index`. Returns `false` if the range
    /// is out of bounds.
    pub fn remove_range(&self, index: usize, count: usize) -> bool {
        if count == 0 {
            return index <= self.len();
        }
        self.state.update(|items| {
            let end = index.checked_add(count)?;
            if end > items.len() {
                return None;
            }
            items.drain(index..end);
            Some(ChildrenChange::Remove { index, count })
        })
    }

    /// Replace the item at `index`. Returns `false` if out of bounds.
    pub fn replace(&self, index: usize, item: T) -> bool {
        self.state.update(|items| {
            let slot = items.get_mut(index)?;
            *slot = item.clone();
            Some(ChildrenChange::Replace { index, item })
        })
    }

    /// Move the item at `from` so it ends up at `to`.
    ///
    /// Returns `false` if either index is out of bounds.
    pub fn move_item(&self, from: usize, to: usize) -> bool {
        self.state.update(|items| {
            if from >= items.len() || to >= items.len() {
                return None;
            }
            if from != to {
                let item = items.remove(from);
                items.insert(to, item);
            }
            Some(ChildrenChange::Move { from, to })
        })
    }

    /// Replace the whole collection.
    pub fn reset(&self, new_items: Vec<T>) {
        self.state.update(|items| {
            *items = new_items.clone();
            Some(ChildrenChange::Reset(new_items))
        });
    }

    /// Remove every item.
    pub fn clear(&self) {
        self.reset(Vec::new());
    }

    /// Observe changes until the returned guard is dropped.
    pub fn subscribe<F>(&self, slot: F) -> ConnectionGuard<ChildrenChange<T>>
    where
        F: Fn(&ChildrenChange<T>) + Send + Sync + 'static,
    {
        self.state.changed.connect_guarded(slot)
    }

    /// Number of active subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.state.changed.connection_count()
    }
}

impl<T: Clone + Send + 'static> Default for LiveChildren<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + std::fmt::Debug + 'static> std::fmt::Debug for LiveChildren<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveChildren")
            .field("items", &*self.state.items.read())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// A push source of complete child snapshots.
///
/// Each [`publish`](Self::publish) replaces the node's children wholesale.
#[derive(Clone)]
pub struct ChildrenFeed<T> {
    state: Arc<SourceState<T>>,
}

impl<T: Clone + Send + 'static> ChildrenFeed<T> {
    /// Create a feed whose current snapshot is `initial`.
    pub fn new(initial: Vec<T>) -> Self {
        Self {
            state: Arc::new(SourceState::new(initial)),
        }
    }

    /// The latest published snapshot.
    pub fn current(&self) -> Vec<T> {
        self.state.items.read().clone()
    }

    /// Publish a new snapshot.
    pub fn publish(&self, snapshot: Vec<T>) {
        self.state.update(|items| {
            *items = snapshot.clone();
            Some(ChildrenChange::Reset(snapshot))
        });
    }

    /// Observe published snapshots until the returned guard is dropped.
    pub fn subscribe<F>(&self, slot: F) -> ConnectionGuard<ChildrenChange<T>>
    where
        F: Fn(&ChildrenChange<T>) + Send + Sync + 'static,
    {
        self.state.changed.connect_guarded(slot)
    }

    /// Number of active subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.state.changed.connection_count()
    }
}

impl<T: Clone + Send + std::fmt::Debug + 'static> std::fmt::Debug for ChildrenFeed<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildrenFeed")
            .field("current", &*self.state.items.read())
            .finish()
    }
}

/// Either kind of live source, as held by a materialized node.
#[derive(Clone)]
pub(crate) enum LiveSource<T> {
    Collection(LiveChildren<T>),
    Feed(ChildrenFeed<T>),
}

impl<T: Clone + Send + 'static> LiveSource<T> {
    pub(crate) fn snapshot(&self) -> Vec<T> {
        match self {
            Self::Collection(children) => children.snapshot(),
            Self::Feed(feed) => feed.current(),
        }
    }

    pub(crate) fn subscribe<F>(&self, slot: F) -> ConnectionGuard<ChildrenChange<T>>
    where
        F: Fn(&ChildrenChange<T>) + Send + Sync + 'static,
    {
        match self {
            Self::Collection(children) => children.subscribe(slot),
            Self::Feed(feed) => feed.subscribe(slot),
        }
    }
}

static_assertions::assert_impl_all!(LiveChildren<String>: Send, Sync, Clone);
static_assertions::assert_impl_all!(ChildrenFeed<String>: Send, Sync, Clone);
