//! Node storage for the hierarchical model.

use horizon_arbor_core::{CancellationToken, ConnectionGuard, DelayedTask};
use slotmap::new_key_type;

use super::error::LoadError;
use super::live::{ChildrenChange, LiveSource};
use super::resolver::SharedLoad;

new_key_type! {
    /// A stable handle to a node in a [`TreeModel`](super::TreeModel).
    ///
    /// Handles are generational: once a node is destroyed its handle never
    /// resolves to another node.
    pub struct NodeId;
}

/// One node in the arena.
pub(crate) struct Node<T: Clone + Send + 'static> {
    pub(crate) item: T,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) level: usize,
    pub(crate) is_expanded: bool,
    pub(crate) is_leaf: bool,
    pub(crate) is_loading: bool,
    pub(crate) load_error: Option<LoadError>,
    /// Number of visible rows strictly below this node.
    pub(crate) expanded_count: usize,
    pub(crate) has_materialized_children: bool,
    pub(crate) live: Option<LiveBinding<T>>,
    pub(crate) pending: Option<PendingLoad<T>>,
    pub(crate) retry: RetryState,
}

impl<T: Clone + Send + 'static> Node<T> {
    pub(crate) fn new(item: T, parent: Option<NodeId>, level: usize, is_leaf: bool) -> Self {
        Self {
            item,
            parent,
            children: Vec::new(),
            level,
            is_expanded: false,
            is_leaf,
            is_loading: false,
            load_error: None,
            expanded_count: 0,
            has_materialized_children: false,
            live: None,
            pending: None,
            retry: RetryState::default(),
        }
    }

    /// Rows this node occupies in the visible list when it is visible.
    #[inline]
    pub(crate) fn span(&self) -> usize {
        1 + self.expanded_count
    }

    /// Whether a renderer should offer an expander for this node.
    pub(crate) fn is_expandable(&self) -> bool {
        !self.is_leaf && !(self.has_materialized_children && self.children.is_empty())
    }

    /// Stop any in-flight load and scheduled retry for this node.
    pub(crate) fn cancel_activity(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.token.cancel();
        }
        self.is_loading = false;
        self.retry.cancel();
    }
}

/// An in-flight child resolution shared by every caller that expands the
/// node while it runs.
pub(crate) struct PendingLoad<T: Clone + Send + 'static> {
    pub(crate) seq: u64,
    pub(crate) token: CancellationToken,
    pub(crate) future: SharedLoad<T>,
    /// Set when the load replaces already visible children.
    pub(crate) refresh: bool,
}

/// Subscription of a node to a live children source.
pub(crate) struct LiveBinding<T: Clone + Send + 'static> {
    pub(crate) source: LiveSource<T>,
    pub(crate) _subscription: ConnectionGuard<ChildrenChange<T>>,
    /// One flag per source item; `false` marks items that were skipped.
    pub(crate) present: Vec<bool>,
}

impl<T: Clone + Send + 'static> LiveBinding<T> {
    /// Child position of the first source item at or after `source_index`.
    pub(crate) fn child_position(&self, source_index: usize) -> usize {
        self.present[..source_index.min(self.present.len())]
            .iter()
            .filter(|present| **present)
            .count()
    }

    /// Number of attached children among `count` source items from `source_index`.
    pub(crate) fn present_in(&self, source_index: usize, count: usize) -> usize {
        let end = (source_index + count).min(self.present.len());
        self.present[source_index.min(end)..end]
            .iter()
            .filter(|present| **present)
            .count()
    }
}

/// Retry bookkeeping for a node whose load failed.
#[derive(Debug, Default)]
pub(crate) struct RetryState {
    pub(crate) attempts: u32,
    /// Bumped whenever a scheduled retry becomes obsolete.
    pub(crate) generation: u64,
    pub(crate) task: Option<DelayedTask>,
}

impl RetryState {
    pub(crate) fn cancel(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if let Some(task) = self.task.take() {
            task.cancel();
        }
    }

    pub(crate) fn reset(&mut self) {
        self.cancel();
        self.attempts = 0;
    }
}

/// A read-only snapshot of a node's state.
#[derive(Debug, Clone)]
pub struct NodeInfo<T> {
    pub id: NodeId,
    pub item: T,
    pub parent: Option<NodeId>,
    /// Depth from the top level (roots are level 0).
    pub level: usize,
    pub is_expanded: bool,
    pub is_leaf: bool,
    pub is_loading: bool,
    pub load_error: Option<LoadError>,
    /// Visible rows strictly below the node.
    pub expanded_count: usize,
    pub has_materialized_children: bool,
    pub child_count: usize,
    /// Whether the children follow a live source.
    pub is_live: bool,
    /// Consecutive failed loads since the last success.
    pub retry_attempts: u32,
}

impl<T> NodeInfo<T> {
    /// Whether a renderer should offer an expander for this node.
    pub fn is_expandable(&self) -> bool {
        !self.is_leaf && !(self.has_materialized_children && self.child_count == 0)
    }
}

impl<T: Clone + Send + 'static> NodeInfo<T> {
    pub(crate) fn capture(id: NodeId, node: &Node<T>) -> Self {
        Self {
            id,
            item: node.item.clone(),
            parent: node.parent,
            level: node.level,
            is_expanded: node.is_expanded,
            is_leaf: node.is_leaf,
            is_loading: node.is_loading,
            load_error: node.load_error.clone(),
            expanded_count: node.expanded_count,
            has_materialized_children: node.has_materialized_children,
            child_count: node.children.len(),
            is_live: node.live.is_some(),
            retry_attempts: node.retry.attempts,
        }
    }
}
