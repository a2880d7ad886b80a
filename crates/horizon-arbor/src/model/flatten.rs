//! The flattening engine.
//!
//! The visible list is the pre-order walk of the roots that descends only
//! into expanded nodes. It is never rebuilt wholesale: every mutation splices
//! exactly the affected range and records one [`FlattenedChange`] per splice.
//!
//! Positions are derived from cached `expanded_count`s. A node's index is the
//! sum of the spans of everything before it on the path from the top level,
//! so locating a node costs `O(depth * siblings)` rather than a scan of the
//! visible list.

use std::collections::HashMap;
use std::sync::Arc;

use horizon_arbor_core::logging::targets;
use slotmap::SlotMap;

use super::index_map::FlattenedIndexMap;
use super::node::{Node, NodeId};

pub(crate) type Arena<T> = SlotMap<NodeId, Node<T>>;

/// One contiguous replacement in the visible list: `old_count` rows starting
/// at `index` were replaced by `new_count` rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlattenedChange {
    pub index: usize,
    pub old_count: usize,
    pub new_count: usize,
}

impl FlattenedChange {
    pub fn new(index: usize, old_count: usize, new_count: usize) -> Self {
        Self {
            index,
            old_count,
            new_count,
        }
    }

    /// `count` rows inserted at `index`.
    pub fn insert(index: usize, count: usize) -> Self {
        Self::new(index, 0, count)
    }

    /// `count` rows removed at `index`.
    pub fn remove(index: usize, count: usize) -> Self {
        Self::new(index, count, 0)
    }

    /// `old_count` rows at `index` replaced by `new_count` rows.
    pub fn replace(index: usize, old_count: usize, new_count: usize) -> Self {
        Self::new(index, old_count, new_count)
    }

    /// Change in list length.
    pub fn delta(&self) -> isize {
        self.new_count as isize - self.old_count as isize
    }

    pub fn is_noop(&self) -> bool {
        self.old_count == 0 && self.new_count == 0
    }
}

/// Everything a consumer needs to follow one batch of visible-list changes.
#[derive(Debug, Clone)]
pub struct FlattenedChangedEvent {
    /// Changes in application order.
    pub changes: Vec<FlattenedChange>,
    /// List version after the batch.
    pub version: u64,
    pub index_map: Arc<FlattenedIndexMap>,
}

/// The visible list.
#[derive(Debug, Default)]
pub(crate) struct FlatList {
    rows: Vec<NodeId>,
    version: u64,
}

impl FlatList {
    pub(crate) fn len(&self) -> usize {
        self.rows.len()
    }

    pub(crate) fn get(&self, index: usize) -> Option<NodeId> {
        self.rows.get(index).copied()
    }

    pub(crate) fn rows(&self) -> &[NodeId] {
        &self.rows
    }

    pub(crate) fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn bump_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    /// Replace `old_count` rows at `index` with `rows`.
    pub(crate) fn splice(
        &mut self,
        index: usize,
        old_count: usize,
        rows: Vec<NodeId>,
    ) -> FlattenedChange {
        let new_count = rows.len();
        self.rows.splice(index..index + old_count, rows);
        tracing::trace!(
            target: targets::FLATTEN,
            index,
            old_count,
            new_count,
            len = self.rows.len(),
            "spliced visible rows"
        );
        FlattenedChange::new(index, old_count, new_count)
    }
}

/// Changes collected while one public operation runs.
#[derive(Debug)]
pub(crate) struct ChangeBatch {
    old_count: usize,
    changes: Vec<FlattenedChange>,
    explicit: Vec<(usize, usize)>,
}

impl ChangeBatch {
    pub(crate) fn new(old_count: usize) -> Self {
        Self {
            old_count,
            changes: Vec::new(),
            explicit: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, change: FlattenedChange) {
        if !change.is_noop() {
            self.changes.push(change);
        }
    }

    /// Record that the row at `old` before the batch sits at `new` after it.
    ///
    /// Only operations that form their batch alone record entries, so both
    /// coordinates refer to the list around the whole batch.
    pub(crate) fn relocate(&mut self, old: usize, new: usize) {
        self.explicit.push((old, new));
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub(crate) fn finish(self, new_count: usize, version: u64) -> FlattenedChangedEvent {
        let index_map = FlattenedIndexMap::new(self.changes.clone(), self.old_count, new_count)
            .with_explicit(self.explicit);
        FlattenedChangedEvent {
            changes: self.changes,
            version,
            index_map: Arc::new(index_map),
        }
    }
}

/// Visible rows below `id` if it were expanded, in display order.
///
/// Descends only into children that are themselves expanded; never resolves.
pub(crate) fn collect_visible_descendants<T: Clone + Send + 'static>(
    nodes: &Arena<T>,
    id: NodeId,
) -> Vec<NodeId> {
    let mut rows = Vec::new();
    let Some(node) = nodes.get(id) else {
        return rows;
    };

    let mut stack: Vec<NodeId> = node.children.iter().rev().copied().collect();
    while let Some(current) = stack.pop() {
        rows.push(current);
        if let Some(child) = nodes.get(current)
            && child.is_expanded
        {
            stack.extend(child.children.iter().rev().copied());
        }
    }
    rows
}

/// Rows occupied by the first `count` entries of `children`.
pub(crate) fn children_span<T: Clone + Send + 'static>(
    nodes: &Arena<T>,
    children: &[NodeId],
    count: usize,
) -> usize {
    children[..count.min(children.len())]
        .iter()
        .filter_map(|child| nodes.get(*child))
        .map(Node::span)
        .sum()
}

/// Index of `id` in the visible list, or `None` when an ancestor is collapsed.
pub(crate) fn visible_index<T: Clone + Send + 'static>(
    nodes: &Arena<T>,
    roots: &[NodeId],
    id: NodeId,
) -> Option<usize> {
    let mut index = 0;
    let mut current = id;
    loop {
        let node = nodes.get(current)?;
        let siblings = match node.parent {
            Some(parent) => nodes.get(parent)?.children.as_slice(),
            None => roots,
        };
        let position = siblings.iter().position(|sibling| *sibling == current)?;
        index += children_span(nodes, siblings, position);

        match node.parent {
            Some(parent) => {
                if !nodes.get(parent)?.is_expanded {
                    return None;
                }
                index += 1;
                current = parent;
            }
            None => return Some(index),
        }
    }
}

/// Add `delta` to `expanded_count` from `start` upward while nodes are
/// expanded.
///
/// A collapsed ancestor hides the change from everything above it.
pub(crate) fn propagate_count<T: Clone + Send + 'static>(
    nodes: &mut Arena<T>,
    start: Option<NodeId>,
    delta: isize,
) {
    if delta == 0 {
        return;
    }
    let mut current = start;
    while let Some(id) = current {
        let Some(node) = nodes.get_mut(id) else {
            return;
        };
        if !node.is_expanded {
            return;
        }
        node.expanded_count = node.expanded_count.saturating_add_signed(delta);
        current = node.parent;
    }
}

/// Build a lookup of row positions, used to translate reorderings into
/// explicit index-map entries.
pub(crate) fn positions(rows: &[NodeId]) -> HashMap<NodeId, usize> {
    rows.iter().enumerate().map(|(i, id)| (*id, i)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// r
    /// ├── a (expanded)
    /// │   ├── a1
    /// │   └── a2
    /// └── b
    fn sample() -> (Arena<&'static str>, Vec<NodeId>, [NodeId; 5]) {
        let mut nodes = Arena::with_key();
        let r = nodes.insert(Node::new("r", None, 0, false));
        let a = nodes.insert(Node::new("a", Some(r), 1, false));
        let b = nodes.insert(Node::new("b", Some(r), 1, false));
        let a1 = nodes.insert(Node::new("a1", Some(a), 2, true));
        let a2 = nodes.insert(Node::new("a2", Some(a), 2, true));
        nodes[r].children = vec![a, b];
        nodes[a].children = vec![a1, a2];
        nodes[a].is_expanded = true;
        nodes[a].expanded_count = 2;
        (nodes, vec![r], [r, a, b, a1, a2])
    }

    #[test]
    fn test_collect_descends_into_expanded_only() {
        let (mut nodes, _, [r, a, b, a1, a2]) = sample();
        assert_eq!(collect_visible_descendants(&nodes, r), vec![a, a1, a2, b]);

        nodes[a].is_expanded = false;
        assert_eq!(collect_visible_descendants(&nodes, r), vec![a, b]);
    }

    #[test]
    fn test_visible_index_requires_expanded_ancestors() {
        let (mut nodes, roots, [r, a, b, a1, _]) = sample();
        assert_eq!(visible_index(&nodes, &roots, r), Some(0));
        assert_eq!(visible_index(&nodes, &roots, a), None);

        nodes[r].is_expanded = true;
        nodes[r].expanded_count = 4;
        assert_eq!(visible_index(&nodes, &roots, a), Some(1));
        assert_eq!(visible_index(&nodes, &roots, a1), Some(2));
        assert_eq!(visible_index(&nodes, &roots, b), Some(4));
    }

    #[test]
    fn test_propagate_stops_at_collapsed_ancestor() {
        let (mut nodes, _, [r, a, ..]) = sample();
        propagate_count(&mut nodes, Some(a), 3);
        assert_eq!(nodes[a].expanded_count, 5);
        assert_eq!(nodes[r].expanded_count, 0);

        nodes[r].is_expanded = true;
        nodes[r].expanded_count = 7;
        propagate_count(&mut nodes, Some(a), -1);
        assert_eq!(nodes[a].expanded_count, 4);
        assert_eq!(nodes[r].expanded_count, 6);
    }

    #[test]
    fn test_flat_list_splice_and_batch() {
        let (_, _, [r, a, b, a1, a2]) = sample();
        let mut flat = FlatList::default();
        let mut batch = ChangeBatch::new(0);
        batch.push(flat.splice(0, 0, vec![r, a, b]));
        batch.push(flat.splice(2, 0, vec![a1, a2]));
        batch.push(flat.splice(1, 0, vec![]));
        assert_eq!(flat.rows(), &[r, a, a1, a2, b]);

        let version = flat.bump_version();
        let event = batch.finish(flat.len(), version);
        assert_eq!(event.version, 1);
        assert_eq!(event.changes.len(), 2);
        assert_eq!(event.index_map.new_count(), 5);
    }

    #[test]
    fn test_change_delta() {
        assert_eq!(FlattenedChange::replace(3, 5, 2).delta(), -3);
        assert!(FlattenedChange::insert(0, 0).is_noop());
    }
}
