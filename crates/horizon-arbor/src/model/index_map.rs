//! Mapping of visible-list indices across a batch of changes.

use std::collections::HashMap;

use super::flatten::FlattenedChange;

/// Maps an index valid before a batch of [`FlattenedChange`]s to its
/// position after the batch.
///
/// Changes are applied in order. An index before a change is unaffected, an
/// index inside the replaced range is gone, and an index after it shifts by
/// the change's delta. Moves and sorts register explicit entries so rows that
/// were relocated (rather than destroyed) can still be followed.
///
/// # Example
///
/// ```
/// use horizon_arbor::{FlattenedChange, FlattenedIndexMap};
///
/// // Rows 2..5 removed, then one row inserted at 0.
/// let map = FlattenedIndexMap::new(
///     vec![FlattenedChange::remove(2, 3), FlattenedChange::insert(0, 1)],
///     10,
///     8,
/// );
/// assert_eq!(map.map_old_index_to_new(1), Some(2));
/// assert_eq!(map.map_old_index_to_new(3), None);
/// assert_eq!(map.map_old_index_to_new(6), Some(4));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlattenedIndexMap {
    changes: Vec<FlattenedChange>,
    old_count: usize,
    new_count: usize,
    explicit: HashMap<usize, usize>,
}

impl FlattenedIndexMap {
    /// Build a map from a batch and the list lengths around it.
    pub fn new(changes: Vec<FlattenedChange>, old_count: usize, new_count: usize) -> Self {
        Self {
            changes,
            old_count,
            new_count,
            explicit: HashMap::new(),
        }
    }

    /// A map for a batch that changed nothing.
    pub fn identity(count: usize) -> Self {
        Self::new(Vec::new(), count, count)
    }

    /// Add explicit `old -> new` entries that take precedence over the
    /// sequential rules.
    pub fn with_explicit(mut self, entries: impl IntoIterator<Item = (usize, usize)>) -> Self {
        self.explicit.extend(entries);
        self
    }

    pub fn old_count(&self) -> usize {
        self.old_count
    }

    pub fn new_count(&self) -> usize {
        self.new_count
    }

    pub fn changes(&self) -> &[FlattenedChange] {
        &self.changes
    }

    /// Whether every old index maps to itself.
    pub fn is_identity(&self) -> bool {
        self.old_count == self.new_count
            && self.explicit.iter().all(|(old, new)| old == new)
            && self.changes.iter().all(FlattenedChange::is_noop)
    }

    /// Where the row at `index` before the batch is now, or `None` if it no
    /// longer exists.
    pub fn map_old_index_to_new(&self, index: usize) -> Option<usize> {
        if index >= self.old_count {
            return None;
        }
        if let Some(&mapped) = self.explicit.get(&index) {
            return Some(mapped);
        }

        let mut current = index;
        for change in &self.changes {
            if current < change.index {
                continue;
            }
            if current < change.index + change.old_count {
                return None;
            }
            current = current - change.old_count + change.new_count;
        }
        (current < self.new_count).then_some(current)
    }
}
