//! Captured expansion state.

/// Identifies a node across tree rebuilds.
///
/// Which variant is produced depends on the model's
/// [`ExpansionKeyStrategy`](super::ExpansionKeyStrategy).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExpansionKey<T> {
    Item(T),
    /// Child positions from the top level down.
    Path(Vec<usize>),
    Custom(String),
}

/// The set of expanded nodes at some point in time.
///
/// Produced by [`TreeModel::expansion_state`](super::TreeModel::expansion_state)
/// and applied with [`TreeModel::restore_expansion`](super::TreeModel::restore_expansion).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpansionState<T> {
    keys: Vec<ExpansionKey<T>>,
}

impl<T> Default for ExpansionState<T> {
    fn default() -> Self {
        Self { keys: Vec::new() }
    }
}

impl<T: PartialEq> ExpansionState<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key; duplicates are ignored.
    pub fn insert(&mut self, key: ExpansionKey<T>) {
        if !self.contains(&key) {
            self.keys.push(key);
        }
    }

    pub fn contains(&self, key: &ExpansionKey<T>) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Keys in capture order (parents before their descendants).
    pub fn keys(&self) -> &[ExpansionKey<T>] {
        &self.keys
    }
}

impl<T: PartialEq> FromIterator<ExpansionKey<T>> for ExpansionState<T> {
    fn from_iter<I: IntoIterator<Item = ExpansionKey<T>>>(iter: I) -> Self {
        let mut state = Self::new();
        for key in iter {
            state.insert(key);
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_deduplicates() {
        let mut state = ExpansionState::new();
        state.insert(ExpansionKey::Item("a"));
        state.insert(ExpansionKey::Item("a"));
        state.insert(ExpansionKey::Path(vec![0, 1]));
        assert_eq!(state.len(), 2);
        assert!(state.contains(&ExpansionKey::Path(vec![0, 1])));
        assert!(!state.contains(&ExpansionKey::Custom("a".into())));
    }

    #[test]
    fn test_collect() {
        let state: ExpansionState<u8> = [ExpansionKey::Custom("x".into()), ExpansionKey::Item(3)]
            .into_iter()
            .collect();
        assert_eq!(state.keys().len(), 2);
    }
}
