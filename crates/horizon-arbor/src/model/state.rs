//! Synchronous tree state.
//!
//! Everything here runs under the model's state lock and never awaits. Each
//! public operation collects its visible-list splices and notifications into
//! an [`Effects`] value; the model emits them once the lock is released.

use std::cmp::Ordering;
use std::collections::HashSet;

use horizon_arbor_core::{ConnectionGuard, DebugTreeSource};
use horizon_arbor_core::logging::targets;

use super::config::{ExpansionKeyStrategy, ModelConfig, RetryPolicy};
use super::error::{LoadError, Result, TreeError};
use super::expansion::ExpansionKey;
use super::flatten::{
    Arena, ChangeBatch, FlatList, children_span, collect_visible_descendants, positions,
    propagate_count, visible_index,
};
use super::live::{ChildrenChange, LiveSource};
use super::node::{LiveBinding, Node, NodeId};
use super::resolver::{LoadResult, Resolved};
use super::signals::{LoadFailure, TreeEvent};
use super::tree::{ExpandOutcome, TreeItem};

/// A retry the model should schedule once the lock is released.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryRequest {
    pub(crate) node: NodeId,
    pub(crate) attempt: u32,
    pub(crate) delay: std::time::Duration,
    pub(crate) generation: u64,
}

/// Side effects of one operation.
#[derive(Debug)]
pub(crate) struct Effects {
    pub(crate) batch: ChangeBatch,
    pub(crate) events: Vec<TreeEvent>,
    pub(crate) retries: Vec<RetryRequest>,
}

impl Effects {
    pub(crate) fn new(visible_count: usize) -> Self {
        Self {
            batch: ChangeBatch::new(visible_count),
            events: Vec::new(),
            retries: Vec::new(),
        }
    }
}

pub(crate) struct TreeState<T: TreeItem> {
    pub(crate) nodes: Arena<T>,
    pub(crate) roots: Vec<NodeId>,
    pub(crate) flat: FlatList,
    /// Collapsed nodes whose children are discarded when the guard closes.
    pub(crate) pending_cleanup: HashSet<NodeId>,
    pub(crate) guard_open: bool,
    next_load_seq: u64,
}

impl<T: TreeItem> TreeState<T> {
    pub(crate) fn new() -> Self {
        Self {
            nodes: Arena::with_key(),
            roots: Vec::new(),
            flat: FlatList::default(),
            pending_cleanup: HashSet::new(),
            guard_open: false,
            next_load_seq: 0,
        }
    }

    pub(crate) fn node(&self, id: NodeId) -> Result<&Node<T>> {
        self.nodes.get(id).ok_or(TreeError::NodeNotFound(id))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut Node<T>> {
        self.nodes.get_mut(id).ok_or(TreeError::NodeNotFound(id))
    }

    pub(crate) fn next_seq(&mut self) -> u64 {
        self.next_load_seq += 1;
        self.next_load_seq
    }

    pub(crate) fn index_of(&self, id: NodeId) -> Option<usize> {
        visible_index(&self.nodes, &self.roots, id)
    }

    /// Turn collected effects into the notifications to emit.
    pub(crate) fn commit(&mut self, fx: Effects) -> (Vec<TreeEvent>, Vec<RetryRequest>) {
        let Effects {
            batch,
            mut events,
            retries,
        } = fx;
        if !batch.is_empty() {
            let version = self.flat.bump_version();
            events.insert(0, TreeEvent::Flattened(batch.finish(self.flat.len(), version)));
        }
        (events, retries)
    }

    // -------------------------------------------------------------------------
    // Node lifecycle
    // -------------------------------------------------------------------------

    /// Whether `item` equals `parent` or any of its ancestors.
    fn is_cycle(&self, parent: NodeId, item: &T) -> bool {
        let mut current = Some(parent);
        while let Some(id) = current {
            let Some(node) = self.nodes.get(id) else {
                return false;
            };
            if node.item == *item {
                return true;
            }
            current = node.parent;
        }
        false
    }

    /// Create child nodes of `parent` for `items`, skipping cyclic ones.
    ///
    /// Returns the new ids and one presence flag per item.
    fn build_children(
        &mut self,
        parent: NodeId,
        items: Vec<T>,
        config: &ModelConfig<T>,
        fx: &mut Effects,
    ) -> (Vec<NodeId>, Vec<bool>) {
        let level = self.nodes.get(parent).map_or(0, |node| node.level + 1);
        let mut ids = Vec::with_capacity(items.len());
        let mut present = Vec::with_capacity(items.len());

        for item in items {
            if self.is_cycle(parent, &item) {
                tracing::warn!(
                    target: targets::TREE,
                    ?parent,
                    level,
                    "skipping child that repeats an ancestor"
                );
                fx.events.push(TreeEvent::LoadFailed(LoadFailure {
                    node: parent,
                    error: LoadError::Cycle { level },
                    attempt: 0,
                }));
                present.push(false);
                continue;
            }
            let is_leaf = config.is_forced_leaf(&item, level);
            ids.push(self.nodes.insert(Node::new(item, Some(parent), level, is_leaf)));
            present.push(true);
        }
        (ids, present)
    }

    fn sort_ids(&self, ids: &mut [NodeId], comparer: &dyn Fn(&T, &T) -> Ordering) {
        ids.sort_by(|a, b| match (self.nodes.get(*a), self.nodes.get(*b)) {
            (Some(a), Some(b)) => comparer(&a.item, &b.item),
            _ => Ordering::Equal,
        });
    }

    /// Destroy `id` and its whole subtree.
    ///
    /// Does not touch the parent's child list or the visible list.
    fn remove_subtree(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(mut node) = self.nodes.remove(current) {
                node.cancel_activity();
                self.pending_cleanup.remove(&current);
                stack.append(&mut node.children);
            }
        }
    }

    /// Discard the realized children of a collapsed node.
    pub(crate) fn dematerialize(&mut self, id: NodeId) {
        let Some(node) = self.nodes.get_mut(id) else {
            return;
        };
        let children = std::mem::take(&mut node.children);
        node.live = None;
        node.has_materialized_children = false;
        node.expanded_count = 0;
        self.pending_cleanup.remove(&id);

        tracing::trace!(target: targets::TREE, ?id, count = children.len(), "dematerializing children");
        for child in children {
            self.remove_subtree(child);
        }
    }

    // -------------------------------------------------------------------------
    // Visible rows
    // -------------------------------------------------------------------------

    /// Bring the rows below `id` in line with its expansion state and
    /// children, as a single splice of its current range.
    fn rebuild_rows(&mut self, id: NodeId, fx: &mut Effects) {
        let Some(node) = self.nodes.get(id) else {
            return;
        };
        let old_count = node.expanded_count;
        let rows = if node.is_expanded && !node.is_leaf {
            collect_visible_descendants(&self.nodes, id)
        } else {
            Vec::new()
        };
        let new_count = rows.len();
        let parent = node.parent;

        if let Some(node) = self.nodes.get_mut(id) {
            node.expanded_count = new_count;
        }
        propagate_count(
            &mut self.nodes,
            parent,
            new_count as isize - old_count as isize,
        );

        if (old_count > 0 || new_count > 0)
            && let Some(index) = self.index_of(id)
        {
            fx.batch.push(self.flat.splice(index + 1, old_count, rows));
        }
    }

    /// Collapse `id`, remove its rows and discard its children.
    fn abandon_children(&mut self, id: NodeId, fx: &mut Effects) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.is_expanded = false;
        }
        self.rebuild_rows(id, fx);
        self.dematerialize(id);
    }

    /// Expand a node whose children are already realized.
    pub(crate) fn expand_materialized(&mut self, id: NodeId, fx: &mut Effects) {
        self.pending_cleanup.remove(&id);
        if let Some(node) = self.nodes.get_mut(id) {
            node.is_expanded = true;
        }
        self.rebuild_rows(id, fx);
        fx.events.push(TreeEvent::Expanded(id));
    }

    pub(crate) fn collapse_node(
        &mut self,
        id: NodeId,
        config: &ModelConfig<T>,
        fx: &mut Effects,
    ) -> Result<bool> {
        let node = self.node_mut(id)?;
        if node.is_leaf && node.load_error.is_some() {
            // Collapsing a failed node gives up on its pending retry.
            node.retry.cancel();
        }
        if node.is_leaf || !node.is_expanded {
            return Ok(false);
        }

        let mut stale = false;
        if let Some(pending) = node.pending.take() {
            tracing::debug!(target: targets::TREE, ?id, "collapse cancelled in-flight load");
            pending.token.cancel();
            node.is_loading = false;
            stale = pending.refresh;
        }
        node.is_expanded = false;

        self.rebuild_rows(id, fx);
        fx.events.push(TreeEvent::Collapsed(id));

        if stale {
            self.dematerialize(id);
        } else if config.virtualize_children || self.guard_open {
            if self.guard_open {
                self.pending_cleanup.insert(id);
            } else {
                self.dematerialize(id);
            }
        }
        Ok(true)
    }

    // -------------------------------------------------------------------------
    // Loading
    // -------------------------------------------------------------------------

    /// Apply the result of load `seq` for `id`.
    ///
    /// Only the load currently registered on the node is applied; callers
    /// that joined it, or whose load was superseded, get an outcome derived
    /// from the node's state.
    pub(crate) fn finish_load<B>(
        &mut self,
        id: NodeId,
        seq: u64,
        result: LoadResult<T>,
        config: &ModelConfig<T>,
        bind: B,
        fx: &mut Effects,
    ) -> Result<ExpandOutcome>
    where
        B: FnOnce(&LiveSource<T>) -> ConnectionGuard<ChildrenChange<T>>,
    {
        let Some(node) = self.nodes.get_mut(id) else {
            return Err(TreeError::Cancelled);
        };
        let owns = node.pending.as_ref().is_some_and(|pending| pending.seq == seq);
        if !owns {
            return match result {
                Err(LoadError::Cancelled) => Err(TreeError::Cancelled),
                _ => settled_outcome(node),
            };
        }
        node.pending = None;
        node.is_loading = false;

        match result {
            Err(LoadError::Cancelled) => {
                tracing::debug!(target: targets::TREE, ?id, "load cancelled");
                self.abandon_children(id, fx);
                Err(TreeError::Cancelled)
            }
            Err(error) => {
                self.abandon_children(id, fx);
                let node = self.node_mut(id)?;
                node.is_leaf = true;
                node.load_error = Some(error.clone());
                node.retry.attempts = (node.retry.attempts + 1).min(RetryPolicy::ATTEMPT_LIMIT);
                let attempt = node.retry.attempts;

                tracing::warn!(target: targets::TREE, ?id, attempt, %error, "child load failed");
                fx.events.push(TreeEvent::LoadFailed(LoadFailure {
                    node: id,
                    error: error.clone(),
                    attempt,
                }));

                if config.retry.should_retry(attempt) {
                    node.retry.cancel();
                    fx.retries.push(RetryRequest {
                        node: id,
                        attempt,
                        delay: config.retry.delay_for_attempt(attempt),
                        generation: node.retry.generation,
                    });
                }
                Ok(ExpandOutcome::LoadFailed(error))
            }
            Ok(None) => {
                self.abandon_children(id, fx);
                let node = self.node_mut(id)?;
                node.is_leaf = true;
                node.has_materialized_children = true;
                node.load_error = None;
                node.retry.reset();
                Ok(ExpandOutcome::Leaf)
            }
            Ok(Some(resolved)) => {
                let node = self.node_mut(id)?;
                node.is_leaf = false;
                node.load_error = None;
                node.retry.reset();
                node.live = None;
                let parent_item = node.item.clone();
                let previous = std::mem::take(&mut node.children);
                for child in previous {
                    self.remove_subtree(child);
                }

                let (items, live) = match resolved {
                    Resolved::Items(items) => (items, None),
                    Resolved::Live(source) => {
                        // Subscribe before reading so no change slips between.
                        let subscription = bind(&source);
                        (source.snapshot(), Some((source, subscription)))
                    }
                };
                let (mut ids, present) = self.build_children(id, items, config, fx);
                if live.is_none()
                    && let Some(comparer) = config.sibling_order.comparer_for(&parent_item)
                {
                    self.sort_ids(&mut ids, &*comparer);
                }

                let node = self.node_mut(id)?;
                tracing::debug!(target: targets::TREE, ?id, count = ids.len(), live = live.is_some(), "children loaded");
                node.children = ids;
                node.has_materialized_children = true;
                node.live = live.map(|(source, subscription)| LiveBinding {
                    source,
                    _subscription: subscription,
                    present,
                });
                let expanded = node.is_expanded;

                self.rebuild_rows(id, fx);
                fx.events.push(TreeEvent::ChildrenLoaded(id));
                if expanded {
                    fx.events.push(TreeEvent::Expanded(id));
                }
                Ok(ExpandOutcome::Expanded)
            }
        }
    }

    // -------------------------------------------------------------------------
    // Live children
    // -------------------------------------------------------------------------

    pub(crate) fn apply_live_change(
        &mut self,
        id: NodeId,
        change: ChildrenChange<T>,
        config: &ModelConfig<T>,
        fx: &mut Effects,
    ) {
        let Some(len) = self
            .nodes
            .get(id)
            .and_then(|node| node.live.as_ref())
            .map(|binding| binding.present.len())
        else {
            return;
        };

        let applied = match change {
            ChildrenChange::Insert { index, items } => {
                self.splice_children(id, index, 0, items, config, fx)
            }
            ChildrenChange::Remove { index, count } => {
                self.splice_children(id, index, count, Vec::new(), config, fx)
            }
            ChildrenChange::Replace { index, item } => {
                index < len && self.splice_children(id, index, 1, vec![item], config, fx)
            }
            ChildrenChange::Move { from, to } => self.move_child(id, from, to, fx),
            ChildrenChange::Reset(items) => self.splice_children(id, 0, len, items, config, fx),
        };

        if !applied {
            tracing::warn!(target: targets::TREE, ?id, "live change out of range, resynchronizing");
            let snapshot = self
                .nodes
                .get(id)
                .and_then(|node| node.live.as_ref())
                .map(|binding| binding.source.snapshot());
            if let Some(items) = snapshot {
                self.splice_children(id, 0, len, items, config, fx);
            }
        }
    }

    /// Replace `remove` source items at `index` with `items`, as one splice.
    fn splice_children(
        &mut self,
        id: NodeId,
        index: usize,
        remove: usize,
        items: Vec<T>,
        config: &ModelConfig<T>,
        fx: &mut Effects,
    ) -> bool {
        let Some(node) = self.nodes.get(id) else {
            return false;
        };
        let Some(binding) = node.live.as_ref() else {
            return false;
        };
        if index.checked_add(remove).is_none_or(|end| end > binding.present.len()) {
            return false;
        }

        let position = binding.child_position(index);
        let removed_children = binding.present_in(index, remove);
        let offset = children_span(&self.nodes, &node.children, position);
        let removed: Vec<NodeId> = node.children[position..position + removed_children].to_vec();
        let removed_span: usize = removed
            .iter()
            .filter_map(|child| self.nodes.get(*child))
            .map(Node::span)
            .sum();

        let (ids, present) = self.build_children(id, items, config, fx);
        let Some(node) = self.nodes.get_mut(id) else {
            return false;
        };
        node.children
            .splice(position..position + removed_children, ids.iter().copied());
        if let Some(binding) = node.live.as_mut() {
            binding.present.splice(index..index + remove, present);
        }
        let expanded = node.is_expanded;
        let parent = node.parent;
        if expanded {
            node.expanded_count = node.expanded_count + ids.len() - removed_span;
        }

        for child in removed {
            self.remove_subtree(child);
        }

        if expanded {
            propagate_count(
                &mut self.nodes,
                parent,
                ids.len() as isize - removed_span as isize,
            );
            if let Some(node_index) = self.index_of(id) {
                fx.batch
                    .push(self.flat.splice(node_index + 1 + offset, removed_span, ids));
            }
        }
        true
    }

    /// Relocate one child, reported as a remove/insert pair whose rows are
    /// tracked by explicit index-map entries.
    fn move_child(&mut self, id: NodeId, from: usize, to: usize, fx: &mut Effects) -> bool {
        let Some(node) = self.nodes.get(id) else {
            return false;
        };
        let Some(binding) = node.live.as_ref() else {
            return false;
        };
        let len = binding.present.len();
        if from >= len || to >= len {
            return false;
        }
        if from == to {
            return true;
        }

        let attached = binding.present[from];
        let old_position = binding.child_position(from);
        let old_offset = children_span(&self.nodes, &node.children, old_position);

        let Some(node) = self.nodes.get_mut(id) else {
            return false;
        };
        let Some(binding) = node.live.as_mut() else {
            return false;
        };
        let flag = binding.present.remove(from);
        binding.present.insert(to, flag);
        if !attached {
            return true;
        }
        let new_position = binding.child_position(to);
        let child = node.children.remove(old_position);
        node.children.insert(new_position, child);
        let expanded = node.is_expanded;

        if !expanded {
            return true;
        }
        let Some(node_index) = self.index_of(id) else {
            return true;
        };
        let span = self.nodes.get(child).map_or(1, Node::span);
        let new_offset = self
            .nodes
            .get(id)
            .map_or(0, |node| children_span(&self.nodes, &node.children, new_position));

        let old_start = node_index + 1 + old_offset;
        let new_start = node_index + 1 + new_offset;
        let rows = self.flat.rows()[old_start..old_start + span].to_vec();
        fx.batch.push(self.flat.splice(old_start, span, Vec::new()));
        fx.batch.push(self.flat.splice(new_start, 0, rows));
        for k in 0..span {
            fx.batch.relocate(old_start + k, new_start + k);
        }
        true
    }

    // -------------------------------------------------------------------------
    // Bulk operations
    // -------------------------------------------------------------------------

    pub(crate) fn sort_children(
        &mut self,
        id: NodeId,
        comparer: &dyn Fn(&T, &T) -> Ordering,
        recursive: bool,
        fx: &mut Effects,
    ) -> Result<()> {
        if self.node(id)?.live.is_some() {
            return Err(TreeError::LiveOrder(id));
        }

        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(node) = self.nodes.get_mut(current) else {
                continue;
            };
            if node.live.is_some() {
                continue;
            }
            let mut children = std::mem::take(&mut node.children);
            self.sort_ids(&mut children, comparer);
            if recursive {
                stack.extend(children.iter().copied());
            }
            if let Some(node) = self.nodes.get_mut(current) {
                node.children = children;
            }
        }

        let node = self.node(id)?;
        let count = node.expanded_count;
        if !node.is_expanded || count == 0 {
            return Ok(());
        }
        let Some(index) = self.index_of(id) else {
            return Ok(());
        };

        let start = index + 1;
        let old_rows = self.flat.rows()[start..start + count].to_vec();
        let new_rows = collect_visible_descendants(&self.nodes, id);
        let new_positions = positions(&new_rows);
        fx.batch.push(self.flat.splice(start, count, new_rows));
        for (offset, row) in old_rows.iter().enumerate() {
            if let Some(position) = new_positions.get(row) {
                fx.batch.relocate(start + offset, start + position);
            }
        }
        Ok(())
    }

    /// Collapse every expanded node in the subtree of `id` at relative depth
    /// `min_depth` or deeper.
    pub(crate) fn collapse_all(
        &mut self,
        id: NodeId,
        min_depth: usize,
        config: &ModelConfig<T>,
        fx: &mut Effects,
    ) -> Result<usize> {
        self.node(id)?;
        let mut collapsed = 0;
        // (node, relative depth, below a node this call collapsed)
        let mut stack = vec![(id, 0usize, false)];

        while let Some((current, depth, hidden)) = stack.pop() {
            let mut hide_below = hidden;
            if hidden {
                // Rows are already gone; only the flags need clearing.
                if let Some(node) = self.nodes.get_mut(current)
                    && node.is_expanded
                {
                    if let Some(pending) = node.pending.take() {
                        pending.token.cancel();
                        node.is_loading = false;
                    }
                    node.is_expanded = false;
                    node.expanded_count = 0;
                    collapsed += 1;
                    fx.events.push(TreeEvent::Collapsed(current));
                }
            } else if depth >= min_depth && self.collapse_node(current, config, fx)? {
                collapsed += 1;
                hide_below = true;
            }

            if let Some(node) = self.nodes.get(current) {
                stack.extend(
                    node.children
                        .iter()
                        .rev()
                        .map(|child| (*child, depth + 1, hide_below)),
                );
            }
        }
        Ok(collapsed)
    }

    /// Replace every root, destroying the old tree.
    pub(crate) fn replace_roots(
        &mut self,
        items: Vec<T>,
        config: &ModelConfig<T>,
        fx: &mut Effects,
    ) -> Vec<NodeId> {
        for root in std::mem::take(&mut self.roots) {
            self.remove_subtree(root);
        }
        self.pending_cleanup.clear();

        let roots: Vec<NodeId> = items
            .into_iter()
            .map(|item| {
                let is_leaf = config.is_forced_leaf(&item, 0);
                self.nodes.insert(Node::new(item, None, 0, is_leaf))
            })
            .collect();
        self.roots = roots.clone();

        let old_count = self.flat.len();
        fx.batch.push(self.flat.splice(0, old_count, roots.clone()));
        fx.events.push(TreeEvent::Reset);
        roots
    }

    /// Close the guard scope and run deferred dematerialization.
    pub(crate) fn flush_cleanup(&mut self) -> usize {
        self.guard_open = false;
        let pending: Vec<NodeId> = self.pending_cleanup.drain().collect();
        let mut cleaned = 0;
        for id in pending {
            let still_collapsed = self
                .nodes
                .get(id)
                .is_some_and(|node| !node.is_expanded && node.pending.is_none());
            if still_collapsed {
                self.dematerialize(id);
                cleaned += 1;
            }
        }
        cleaned
    }

    // -------------------------------------------------------------------------
    // Lookup
    // -------------------------------------------------------------------------

    /// Children of `parent`, or the roots.
    pub(crate) fn siblings(&self, parent: Option<NodeId>) -> &[NodeId] {
        match parent {
            Some(parent) => self
                .nodes
                .get(parent)
                .map_or(&[][..], |node| node.children.as_slice()),
            None => &self.roots,
        }
    }

    /// First materialized node holding `item`, in display order.
    pub(crate) fn find(&self, item: &T) -> Option<NodeId> {
        let mut stack: Vec<NodeId> = self.roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            let node = self.nodes.get(id)?;
            if node.item == *item {
                return Some(id);
            }
            stack.extend(node.children.iter().rev().copied());
        }
        None
    }

    /// Ancestors of `id`, top level first.
    pub(crate) fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut current = self.nodes.get(id).and_then(|node| node.parent);
        while let Some(ancestor) = current {
            chain.push(ancestor);
            current = self.nodes.get(ancestor).and_then(|node| node.parent);
        }
        chain.reverse();
        chain
    }

    fn index_path(&self, id: NodeId) -> Option<Vec<usize>> {
        let mut path = Vec::new();
        let mut current = id;
        loop {
            let node = self.nodes.get(current)?;
            let position = self
                .siblings(node.parent)
                .iter()
                .position(|sibling| *sibling == current)?;
            path.push(position);
            match node.parent {
                Some(parent) => current = parent,
                None => break,
            }
        }
        path.reverse();
        Some(path)
    }

    pub(crate) fn expansion_key(
        &self,
        id: NodeId,
        strategy: &ExpansionKeyStrategy<T>,
    ) -> Option<ExpansionKey<T>> {
        let node = self.nodes.get(id)?;
        Some(match strategy {
            ExpansionKeyStrategy::ItemIdentity => ExpansionKey::Item(node.item.clone()),
            ExpansionKeyStrategy::IndexPath => ExpansionKey::Path(self.index_path(id)?),
            ExpansionKeyStrategy::Custom(key) => ExpansionKey::Custom(key(&node.item)),
        })
    }

    /// Expanded, materialized nodes reachable through expanded ancestors.
    pub(crate) fn expanded_nodes(&self) -> Vec<NodeId> {
        let mut expanded = Vec::new();
        let mut stack: Vec<NodeId> = self.roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get(id) else {
                continue;
            };
            if node.is_expanded && node.has_materialized_children && node.pending.is_none() {
                expanded.push(id);
                stack.extend(node.children.iter().rev().copied());
            }
        }
        expanded
    }

    // -------------------------------------------------------------------------
    // Diagnostics
    // -------------------------------------------------------------------------

    /// Check every structural invariant against a fresh traversal.
    pub(crate) fn verify(&self) -> std::result::Result<(), String> {
        let mut expected = Vec::with_capacity(self.flat.len());
        let mut reachable = 0usize;
        let mut stack: Vec<NodeId> = self.roots.iter().rev().copied().collect();
        let mut walk: Vec<NodeId> = stack.clone();

        while let Some(id) = stack.pop() {
            expected.push(id);
            let node = self
                .nodes
                .get(id)
                .ok_or_else(|| format!("visible walk reached missing node {id:?}"))?;
            if node.is_expanded {
                stack.extend(node.children.iter().rev().copied());
            }
        }
        if expected != self.flat.rows() {
            return Err(format!(
                "visible list has {} rows, traversal produced {}",
                self.flat.len(),
                expected.len()
            ));
        }

        while let Some(id) = walk.pop() {
            reachable += 1;
            let node = self
                .nodes
                .get(id)
                .ok_or_else(|| format!("dangling node {id:?}"))?;
            if node.parent.is_none() && node.level != 0 {
                return Err(format!("root {id:?} has level {}", node.level));
            }

            let mut count = 0;
            for child_id in &node.children {
                let child = self
                    .nodes
                    .get(*child_id)
                    .ok_or_else(|| format!("{id:?} lists missing child {child_id:?}"))?;
                if child.parent != Some(id) {
                    return Err(format!("{child_id:?} does not point back to {id:?}"));
                }
                if child.level != node.level + 1 {
                    return Err(format!("{child_id:?} has level {} under level {}", child.level, node.level));
                }
                count += child.span();
                walk.push(*child_id);
            }
            let expected_count = if node.is_expanded && !node.is_leaf { count } else { 0 };
            if node.expanded_count != expected_count {
                return Err(format!(
                    "{id:?} caches expanded_count {} but has {expected_count}",
                    node.expanded_count
                ));
            }

            let mut ancestor = node.parent;
            while let Some(ancestor_id) = ancestor {
                let ancestor_node = self
                    .nodes
                    .get(ancestor_id)
                    .ok_or_else(|| format!("{id:?} has missing ancestor {ancestor_id:?}"))?;
                if ancestor_node.item == node.item {
                    return Err(format!("{id:?} repeats its ancestor {ancestor_id:?}"));
                }
                ancestor = ancestor_node.parent;
            }
        }

        if reachable != self.nodes.len() {
            return Err(format!(
                "{} nodes stored but {reachable} reachable from the roots",
                self.nodes.len()
            ));
        }
        Ok(())
    }
}

/// Outcome for a caller whose load was not the one applied.
fn settled_outcome<T: TreeItem>(node: &Node<T>) -> Result<ExpandOutcome> {
    if let Some(error) = &node.load_error {
        Ok(ExpandOutcome::LoadFailed(error.clone()))
    } else if node.is_leaf {
        Ok(ExpandOutcome::Leaf)
    } else if node.is_expanded && node.has_materialized_children {
        Ok(ExpandOutcome::Expanded)
    } else {
        Err(TreeError::Cancelled)
    }
}

impl<T: TreeItem + std::fmt::Debug> DebugTreeSource for TreeState<T> {
    type Id = NodeId;

    fn roots(&self) -> Vec<NodeId> {
        self.roots.clone()
    }

    fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes
            .get(id)
            .map(|node| node.children.clone())
            .unwrap_or_default()
    }

    fn label(&self, id: NodeId) -> String {
        self.nodes
            .get(id)
            .map(|node| format!("{:?}", node.item))
            .unwrap_or_default()
    }

    fn annotations(&self, id: NodeId) -> Vec<&'static str> {
        let Some(node) = self.nodes.get(id) else {
            return Vec::new();
        };
        let mut annotations = Vec::new();
        if node.is_expanded {
            annotations.push("expanded");
        }
        if node.is_loading {
            annotations.push("loading");
        }
        if node.is_leaf {
            annotations.push("leaf");
        }
        if node.load_error.is_some() {
            annotations.push("error");
        }
        if node.live.is_some() {
            annotations.push("live");
        }
        annotations
    }
}
