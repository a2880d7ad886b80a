//! The hierarchical tree model.
//!
//! [`TreeModel`] owns a tree of lazily resolved nodes and keeps a flattened
//! visible list in sync with it. Views address rows by index; every change to
//! the list is reported through
//! [`TreeSignals::flattened_changed`](super::TreeSignals::flattened_changed)
//! as a batch of splices with an index map.
//!
//! # Concurrency
//!
//! The model is a cheap handle (`Clone`) around shared state guarded by a
//! single lock. The lock is never held across an `.await` and signals are
//! emitted only after it is released, so slots may call back into the model.
//! Leaf predicates and comparers do run under the lock and must not call the
//! model.
//!
//! # Example
//!
//! ```
//! use horizon_arbor::{ChildrenResolver, ModelConfig, TreeModel};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let resolver = ChildrenResolver::from_fn(|n: &u32| (*n < 100).then(|| vec![n * 10, n * 10 + 1]));
//! let model = TreeModel::new(ModelConfig::new(resolver));
//! model.set_root(1).await;
//!
//! let root = model.roots()[0];
//! model.expand(root).await.unwrap();
//! assert_eq!(model.visible_items(), vec![1, 10, 11]);
//! # });
//! ```

use std::cmp::Ordering;
use std::sync::{Arc, Weak};

use futures_util::FutureExt;
use horizon_arbor_core::{
    CancellationToken, ConnectionGuard, DelayedTask, PerfSpan, TreeDebug, TreeFormatOptions,
};
use horizon_arbor_core::logging::targets;
use parking_lot::Mutex;

use super::config::ModelConfig;
use super::error::{LoadError, Result, TreeError};
use super::expansion::ExpansionState;
use super::live::{ChildrenChange, LiveSource};
use super::node::{NodeId, NodeInfo, PendingLoad};
use super::resolver::{LoadResult, SharedLoad};
use super::signals::{RetryScheduled, TreeEvent, TreeSignals};
use super::state::{Effects, RetryRequest, TreeState};

/// Items a [`TreeModel`] can hold.
///
/// Equality is used to detect cycles and to look items up.
pub trait TreeItem: Clone + PartialEq + Send + Sync + 'static {}

impl<T: Clone + PartialEq + Send + Sync + 'static> TreeItem for T {}

/// Result of [`TreeModel::expand`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpandOutcome {
    /// The node is now expanded with its children visible.
    Expanded,
    /// The node was already expanded; nothing changed.
    AlreadyExpanded,
    /// The node has no children.
    Leaf,
    /// Resolving the children failed. The node is left collapsed and marked
    /// as a leaf until a retry or refresh succeeds.
    LoadFailed(LoadError),
}

impl ExpandOutcome {
    /// Whether the node ended up expanded.
    pub fn is_expanded(&self) -> bool {
        matches!(self, Self::Expanded | Self::AlreadyExpanded)
    }
}

struct ModelInner<T: TreeItem> {
    state: Mutex<TreeState<T>>,
    config: ModelConfig<T>,
    signals: TreeSignals,
}

/// A lazily loaded tree flattened into a visible list.
pub struct TreeModel<T: TreeItem> {
    inner: Arc<ModelInner<T>>,
}

impl<T: TreeItem> Clone for TreeModel<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: TreeItem> std::fmt::Debug for TreeModel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("TreeModel")
            .field("roots", &state.roots.len())
            .field("nodes", &state.nodes.len())
            .field("visible", &state.flat.len())
            .field("version", &state.flat.version())
            .finish()
    }
}

enum ExpandStep<T> {
    Done(ExpandOutcome),
    Join { seq: u64, load: SharedLoad<T> },
    Resolve(T),
}

enum Registration<T> {
    Started { seq: u64, load: SharedLoad<T> },
    Joined { seq: u64, load: SharedLoad<T> },
}

impl<T: TreeItem> TreeModel<T> {
    /// Create an empty model.
    pub fn new(config: ModelConfig<T>) -> Self {
        Self {
            inner: Arc::new(ModelInner {
                state: Mutex::new(TreeState::new()),
                config,
                signals: TreeSignals::new(),
            }),
        }
    }

    pub fn config(&self) -> &ModelConfig<T> {
        &self.inner.config
    }

    pub fn signals(&self) -> &TreeSignals {
        &self.inner.signals
    }

    /// Run `f` under the state lock, then emit what it produced.
    fn with_state<R>(
        &self,
        f: impl FnOnce(&mut TreeState<T>, &ModelConfig<T>, &mut Effects) -> R,
    ) -> R {
        let (result, events, retries) = {
            let mut state = self.inner.state.lock();
            let mut fx = Effects::new(state.flat.len());
            let result = f(&mut state, &self.inner.config, &mut fx);
            let (events, retries) = state.commit(fx);
            (result, events, retries)
        };
        self.inner.signals.dispatch(events);
        for request in retries {
            self.schedule_retry(request);
        }
        result
    }

    // -------------------------------------------------------------------------
    // Roots
    // -------------------------------------------------------------------------

    /// Replace the tree with a single root.
    pub async fn set_root(&self, item: T) {
        self.set_roots(vec![item]).await;
    }

    /// Replace the tree with new top-level items.
    ///
    /// Any previous nodes are destroyed and their loads cancelled. With
    /// auto-expansion configured, the new roots are expanded afterwards.
    pub async fn set_roots(&self, items: Vec<T>) {
        let roots = self.with_state(|state, config, fx| state.replace_roots(items, config, fx));
        tracing::debug!(target: targets::TREE, count = roots.len(), "roots replaced");

        if !self.inner.config.auto_expand_root {
            return;
        }
        let depth = self.inner.config.max_auto_expand_depth.unwrap_or(1);
        for root in roots {
            if let Err(error) = self.expand_all(root, Some(depth)).await {
                tracing::debug!(target: targets::TREE, ?root, %error, "auto-expansion stopped");
            }
        }
    }

    /// Remove every node.
    pub fn clear(&self) {
        self.with_state(|state, config, fx| state.replace_roots(Vec::new(), config, fx));
    }

    // -------------------------------------------------------------------------
    // Expand
    // -------------------------------------------------------------------------

    /// Expand `id`, resolving its children if needed.
    ///
    /// Concurrent calls for the same node share one resolution. Returns
    /// [`TreeError::Cancelled`] if the load is cancelled by a collapse,
    /// refresh or removal before it completes.
    #[tracing::instrument(skip(self), target = "horizon_arbor::tree", level = "trace")]
    pub async fn expand(&self, id: NodeId) -> Result<ExpandOutcome> {
        self.expand_inner(id, None).await
    }

    /// Like [`expand`](Self::expand), additionally cancellable through `token`.
    ///
    /// When the call starts the load, cancelling `token` cancels the load for
    /// everyone. When it joins a load already in flight, cancelling `token`
    /// only abandons this caller's wait.
    pub async fn expand_with_token(
        &self,
        id: NodeId,
        token: &CancellationToken,
    ) -> Result<ExpandOutcome> {
        self.expand_inner(id, Some(token.clone())).await
    }

    async fn expand_inner(
        &self,
        id: NodeId,
        caller: Option<CancellationToken>,
    ) -> Result<ExpandOutcome> {
        let registration = match self.begin_expand(id)? {
            ExpandStep::Done(outcome) => return Ok(outcome),
            ExpandStep::Join { seq, load } => Registration::Joined { seq, load },
            ExpandStep::Resolve(item) => {
                let token = CancellationToken::new();
                if let Some(caller) = &caller {
                    caller.link(&token);
                }
                let load = self
                    .inner
                    .config
                    .resolver
                    .resolve(&item, token.clone())
                    .shared();
                self.register_load(id, token, load, false)?
            }
        };

        let (seq, result) = match (registration, caller) {
            (Registration::Joined { seq, load }, Some(caller)) => {
                let result = tokio::select! {
                    biased;
                    _ = caller.cancelled() => return Err(TreeError::Cancelled),
                    result = load => result,
                };
                (seq, result)
            }
            (Registration::Joined { seq, load } | Registration::Started { seq, load }, _) => {
                (seq, load.await)
            }
        };
        self.finish_load(id, seq, result)
    }

    fn begin_expand(&self, id: NodeId) -> Result<ExpandStep<T>> {
        self.with_state(|state, _config, fx| {
            let node = state.node(id)?;
            if let Some(pending) = &node.pending {
                return Ok(ExpandStep::Join {
                    seq: pending.seq,
                    load: pending.future.clone(),
                });
            }
            if node.load_error.is_none() {
                if node.is_leaf {
                    return Ok(ExpandStep::Done(ExpandOutcome::Leaf));
                }
                if node.has_materialized_children {
                    if node.is_expanded {
                        return Ok(ExpandStep::Done(ExpandOutcome::AlreadyExpanded));
                    }
                    state.expand_materialized(id, fx);
                    return Ok(ExpandStep::Done(ExpandOutcome::Expanded));
                }
            }
            Ok(ExpandStep::Resolve(node.item.clone()))
        })
    }

    /// Record a started load on `id`, or join one registered meanwhile.
    fn register_load(
        &self,
        id: NodeId,
        token: CancellationToken,
        load: SharedLoad<T>,
        refresh: bool,
    ) -> Result<Registration<T>> {
        self.with_state(|state, _config, _fx| {
            let seq = state.next_seq();
            let Ok(node) = state.node_mut(id) else {
                token.cancel();
                return Err(TreeError::NodeNotFound(id));
            };
            if let Some(pending) = &node.pending {
                token.cancel();
                return Ok(Registration::Joined {
                    seq: pending.seq,
                    load: pending.future.clone(),
                });
            }

            node.retry.cancel();
            node.pending = Some(PendingLoad {
                seq,
                token,
                future: load.clone(),
                refresh,
            });
            node.is_loading = true;
            node.is_expanded = true;
            node.is_leaf = false;
            node.load_error = None;
            state.pending_cleanup.remove(&id);
            tracing::trace!(target: targets::TREE, ?id, seq, refresh, "load started");
            Ok(Registration::Started { seq, load })
        })
    }

    fn finish_load(&self, id: NodeId, seq: u64, result: LoadResult<T>) -> Result<ExpandOutcome> {
        let bind = self.live_binder(id);
        self.with_state(|state, config, fx| state.finish_load(id, seq, result, config, bind, fx))
    }

    /// Subscribe the model to a live child source of `id`.
    fn live_binder(
        &self,
        id: NodeId,
    ) -> impl FnOnce(&LiveSource<T>) -> ConnectionGuard<ChildrenChange<T>> + use<T> {
        let weak = Arc::downgrade(&self.inner);
        move |source: &LiveSource<T>| {
            source.subscribe(move |change: &ChildrenChange<T>| {
                if let Some(inner) = weak.upgrade() {
                    TreeModel { inner }.apply_live_change(id, change.clone());
                }
            })
        }
    }

    fn apply_live_change(&self, id: NodeId, change: ChildrenChange<T>) {
        tracing::trace!(target: targets::TREE, ?id, kind = change_kind(&change), "live change");
        self.with_state(|state, config, fx| state.apply_live_change(id, change, config, fx));
    }

    // -------------------------------------------------------------------------
    // Collapse / toggle
    // -------------------------------------------------------------------------

    /// Collapse `id`.
    ///
    /// Returns `false` for leaves and nodes that are not expanded. An
    /// in-flight load of the node is cancelled.
    #[tracing::instrument(skip(self), target = "horizon_arbor::tree", level = "trace")]
    pub fn collapse(&self, id: NodeId) -> Result<bool> {
        self.with_state(|state, config, fx| state.collapse_node(id, config, fx))
    }

    /// Expand a collapsed node or collapse an expanded one.
    ///
    /// Returns whether the node ended up expanded.
    pub async fn toggle(&self, id: NodeId) -> Result<bool> {
        let expanded = self.inner.state.lock().node(id)?.is_expanded;
        if expanded {
            self.collapse(id)?;
            Ok(false)
        } else {
            Ok(self.expand(id).await?.is_expanded())
        }
    }

    // -------------------------------------------------------------------------
    // Refresh
    // -------------------------------------------------------------------------

    /// Discard the children of `id` and resolve them again.
    ///
    /// A collapsed node only forgets its children (`Ok(None)`); they are
    /// resolved on the next expansion. An expanded node keeps its rows until
    /// the new children arrive and then replaces them in a single change.
    #[tracing::instrument(skip(self), target = "horizon_arbor::tree", level = "trace")]
    pub async fn refresh(&self, id: NodeId) -> Result<Option<ExpandOutcome>> {
        let item = self.with_state(|state, config, _fx| {
            let node = state.node_mut(id)?;
            if let Some(pending) = node.pending.take() {
                pending.token.cancel();
            }
            node.is_loading = false;
            node.load_error = None;
            node.retry.reset();
            node.is_leaf = config.is_forced_leaf(&node.item, node.level);

            if !node.is_expanded {
                state.dematerialize(id);
                return Ok(None);
            }
            Ok(Some(node.item.clone()))
        })?;
        let Some(item) = item else {
            return Ok(None);
        };

        tracing::debug!(target: targets::TREE, ?id, "refreshing children");
        let token = CancellationToken::new();
        let load = self
            .inner
            .config
            .resolver
            .resolve(&item, token.clone())
            .shared();
        let (seq, load) = match self.register_load(id, token, load, true)? {
            Registration::Started { seq, load } | Registration::Joined { seq, load } => (seq, load),
        };
        let result = load.await;
        self.finish_load(id, seq, result).map(Some)
    }

    // -------------------------------------------------------------------------
    // Retry
    // -------------------------------------------------------------------------

    fn schedule_retry(&self, request: RetryRequest) {
        let RetryRequest {
            node,
            attempt,
            delay,
            generation,
        } = request;
        let weak: Weak<ModelInner<T>> = Arc::downgrade(&self.inner);

        let spawned = DelayedTask::spawn(delay, move || async move {
            if let Some(inner) = weak.upgrade() {
                TreeModel { inner }.run_retry(node, generation).await;
            }
        });

        match spawned {
            Ok(task) => {
                let scheduled = {
                    let mut state = self.inner.state.lock();
                    match state.nodes.get_mut(node) {
                        Some(entry) if entry.retry.generation == generation => {
                            entry.retry.task = Some(task);
                            true
                        }
                        _ => {
                            task.cancel();
                            false
                        }
                    }
                };
                if scheduled {
                    tracing::debug!(target: targets::TREE, ?node, attempt, ?delay, "retry scheduled");
                    self.inner
                        .signals
                        .dispatch(vec![TreeEvent::RetryScheduled(RetryScheduled {
                            node,
                            attempt,
                            delay,
                        })]);
                }
            }
            Err(error) => {
                tracing::warn!(target: targets::TREE, ?node, %error, "retry not scheduled; expand again to retry");
            }
        }
    }

    async fn run_retry(&self, id: NodeId, generation: u64) {
        let due = {
            let mut state = self.inner.state.lock();
            match state.nodes.get_mut(id) {
                Some(node)
                    if node.retry.generation == generation
                        && node.load_error.is_some()
                        && node.pending.is_none() =>
                {
                    node.retry.task = None;
                    true
                }
                _ => false,
            }
        };
        if !due {
            return;
        }

        match self.expand(id).await {
            Ok(outcome) => {
                tracing::debug!(target: targets::TREE, ?id, ?outcome, "retry finished")
            }
            Err(error) => {
                tracing::debug!(target: targets::TREE, ?id, %error, "retry abandoned")
            }
        }
    }

    // -------------------------------------------------------------------------
    // Bulk operations
    // -------------------------------------------------------------------------

    /// Reorder the children of `id` with `comparer`.
    ///
    /// Visible rows move in one change whose index map follows every moved
    /// row. Nodes bound to a live source keep the source's order; sorting one
    /// directly is an error, and recursive sorts skip them.
    pub fn sort<F>(&self, id: NodeId, comparer: F, recursive: bool) -> Result<()>
    where
        F: Fn(&T, &T) -> Ordering,
    {
        let _span = PerfSpan::new("sort");
        self.with_state(|state, _config, fx| state.sort_children(id, &comparer, recursive, fx))
    }

    /// Expand `id` and its descendants, loading children as needed.
    ///
    /// `max_depth` bounds the relative depth of expanded nodes: `Some(1)`
    /// expands `id` only, `Some(0)` nothing, `None` the whole subtree.
    /// Returns how many nodes were newly expanded.
    #[tracing::instrument(skip(self), target = "horizon_arbor::perf", level = "debug")]
    pub async fn expand_all(&self, id: NodeId, max_depth: Option<usize>) -> Result<usize> {
        self.inner.state.lock().node(id)?;

        let mut expanded = 0;
        let mut stack = vec![(id, 0usize)];
        while let Some((current, depth)) = stack.pop() {
            if max_depth.is_some_and(|max| depth >= max) {
                continue;
            }
            match self.expand(current).await {
                Ok(ExpandOutcome::Expanded) => expanded += 1,
                Ok(ExpandOutcome::AlreadyExpanded) => {}
                Ok(_) | Err(TreeError::Cancelled | TreeError::NodeNotFound(_)) => continue,
                Err(error) => return Err(error),
            }
            let children = self.children(current);
            stack.extend(children.into_iter().rev().map(|child| (child, depth + 1)));
        }
        Ok(expanded)
    }

    /// Collapse every expanded node in the subtree of `id` whose relative
    /// depth is at least `min_depth` (`0` includes `id` itself).
    ///
    /// Returns how many nodes were collapsed.
    pub fn collapse_all(&self, id: NodeId, min_depth: usize) -> Result<usize> {
        let _span = PerfSpan::new("collapse_all");
        self.with_state(|state, config, fx| state.collapse_all(id, min_depth, config, fx))
    }

    // -------------------------------------------------------------------------
    // Expansion state
    // -------------------------------------------------------------------------

    /// Capture which nodes are expanded, keyed by the configured strategy.
    pub fn expansion_state(&self) -> ExpansionState<T> {
        let state = self.inner.state.lock();
        let strategy = &self.inner.config.expansion_key;
        state
            .expanded_nodes()
            .into_iter()
            .filter_map(|id| state.expansion_key(id, strategy))
            .collect()
    }

    /// Re-expand nodes recorded in `expansion`, loading as needed.
    ///
    /// Only descends below nodes that are re-expanded. Returns how many
    /// nodes ended up expanded.
    pub async fn restore_expansion(&self, expansion: &ExpansionState<T>) -> usize {
        let mut restored = 0;
        let mut stack: Vec<NodeId> = self.roots().into_iter().rev().collect();

        while let Some(id) = stack.pop() {
            let key = {
                let state = self.inner.state.lock();
                state.expansion_key(id, &self.inner.config.expansion_key)
            };
            if !key.is_some_and(|key| expansion.contains(&key)) {
                continue;
            }
            match self.expand(id).await {
                Ok(outcome) if outcome.is_expanded() => restored += 1,
                _ => continue,
            }
            stack.extend(self.children(id).into_iter().rev());
        }
        tracing::debug!(target: targets::TREE, restored, requested = expansion.len(), "expansion restored");
        restored
    }

    /// Make `item` visible by expanding its ancestors.
    ///
    /// With an item-path selector configured, the chain of ancestors it
    /// reports is followed from the top level, loading along the way.
    /// Otherwise only already materialized nodes are searched.
    pub async fn expand_to_item(&self, item: &T) -> Result<NodeId> {
        let Some(selector) = self.inner.config.item_path.clone() else {
            let (id, ancestors) = {
                let state = self.inner.state.lock();
                let id = state.find(item).ok_or(TreeError::ItemNotFound)?;
                (id, state.ancestors(id))
            };
            for ancestor in ancestors {
                if !self.expand(ancestor).await?.is_expanded() {
                    return Err(TreeError::ItemNotFound);
                }
            }
            return Ok(id);
        };

        let mut parent = None;
        for ancestor in selector(item) {
            let id = self.find_child(parent, &ancestor).ok_or(TreeError::ItemNotFound)?;
            if !self.expand(id).await?.is_expanded() {
                return Err(TreeError::ItemNotFound);
            }
            parent = Some(id);
        }
        self.find_child(parent, item).ok_or(TreeError::ItemNotFound)
    }

    fn find_child(&self, parent: Option<NodeId>, item: &T) -> Option<NodeId> {
        let state = self.inner.state.lock();
        let nodes = &state.nodes;
        state
            .siblings(parent)
            .iter()
            .copied()
            .find(|id| nodes.get(*id).is_some_and(|node| node.item == *item))
    }

    // -------------------------------------------------------------------------
    // Deferred cleanup guard
    // -------------------------------------------------------------------------

    /// While the guard is open, collapsed nodes keep their children until it
    /// closes.
    pub(crate) fn open_guard(&self) {
        self.inner.state.lock().guard_open = true;
    }

    /// Close the guard and discard children of nodes that are still
    /// collapsed. Returns how many nodes were cleaned up.
    pub(crate) fn close_guard(&self) -> usize {
        let cleaned = self.inner.state.lock().flush_cleanup();
        if cleaned > 0 {
            tracing::trace!(target: targets::TREE, cleaned, "deferred cleanup ran");
        }
        cleaned
    }

    pub fn is_guard_open(&self) -> bool {
        self.inner.state.lock().guard_open
    }

    /// Collapsed nodes waiting for the guard to close.
    pub fn pending_cleanup_count(&self) -> usize {
        self.inner.state.lock().pending_cleanup.len()
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn roots(&self) -> Vec<NodeId> {
        self.inner.state.lock().roots.clone()
    }

    pub fn visible_count(&self) -> usize {
        self.inner.state.lock().flat.len()
    }

    /// The visible list.
    pub fn visible_nodes(&self) -> Vec<NodeId> {
        self.inner.state.lock().flat.rows().to_vec()
    }

    /// Items of the visible list, in order.
    pub fn visible_items(&self) -> Vec<T> {
        let state = self.inner.state.lock();
        state
            .flat
            .rows()
            .iter()
            .filter_map(|id| state.nodes.get(*id).map(|node| node.item.clone()))
            .collect()
    }

    pub fn node_at(&self, index: usize) -> Option<NodeId> {
        self.inner.state.lock().flat.get(index)
    }

    pub fn item_at(&self, index: usize) -> Option<T> {
        let state = self.inner.state.lock();
        let id = state.flat.get(index)?;
        state.nodes.get(id).map(|node| node.item.clone())
    }

    /// Visible index of `id`, or `None` if it is hidden or gone.
    pub fn index_of(&self, id: NodeId) -> Option<usize> {
        self.inner.state.lock().index_of(id)
    }

    /// Visible index of the first row holding `item`.
    pub fn index_of_item(&self, item: &T) -> Option<usize> {
        let state = self.inner.state.lock();
        state
            .flat
            .rows()
            .iter()
            .position(|id| state.nodes.get(*id).is_some_and(|node| node.item == *item))
    }

    /// First materialized node holding `item`, visible or not.
    pub fn find_node(&self, item: &T) -> Option<NodeId> {
        self.inner.state.lock().find(item)
    }

    /// Snapshot of a node's state.
    pub fn node(&self, id: NodeId) -> Option<NodeInfo<T>> {
        let state = self.inner.state.lock();
        state.nodes.get(id).map(|node| NodeInfo::capture(id, node))
    }

    pub fn item(&self, id: NodeId) -> Option<T> {
        let state = self.inner.state.lock();
        state.nodes.get(id).map(|node| node.item.clone())
    }

    /// Materialized children of `id`.
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        let state = self.inner.state.lock();
        state
            .nodes
            .get(id)
            .map(|node| node.children.clone())
            .unwrap_or_default()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        let state = self.inner.state.lock();
        state.nodes.get(id).and_then(|node| node.parent)
    }

    /// Number of materialized nodes.
    pub fn node_count(&self) -> usize {
        self.inner.state.lock().nodes.len()
    }

    /// Version of the visible list, bumped once per batch of changes.
    pub fn version(&self) -> u64 {
        self.inner.state.lock().flat.version()
    }

    // -------------------------------------------------------------------------
    // Diagnostics
    // -------------------------------------------------------------------------

    /// Check the structural invariants of the tree and the visible list.
    ///
    /// Intended for tests and debug assertions; walks the whole tree.
    pub fn verify(&self) -> std::result::Result<(), String> {
        self.inner.state.lock().verify()
    }

    /// Render the materialized tree for debugging.
    pub fn format_tree(&self, options: TreeFormatOptions) -> String
    where
        T: std::fmt::Debug,
    {
        let state = self.inner.state.lock();
        TreeDebug::with_options(options).format(&*state)
    }
}

fn change_kind<T>(change: &ChildrenChange<T>) -> &'static str {
    match change {
        ChildrenChange::Insert { .. } => "insert",
        ChildrenChange::Remove { .. } => "remove",
        ChildrenChange::Replace { .. } => "replace",
        ChildrenChange::Move { .. } => "move",
        ChildrenChange::Reset(_) => "reset",
    }
}

static_assertions::assert_impl_all!(TreeModel<String>: Send, Sync, Clone);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChildrenResolver, ResolveError, RetryPolicy};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::time::Duration;

    fn fixed_tree() -> HashMap<&'static str, Vec<&'static str>> {
        HashMap::from([
            ("R", vec!["A", "B"]),
            ("A", vec!["A1", "A2"]),
            ("B", vec![]),
        ])
    }

    fn model() -> TreeModel<&'static str> {
        let tree = fixed_tree();
        let resolver = ChildrenResolver::from_fn(move |item: &&'static str| tree.get(item).cloned());
        TreeModel::new(ModelConfig::new(resolver))
    }

    async fn rooted() -> (TreeModel<&'static str>, NodeId) {
        let model = model();
        model.set_root("R").await;
        let root = model.roots()[0];
        (model, root)
    }

    #[tokio::test]
    async fn test_expand_and_collapse() {
        let (model, root) = rooted().await;
        assert_eq!(model.expand(root).await, Ok(ExpandOutcome::Expanded));
        assert_eq!(model.visible_items(), vec!["R", "A", "B"]);

        let a = model.node_at(1).unwrap();
        model.expand(a).await.unwrap();
        assert_eq!(model.visible_items(), vec!["R", "A", "A1", "A2", "B"]);
        assert_eq!(model.node(root).unwrap().expanded_count, 4);

        assert_eq!(model.collapse(a), Ok(true));
        assert_eq!(model.visible_items(), vec!["R", "A", "B"]);
        assert_eq!(model.collapse(a), Ok(false));
        model.verify().unwrap();
    }

    #[tokio::test]
    async fn test_expand_is_idempotent() {
        let (model, root) = rooted().await;
        model.expand(root).await.unwrap();
        let version = model.version();

        assert_eq!(model.expand(root).await, Ok(ExpandOutcome::AlreadyExpanded));
        assert_eq!(model.version(), version);
    }

    #[tokio::test]
    async fn test_empty_children_load_without_rows() {
        let (model, root) = rooted().await;
        model.expand(root).await.unwrap();
        let b = model.node_at(2).unwrap();
        let version = model.version();

        assert_eq!(model.expand(b).await, Ok(ExpandOutcome::Expanded));
        let info = model.node(b).unwrap();
        assert!(!info.is_leaf);
        assert!(info.has_materialized_children);
        assert!(!info.is_expandable());
        assert_eq!(model.visible_items(), vec!["R", "A", "B"]);
        assert_eq!(model.version(), version);
        model.verify().unwrap();
    }

    #[tokio::test]
    async fn test_missing_children_make_a_leaf() {
        let (model, root) = rooted().await;
        model.expand(root).await.unwrap();
        let a = model.node_at(1).unwrap();
        model.expand(a).await.unwrap();
        let a1 = model.node_at(2).unwrap();

        assert_eq!(model.expand(a1).await, Ok(ExpandOutcome::Leaf));
        let info = model.node(a1).unwrap();
        assert!(info.is_leaf);
        assert!(!info.is_expanded);
        assert!(!info.is_expandable());
        assert_eq!(model.visible_count(), 5);
    }

    #[tokio::test]
    async fn test_unknown_node() {
        let (model, root) = rooted().await;
        model.clear();
        assert_eq!(model.expand(root).await, Err(TreeError::NodeNotFound(root)));
        assert_eq!(model.visible_count(), 0);
    }

    #[tokio::test]
    async fn test_toggle() {
        let (model, root) = rooted().await;
        assert_eq!(model.toggle(root).await, Ok(true));
        assert_eq!(model.toggle(root).await, Ok(false));
        assert_eq!(model.visible_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_expands_share_one_resolution() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let resolver = ChildrenResolver::from_async(move |n: u32, _token| {
            counter.fetch_add(1, AtomicOrdering::SeqCst);
            async move {
                tokio::task::yield_now().await;
                Ok(Some(vec![n + 1, n + 2]))
            }
        });
        let model = TreeModel::new(ModelConfig::new(resolver));
        model.set_root(0).await;
        let root = model.roots()[0];

        let (first, second) = tokio::join!(model.expand(root), model.expand(root));
        assert_eq!(first, Ok(ExpandOutcome::Expanded));
        assert!(second.unwrap().is_expanded());
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(model.visible_items(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_collapse_cancels_pending_load() {
        let resolver = ChildrenResolver::from_async(|n: u32, _token| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Some(vec![n + 1]))
        });
        let model = TreeModel::new(ModelConfig::new(resolver));
        model.set_root(0).await;
        let root = model.roots()[0];

        let pending = tokio::spawn({
            let model = model.clone();
            async move { model.expand(root).await }
        });
        tokio::task::yield_now().await;
        assert!(model.node(root).unwrap().is_loading);

        assert_eq!(model.collapse(root), Ok(true));
        assert_eq!(pending.await.unwrap(), Err(TreeError::Cancelled));
        let info = model.node(root).unwrap();
        assert!(!info.is_loading);
        assert!(!info.is_expanded);
        assert_eq!(model.visible_count(), 1);
        model.verify().unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_reload_clears_previous_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let resolver = ChildrenResolver::from_async(move |n: u32, _token| {
            let attempt = counter.fetch_add(1, AtomicOrdering::SeqCst);
            async move {
                if attempt == 0 {
                    Err(ResolveError::new("offline"))
                } else {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(Some(vec![n + 1]))
                }
            }
        });
        let model = TreeModel::new(ModelConfig::new(resolver).with_retry_policy(RetryPolicy::disabled()));
        model.set_root(0).await;
        let root = model.roots()[0];

        assert!(matches!(model.expand(root).await, Ok(ExpandOutcome::LoadFailed(_))));
        assert!(model.node(root).unwrap().load_error.is_some());

        let token = CancellationToken::new();
        let pending = tokio::spawn({
            let model = model.clone();
            let token = token.clone();
            async move { model.expand_with_token(root, &token).await }
        });
        tokio::task::yield_now().await;
        assert!(model.node(root).unwrap().is_loading);

        token.cancel();
        assert_eq!(pending.await.unwrap(), Err(TreeError::Cancelled));
        let info = model.node(root).unwrap();
        assert_eq!(info.load_error, None);
        assert!(!info.is_leaf);
        assert!(!info.is_expanded);
        assert!(!info.is_loading);
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 2);
        assert_eq!(model.visible_count(), 1);
        model.verify().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_load_is_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let resolver = ChildrenResolver::from_async(move |n: u32, _token| {
            let attempt = counter.fetch_add(1, AtomicOrdering::SeqCst);
            async move {
                if attempt == 0 {
                    Err(ResolveError::new("offline"))
                } else {
                    Ok(Some(vec![n + 1]))
                }
            }
        });
        let config = ModelConfig::new(resolver)
            .with_retry_policy(RetryPolicy::new().initial_delay(Duration::from_millis(100)));
        let model = TreeModel::new(config);
        model.set_root(0).await;
        let root = model.roots()[0];

        let outcome = model.expand(root).await.unwrap();
        assert!(matches!(outcome, ExpandOutcome::LoadFailed(_)));
        let info = model.node(root).unwrap();
        assert!(info.is_leaf);
        assert_eq!(info.retry_attempts, 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        let info = model.node(root).unwrap();
        assert!(info.is_expanded);
        assert!(info.load_error.is_none());
        assert_eq!(info.retry_attempts, 0);
        assert_eq!(model.visible_items(), vec![0, 1]);
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_refresh_collapsed_node_forgets_children() {
        let (model, root) = rooted().await;
        model.expand(root).await.unwrap();
        model.collapse(root).unwrap();
        assert_eq!(model.node_count(), 3);

        assert_eq!(model.refresh(root).await, Ok(None));
        assert_eq!(model.node_count(), 1);
        assert!(!model.node(root).unwrap().has_materialized_children);
    }

    #[tokio::test]
    async fn test_sort_reorders_visible_rows() {
        let (model, root) = rooted().await;
        model.expand(root).await.unwrap();

        model.sort(root, |a, b| b.cmp(a), false).unwrap();
        assert_eq!(model.visible_items(), vec!["R", "B", "A"]);
        model.verify().unwrap();
    }

    #[tokio::test]
    async fn test_format_tree() {
        let (model, root) = rooted().await;
        model.expand(root).await.unwrap();
        let output = model.format_tree(TreeFormatOptions::default());
        assert!(output.contains("\"R\""));
        assert!(output.contains("\"A\""));
    }
}
