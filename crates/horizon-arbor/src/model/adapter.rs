//! Index-based access for list views.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use horizon_arbor_core::Debouncer;
use horizon_arbor_core::logging::targets;

use super::error::{Result, TreeError};
use super::node::NodeId;
use super::tree::{ExpandOutcome, TreeItem, TreeModel};

/// Presents a [`TreeModel`] as a flat, index-addressed list.
///
/// Row commands go through a debounce guard: while the user is toggling
/// rows in quick succession, collapsed nodes keep their children so that
/// re-expanding them is cheap. Once the window passes without another
/// command, and no command is still waiting on a load, the deferred cleanup
/// runs.
pub struct TreeIndexAdapter<T: TreeItem> {
    model: TreeModel<T>,
    guard: Debouncer,
    in_flight: AtomicUsize,
}

impl<T: TreeItem> TreeIndexAdapter<T> {
    /// Wrap `model`, using its configured debounce window.
    pub fn new(model: TreeModel<T>) -> Self {
        let window = model.config().debounce_window();
        Self::with_window(model, window)
    }

    pub fn with_window(model: TreeModel<T>, window: Duration) -> Self {
        Self {
            model,
            guard: Debouncer::new(window),
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn model(&self) -> &TreeModel<T> {
        &self.model
    }

    /// Number of visible rows.
    pub fn count(&self) -> usize {
        self.model.visible_count()
    }

    fn checked(&self, index: usize) -> Result<NodeId> {
        self.model.node_at(index).ok_or_else(|| TreeError::IndexOutOfRange {
            index,
            count: self.model.visible_count(),
        })
    }

    pub fn node_at(&self, index: usize) -> Result<NodeId> {
        self.checked(index)
    }

    pub fn item_at(&self, index: usize) -> Result<T> {
        let id = self.checked(index)?;
        self.model.item(id).ok_or(TreeError::NodeNotFound(id))
    }

    /// Depth of the row at `index` (0 for top-level rows).
    pub fn level_at(&self, index: usize) -> Result<usize> {
        let id = self.checked(index)?;
        self.model
            .node(id)
            .map(|info| info.level)
            .ok_or(TreeError::NodeNotFound(id))
    }

    /// Whether the row at `index` should show an expander.
    pub fn is_expandable(&self, index: usize) -> Result<bool> {
        let id = self.checked(index)?;
        self.model
            .node(id)
            .map(|info| info.is_expandable())
            .ok_or(TreeError::NodeNotFound(id))
    }

    pub fn is_expanded(&self, index: usize) -> Result<bool> {
        let id = self.checked(index)?;
        self.model
            .node(id)
            .map(|info| info.is_expanded)
            .ok_or(TreeError::NodeNotFound(id))
    }

    pub fn index_of_node(&self, id: NodeId) -> Option<usize> {
        self.model.index_of(id)
    }

    pub fn index_of_item(&self, item: &T) -> Option<usize> {
        self.model.index_of_item(item)
    }

    /// Toggle the row at `index`. Returns whether it ended up expanded.
    pub async fn toggle(&self, index: usize) -> Result<bool> {
        let id = self.checked(index)?;
        let _command = self.begin_command();
        self.model.toggle(id).await
    }

    pub async fn expand(&self, index: usize) -> Result<ExpandOutcome> {
        let id = self.checked(index)?;
        let _command = self.begin_command();
        self.model.expand(id).await
    }

    pub fn collapse(&self, index: usize) -> Result<bool> {
        let id = self.checked(index)?;
        let _command = self.begin_command();
        self.model.collapse(id)
    }

    /// Whether a burst of row commands is still in progress.
    pub fn is_guard_active(&self) -> bool {
        self.model.is_guard_open()
    }

    /// End the current burst now and run the deferred cleanup.
    pub fn flush(&self) -> usize {
        self.guard.cancel();
        self.model.close_guard()
    }

    /// Stop the quiet window for the duration of a command.
    fn begin_command(&self) -> CommandScope<'_, T> {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        self.guard.cancel();
        self.model.open_guard();
        CommandScope { adapter: self }
    }

    /// Restart the quiet window once the last running command is done.
    fn end_command(&self) {
        if self.in_flight.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        self.arm_guard();
        // A command that started meanwhile owns the window again.
        if self.in_flight.load(Ordering::Acquire) > 0 {
            self.guard.cancel();
        }
    }

    /// Restart the quiet window; without a timer the cleanup runs now.
    fn arm_guard(&self) {
        let model = self.model.clone();
        if let Err(error) = self.guard.trigger(move || {
            model.close_guard();
        }) {
            tracing::debug!(target: targets::ADAPTER, %error, "no timer for the guard; cleaning up now");
            self.model.close_guard();
        }
    }
}

/// Ends a row command when dropped, including when its future is dropped
/// before completion.
struct CommandScope<'a, T: TreeItem> {
    adapter: &'a TreeIndexAdapter<T>,
}

impl<T: TreeItem> Drop for CommandScope<'_, T> {
    fn drop(&mut self) {
        self.adapter.end_command();
    }
}

impl<T: TreeItem> Drop for TreeIndexAdapter<T> {
    fn drop(&mut self) {
        self.guard.cancel();
        if self.model.is_guard_open() {
            self.model.close_guard();
        }
    }
}

impl<T: TreeItem> std::fmt::Debug for TreeIndexAdapter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeIndexAdapter")
            .field("count", &self.count())
            .field("guard_window", &self.guard.window())
            .field("guard_active", &self.is_guard_active())
            .finish()
    }
}
