//! Signals emitted by a [`TreeModel`](super::TreeModel).
//!
//! Every signal is emitted after the model's internal state lock has been
//! released, so slots may call back into the model freely.

use std::time::Duration;

use horizon_arbor_core::Signal;

use super::error::LoadError;
use super::flatten::FlattenedChangedEvent;
use super::node::NodeId;

/// A failed child load, or a skipped cyclic child.
#[derive(Debug, Clone)]
pub struct LoadFailure {
    /// The node whose children were being resolved.
    pub node: NodeId,
    pub error: LoadError,
    /// Consecutive failures of this node (0 for a skipped cyclic child).
    pub attempt: u32,
}

/// A retry was scheduled for a node whose load failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryScheduled {
    pub node: NodeId,
    /// The failure count this retry follows.
    pub attempt: u32,
    pub delay: Duration,
}

/// Signals exposed by a tree model.
///
/// Views connect to `flattened_changed` to stay synchronized with the
/// visible list; the remaining signals report node-level transitions.
pub struct TreeSignals {
    // -------------------------------------------------------------------------
    // Visible list
    // -------------------------------------------------------------------------
    /// Emitted once per operation that changed the visible list.
    pub flattened_changed: Signal<FlattenedChangedEvent>,

    /// Emitted after the roots have been replaced.
    pub model_reset: Signal<()>,

    // -------------------------------------------------------------------------
    // Node transitions
    // -------------------------------------------------------------------------
    /// Emitted when a node becomes expanded with its children in place.
    pub expanded: Signal<NodeId>,

    /// Emitted when a node collapses.
    pub collapsed: Signal<NodeId>,

    /// Emitted when a node's children have been resolved and attached.
    pub children_loaded: Signal<NodeId>,

    // -------------------------------------------------------------------------
    // Failures
    // -------------------------------------------------------------------------
    /// Emitted when a load fails or a cyclic child is skipped.
    pub load_failed: Signal<LoadFailure>,

    /// Emitted when an automatic retry has been scheduled.
    pub retry_scheduled: Signal<RetryScheduled>,
}

impl Default for TreeSignals {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeSignals {
    /// Creates a new set of tree signals.
    pub fn new() -> Self {
        Self {
            flattened_changed: Signal::new(),
            model_reset: Signal::new(),
            expanded: Signal::new(),
            collapsed: Signal::new(),
            children_loaded: Signal::new(),
            load_failed: Signal::new(),
            retry_scheduled: Signal::new(),
        }
    }

    /// Block or unblock every signal at once.
    pub fn set_blocked(&self, blocked: bool) {
        self.flattened_changed.set_blocked(blocked);
        self.model_reset.set_blocked(blocked);
        self.expanded.set_blocked(blocked);
        self.collapsed.set_blocked(blocked);
        self.children_loaded.set_blocked(blocked);
        self.load_failed.set_blocked(blocked);
        self.retry_scheduled.set_blocked(blocked);
    }

    pub(crate) fn dispatch(&self, events: Vec<TreeEvent>) {
        for event in events {
            match event {
                TreeEvent::Flattened(event) => self.flattened_changed.emit(event),
                TreeEvent::Reset => self.model_reset.emit(()),
                TreeEvent::Expanded(id) => self.expanded.emit(id),
                TreeEvent::Collapsed(id) => self.collapsed.emit(id),
                TreeEvent::ChildrenLoaded(id) => self.children_loaded.emit(id),
                TreeEvent::LoadFailed(failure) => self.load_failed.emit(failure),
                TreeEvent::RetryScheduled(retry) => self.retry_scheduled.emit(retry),
            }
        }
    }
}

/// A notification queued while the state lock is held.
#[derive(Debug)]
pub(crate) enum TreeEvent {
    Flattened(FlattenedChangedEvent),
    Reset,
    Expanded(NodeId),
    Collapsed(NodeId),
    ChildrenLoaded(NodeId),
    LoadFailed(LoadFailure),
    RetryScheduled(RetryScheduled),
}

static_assertions::assert_impl_all!(TreeSignals: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use parking_lot::Mutex;
    use slotmap::KeyData;

    #[test]
    fn test_dispatch_routes_each_event() {
        let signals = TreeSignals::new();
        let node = NodeId::from(KeyData::from_ffi(1));
        let retries = Arc::new(Mutex::new(Vec::new()));
        let collapsed = Arc::new(Mutex::new(Vec::new()));

        let sink = retries.clone();
        signals.retry_scheduled.connect(move |retry| sink.lock().push(*retry));
        let sink = collapsed.clone();
        signals.collapsed.connect(move |id| sink.lock().push(*id));

        let retry = RetryScheduled {
            node,
            attempt: 2,
            delay: Duration::from_millis(400),
        };
        signals.dispatch(vec![TreeEvent::Collapsed(node), TreeEvent::RetryScheduled(retry)]);

        assert_eq!(*retries.lock(), vec![retry]);
        assert_eq!(*collapsed.lock(), vec![node]);
    }
}
