//! Signals: typed, multi-subscriber notifications.
//!
//! The tree model publishes flattened-list changes and per-node load events
//! through signals, and live child collections use them to tell the model
//! about inserts, removals and moves.
//!
//! - [`Signal<Args>`] holds the subscribers
//! - [`ConnectionId`] names one subscription
//! - [`ConnectionGuard`] ends a subscription when dropped
//!
//! # Threading
//!
//! Slots run synchronously on the emitting thread. The model is driven from
//! a single logical thread, so producers living on other threads must hop
//! onto that thread before emitting.
//!
//! # Re-entrancy
//!
//! `emit` snapshots the connected slots and releases its lock before invoking
//! them. A slot may therefore connect or disconnect slots (including itself)
//! on the signal that is currently emitting. Slots connected during an
//! emission are first invoked on the next emission.
//!
//! ```
//! use horizon_arbor_core::Signal;
//!
//! let rows_inserted = Signal::<(usize, usize)>::new();
//! let id = rows_inserted.connect(|&(index, count)| {
//!     println!("{count} rows at {index}");
//! });
//! rows_inserted.emit((3, 2));
//! assert!(rows_inserted.disconnect(id));
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use slotmap::{SlotMap, new_key_type};

use crate::error::SignalError;
use crate::logging::targets;

new_key_type! {
    /// Handle for one slot connected to a [`Signal`].
    pub struct ConnectionId;
}

type Slot<Args> = Arc<dyn Fn(&Args) + Send + Sync>;

/// A notification point with any number of connected slots.
///
/// Slots receive `&Args`; use a tuple or struct when an event carries
/// several values.
pub struct Signal<Args> {
    slots: Mutex<SlotMap<ConnectionId, Slot<Args>>>,
    muted: AtomicBool,
}

impl<Args: Clone + Send + 'static> Default for Signal<Args> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Args: Clone + Send + 'static> Signal<Args> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(SlotMap::with_key()),
            muted: AtomicBool::new(false),
        }
    }

    /// Subscribe `slot`; it stays connected until [`Signal::disconnect`].
    pub fn connect<F>(&self, slot: F) -> ConnectionId
    where
        F: Fn(&Args) + Send + Sync + 'static,
    {
        self.slots.lock().insert(Arc::new(slot))
    }

    /// Returns `false` when `id` was not connected.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        self.slots.lock().remove(id).is_some()
    }

    /// Disconnect a slot, reporting an unknown or already removed ID as an error.
    pub fn try_disconnect(&self, id: ConnectionId) -> Result<(), SignalError> {
        if self.disconnect(id) {
            Ok(())
        } else {
            Err(SignalError::InvalidConnection)
        }
    }

    pub fn disconnect_all(&self) {
        self.slots.lock().clear();
    }

    pub fn connection_count(&self) -> usize {
        self.slots.lock().len()
    }

    /// Mute or unmute the signal. Emissions while muted are dropped.
    pub fn set_blocked(&self, blocked: bool) {
        self.muted.store(blocked, Ordering::SeqCst);
    }

    pub fn is_blocked(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    /// Emit the signal, invoking all connected slots in connection order.
    #[tracing::instrument(skip_all, target = "horizon_arbor_core::signal", level = "trace")]
    pub fn emit(&self, args: Args) {
        if self.is_blocked() {
            tracing::trace!(target: targets::SIGNAL, "signal blocked, skipping emit");
            return;
        }

        let slots: Vec<Slot<Args>> = self.slots.lock().values().cloned().collect();
        tracing::trace!(target: targets::SIGNAL, connection_count = slots.len(), "emitting signal");

        for slot in slots {
            slot(&args);
        }
    }
}

impl<Args: Clone + Send + 'static> Signal<Args> {
    /// Like [`Signal::connect`], but the slot is removed when the returned
    /// guard is dropped. The guard holds a weak reference to the signal, so it never keeps the
    /// signal alive and is harmless to drop after the signal is gone.
    pub fn connect_guarded<F>(self: &Arc<Self>, slot: F) -> ConnectionGuard<Args>
    where
        F: Fn(&Args) + Send + Sync + 'static,
    {
        let id = self.connect(slot);
        ConnectionGuard {
            signal: Arc::downgrade(self),
            id,
        }
    }
}

/// Subscription returned by [`Signal::connect_guarded`].
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use horizon_arbor_core::Signal;
///
/// let loaded = Arc::new(Signal::<usize>::new());
/// let total = Arc::new(AtomicUsize::new(0));
/// let sink = total.clone();
/// let guard = loaded.connect_guarded(move |&rows| {
///     sink.fetch_add(rows, Ordering::Relaxed);
/// });
/// loaded.emit(4);
/// drop(guard);
/// loaded.emit(9);
/// assert_eq!(total.load(Ordering::Relaxed), 4);
/// ```
pub struct ConnectionGuard<Args: Clone + Send + 'static> {
    signal: Weak<Signal<Args>>,
    id: ConnectionId,
}

impl<Args: Clone + Send + 'static> ConnectionGuard<Args> {
    /// The underlying connection ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Whether the guarded signal is still alive.
    pub fn is_attached(&self) -> bool {
        self.signal.strong_count() > 0
    }
}

impl<Args: Clone + Send + 'static> std::fmt::Debug for ConnectionGuard<Args> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionGuard")
            .field("id", &self.id)
            .field("attached", &self.is_attached())
            .finish()
    }
}

impl<Args: Clone + Send + 'static> Drop for ConnectionGuard<Args> {
    fn drop(&mut self) {
        if let Some(signal) = self.signal.upgrade() {
            signal.disconnect(self.id);
        }
    }
}

static_assertions::assert_impl_all!(Signal<i32>: Send, Sync);
static_assertions::assert_impl_all!(ConnectionGuard<i32>: Send, Sync);
