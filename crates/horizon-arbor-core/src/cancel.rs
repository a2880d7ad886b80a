//! Cooperative cancellation for child resolution.
//!
//! A [`CancellationToken`] is shared between the tree model and whatever
//! future resolves a node's children. Tokens can be linked: cancelling a
//! parent token cancels every child token created from it, which is how a
//! caller-supplied token is tied to the model's per-node load token.
//!
//! # Example
//!
//! ```
//! use horizon_arbor_core::CancellationToken;
//!
//! let caller = CancellationToken::new();
//! let load = caller.child_token();
//!
//! caller.cancel();
//! assert!(load.is_cancelled());
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// A cancellation token supporting polling, async waiting and linking.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    inner: Arc<CancellationState>,
}

#[derive(Debug)]
struct CancellationState {
    cancelled: AtomicBool,
    notify: tokio::sync::Notify,
    children: Mutex<Vec<Weak<CancellationState>>>,
}

impl CancellationState {
    fn new() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            notify: tokio::sync::Notify::new(),
            children: Mutex::new(Vec::new()),
        }
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        self.notify.notify_waiters();

        let children = std::mem::take(&mut *self.children.lock());
        crate::arbor_trace!(children = children.len(), "cancellation requested");
        for child in children {
            if let Some(child) = child.upgrade() {
                child.cancel();
            }
        }
    }
}

impl CancellationToken {
    /// Create a new, uncancelled token.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancellationState::new()),
        }
    }

    /// Create a token that is cancelled whenever this token is cancelled.
    ///
    /// Cancelling the child does not affect the parent. A child created from
    /// an already cancelled token starts out cancelled.
    pub fn child_token(&self) -> CancellationToken {
        let child = CancellationToken::new();
        self.link(&child);
        child
    }

    /// Propagate cancellation of this token to `other`.
    pub fn link(&self, other: &CancellationToken) {
        if self.is_cancelled() {
            other.cancel();
            return;
        }
        let mut children = self.inner.children.lock();
        children.retain(|weak| weak.strong_count() > 0);
        children.push(Arc::downgrade(&other.inner));
        drop(children);

        // Close the race with a concurrent cancel that already drained the list.
        if self.is_cancelled() {
            other.cancel();
        }
    }

    /// Check if cancellation has been requested.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Request cancellation.
    ///
    /// Sets the flag, wakes every waiter and cancels linked child tokens.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Wait asynchronously until cancellation is requested.
    ///
    /// Returns immediately if already cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
            if self.is_cancelled() {
                return;
            }
        }
    }

    /// Whether two handles refer to the same token.
    pub fn same_token(&self, other: &CancellationToken) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

static_assertions::assert_impl_all!(CancellationToken: Send, Sync);
