//! Delayed and debounced tasks.
//!
//! The tree model runs on a single cooperative thread; its timers are tokio
//! tasks spawned onto the current runtime so they interleave with the rest of
//! the model's work instead of running in parallel with it.
//!
//! - [`DelayedTask`] runs a future once after a delay and can be cancelled.
//! - [`Debouncer`] restarts its delay on every trigger and runs only the most
//!   recent action once the window elapses without further triggers.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::AbortHandle;

use crate::error::{Result, TimerError};
use crate::logging::targets;

/// A one-shot task that runs after a delay unless cancelled first.
///
/// Dropping a `DelayedTask` does not cancel it; call [`cancel`](Self::cancel).
#[derive(Debug)]
pub struct DelayedTask {
    abort: AbortHandle,
    delay: Duration,
}

impl DelayedTask {
    /// Spawn `task` onto the current tokio runtime, to run after `delay`.
    ///
    /// Returns [`TimerError::NoRuntime`] if called outside a runtime.
    pub fn spawn<F, Fut>(delay: Duration, task: F) -> Result<Self>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| TimerError::NoRuntime)?;
        let join = handle.spawn(async move {
            tokio::time::sleep(delay).await;
            task().await;
        });
        tracing::trace!(target: targets::TIMER, ?delay, "delayed task scheduled");
        Ok(Self {
            abort: join.abort_handle(),
            delay,
        })
    }

    /// Cancel the task if it has not run yet.
    pub fn cancel(&self) {
        self.abort.abort();
    }

    /// Whether the task has completed or been cancelled.
    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }

    /// The delay this task was scheduled with.
    pub fn delay(&self) -> Duration {
        self.delay
    }
}

/// Coalesces bursts of triggers into a single deferred action.
///
/// Every [`trigger`](Self::trigger) restarts the window. When the window
/// elapses with no further trigger, the action passed to the last trigger
/// runs exactly once.
pub struct Debouncer {
    window: Duration,
    generation: Arc<AtomicU64>,
    task: Mutex<Option<DelayedTask>>,
}

impl Debouncer {
    /// Create a debouncer with the given quiet window.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            generation: Arc::new(AtomicU64::new(0)),
            task: Mutex::new(None),
        }
    }

    /// The quiet window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Restart the window, replacing any pending action with `action`.
    ///
    /// Returns [`TimerError::NoRuntime`] when no runtime is available; the
    /// action is not run in that case and the caller decides what to do.
    pub fn trigger<F>(&self, action: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let armed = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let generation = self.generation.clone();

        let task = DelayedTask::spawn(self.window, move || async move {
            // A newer trigger owns the window.
            if generation.load(Ordering::Acquire) == armed {
                action();
            } else {
                crate::arbor_trace!(armed, "superseded debounce action skipped");
            }
        })?;

        if let Some(previous) = self.task.lock().replace(task) {
            previous.cancel();
        }
        Ok(())
    }

    /// Whether an action is waiting for the window to elapse.
    pub fn is_pending(&self) -> bool {
        self.task.lock().as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Drop the pending action without running it.
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        if let Some(task) = self.task.lock().take() {
            crate::arbor_debug!(window = ?self.window, "debounced action dropped");
            task.cancel();
        }
    }
}

impl std::fmt::Debug for Debouncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debouncer")
            .field("window", &self.window)
            .field("pending", &self.is_pending())
            .finish()
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.cancel();
        }
    }
}
