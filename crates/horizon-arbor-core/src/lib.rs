//! Core systems for Horizon Arbor.
//!
//! This crate provides the runtime pieces the hierarchical tree model is
//! built on:
//!
//! - **Signal/Slot System**: Type-safe change notification ([`Signal`])
//! - **Cancellation**: Linked cancellation tokens for child resolution
//! - **Timers**: Cancellable delayed tasks and a debouncer
//! - **Logging**: Tracing targets, perf spans and a tree debug formatter
//!
//! # Signal/Slot Example
//!
//! ```
//! use horizon_arbor_core::Signal;
//!
//! let value_changed = Signal::<i32>::new();
//!
//! let conn_id = value_changed.connect(|value| {
//!     println!("Value changed to: {}", value);
//! });
//!
//! value_changed.emit(42);
//! value_changed.disconnect(conn_id);
//! ```

pub mod cancel;
mod error;
pub mod logging;
pub mod signal;
pub mod timer;

pub use cancel::CancellationToken;
pub use error::{Result, SignalError, TimerError};
pub use logging::{DebugTreeSource, PerfSpan, TreeDebug, TreeFormatOptions, TreeStyle};
pub use signal::{ConnectionGuard, ConnectionId, Signal};
pub use timer::{DelayedTask, Debouncer};
