//! Prelude module for Horizon Arbor.
//!
//! ```ignore
//! use horizon_arbor::prelude::*;
//! ```

// ============================================================================
// Model
// ============================================================================

pub use crate::model::{
    ExpandOutcome, NodeId, NodeInfo, TreeError, TreeIndexAdapter, TreeItem, TreeModel,
};

// ============================================================================
// Children
// ============================================================================

pub use crate::model::{ChildrenChange, ChildrenFeed, ChildrenResolver, LiveChildren, ResolveError};

// ============================================================================
// Configuration
// ============================================================================

pub use crate::model::{ExpansionKeyStrategy, ModelConfig, RetryPolicy};

// ============================================================================
// Notifications
// ============================================================================

pub use crate::model::{FlattenedChange, FlattenedChangedEvent, FlattenedIndexMap, TreeSignals};
pub use horizon_arbor_core::{CancellationToken, Signal};
