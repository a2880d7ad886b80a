//! Horizon Arbor - a hierarchical tree model for virtualized tree views.
//!
//! The model holds a tree whose children are resolved lazily, and exposes
//! the rows that are currently visible as a flat list. Every change to that
//! list is reported as a minimal batch of splices plus an index map, so a
//! list view can follow along without rebuilding.
//!
//! # Example
//!
//! ```
//! use horizon_arbor::prelude::*;
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let resolver = ChildrenResolver::from_fn(|path: &String| {
//!     (path.len() < 3).then(|| vec![format!("{path}a"), format!("{path}b")])
//! });
//! let model = TreeModel::new(ModelConfig::new(resolver));
//! model.signals().flattened_changed.connect(|event| {
//!     println!("visible list v{}: {:?}", event.version, event.changes);
//! });
//!
//! model.set_root(String::from("r")).await;
//! let adapter = TreeIndexAdapter::new(model.clone());
//! adapter.toggle(0).await.unwrap();
//! assert_eq!(adapter.count(), 3);
//! assert_eq!(adapter.item_at(2).unwrap(), "rb");
//! # });
//! ```

pub use horizon_arbor_core::*;

pub mod model;
pub mod prelude;

pub use model::{
    ChildrenChange, ChildrenFeed, ChildrenResolver, Comparer, ExpandOutcome, ExpansionKey,
    ExpansionKeyStrategy, ExpansionState, FlattenedChange, FlattenedChangedEvent,
    FlattenedIndexMap, LiveChildren, LoadError, LoadFailure, ModelConfig, NodeId, NodeInfo,
    ResolveError, RetryPolicy, RetryScheduled, SiblingOrder, TreeError, TreeIndexAdapter,
    TreeItem, TreeModel, TreeSignals,
};

/// Keeps a model subscribed to a live child source; dropping it unsubscribes.
pub type Subscription<T> = ConnectionGuard<ChildrenChange<T>>;
