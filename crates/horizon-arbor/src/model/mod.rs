//! The hierarchical tree model.
//!
//! A tree of items whose children are resolved on demand is presented to
//! views as a flat, index-addressed list of the rows currently visible.
//!
//! # Core Types
//!
//! - `TreeModel`: Owns the tree and the visible list; all mutation goes here
//! - `ChildrenResolver`: Produces a node's children (sync, async, stream or live)
//! - `ModelConfig`: Leaf rules, ordering, retries and virtualization
//! - `TreeSignals`: Change notifications, including `FlattenedChangedEvent`
//! - `TreeIndexAdapter`: Index-based access and row commands for list views
//!
//! # Architecture Overview
//!
//! ```text
//! ┌──────────────────┐  resolve  ┌──────────────────┐
//! │ ChildrenResolver │<──────────│    TreeModel     │
//! └──────────────────┘           │ nodes + visible  │
//!          │ live changes        │      list        │
//!          └────────────────────>│                  │
//!                                └──────────────────┘
//!                                   │           ^
//!               flattened_changed   │           │ toggle(index)
//!                                   v           │
//!                                ┌──────────────────┐
//!                                │ TreeIndexAdapter │
//!                                └──────────────────┘
//! ```
//!
//! Nodes live in an arena and are addressed by [`NodeId`]. Each node caches
//! how many visible rows sit below it, which lets every mutation splice only
//! the affected range of the visible list.

mod adapter;
mod config;
mod error;
mod expansion;
mod flatten;
mod index_map;
mod live;
mod node;
mod resolver;
mod signals;
mod state;
mod tree;

pub use adapter::TreeIndexAdapter;
pub use config::{
    Comparer, ComparerSelector, ExpansionKeyFn, ExpansionKeyStrategy, ItemPathSelector,
    LeafPredicate, ModelConfig, RetryPolicy, SiblingOrder,
};
pub use error::{LoadError, ResolveError, Result, TreeError};
pub use expansion::{ExpansionKey, ExpansionState};
pub use flatten::{FlattenedChange, FlattenedChangedEvent};
pub use index_map::FlattenedIndexMap;
pub use live::{ChildrenChange, ChildrenFeed, LiveChildren};
pub use node::{NodeId, NodeInfo};
pub use resolver::{ChildrenResolver, ResolverKind};
pub use signals::{LoadFailure, RetryScheduled, TreeSignals};
pub use tree::{ExpandOutcome, TreeItem, TreeModel};
