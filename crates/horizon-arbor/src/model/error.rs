//! Error types for the hierarchical model.

use std::fmt;
use std::sync::Arc;

use super::node::NodeId;

/// Result type alias for tree model operations.
pub type Result<T> = std::result::Result<T, TreeError>;

/// Errors returned by public tree model operations.
///
/// Load failures are not errors of the operation: they are recorded on the
/// node and reported through [`TreeSignals::load_failed`](super::TreeSignals).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    /// The node handle is stale or was never issued by this model.
    #[error("node {0:?} does not exist")]
    NodeNotFound(NodeId),

    /// A visible-list index is past the end of the list.
    #[error("index {index} is out of range for {count} visible rows")]
    IndexOutOfRange { index: usize, count: usize },

    /// Child resolution was cancelled before it completed.
    #[error("child resolution was cancelled")]
    Cancelled,

    /// The node's children are ordered by a live source and cannot be sorted.
    #[error("children of node {0:?} are ordered by their live source")]
    LiveOrder(NodeId),

    /// The requested item is not reachable in the tree.
    #[error("item not found in the tree")]
    ItemNotFound,
}

/// An error produced by a children resolver.
///
/// Cheap to clone so that coalesced loads can hand the same failure to every
/// waiter.
#[derive(Clone)]
pub struct ResolveError {
    message: String,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl ResolveError {
    /// Create an error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap an underlying error.
    pub fn from_error<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            message: error.to_string(),
            source: Some(Arc::new(error)),
        }
    }

    /// The error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Debug for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolveError")
            .field("message", &self.message)
            .field("has_source", &self.source.is_some())
            .finish()
    }
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ResolveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<&str> for ResolveError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Errors compare by message; the wrapped source is ignored.
impl PartialEq for ResolveError {
    fn eq(&self, other: &Self) -> bool {
        self.message == other.message
    }
}

impl Eq for ResolveError {}

impl From<String> for ResolveError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// Why a node's children could not be loaded (or a single child attached).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    /// The resolver reported a failure.
    #[error("children resolution failed: {0}")]
    Resolver(#[from] ResolveError),

    /// A resolved child equals one of its would-be ancestors.
    #[error("child at level {level} repeats one of its ancestors")]
    Cycle { level: usize },

    /// The load was cancelled (collapse, refresh or caller token).
    #[error("child resolution was cancelled")]
    Cancelled,
}

impl LoadError {
    /// Whether this is a cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether this reports a skipped cyclic child.
    pub fn is_cycle(&self) -> bool {
        matches!(self, Self::Cycle { .. })
    }
}
