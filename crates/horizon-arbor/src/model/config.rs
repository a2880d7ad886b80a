//! Model configuration.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use super::resolver::ChildrenResolver;

/// Orders two sibling items.
pub type Comparer<T> = Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

/// Picks the comparer for a parent's children, or `None` to keep source order.
pub type ComparerSelector<T> = Arc<dyn Fn(&T) -> Option<Comparer<T>> + Send + Sync>;

/// Declares an item a leaf without resolving it.
pub type LeafPredicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Returns the ancestors of an item, top-level first, excluding the item.
pub type ItemPathSelector<T> = Arc<dyn Fn(&T) -> Vec<T> + Send + Sync>;

/// Derives a custom expansion key from an item.
pub type ExpansionKeyFn<T> = Arc<dyn Fn(&T) -> String + Send + Sync>;

/// How siblings are ordered when children are attached.
///
/// Children bound to a live source always keep the source's order.
pub enum SiblingOrder<T> {
    /// Keep the order the resolver produced.
    Source,
    /// Sort every child list with one comparer.
    Comparer(Comparer<T>),
    /// Choose a comparer per parent.
    PerNode(ComparerSelector<T>),
}

impl<T> Clone for SiblingOrder<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Source => Self::Source,
            Self::Comparer(f) => Self::Comparer(f.clone()),
            Self::PerNode(f) => Self::PerNode(f.clone()),
        }
    }
}

impl<T> SiblingOrder<T> {
    pub(crate) fn comparer_for(&self, parent: &T) -> Option<Comparer<T>> {
        match self {
            Self::Source => None,
            Self::Comparer(f) => Some(f.clone()),
            Self::PerNode(select) => select(parent),
        }
    }
}

/// How nodes are identified in a captured [`ExpansionState`](super::ExpansionState).
pub enum ExpansionKeyStrategy<T> {
    /// The item itself, compared with `PartialEq`.
    ItemIdentity,
    /// Position path from the top level, e.g. `[0, 2, 1]`.
    IndexPath,
    /// A string derived from the item.
    Custom(ExpansionKeyFn<T>),
}

impl<T> Clone for ExpansionKeyStrategy<T> {
    fn clone(&self) -> Self {
        match self {
            Self::ItemIdentity => Self::ItemIdentity,
            Self::IndexPath => Self::IndexPath,
            Self::Custom(f) => Self::Custom(f.clone()),
        }
    }
}

impl<T> std::fmt::Debug for ExpansionKeyStrategy<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ItemIdentity => f.write_str("ItemIdentity"),
            Self::IndexPath => f.write_str("IndexPath"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Automatic retry of failed child loads with exponential backoff.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any retry delay.
    pub max_delay: Duration,
    /// Maximum number of automatic retries. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            max_attempts: Some(3),
        }
    }
}

impl RetryPolicy {
    /// Highest power of two applied to the initial delay.
    pub const MAX_BACKOFF_EXPONENT: u32 = 10;

    /// Failure counts are clamped to this bound.
    pub const ATTEMPT_LIMIT: u32 = 16;

    /// Create a policy with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that never retries automatically.
    pub fn disabled() -> Self {
        Self {
            max_attempts: Some(0),
            ..Self::default()
        }
    }

    /// Set the delay before the first retry.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the maximum delay between retries.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the maximum number of automatic retries.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts.min(Self::ATTEMPT_LIMIT));
        self
    }

    /// Retry forever.
    pub fn unlimited(mut self) -> Self {
        self.max_attempts = None;
        self
    }

    /// Delay before the retry that follows failure number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(Self::MAX_BACKOFF_EXPONENT);
        self.initial_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Whether failure number `attempt` should be followed by a retry.
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt <= max)
    }
}

/// Configuration of a [`TreeModel`](super::TreeModel), supplied once at
/// construction.
///
/// # Example
///
/// ```
/// use horizon_arbor::{ChildrenResolver, ModelConfig, RetryPolicy};
/// use std::time::Duration;
///
/// let config = ModelConfig::new(ChildrenResolver::from_fn(|n: &u32| {
///     (*n < 100).then(|| vec![n * 10 + 1, n * 10 + 2])
/// }))
/// .with_max_depth(4)
/// .with_virtualized_children(true)
/// .with_retry_policy(RetryPolicy::new().max_attempts(2))
/// .with_debounce_window(Duration::from_millis(100));
///
/// assert_eq!(config.max_depth(), Some(4));
/// ```
pub struct ModelConfig<T> {
    pub(crate) resolver: ChildrenResolver<T>,
    pub(crate) leaf_predicate: Option<LeafPredicate<T>>,
    pub(crate) auto_expand_root: bool,
    pub(crate) max_auto_expand_depth: Option<usize>,
    pub(crate) virtualize_children: bool,
    pub(crate) max_depth: Option<usize>,
    pub(crate) sibling_order: SiblingOrder<T>,
    pub(crate) expansion_key: ExpansionKeyStrategy<T>,
    pub(crate) item_path: Option<ItemPathSelector<T>>,
    pub(crate) retry: RetryPolicy,
    pub(crate) debounce_window: Duration,
}

impl<T> ModelConfig<T> {
    /// Default quiet window of the adapter's virtualization guard.
    pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_millis(150);

    /// Create a configuration around a resolver, with defaults elsewhere.
    pub fn new(resolver: ChildrenResolver<T>) -> Self {
        Self {
            resolver,
            leaf_predicate: None,
            auto_expand_root: false,
            max_auto_expand_depth: None,
            virtualize_children: false,
            max_depth: None,
            sibling_order: SiblingOrder::Source,
            expansion_key: ExpansionKeyStrategy::ItemIdentity,
            item_path: None,
            retry: RetryPolicy::default(),
            debounce_window: Self::DEFAULT_DEBOUNCE_WINDOW,
        }
    }

    /// Mark items as leaves without resolving them.
    pub fn with_leaf_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.leaf_predicate = Some(Arc::new(predicate));
        self
    }

    /// Expand roots when they are set.
    ///
    /// With `max_depth` of `Some(d)`, `d` levels starting at each root are
    /// expanded; with `None` only the roots themselves are.
    pub fn with_auto_expand_root(mut self, max_depth: Option<usize>) -> Self {
        self.auto_expand_root = true;
        self.max_auto_expand_depth = max_depth;
        self
    }

    /// Discard realized children when their parent collapses.
    pub fn with_virtualized_children(mut self, enabled: bool) -> Self {
        self.virtualize_children = enabled;
        self
    }

    /// Force nodes at `level >= depth` to be leaves.
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    /// Sort every child list with `comparer`.
    pub fn with_comparer<F>(mut self, comparer: F) -> Self
    where
        F: Fn(&T, &T) -> Ordering + Send + Sync + 'static,
    {
        self.sibling_order = SiblingOrder::Comparer(Arc::new(comparer));
        self
    }

    /// Choose a comparer per parent item.
    pub fn with_comparer_selector<F>(mut self, selector: F) -> Self
    where
        F: Fn(&T) -> Option<Comparer<T>> + Send + Sync + 'static,
    {
        self.sibling_order = SiblingOrder::PerNode(Arc::new(selector));
        self
    }

    /// Identify nodes in expansion state with `strategy`.
    pub fn with_expansion_key(mut self, strategy: ExpansionKeyStrategy<T>) -> Self {
        self.expansion_key = strategy;
        self
    }

    /// Provide the ancestor chain of an item for [`expand_to_item`](super::TreeModel::expand_to_item).
    pub fn with_item_path<F>(mut self, selector: F) -> Self
    where
        F: Fn(&T) -> Vec<T> + Send + Sync + 'static,
    {
        self.item_path = Some(Arc::new(selector));
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn with_debounce_window(mut self, window: Duration) -> Self {
        self.debounce_window = window;
        self
    }

    pub fn resolver(&self) -> &ChildrenResolver<T> {
        &self.resolver
    }

    pub fn max_depth(&self) -> Option<usize> {
        self.max_depth
    }

    pub fn virtualize_children(&self) -> bool {
        self.virtualize_children
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn debounce_window(&self) -> Duration {
        self.debounce_window
    }

    pub fn expansion_key(&self) -> &ExpansionKeyStrategy<T> {
        &self.expansion_key
    }

    /// Whether a node at `level` holding `item` is a leaf before resolution.
    pub(crate) fn is_forced_leaf(&self, item: &T, level: usize) -> bool {
        self.max_depth.is_some_and(|max| level >= max)
            || self.leaf_predicate.as_ref().is_some_and(|is_leaf| is_leaf(item))
    }
}

impl<T> Clone for ModelConfig<T> {
    fn clone(&self) -> Self {
        Self {
            resolver: self.resolver.clone(),
            leaf_predicate: self.leaf_predicate.clone(),
            auto_expand_root: self.auto_expand_root,
            max_auto_expand_depth: self.max_auto_expand_depth,
            virtualize_children: self.virtualize_children,
            max_depth: self.max_depth,
            sibling_order: self.sibling_order.clone(),
            expansion_key: self.expansion_key.clone(),
            item_path: self.item_path.clone(),
            retry: self.retry.clone(),
            debounce_window: self.debounce_window,
        }
    }
}

impl<T> std::fmt::Debug for ModelConfig<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelConfig")
            .field("resolver", &self.resolver)
            .field("auto_expand_root", &self.auto_expand_root)
            .field("max_auto_expand_depth", &self.max_auto_expand_depth)
            .field("virtualize_children", &self.virtualize_children)
            .field("max_depth", &self.max_depth)
            .field("expansion_key", &self.expansion_key)
            .field("retry", &self.retry)
            .field("debounce_window", &self.debounce_window)
            .finish_non_exhaustive()
    }
}
