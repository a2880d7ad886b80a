//! Logging and debugging facilities for Horizon Arbor.
//!
//! This module provides:
//! - Integration with the `tracing` crate for structured logging
//! - Debug visualization for trees ([`TreeDebug`])
//! - Performance tracing hooks for profiling
//!
//! # Tracing Integration
//!
//! Horizon Arbor uses the `tracing` crate for instrumentation. To see logs,
//! install a tracing subscriber in your application:
//!
//! ```ignore
//! tracing_subscriber::fmt()
//!     .with_env_filter("horizon_arbor::tree=debug")
//!     .init();
//! ```
//!
//! # Debug Visualization
//!
//! Anything implementing [`DebugTreeSource`] can be rendered:
//!
//! ```
//! use horizon_arbor_core::logging::{DebugTreeSource, TreeDebug, TreeFormatOptions};
//!
//! struct Fixed;
//!
//! impl DebugTreeSource for Fixed {
//!     type Id = usize;
//!     fn roots(&self) -> Vec<usize> { vec![0] }
//!     fn children(&self, id: usize) -> Vec<usize> { if id == 0 { vec![1, 2] } else { vec![] } }
//!     fn label(&self, id: usize) -> String { format!("node{id}") }
//! }
//!
//! let output = TreeDebug::with_options(TreeFormatOptions::minimal()).format(&Fixed);
//! assert!(output.contains("node2"));
//! ```

use std::fmt::Write as FmtWrite;

/// Target names for log filtering.
///
/// Use these with `tracing` directives to filter logs by subsystem.
pub mod targets {
    /// Core crate target.
    pub const CORE: &str = "horizon_arbor_core";
    /// Signal/slot system target.
    pub const SIGNAL: &str = "horizon_arbor_core::signal";
    /// Delayed task target.
    pub const TIMER: &str = "horizon_arbor_core::timer";
    /// Tree mutator target.
    pub const TREE: &str = "horizon_arbor::tree";
    /// Flattening engine target.
    pub const FLATTEN: &str = "horizon_arbor::flatten";
    /// Children resolver target.
    pub const RESOLVER: &str = "horizon_arbor::resolver";
    /// Index adapter target.
    pub const ADAPTER: &str = "horizon_arbor::adapter";
    /// Performance spans target.
    pub const PERF: &str = "horizon_arbor::perf";
}

/// Style options for tree visualization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TreeStyle {
    /// ASCII characters for tree branches.
    Ascii,
    /// Unicode box-drawing characters.
    #[default]
    Unicode,
    /// Compact single-line representation.
    Compact,
}

/// Configuration for tree debug output.
#[derive(Debug, Clone)]
pub struct TreeFormatOptions {
    /// The style of tree visualization.
    pub style: TreeStyle,
    /// Whether to show node IDs.
    pub show_ids: bool,
    /// Whether to show per-node state annotations.
    pub show_state: bool,
    /// Maximum depth to traverse (None for unlimited).
    pub max_depth: Option<usize>,
    /// Indent size for each level.
    pub indent_size: usize,
}

impl Default for TreeFormatOptions {
    fn default() -> Self {
        Self {
            style: TreeStyle::default(),
            show_ids: true,
            show_state: true,
            max_depth: None,
            indent_size: 2,
        }
    }
}

impl TreeFormatOptions {
    /// Create options for minimal output.
    pub fn minimal() -> Self {
        Self {
            show_ids: false,
            show_state: false,
            ..Default::default()
        }
    }

    /// Use the given style.
    pub fn with_style(mut self, style: TreeStyle) -> Self {
        self.style = style;
        self
    }

    /// Stop descending below `depth`.
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }
}

/// A tree that can be rendered by [`TreeDebug`].
pub trait DebugTreeSource {
    /// Node handle type.
    type Id: Copy + std::fmt::Debug;

    /// Top-level nodes, in order.
    fn roots(&self) -> Vec<Self::Id>;

    /// Realized children of `id`, in order.
    fn children(&self, id: Self::Id) -> Vec<Self::Id>;

    /// Primary text for `id`.
    fn label(&self, id: Self::Id) -> String;

    /// Short state annotations such as `expanded` or `loading`.
    fn annotations(&self, _id: Self::Id) -> Vec<&'static str> {
        Vec::new()
    }
}

/// Debug utility for visualizing trees.
#[derive(Debug, Clone, Default)]
pub struct TreeDebug {
    options: TreeFormatOptions,
}

impl TreeDebug {
    /// Create a debug visualizer with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a debug visualizer with custom options.
    pub fn with_options(options: TreeFormatOptions) -> Self {
        Self { options }
    }

    /// Format the whole tree.
    ///
    /// Traversal uses an explicit stack, so arbitrarily deep trees are safe.
    pub fn format<S: DebugTreeSource>(&self, source: &S) -> String {
        let mut output = String::new();
        let roots = source.roots();
        if roots.is_empty() {
            output.push_str("(empty)\n");
            return output;
        }

        let mut stack: Vec<(S::Id, usize, bool)> = Vec::new();
        let root_count = roots.len();
        for (i, id) in roots.into_iter().enumerate().rev() {
            stack.push((id, 0, i + 1 == root_count));
        }

        while let Some((id, depth, is_last)) = stack.pop() {
            self.format_line(source, id, depth, is_last, &mut output);

            if self.options.max_depth.is_some_and(|max| depth >= max) {
                continue;
            }
            let children = source.children(id);
            let count = children.len();
            for (i, child) in children.into_iter().enumerate().rev() {
                stack.push((child, depth + 1, i + 1 == count));
            }
        }

        output
    }

    fn format_line<S: DebugTreeSource>(
        &self,
        source: &S,
        id: S::Id,
        depth: usize,
        is_last: bool,
        output: &mut String,
    ) {
        output.push_str(&self.build_prefix(depth, is_last));
        output.push_str(&source.label(id));

        if self.options.show_ids {
            let _ = write!(output, " [{:?}]", id);
        }

        if self.options.show_state {
            let annotations = source.annotations(id);
            if !annotations.is_empty() {
                let _ = write!(output, " ({})", annotations.join(", "));
            }
        }

        output.push('\n');
    }

    /// Build the prefix string for a tree node.
    fn build_prefix(&self, depth: usize, is_last: bool) -> String {
        if depth == 0 {
            return String::new();
        }

        let (branch, corner, last) = match self.options.style {
            TreeStyle::Ascii => ("|", "+--", "`--"),
            TreeStyle::Unicode => ("\u{2502}", "\u{251c}\u{2500}\u{2500}", "\u{2514}\u{2500}\u{2500}"),
            TreeStyle::Compact => ("", "-", "-"),
        };

        let mut prefix = String::new();
        for _ in 0..(depth - 1) {
            prefix.push_str(branch);
            for _ in 0..self.options.indent_size {
                prefix.push(' ');
            }
        }

        prefix.push_str(if is_last { last } else { corner });
        prefix.push(' ');
        prefix
    }
}

/// A guard that keeps a tracing span entered until dropped.
///
/// Useful for tracking the duration of bulk operations.
#[derive(Debug)]
pub struct PerfSpan {
    #[allow(dead_code)]
    span: tracing::span::EnteredSpan,
}

impl PerfSpan {
    /// Create a new performance span.
    pub fn new(name: &'static str) -> Self {
        let span = tracing::info_span!(target: targets::PERF, "perf", operation = name);
        Self {
            span: span.entered(),
        }
    }
}

/// Thin wrappers around the `tracing` macros using the core target.
#[macro_export]
macro_rules! arbor_trace {
    ($($arg:tt)*) => {
        ::tracing::trace!(target: $crate::logging::targets::CORE, $($arg)*)
    };
}

#[macro_export]
macro_rules! arbor_debug {
    ($($arg:tt)*) => {
        ::tracing::debug!(target: $crate::logging::targets::CORE, $($arg)*)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Sample;

    // 0
    // ├── 1
    // │   └── 3
    // └── 2
    impl DebugTreeSource for Sample {
        type Id = usize;

        fn roots(&self) -> Vec<usize> {
            vec![0]
        }

        fn children(&self, id: usize) -> Vec<usize> {
            match id {
                0 => vec![1, 2],
                1 => vec![3],
                _ => vec![],
            }
        }

        fn label(&self, id: usize) -> String {
            format!("n{id}")
        }

        fn annotations(&self, id: usize) -> Vec<&'static str> {
            if id == 0 { vec!["expanded"] } else { vec![] }
        }
    }

    struct Empty;

    impl DebugTreeSource for Empty {
        type Id = usize;
        fn roots(&self) -> Vec<usize> {
            vec![]
        }
        fn children(&self, _id: usize) -> Vec<usize> {
            vec![]
        }
        fn label(&self, _id: usize) -> String {
            String::new()
        }
    }

    #[test]
    fn test_format_empty() {
        assert_eq!(TreeDebug::new().format(&Empty), "(empty)\n");
    }

    #[test]
    fn test_format_order_and_prefixes() {
        let options = TreeFormatOptions::minimal().with_style(TreeStyle::Ascii);
        let output = TreeDebug::with_options(options).format(&Sample);
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines, vec!["n0", "+-- n1", "|  `-- n3", "`-- n2"]);
    }

    #[test]
    fn test_format_state_and_ids() {
        let output = TreeDebug::new().format(&Sample);
        assert!(output.starts_with("n0 [0] (expanded)"));
    }

    #[test]
    fn test_format_max_depth() {
        let options = TreeFormatOptions::minimal().with_max_depth(0);
        let output = TreeDebug::with_options(options).format(&Sample);
        assert_eq!(output, "n0\n");
    }

    #[test]
    fn test_perf_span() {
        let _span = PerfSpan::new("test_operation");
    }
}
