//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use horizon_arbor::{ChildrenResolver, FlattenedChangedEvent, ModelConfig, TreeModel};
use parking_lot::Mutex;

/// Install a test subscriber once; `RUST_LOG` controls verbosity.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// R
/// ├── A
/// │   ├── A1
/// │   └── A2
/// └── B (no children)
pub fn scenario_tree() -> HashMap<&'static str, Vec<&'static str>> {
    HashMap::from([
        ("R", vec!["A", "B"]),
        ("A", vec!["A1", "A2"]),
        ("B", vec![]),
    ])
}

/// A resolver over a fixed child table; unknown items are leaves.
pub fn table_resolver(
    table: HashMap<&'static str, Vec<&'static str>>,
) -> ChildrenResolver<&'static str> {
    ChildrenResolver::from_fn(move |item: &&'static str| table.get(item).cloned())
}

pub fn scenario_model() -> TreeModel<&'static str> {
    TreeModel::new(ModelConfig::new(table_resolver(scenario_tree())))
}

/// Node `n` has children `4n+1 ..= 4n+4`, so every item is unique.
pub fn quaternary_resolver() -> ChildrenResolver<u32> {
    ChildrenResolver::from_fn(|n: &u32| Some((1..=4).map(|k| n * 4 + k).collect()))
}

/// Collects every `flattened_changed` event.
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<FlattenedChangedEvent>>>,
}

impl Recorder {
    pub fn attach<T: horizon_arbor::TreeItem>(model: &TreeModel<T>) -> Self {
        let recorder = Self::default();
        let events = recorder.events.clone();
        model
            .signals()
            .flattened_changed
            .connect(move |event| events.lock().push(event.clone()));
        recorder
    }

    pub fn take(&self) -> Vec<FlattenedChangedEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

/// Counts emissions of a signal carrying `Args`.
pub fn collect<Args: Clone + Send + 'static>(
    signal: &horizon_arbor::Signal<Args>,
) -> Arc<Mutex<Vec<Args>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    signal.connect(move |args: &Args| sink.lock().push(args.clone()));
    seen
}
