//! End-to-end behavior of the tree model.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::{Recorder, collect, init_tracing, quaternary_resolver, scenario_model, table_resolver};
use horizon_arbor::{
    ChildrenResolver, ExpandOutcome, ExpansionKeyStrategy, FlattenedChange, LoadError,
    ModelConfig, ResolveError, RetryPolicy, TreeError, TreeModel,
};
use pretty_assertions::assert_eq;

#[tokio::test]
async fn test_expand_collapse_scenario() {
    init_tracing();
    let model = scenario_model();
    model.set_root("R").await;
    let recorder = Recorder::attach(&model);
    let root = model.roots()[0];

    model.expand(root).await.unwrap();
    assert_eq!(model.visible_items(), vec!["R", "A", "B"]);

    let a = model.find_node(&"A").unwrap();
    model.expand(a).await.unwrap();
    assert_eq!(model.visible_items(), vec!["R", "A", "A1", "A2", "B"]);

    model.collapse(root).unwrap();
    assert_eq!(model.visible_items(), vec!["R"]);
    model.verify().unwrap();

    let changes: Vec<Vec<FlattenedChange>> =
        recorder.take().into_iter().map(|event| event.changes).collect();
    assert_eq!(
        changes,
        vec![
            vec![FlattenedChange::insert(1, 2)],
            vec![FlattenedChange::insert(2, 2)],
            vec![FlattenedChange::remove(1, 4)],
        ]
    );
}

#[tokio::test]
async fn test_versions_increase_once_per_batch() {
    let model = scenario_model();
    model.set_root("R").await;
    let recorder = Recorder::attach(&model);
    let root = model.roots()[0];
    let start = model.version();

    model.expand(root).await.unwrap();
    model.expand(root).await.unwrap();
    model.collapse(root).unwrap();

    let versions: Vec<u64> = recorder.take().iter().map(|event| event.version).collect();
    assert_eq!(versions, vec![start + 1, start + 2]);
}

#[tokio::test]
async fn test_expand_twice_matches_once() {
    let model = scenario_model();
    model.set_root("R").await;
    let root = model.roots()[0];

    model.expand(root).await.unwrap();
    let once = model.visible_nodes();
    assert_eq!(model.expand(root).await, Ok(ExpandOutcome::AlreadyExpanded));
    assert_eq!(model.visible_nodes(), once);
}

#[tokio::test]
async fn test_round_trip_restores_subtree() {
    let model = scenario_model();
    model.set_root("R").await;
    let root = model.roots()[0];
    model.expand(root).await.unwrap();
    let a = model.find_node(&"A").unwrap();
    model.expand(a).await.unwrap();
    let before = model.visible_items();

    model.collapse(root).unwrap();
    model.expand(root).await.unwrap();
    assert_eq!(model.visible_items(), before);
    model.verify().unwrap();
}

#[tokio::test]
async fn test_virtualized_round_trip_reloads_children() {
    let config = ModelConfig::new(table_resolver(common::scenario_tree()))
        .with_virtualized_children(true);
    let model = TreeModel::new(config);
    model.set_root("R").await;
    let root = model.roots()[0];
    model.expand(root).await.unwrap();
    let a = model.find_node(&"A").unwrap();
    model.expand(a).await.unwrap();
    assert_eq!(model.node_count(), 5);

    model.collapse(root).unwrap();
    assert_eq!(model.node_count(), 1);
    assert!(model.node(a).is_none());

    model.expand(root).await.unwrap();
    assert_eq!(model.visible_items(), vec!["R", "A", "B"]);
    model.verify().unwrap();
}

#[tokio::test]
async fn test_cyclic_child_is_skipped_once() {
    let table = HashMap::from([
        ("R", vec!["A"]),
        ("A", vec!["X"]),
        ("X", vec!["Y", "A", "Z"]),
    ]);
    let model = TreeModel::new(ModelConfig::new(table_resolver(table)));
    let failures = collect(&model.signals().load_failed);
    model.set_root("R").await;
    let root = model.roots()[0];

    assert_eq!(model.expand_all(root, None).await, Ok(3));
    let x = model.find_node(&"X").unwrap();
    let children: Vec<_> = model
        .children(x)
        .into_iter()
        .filter_map(|id| model.item(id))
        .collect();
    assert_eq!(children, vec!["Y", "Z"]);

    let failures = failures.lock().clone();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].node, x);
    assert_eq!(failures[0].error, LoadError::Cycle { level: 3 });
    assert_eq!(model.visible_items(), vec!["R", "A", "X", "Y", "Z"]);
    model.verify().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_retry_until_loaded() {
    init_tracing();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let resolver = ChildrenResolver::from_async(move |n: u32, _token| {
        let attempt = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            if attempt < 2 {
                Err(ResolveError::new(format!("attempt {attempt} failed")))
            } else {
                Ok(Some(vec![n + 1, n + 2]))
            }
        }
    });
    let config = ModelConfig::new(resolver)
        .with_retry_policy(RetryPolicy::new().initial_delay(Duration::from_millis(100)));
    let model = TreeModel::new(config);
    let scheduled = collect(&model.signals().retry_scheduled);
    let loaded = collect(&model.signals().children_loaded);
    model.set_root(0).await;
    let root = model.roots()[0];

    let outcome = model.expand(root).await.unwrap();
    assert!(matches!(outcome, ExpandOutcome::LoadFailed(LoadError::Resolver(_))));
    assert!(model.node(root).unwrap().is_leaf);

    tokio::time::sleep(Duration::from_secs(1)).await;

    let info = model.node(root).unwrap();
    assert!(!info.is_leaf);
    assert!(info.has_materialized_children);
    assert!(info.load_error.is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let scheduled = scheduled.lock().clone();
    let attempts: Vec<(u32, Duration)> = scheduled.iter().map(|r| (r.attempt, r.delay)).collect();
    assert_eq!(
        attempts,
        vec![
            (1, Duration::from_millis(100)),
            (2, Duration::from_millis(200)),
        ]
    );
    assert_eq!(loaded.lock().clone(), vec![root]);
    assert_eq!(model.visible_items(), vec![0, 1, 2]);
}

#[tokio::test(start_paused = true)]
async fn test_retries_stop_at_max_attempts() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let resolver = ChildrenResolver::from_async(move |_n: u32, _token| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Err::<Option<Vec<u32>>, _>(ResolveError::new("down")) }
    });
    let config = ModelConfig::new(resolver).with_retry_policy(
        RetryPolicy::new()
            .initial_delay(Duration::from_millis(10))
            .max_attempts(2),
    );
    let model = TreeModel::new(config);
    model.set_root(0).await;
    let root = model.roots()[0];

    model.expand(root).await.unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;

    // The first failure plus two automatic retries.
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(model.node(root).unwrap().retry_attempts, 3);

    // A manual expand still retries.
    model.expand(root).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_disabled_retry_policy_schedules_nothing() {
    let resolver = ChildrenResolver::from_async(|_n: u32, _token| async {
        Err::<Option<Vec<u32>>, _>(ResolveError::new("never"))
    });
    let config = ModelConfig::new(resolver).with_retry_policy(RetryPolicy::disabled());
    let model = TreeModel::new(config);
    let scheduled = collect(&model.signals().retry_scheduled);
    model.set_root(0).await;
    let root = model.roots()[0];

    model.expand(root).await.unwrap();
    assert!(scheduled.lock().is_empty());
    assert_eq!(model.node(root).unwrap().retry_attempts, 1);
}

#[tokio::test]
async fn test_refresh_replaces_visible_subtree_in_one_change() {
    let generation = Arc::new(AtomicUsize::new(0));
    let source = generation.clone();
    let resolver = ChildrenResolver::from_fn(move |n: &u32| {
        let offset = source.load(Ordering::SeqCst) as u32 * 100;
        (*n == 0).then(|| vec![offset + 1, offset + 2, offset + 3])
    });
    let model = TreeModel::new(ModelConfig::new(resolver));
    model.set_root(0).await;
    let root = model.roots()[0];
    model.expand(root).await.unwrap();
    let recorder = Recorder::attach(&model);

    generation.store(1, Ordering::SeqCst);
    assert_eq!(model.refresh(root).await, Ok(Some(ExpandOutcome::Expanded)));
    assert_eq!(model.visible_items(), vec![0, 101, 102, 103]);

    let events = recorder.take();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].changes, vec![FlattenedChange::replace(1, 3, 3)]);
    assert_eq!(events[0].index_map.map_old_index_to_new(0), Some(0));
    assert_eq!(events[0].index_map.map_old_index_to_new(2), None);
    model.verify().unwrap();
}

#[tokio::test]
async fn test_sort_maps_every_moved_row() {
    let model = TreeModel::new(ModelConfig::new(quaternary_resolver()).with_max_depth(2));
    model.set_root(0).await;
    let root = model.roots()[0];
    model.expand(root).await.unwrap();
    let first = model.find_node(&1).unwrap();
    model.expand(first).await.unwrap();
    // 0, 1, 5, 6, 7, 8, 2, 3, 4
    let before = model.visible_nodes();
    let recorder = Recorder::attach(&model);

    model.sort(root, |a, b| b.cmp(a), true).unwrap();
    assert_eq!(model.visible_items(), vec![0, 4, 3, 2, 1, 8, 7, 6, 5]);

    let events = recorder.take();
    assert_eq!(events.len(), 1);
    let after = model.visible_nodes();
    for (old, id) in before.iter().enumerate() {
        let new = events[0].index_map.map_old_index_to_new(old).unwrap();
        assert_eq!(after[new], *id);
    }
    model.verify().unwrap();
}

#[tokio::test]
async fn test_configured_comparer_orders_children() {
    let config = ModelConfig::new(table_resolver(common::scenario_tree()))
        .with_comparer(|a: &&str, b: &&str| b.cmp(a));
    let model = TreeModel::new(config);
    model.set_root("R").await;
    model.expand_all(model.roots()[0], None).await.unwrap();
    assert_eq!(model.visible_items(), vec!["R", "B", "A", "A2", "A1"]);
}

#[tokio::test]
async fn test_depth_limit_and_leaf_predicate() {
    let config = ModelConfig::new(quaternary_resolver())
        .with_max_depth(2)
        .with_leaf_predicate(|n: &u32| n % 2 == 0);
    let model = TreeModel::new(config);
    model.set_root(0).await;
    let root = model.roots()[0];

    assert_eq!(model.expand(root).await, Ok(ExpandOutcome::Leaf));

    model.set_root(1).await;
    let root = model.roots()[0];
    model.expand_all(root, None).await.unwrap();
    // 1 -> 5..=8; odd children expand to depth 2, which is forced leaf.
    assert_eq!(
        model.visible_items(),
        vec![1, 5, 21, 22, 23, 24, 6, 7, 29, 30, 31, 32, 8]
    );
    let deepest = model.find_node(&21).unwrap();
    assert!(!model.node(deepest).unwrap().is_expandable());
    model.verify().unwrap();
}

#[tokio::test]
async fn test_expand_all_and_collapse_all_depths() {
    let model = TreeModel::new(ModelConfig::new(quaternary_resolver()).with_max_depth(3));
    model.set_root(0).await;
    let root = model.roots()[0];

    assert_eq!(model.expand_all(root, Some(1)).await, Ok(1));
    assert_eq!(model.visible_count(), 5);

    assert_eq!(model.expand_all(root, Some(2)).await, Ok(4));
    assert_eq!(model.visible_count(), 1 + 4 + 16);

    assert_eq!(model.collapse_all(root, 1), Ok(4));
    assert_eq!(model.visible_count(), 5);
    assert!(model.node(root).unwrap().is_expanded);

    assert_eq!(model.collapse_all(root, 0), Ok(1));
    assert_eq!(model.visible_count(), 1);
    model.verify().unwrap();
}

#[tokio::test]
async fn test_collapse_all_clears_hidden_descendants() {
    let model = TreeModel::new(ModelConfig::new(quaternary_resolver()).with_max_depth(2));
    model.set_root(0).await;
    let root = model.roots()[0];
    model.expand_all(root, None).await.unwrap();

    assert_eq!(model.collapse_all(root, 0), Ok(1 + 4));
    let child = model.find_node(&1).unwrap();
    assert!(!model.node(child).unwrap().is_expanded);

    // Re-expanding shows only the first level again.
    model.expand(root).await.unwrap();
    assert_eq!(model.visible_items(), vec![0, 1, 2, 3, 4]);
    model.verify().unwrap();
}

#[tokio::test]
async fn test_auto_expand_root() {
    let config = ModelConfig::new(quaternary_resolver())
        .with_max_depth(4)
        .with_auto_expand_root(Some(2));
    let model = TreeModel::new(config);
    model.set_roots(vec![0]).await;
    assert_eq!(model.visible_count(), 1 + 4 + 16);

    let config = ModelConfig::new(table_resolver(common::scenario_tree())).with_auto_expand_root(None);
    let model = TreeModel::new(config);
    model.set_root("R").await;
    assert_eq!(model.visible_items(), vec!["R", "A", "B"]);
}

#[tokio::test]
async fn test_set_roots_resets_model() {
    let model = scenario_model();
    let resets = collect(&model.signals().model_reset);
    model.set_roots(vec!["R", "B"]).await;
    let root = model.roots()[0];
    model.expand(root).await.unwrap();
    assert_eq!(model.visible_count(), 4);

    model.set_roots(vec!["A"]).await;
    assert_eq!(model.visible_items(), vec!["A"]);
    assert_eq!(model.node_count(), 1);
    assert_eq!(resets.lock().len(), 2);
    assert_eq!(model.expand(root).await, Err(TreeError::NodeNotFound(root)));
}

#[tokio::test]
async fn test_expansion_state_survives_rebuild() {
    for strategy in [
        ExpansionKeyStrategy::ItemIdentity,
        ExpansionKeyStrategy::IndexPath,
        ExpansionKeyStrategy::Custom(Arc::new(|n: &u32| format!("node-{n}"))),
    ] {
        let config = ModelConfig::new(quaternary_resolver())
            .with_max_depth(3)
            .with_expansion_key(strategy);
        let model = TreeModel::new(config);
        model.set_root(0).await;
        let root = model.roots()[0];
        model.expand(root).await.unwrap();
        model.expand(model.find_node(&2).unwrap()).await.unwrap();
        model.expand(model.find_node(&10).unwrap()).await.unwrap();
        let before = model.visible_items();

        let state = model.expansion_state();
        assert_eq!(state.len(), 3);

        model.set_root(0).await;
        assert_eq!(model.restore_expansion(&state).await, 3);
        assert_eq!(model.visible_items(), before);
        model.verify().unwrap();
    }
}

#[tokio::test]
async fn test_expand_to_item_with_path_selector() {
    // Parent of n is (n - 1) / 4.
    let config = ModelConfig::new(quaternary_resolver()).with_item_path(|n: &u32| {
        let mut path = Vec::new();
        let mut current = *n;
        while current > 0 {
            current = (current - 1) / 4;
            path.push(current);
        }
        path.reverse();
        path
    });
    let model = TreeModel::new(config);
    model.set_root(0).await;

    let id = model.expand_to_item(&27).await.unwrap();
    assert_eq!(model.item(id), Some(27));
    // 27 -> 6 -> 1 -> 0
    assert!(model.index_of(id).is_some());
    assert_eq!(model.visible_count(), 1 + 4 + 4 + 4);

    model.set_root(5).await;
    assert_eq!(model.expand_to_item(&27).await, Err(TreeError::ItemNotFound));
}

#[tokio::test]
async fn test_expand_to_item_searches_materialized_nodes() {
    let model = scenario_model();
    model.set_root("R").await;
    let root = model.roots()[0];
    assert_eq!(model.expand_to_item(&"A1").await, Err(TreeError::ItemNotFound));

    model.expand_all(root, None).await.unwrap();
    model.collapse(root).unwrap();
    let id = model.expand_to_item(&"A1").await.unwrap();
    assert_eq!(model.index_of(id), Some(2));
}

#[tokio::test]
async fn test_caller_token_cancels_started_load() {
    let resolver = ChildrenResolver::from_async(|n: u32, _token| async move {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(Some(vec![n + 1]))
    });
    let model = TreeModel::new(ModelConfig::new(resolver));
    model.set_root(0).await;
    let root = model.roots()[0];
    let token = horizon_arbor::CancellationToken::new();

    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::task::yield_now().await;
        canceller.cancel();
    });
    assert_eq!(
        model.expand_with_token(root, &token).await,
        Err(TreeError::Cancelled)
    );

    let info = model.node(root).unwrap();
    assert!(!info.is_loading);
    assert!(!info.is_expanded);
    assert!(info.load_error.is_none());
    assert_eq!(info.retry_attempts, 0);
}

#[tokio::test]
async fn test_stream_resolver_collects_items() {
    let resolver = ChildrenResolver::from_stream(|n: u32, _token| {
        (n < 3).then(|| futures_util::stream::iter((1..=3).map(move |k| Ok(n * 10 + k))))
    });
    let model = TreeModel::new(ModelConfig::new(resolver));
    model.set_root(1).await;
    model.expand(model.roots()[0]).await.unwrap();
    assert_eq!(model.visible_items(), vec![1, 11, 12, 13]);
}
