//! Integration tests for the RelationshipStore's normalization, mirror and
//! cascade rules.

use cdz_core::{
    EngineError, Grouping, GroupingId, GroupingObserver, NodeId, PrototypeNode,
    RelationshipStore, StreamId,
};

// ─── helpers ─────────────────────────────────────────────────────────────────

const S: StreamId = StreamId(0);

/// Add a node at `[serial]` with its paired grouping.
fn add_pair(store: &mut RelationshipStore, serial: u64) -> (NodeId, GroupingId) {
    let node = NodeId::new(S, serial);
    let grouping = node.paired_grouping();
    store
        .add_node(
            PrototypeNode::new(node, vec![serial as f32], 0),
            Grouping::new(grouping, 0, 100),
        )
        .unwrap();
    (node, grouping)
}

/// Records every grouping the store reports as removed.
#[derive(Default)]
struct Removed(Vec<GroupingId>);

impl GroupingObserver for Removed {
    fn grouping_removed(&mut self, grouping: GroupingId) {
        self.0.push(grouping);
    }
}

fn assert_normalized(store: &RelationshipStore) {
    for node in store.nodes() {
        let rels = store.groupings_of(node.id).unwrap();
        if !rels.is_empty() {
            assert!((rels.weight_sum() - 1.0).abs() <= 0.01, "{} sums to {}", node.id, rels.weight_sum());
        }
    }
    for grouping in store.groupings() {
        let rels = store.nodes_of(grouping.id).unwrap();
        if !rels.is_empty() {
            assert!((rels.weight_sum() - 1.0).abs() <= 0.01, "{} sums to {}", grouping.id, rels.weight_sum());
        }
    }
}

// ─── normalization and mirrors ───────────────────────────────────────────────

#[test]
fn test_weights_stay_normalized_through_mutations() {
    let mut store = RelationshipStore::new();
    let pairs: Vec<_> = (0..4).map(|i| add_pair(&mut store, i)).collect();

    for (step, amount) in [0.3f32, 0.05, 1.7, 0.02, 0.9, 0.4].iter().enumerate() {
        let (node, _) = pairs[step % 4];
        let (_, grouping) = pairs[(step + 1) % 4];
        store
            .adjust_node_to_grouping_strength(node, grouping, *amount, Some(vec![step as f32]))
            .unwrap();
        store.adjust_grouping_to_node_strength(grouping, node, *amount).unwrap();
        assert_normalized(&store);
        store.verify_integrity().unwrap();
    }

    store.delete_node(pairs[1].0).unwrap();
    assert_normalized(&store);
    store.verify_integrity().unwrap();
}

#[test]
fn test_new_edge_is_mirrored() {
    let mut store = RelationshipStore::new();
    let (n0, _) = add_pair(&mut store, 0);
    let (_, g1) = add_pair(&mut store, 1);

    store.adjust_node_to_grouping_strength(n0, g1, 0.5, None).unwrap();
    assert!(store.groupings_of(n0).unwrap().contains(&g1));
    assert!(store.nodes_of(g1).unwrap().contains(&n0));

    let forward: usize = store.nodes().map(|n| store.groupings_of(n.id).unwrap().len()).sum();
    let backward: usize = store.groupings().map(|g| store.nodes_of(g.id).unwrap().len()).sum();
    assert_eq!(forward, 3);
    assert_eq!(forward, backward);
}

#[test]
fn test_duplicate_node_leaves_store_unchanged() {
    let mut store = RelationshipStore::new();
    let (n0, g0) = add_pair(&mut store, 0);
    let before = (store.node_count(), store.grouping_count());

    let err = store
        .add_node(PrototypeNode::new(n0, vec![9.0], 5), Grouping::new(g0, 5, 100))
        .unwrap_err();
    assert!(matches!(err, EngineError::DuplicateEntity { .. }));
    assert_eq!((store.node_count(), store.grouping_count()), before);
    assert_eq!(store.node(n0).unwrap().position, vec![0.0]);
    store.verify_integrity().unwrap();
}

#[test]
fn test_running_mean_of_three_positions() {
    let mut store = RelationshipStore::new();
    let (n0, _) = add_pair(&mut store, 0);
    let (_, g1) = add_pair(&mut store, 1);

    let p = [[1.0f32, -2.0, 4.0], [3.0, 0.0, 4.5], [8.0, 5.0, -1.0]];
    for pos in &p {
        store.adjust_node_to_grouping_strength(n0, g1, 0.1, Some(pos.to_vec())).unwrap();
    }

    let edge = store.groupings_of(n0).unwrap().get(&g1).unwrap();
    let stored = edge.position.as_ref().unwrap();
    for i in 0..3 {
        let mean = (p[0][i] + p[1][i] + p[2][i]) / 3.0;
        assert!((stored[i] - mean).abs() < 1e-5, "dim {}: {} vs {}", i, stored[i], mean);
    }
    assert_eq!(edge.observations, 3);
}

// ─── cascade deletion ────────────────────────────────────────────────────────

#[test]
fn test_forced_grouping_delete_cascades() {
    let mut store = RelationshipStore::new();
    let (n0, g0) = add_pair(&mut store, 0);
    let (n1, _) = add_pair(&mut store, 1);
    let (n2, _) = add_pair(&mut store, 2);
    store.adjust_node_to_grouping_strength(n1, g0, 0.5, None).unwrap();
    store.adjust_node_to_grouping_strength(n2, g0, 0.5, None).unwrap();
    assert_eq!(store.nodes_of(g0).unwrap().len(), 3);

    let mut removed = Removed::default();
    let deleted = store.delete_grouping(g0, true, &mut removed).unwrap();

    assert!(!store.contains_grouping(g0));
    assert_eq!(deleted, vec![n0], "only the single-edged node goes with it");
    assert!(!store.contains_node(n0));
    assert_eq!(store.groupings_of(n1).unwrap().len(), 1);
    assert_eq!(store.groupings_of(n2).unwrap().len(), 1);
    assert_eq!(removed.0, vec![g0]);
    assert_normalized(&store);
    store.verify_integrity().unwrap();
}

#[test]
fn test_unforced_delete_of_empty_grouping() {
    let mut store = RelationshipStore::new();
    let (n0, g0) = add_pair(&mut store, 0);
    store.delete_node(n0).unwrap();

    let mut removed = Removed::default();
    assert!(store.delete_grouping(g0, false, &mut removed).unwrap().is_empty());
    assert_eq!(removed.0, vec![g0]);
    assert!(matches!(
        store.delete_grouping(g0, false, &mut removed),
        Err(EngineError::NotFound { .. })
    ));
}

#[test]
fn test_sweep_removes_only_idle_groupings() {
    let mut store = RelationshipStore::new();
    let (_, g0) = add_pair(&mut store, 0);
    let (n1, g1) = add_pair(&mut store, 1);
    store.grouping_mut(g1).unwrap().excite(1.0, n1, 60);

    let mut removed = Removed::default();
    let report = store.sweep_underutilized(100, &mut removed).unwrap();
    assert_eq!(report.groupings, vec![g0]);
    assert_eq!(report.nodes, vec![NodeId::new(S, 0)]);
    assert!(store.contains_grouping(g1));
    assert_eq!(store.population(S), 1);
    store.verify_integrity().unwrap();
}
