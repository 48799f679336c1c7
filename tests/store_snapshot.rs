//! Store snapshot round-trip integration tests.
//!
//! Verifies that a live engine can be captured as a StoreSnapshot, serialised
//! to JSON, deserialised back, and resumed with the same nodes, groupings,
//! edges and id allocation.

#[cfg(feature = "serde")]
mod tests {
    use cdz_core::{Engine, EngineConfig, EngineError, StoreSnapshot, STORE_SNAPSHOT_VERSION};

    // ── Helpers ──────────────────────────────────────────────────────────────

    fn config() -> EngineConfig {
        EngineConfig { initial_nodes: 2, approximate_search: false, ..EngineConfig::default() }
    }

    /// Two streams fed three coincident samples. The last pairs vision's first
    /// cluster with audio's second, so feedback adds a cross-grouping edge.
    fn make_engine() -> Engine {
        let mut engine = Engine::new(config()).unwrap();
        let vision = engine.add_stream("vision").unwrap();
        let audio = engine.add_stream("audio").unwrap();
        let samples = [
            ([0.0f32, 0.0], [1.0f32, 0.0, 0.0]),
            ([5.0, 5.0], [0.0, 1.0, 0.0]),
            ([0.2, 0.1], [0.1, 0.9, 0.0]),
        ];
        for (v, a) in &samples {
            engine.receive_sensory_input(vision, v, true).unwrap();
            engine.receive_sensory_input(audio, a, true).unwrap();
            engine.advance().unwrap();
        }
        engine
    }

    // ── Round trip ───────────────────────────────────────────────────────────

    #[test]
    fn test_json_round_trip_preserves_store() {
        let engine = make_engine();
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.version, STORE_SNAPSHOT_VERSION);
        assert_eq!(snapshot.node_count(), 4);
        assert!(snapshot.node_edges.len() > snapshot.nodes.len(), "feedback added edges");

        let json = serde_json::to_string(&snapshot).unwrap();
        let decoded: StoreSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, snapshot);

        let restored = Engine::from_snapshot(config(), decoded).unwrap();
        assert_eq!(restored.snapshot(), snapshot);
        assert_eq!(restored.timestep(), engine.timestep());
        assert_eq!(restored.stream_id("audio"), engine.stream_id("audio"));
        assert!(restored.correlation().is_empty(), "correlations are relearned");
        restored.verify_integrity().unwrap();
    }

    #[test]
    fn test_restored_engine_keeps_allocating_fresh_ids() {
        let engine = make_engine();
        let mut restored = Engine::from_snapshot(config(), engine.snapshot()).unwrap();
        let vision = restored.stream_id("vision").unwrap();
        let manager = restored.manager(vision).unwrap();
        assert_eq!(manager.next_serial(), 2);
        assert!(manager.finished_initial());
        assert_eq!(manager.dimension(), Some(2));

        restored.cleanup(vision, true).unwrap();
        let g = restored.receive_sensory_input(vision, &[1.0, 1.0], true).unwrap();
        assert_eq!(g.serial, 2);
        restored.verify_integrity().unwrap();
    }

    // ── Rejection ────────────────────────────────────────────────────────────

    #[test]
    fn test_unknown_version_rejected() {
        let mut snapshot = make_engine().snapshot();
        snapshot.version = STORE_SNAPSHOT_VERSION + 1;
        let err = Engine::from_snapshot(config(), snapshot).unwrap_err();
        assert_eq!(
            err,
            EngineError::SnapshotVersion { found: STORE_SNAPSHOT_VERSION + 1, expected: STORE_SNAPSHOT_VERSION }
        );
    }

    #[test]
    fn test_node_of_unregistered_stream_rejected() {
        let mut snapshot = make_engine().snapshot();
        snapshot.streams.retain(|s| s.name == "vision");
        let err = Engine::from_snapshot(config(), snapshot).unwrap_err();
        assert!(matches!(err, EngineError::UnknownStream { .. }));
    }

    #[test]
    fn test_broken_mirror_rejected() {
        let mut snapshot = make_engine().snapshot();
        snapshot.grouping_edges.pop();
        assert!(Engine::from_snapshot(config(), snapshot).is_err());
    }
}
