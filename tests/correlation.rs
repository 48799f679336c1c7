//! Integration tests for the correlation engine: coincidence, temporal cutoff,
//! feedback and cascading removal.

use cdz_core::{
    CorrelationEngine, CorrelationEvent, Engine, EngineConfig, FeedbackRouter, GroupingId,
    KernelShape, NodeId, Result, StreamId,
};

// ─── helpers ─────────────────────────────────────────────────────────────────

/// Collects feedback instead of delivering it; every node is fully certain.
#[derive(Default)]
struct Recorder {
    certainty: f32,
    delivered: Vec<CorrelationEvent>,
}

impl FeedbackRouter for Recorder {
    fn certainty(&self, _node: NodeId) -> f32 {
        self.certainty
    }

    fn route_feedback(&mut self, feedback: CorrelationEvent) -> Result<()> {
        self.delivered.push(feedback);
        Ok(())
    }
}

fn event(stream: u16, serial: u64, time: u64) -> CorrelationEvent {
    let node = NodeId::new(StreamId(stream), serial);
    CorrelationEvent::new(node.paired_grouping(), 1.0, time, node)
}

fn bell_config() -> EngineConfig {
    EngineConfig {
        kernel: KernelShape::Bell { std: 4.0 },
        window_half_width: 10,
        ..EngineConfig::default()
    }
}

// ─── update rules ────────────────────────────────────────────────────────────

#[test]
fn test_same_stream_never_correlates() {
    let mut cdz = CorrelationEngine::new(&EngineConfig::default());
    let a = event(0, 0, 7);
    let b = event(0, 1, 7);
    assert!(!cdz.update_connection(&a, &b).unwrap());
    assert!(cdz.correlation(a.grouping).is_none());
    assert!(cdz.correlation(b.grouping).is_none());
}

#[test]
fn test_temporal_cutoff_at_half_width() {
    let config = bell_config();
    let w = config.window_half_width;
    let now = 100;

    let mut cdz = CorrelationEngine::new(&config);
    let too_old = event(0, 0, now - w);
    assert!(!cdz.update_connection(&too_old, &event(1, 0, now)).unwrap());
    assert!(cdz.is_empty());

    let in_window = event(0, 1, now - (w - 1));
    assert!(cdz.update_connection(&in_window, &event(1, 0, now)).unwrap());
    let record = cdz.correlation(in_window.grouping).unwrap();
    assert_eq!(record.weight(GroupingId::new(StreamId(1), 0)), Some(1.0));
    assert_eq!(record.age(), 2);
}

#[test]
fn test_update_registers_back_reference_only() {
    let mut cdz = CorrelationEngine::new(&EngineConfig::default());
    let old = event(0, 0, 3);
    let new = event(1, 0, 3);
    cdz.update_connection(&old, &new).unwrap();

    let target = cdz.correlation(new.grouping).unwrap();
    assert!(target.is_empty(), "no forward edge on the newer grouping");
    assert_eq!(target.referenced_by().collect::<Vec<_>>(), vec![old.grouping]);
    cdz.verify().unwrap();
}

// ─── packets and feedback ────────────────────────────────────────────────────

#[test]
fn test_coincident_packets_correlate_both_ways() {
    let mut cdz = CorrelationEngine::new(&EngineConfig::default());
    let mut router = Recorder::default();
    let a = event(0, 0, 5);
    let b = event(1, 0, 5);
    cdz.receive_packet(a, true, &mut router).unwrap();
    cdz.receive_packet(b, true, &mut router).unwrap();

    assert_eq!(cdz.correlation(a.grouping).unwrap().strongest_correlation().unwrap().0, b.grouping);
    assert_eq!(cdz.correlation(b.grouping).unwrap().strongest_correlation().unwrap().0, a.grouping);
    assert_eq!(router.delivered.len(), 2);
    cdz.verify().unwrap();
}

#[test]
fn test_packets_at_different_timesteps_do_not_correlate() {
    let mut cdz = CorrelationEngine::new(&bell_config());
    let mut router = Recorder::default();
    cdz.receive_packet(event(0, 0, 5), true, &mut router).unwrap();
    cdz.receive_packet(event(1, 0, 6), true, &mut router).unwrap();
    assert!(cdz.is_empty());
    assert!(router.delivered.is_empty());
}

#[test]
fn test_feedback_amplified_by_certainty() {
    let mut cdz = CorrelationEngine::new(&EngineConfig::default());
    let mut router = Recorder { certainty: 1.0, ..Recorder::default() };
    cdz.receive_packet(event(0, 0, 5), true, &mut router).unwrap();
    cdz.receive_packet(event(1, 0, 5), true, &mut router).unwrap();

    // Record certainty after one update: 1² · min(2 / 25, 1) = 0.08.
    let expected = (1.0f32 + 0.08).powi(2);
    for feedback in &router.delivered {
        assert!((feedback.strength - expected).abs() < 1e-5, "strength {}", feedback.strength);
        assert_eq!(feedback.time, 5);
    }
}

// ─── removal ─────────────────────────────────────────────────────────────────

#[test]
fn test_removal_cascades_through_records() {
    let mut cdz = CorrelationEngine::new(&EngineConfig::default());
    let a = event(0, 0, 1);
    let b = event(1, 0, 1);
    let c = event(2, 0, 1);
    cdz.update_connection(&a, &b).unwrap();
    cdz.update_connection(&a, &c).unwrap();
    cdz.update_connection(&b, &a).unwrap();

    cdz.remove_grouping(b.grouping);

    assert!(cdz.correlation(b.grouping).is_none());
    let ra = cdz.correlation(a.grouping).unwrap();
    assert_eq!(ra.weight(b.grouping), None);
    assert_eq!(ra.weight(c.grouping), Some(1.0));
    assert!(ra.referenced_by().next().is_none(), "b no longer refers to a");
    cdz.verify().unwrap();
}

#[test]
fn test_engine_scenario_two_streams_same_timestep() {
    let mut engine =
        Engine::new(EngineConfig { initial_nodes: 1, ..EngineConfig::default() }).unwrap();
    let a = engine.add_stream("vision").unwrap();
    let b = engine.add_stream("audio").unwrap();
    engine.set_timestep(5).unwrap();

    let ga = engine.receive_sensory_input(a, &[0.2, 0.4], true).unwrap();
    let gb = engine.receive_sensory_input(b, &[1.0, 0.0, 0.5], true).unwrap();

    let cdz = engine.correlation();
    assert_eq!(cdz.correlation(ga).unwrap().strongest_correlation().unwrap().0, gb);
    assert_eq!(cdz.correlation(gb).unwrap().strongest_correlation().unwrap().0, ga);

    for stream in [a, b] {
        let node = engine.manager(stream).unwrap().last_fired_node().unwrap();
        assert_eq!(engine.store().node(node).unwrap().feedback_count, 1);
    }
    assert_eq!(engine.store().grouping(ga).unwrap().last_feedback, Some(5));
    engine.verify_integrity().unwrap();
}

#[test]
fn test_evicted_grouping_leaves_correlations() {
    let config = EngineConfig {
        initial_nodes: 1,
        grouping_required_utilization: 10,
        node_required_utilization: 20,
        cleanup_every: 0,
        growth_every: 0,
        index_rebuild_every: 0,
        ..EngineConfig::default()
    };
    let mut engine = Engine::new(config).unwrap();
    let a = engine.add_stream("vision").unwrap();
    let b = engine.add_stream("audio").unwrap();
    let ga = engine.receive_sensory_input(a, &[0.0], true).unwrap();
    let gb = engine.receive_sensory_input(b, &[0.0], true).unwrap();
    assert_eq!(engine.correlation().len(), 2);

    engine.set_timestep(10).unwrap();
    let report = engine.sweep_underutilized().unwrap();
    assert_eq!(report.groupings.len(), 2);
    assert!(engine.correlation().correlation(ga).is_none());
    assert!(engine.correlation().correlation(gb).is_none());
    engine.verify_integrity().unwrap();
}
