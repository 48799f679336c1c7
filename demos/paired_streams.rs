//! # Paired Streams
//!
//! Two synthetic modalities observe the same four objects. Vision sees each
//! object as a noisy 2-D point, audio as a noisy 3-D point. Both encodings of
//! a sample arrive on the same timestep, so the correlation engine learns
//! which vision grouping goes with which audio grouping.
//!
//! After training, each vision grouping is asked for its strongest audio
//! correlate and the answer is checked against what the audio stream fires
//! for the same object.
//!
//! Run with `RUST_LOG=cdz_core=info` to watch maintenance passes.

use cdz_core::{Engine, EngineConfig, GroupingId, Result};
use tracing_subscriber::EnvFilter;

// ── Objects ──────────────────────────────────────────────────────────────────

const NAMES: [&str; 4] = ["bell", "drum", "flute", "whistle"];

const VISION: [[f32; 2]; 4] = [[0.0, 0.0], [6.0, 0.0], [0.0, 6.0], [6.0, 6.0]];

const AUDIO: [[f32; 3]; 4] = [
    [1.0, 0.0, 0.0],
    [0.0, 1.0, 0.0],
    [0.0, 0.0, 1.0],
    [1.0, 1.0, 1.0],
];

/// xorshift64; the demo only needs repeatable jitter.
struct Jitter(u64);

impl Jitter {
    fn next(&mut self, scale: f32) -> f32 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        ((self.0 >> 40) as f32 / (1u64 << 24) as f32 - 0.5) * scale
    }

    fn around<const N: usize>(&mut self, centre: &[f32; N], scale: f32) -> Vec<f32> {
        centre.iter().map(|c| c + self.next(scale)).collect()
    }
}

// ── Display helpers ──────────────────────────────────────────────────────────

fn bar(v: f32) -> String {
    let filled = (v.clamp(0.0, 1.0) * 20.0).round() as usize;
    let empty = 20usize.saturating_sub(filled);
    format!("[{}{}] {:.2}", "█".repeat(filled), "░".repeat(empty), v)
}

fn print_population(engine: &Engine, label: &str) {
    println!("  {}", label);
    for stream in engine.streams() {
        if let Some(m) = engine.manager(stream) {
            println!(
                "    {:<7} nodes={:<3} avg distance={:.3} index={}",
                m.name(),
                engine.store().population(stream),
                m.avg_distance(),
                m.has_index(),
            );
        }
    }
    println!("    correlation records={}\n", engine.correlation().len());
}

// ── Main ─────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    println!("╔══════════════════════════════════════════════════════════════════════╗");
    println!("║  Paired streams: vision and audio learn to agree                    ║");
    println!("╚══════════════════════════════════════════════════════════════════════╝\n");

    let config = EngineConfig {
        max_nodes: 64,
        initial_nodes: 8,
        grouping_required_utilization: 1_000,
        node_required_utilization: 2_000,
        cleanup_every: 500,
        growth_every: 750,
        index_rebuild_every: 250,
        index_min_observations: 100,
        ..EngineConfig::default()
    };
    let mut engine = Engine::new(config)?;
    let vision = engine.add_stream("vision")?;
    let audio = engine.add_stream("audio")?;
    let mut jitter = Jitter(0x9e37_79b9_7f4a_7c15);

    // ── Training ──────────────────────────────────────────────────────────────
    println!("▶  TRAINING: 3000 paired samples\n");

    for step in 0..3_000usize {
        let object = step % NAMES.len();
        let v = jitter.around(&VISION[object], 1.0);
        let a = jitter.around(&AUDIO[object], 0.3);
        engine.receive_sensory_input(vision, &v, true)?;
        engine.receive_sensory_input(audio, &a, true)?;
        let report = engine.advance()?;
        if !report.splits.iter().all(|(_, s)| s.split.is_empty()) {
            println!("  t={:<5} split pass grew the population", report.timestep);
        }
    }
    println!();
    print_population(&engine, "After training:");

    // ── Recall ────────────────────────────────────────────────────────────────
    println!("▶  RECALL: does vision predict what audio fires?\n");

    let mut agreed = 0usize;
    let trials = 40usize;
    for trial in 0..trials {
        let object = trial % NAMES.len();
        let v = jitter.around(&VISION[object], 1.0);
        let a = jitter.around(&AUDIO[object], 0.3);
        let seen = engine.receive_sensory_input(vision, &v, false)?;
        let heard = engine.receive_sensory_input(audio, &a, false)?;
        engine.advance()?;

        let predicted: Option<(GroupingId, f32)> = engine
            .correlation()
            .correlation(seen)
            .filter(|r| !r.is_empty())
            .map(|r| r.strongest_correlation())
            .transpose()?;
        if predicted.map(|(g, _)| g) == Some(heard) {
            agreed += 1;
        }
        if trial < NAMES.len() {
            let certainty = match engine.correlation().correlation(seen) {
                Some(r) if !r.is_empty() => r.certainty(engine.config())?,
                _ => 0.0,
            };
            println!(
                "  {:<8} saw {}  heard {}  predicted {:<10} certainty {}",
                NAMES[object],
                seen,
                heard,
                predicted.map_or("-".to_string(), |(g, _)| g.to_string()),
                bar(certainty),
            );
        }
    }
    println!("\n  Agreement: {}/{} {}\n", agreed, trials, bar(agreed as f32 / trials as f32));

    engine.verify_integrity()?;
    print_population(&engine, "Final state:");
    Ok(())
}
