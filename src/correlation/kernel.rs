//! Temporal kernel weighting correlation updates by time gap.
//!
//! The kernel is one half of a symmetric window of half-width `W`, tabulated
//! once at construction. Entry `i` weights a pair of events `i` timesteps
//! apart; gaps of `W` or more weigh zero.
//!
//! ```text
//! Coincidence:  [1, 0, 0, …, 0]
//! Bell(σ):      k[i] = exp(−½ · ((i + ½) / σ)²)
//! ```
//!
//! The bell samples a Gaussian of length `2W` centred between its two middle
//! samples, so even `k[0]` sits half a step off the peak.

use crate::config::{EngineConfig, KernelShape};

/// Tabulated temporal kernel.
#[derive(Clone, Debug, PartialEq)]
pub struct TemporalKernel {
    weights: Vec<f32>,
}

impl TemporalKernel {
    /// Tabulate `shape` over `half_width` timesteps.
    pub fn new(shape: KernelShape, half_width: u64) -> Self {
        let len = usize::try_from(half_width).unwrap_or(usize::MAX).max(1);
        let weights = match shape {
            KernelShape::Coincidence => {
                let mut w = vec![0.0; len];
                w[0] = 1.0;
                w
            }
            KernelShape::Bell { std } => (0..len)
                .map(|i| {
                    let x = (i as f32 + 0.5) / std;
                    (-0.5 * x * x).exp()
                })
                .collect(),
        };
        Self { weights }
    }

    /// Kernel described by `config.kernel` and `config.window_half_width`.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.kernel, config.window_half_width)
    }

    /// Half-width `W`: the first gap that weighs zero.
    pub fn half_width(&self) -> u64 {
        self.weights.len() as u64
    }

    /// Weight for two events `dt` timesteps apart. Zero for `dt ≥ W`.
    pub fn weight(&self, dt: u64) -> f32 {
        usize::try_from(dt)
            .ok()
            .and_then(|i| self.weights.get(i))
            .copied()
            .unwrap_or(0.0)
    }

    /// The tabulated weights, index = time gap.
    pub fn weights(&self) -> &[f32] {
        &self.weights
    }
}
