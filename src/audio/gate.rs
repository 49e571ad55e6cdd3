//! Noise gate with asymmetric exponential gain smoothing
//!
//! Each block is measured as RMS dBFS against a fixed threshold. The gain
//! follows the open/closed target with `attack` when opening and `release`
//! when closing, so cutoffs fade out while openings stay quick.

use std::time::Duration;

/// dBFS reported for silent (all-zero) blocks
pub const SILENCE_FLOOR_DB: f32 = -100.0;

/// Noise gate parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateConfig {
    /// Blocks below this level close the gate
    pub threshold_db: f32,
    /// Time constant while the gain rises
    pub attack: Duration,
    /// Time constant while the gain falls
    pub release: Duration,
    /// Input sample rate in Hz
    pub sample_rate: u32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            threshold_db: -50.0,
            attack: Duration::from_millis(20),
            release: Duration::from_millis(50),
            sample_rate: 48_000,
        }
    }
}

/// Mutable gate state, owned by a single [`AudioGate`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateState {
    pub threshold_db: f32,
    pub attack: Duration,
    pub release: Duration,
    /// Current smoothed gain, always within `[0, 1]`
    pub gain: f32,
}

/// Per-block noise gate
#[derive(Debug)]
pub struct AudioGate {
    state: GateState,
    sample_rate: u32,
}

impl AudioGate {
    /// Create a gate that starts fully closed
    pub fn new(config: GateConfig) -> Self {
        Self {
            state: GateState {
                threshold_db: config.threshold_db,
                attack: config.attack,
                release: config.release,
                gain: 0.0,
            },
            sample_rate: config.sample_rate.max(1),
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> &GateState {
        &self.state
    }

    /// Gate one block and return the scaled copy.
    ///
    /// The input is left untouched so the meter can read raw energy.
    pub fn process(&mut self, block: &[f32]) -> Vec<f32> {
        if block.is_empty() {
            return Vec::new();
        }

        let level = rms_db(block);
        let target = if level < self.state.threshold_db { 0.0 } else { 1.0 };
        let tau = if target == 0.0 {
            self.state.release
        } else {
            self.state.attack
        };

        let dt = block.len() as f32 / self.sample_rate as f32;
        let tau = tau.as_secs_f32();
        let decay = if tau > 0.0 { (-dt / tau).exp() } else { 0.0 };

        let gain = target + (self.state.gain - target) * decay;
        self.state.gain = gain.clamp(0.0, 1.0);

        let gain = self.state.gain;
        block.iter().map(|s| s * gain).collect()
    }
}

/// Root-mean-square level of a block in dBFS, floored for silence
pub fn rms_db(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return SILENCE_FLOOR_DB;
    }
    let energy: f32 = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
    let rms = energy.sqrt();
    if rms <= 0.0 || !rms.is_finite() {
        return SILENCE_FLOOR_DB;
    }
    (20.0 * rms.log10()).max(SILENCE_FLOOR_DB)
}
