//! Input level meter for the UI projection
//!
//! Mirrors a tiny analyser: the raw block is split into a fixed number of
//! bins, each bin's level is mapped onto a byte scale, and the published
//! sample is their mean clamped to `[0, 100]`.

use serde::{Deserialize, Serialize};

use super::gate::rms_db;

/// Bins in the energy summary
pub const METER_BINS: usize = 16;

/// Level mapped to byte 0
const MIN_DB: f32 = -100.0;
/// Level mapped to byte 255
const MAX_DB: f32 = -30.0;

/// Short-term input volume, 0 to 100
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VolumeSample(f32);

impl VolumeSample {
    pub fn new(value: f32) -> Self {
        if value.is_finite() {
            Self(value.clamp(0.0, 100.0))
        } else {
            Self(0.0)
        }
    }

    pub fn value(self) -> f32 {
        self.0
    }
}

/// Holds the most recent energy summary until the next meter tick
#[derive(Debug, Default)]
pub struct VolumeMeter {
    bins: [u8; METER_BINS],
}

impl VolumeMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Summarize a raw (ungated) block
    pub fn observe(&mut self, block: &[f32]) {
        if block.is_empty() {
            self.bins = [0; METER_BINS];
            return;
        }
        let chunk = block.len().div_ceil(METER_BINS);
        let mut bins = [0u8; METER_BINS];
        for (bin, samples) in bins.iter_mut().zip(block.chunks(chunk)) {
            *bin = to_byte(rms_db(samples));
        }
        self.bins = bins;
    }

    /// Current sample, mean of the summary bins
    pub fn sample(&self) -> VolumeSample {
        let sum: u32 = self.bins.iter().map(|&b| u32::from(b)).sum();
        VolumeSample::new(sum as f32 / METER_BINS as f32)
    }
}

fn to_byte(db: f32) -> u8 {
    let scaled = 255.0 * (db - MIN_DB) / (MAX_DB - MIN_DB);
    scaled.clamp(0.0, 255.0) as u8
}
