//! Per-block audio processing and meter cadence
//!
//! One task owns the gate and meter. Each incoming block is gated and
//! forwarded to the speech engine; the meter sample is published on its own
//! 60 Hz tick, independent of how fast blocks arrive.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::collab::SpeechEngine;

use super::gate::{AudioGate, GateConfig};
use super::meter::{VolumeMeter, VolumeSample};

/// Meter publish interval (about 60 Hz)
pub const METER_INTERVAL: Duration = Duration::from_micros(16_667);

/// Gate plus meter for one input stream
#[derive(Debug)]
pub struct AudioFrontEnd {
    gate: AudioGate,
    meter: VolumeMeter,
}

impl AudioFrontEnd {
    pub fn new(config: GateConfig) -> Self {
        Self {
            gate: AudioGate::new(config),
            meter: VolumeMeter::new(),
        }
    }

    /// Gate a block and meter its raw energy
    pub fn process(&mut self, block: &[f32]) -> (Vec<f32>, VolumeSample) {
        let gated = self.gate.process(block);
        self.meter.observe(block);
        (gated, self.meter.sample())
    }

    #[cfg(test)]
    pub fn gate(&self) -> &AudioGate {
        &self.gate
    }
}

/// Spawn the processing task.
///
/// The task ends when the block sender is dropped, resetting the meter.
pub fn spawn(
    mut blocks: mpsc::Receiver<Vec<f32>>,
    config: GateConfig,
    engine: Arc<dyn SpeechEngine>,
    volume_tx: watch::Sender<VolumeSample>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut front_end = AudioFrontEnd::new(config);
        let mut latest = VolumeSample::default();
        let mut ticker = tokio::time::interval(METER_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            threshold_db = config.threshold_db,
            sample_rate = config.sample_rate,
            "audio pipeline started"
        );

        loop {
            tokio::select! {
                block = blocks.recv() => {
                    let Some(block) = block else {
                        debug!("audio source closed");
                        break;
                    };
                    let (gated, sample) = front_end.process(&block);
                    engine.accept_audio(&gated);
                    latest = sample;
                }
                _ = ticker.tick() => {
                    volume_tx.send_replace(latest);
                }
            }
        }

        volume_tx.send_replace(VolumeSample::default());
        info!("audio pipeline stopped");
    })
}
