//! Live microphone gating and metering

#[cfg(feature = "microphone")]
mod capture;
mod gate;
mod meter;
mod pipeline;

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::collab::SpeechEngine;
use crate::config::Config;
use crate::session::StartupError;

pub use gate::GateConfig;
pub use meter::VolumeSample;

/// Blocks buffered between the capture callback and the pipeline
const BLOCK_QUEUE: usize = 16;

/// Running audio path: microphone capture plus processing task
pub struct AudioPipeline {
    task: JoinHandle<()>,
    /// Client-supplied blocks; `None` while a local microphone is the source
    feed: Option<mpsc::Sender<Vec<f32>>>,
    #[cfg(feature = "microphone")]
    capture: capture::CaptureGuard,
}

impl AudioPipeline {
    /// Acquire the microphone and start gating.
    ///
    /// On failure nothing stays open: a partly built capture is released
    /// before the error is returned.
    #[cfg(feature = "microphone")]
    pub fn start(
        config: &Config,
        engine: Arc<dyn SpeechEngine>,
        volume_tx: watch::Sender<VolumeSample>,
    ) -> Result<Self, StartupError> {
        let (block_tx, block_rx) = mpsc::channel(BLOCK_QUEUE);
        let capture = capture::start_capture(
            config.input_device.as_deref(),
            config.block_size,
            block_tx,
        )
        .map_err(|e| StartupError::DeviceUnavailable(e.to_string()))?;

        let gate = GateConfig {
            sample_rate: capture.sample_rate(),
            ..config.gate()
        };
        let task = pipeline::spawn(block_rx, gate, engine, volume_tx);

        Ok(Self {
            task,
            feed: None,
            capture,
        })
    }

    /// Without microphone support the browser client supplies the blocks
    #[cfg(not(feature = "microphone"))]
    pub fn start(
        config: &Config,
        engine: Arc<dyn SpeechEngine>,
        volume_tx: watch::Sender<VolumeSample>,
    ) -> Result<Self, StartupError> {
        info!("built without microphone support, gating blocks sent by the client");
        let (block_tx, block_rx) = mpsc::channel(BLOCK_QUEUE);
        let task = pipeline::spawn(block_rx, config.gate(), engine, volume_tx);
        Ok(Self {
            task,
            feed: Some(block_tx),
        })
    }

    /// Queue a client-captured block for gating.
    ///
    /// Dropped when a local microphone is active or the queue is full.
    pub fn feed(&self, block: Vec<f32>) {
        let Some(feed) = &self.feed else {
            debug!("local microphone active, client block ignored");
            return;
        };
        if let Err(e) = feed.try_send(block) {
            warn!(%e, "audio block dropped");
        }
    }

    /// Release the audio source and wait for the processing task
    pub async fn shutdown(self) {
        let Self {
            task,
            feed,
            #[cfg(feature = "microphone")]
            capture,
        } = self;
        // closing every block sender ends the task
        drop(feed);
        #[cfg(feature = "microphone")]
        drop(capture);
        if let Err(e) = task.await {
            warn!(?e, "audio pipeline task failed");
        }
        info!("audio pipeline shut down");
    }
}
