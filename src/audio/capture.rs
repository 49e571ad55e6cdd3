//! Microphone capture via cpal
//!
//! The cpal stream is not `Send` on every platform, so it lives on a
//! dedicated thread for its whole life. Samples are down-mixed to mono and
//! cut into fixed-size blocks for the pipeline. Dropping the guard stops the
//! thread and releases the device.

use std::sync::mpsc as std_mpsc;
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Errors opening the microphone
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("no default input device available")]
    NoDevice,

    #[error("input device not found: {0}")]
    DeviceNotFound(String),

    #[error("unsupported sample format {0:?}, expected f32")]
    UnsupportedFormat(SampleFormat),

    #[error("failed to open input stream: {0}")]
    Stream(String),

    #[error("failed to spawn capture thread: {0}")]
    ThreadSpawn(String),
}

/// Keeps the capture thread alive; dropping it releases the microphone
pub struct CaptureGuard {
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
    sample_rate: u32,
}

impl CaptureGuard {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        // closing the channel wakes the thread
        self.stop_tx.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("capture thread panicked");
            }
        }
        info!("microphone released");
    }
}

/// Open the input device and start streaming blocks of `block_size` samples
pub fn start_capture(
    device_name: Option<&str>,
    block_size: usize,
    blocks: mpsc::Sender<Vec<f32>>,
) -> Result<CaptureGuard, CaptureError> {
    let (ready_tx, ready_rx) = std_mpsc::channel::<Result<u32, CaptureError>>();
    let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
    let device_name = device_name.map(str::to_owned);

    let thread = thread::Builder::new()
        .name("audio-capture".to_string())
        .spawn(move || {
            let stream = match open_stream(device_name.as_deref(), block_size, blocks) {
                Ok((stream, rate)) => {
                    let _ = ready_tx.send(Ok(rate));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            // blocks until the guard drops its sender
            let _ = stop_rx.recv();
            drop(stream);
            debug!("capture thread exiting");
        })
        .map_err(|e| CaptureError::ThreadSpawn(e.to_string()))?;

    let mut guard = CaptureGuard {
        stop_tx: Some(stop_tx),
        thread: Some(thread),
        sample_rate: 0,
    };

    match ready_rx.recv() {
        Ok(Ok(rate)) => {
            guard.sample_rate = rate;
            Ok(guard)
        }
        Ok(Err(e)) => Err(e),
        Err(_) => Err(CaptureError::Stream("capture thread exited".to_string())),
    }
}

fn open_stream(
    device_name: Option<&str>,
    block_size: usize,
    blocks: mpsc::Sender<Vec<f32>>,
) -> Result<(cpal::Stream, u32), CaptureError> {
    let host = cpal::default_host();

    let device = match device_name {
        Some(name) => host
            .input_devices()
            .map_err(|e| CaptureError::Stream(e.to_string()))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| CaptureError::DeviceNotFound(name.to_string()))?,
        None => host.default_input_device().ok_or(CaptureError::NoDevice)?,
    };

    let dev_name = device.name().unwrap_or_else(|_| "unknown".into());
    let supported = device
        .default_input_config()
        .map_err(|e| CaptureError::Stream(e.to_string()))?;
    if supported.sample_format() != SampleFormat::F32 {
        return Err(CaptureError::UnsupportedFormat(supported.sample_format()));
    }

    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels().max(1);
    let config: StreamConfig = supported.into();

    info!(device = %dev_name, sample_rate, channels, block_size, "opening input device");

    let mut pending: Vec<f32> = Vec::with_capacity(block_size * 2);
    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                pending.extend(
                    data.chunks_exact(channels as usize)
                        .map(|frame| frame.iter().sum::<f32>() / channels as f32),
                );
                while pending.len() >= block_size {
                    let block: Vec<f32> = pending.drain(..block_size).collect();
                    // a full queue drops the block rather than stalling the callback
                    let _ = blocks.try_send(block);
                }
            },
            move |err| {
                error!(%err, "audio input stream error");
            },
            None,
        )
        .map_err(|e| CaptureError::Stream(e.to_string()))?;

    stream
        .play()
        .map_err(|e| CaptureError::Stream(e.to_string()))?;

    Ok((stream, sample_rate))
}
