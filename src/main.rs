//! vans-daemon: voice-controlled browser tab navigation
//!
//! This daemon provides:
//! - Recognition session state machine (wake word, debounce, auto-restart)
//! - Command registry and dispatcher for tab navigation by voice
//! - Noise gate and volume meter over the microphone stream
//! - IPC server bridging the browser extension, which hosts the speech
//!   engine, speech synthesis and tab API

mod audio;
mod bridge;
mod collab;
mod commands;
mod config;
mod dispatch;
mod events;
mod ipc;
mod lifecycle;
mod session;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::audio::VolumeSample;
use crate::bridge::{Inbound, IpcBridge, Outbound};
use crate::commands::builtin_registry;
use crate::config::Config;
use crate::events::SessionEvent;
use crate::ipc::{ClientLinks, Server};
use crate::lifecycle::{Controller, ShutdownSignal};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "vans-daemon starting");

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(?config.socket_path, wake_word = ?config.wake_word, "configuration loaded");

    // Create shutdown signal handler
    let shutdown = ShutdownSignal::new();

    // Session -> IPC server (UI projection and subscribers)
    let (event_tx, _) = broadcast::channel::<SessionEvent>(64);
    // Bridge -> subscribed browser client
    let (action_tx, _) = broadcast::channel::<Outbound>(64);
    // Browser client -> bridge
    let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel::<Inbound>();
    // Audio pipeline -> snapshot requests
    let (volume_tx, volume_rx) = watch::channel(VolumeSample::default());

    let registry = Arc::new(builtin_registry());
    let bridge = Arc::new(IpcBridge::new(action_tx.clone()));

    let server = Server::new(
        &config.socket_path,
        registry.describe(),
        ClientLinks {
            inbound: inbound_tx,
            events: event_tx.clone(),
            actions: action_tx,
            volume: volume_rx,
        },
    )?;

    let mut ipc_event_rx = event_tx.subscribe();
    let mut control_event_rx = event_tx.subscribe();
    let server_for_events = &server;
    let mut controller = Controller::new(config, registry, bridge, event_tx, volume_tx);

    info!("daemon initialized, waiting for browser client");

    // Main event loop
    tokio::select! {
        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Fold session events into the UI projection
        _ = async {
            loop {
                match ipc_event_rx.recv().await {
                    Ok(event) => {
                        info!(%event, "session event");
                        server_for_events.apply_event(&event).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "session event receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
        } => {
            info!("session event handler exited");
        }

        // Route browser client reports; fatal session events release audio
        _ = async {
            loop {
                tokio::select! {
                    inbound = inbound_rx.recv() => match inbound {
                        Some(inbound) => controller.handle_inbound(inbound).await,
                        None => break,
                    },
                    event = control_event_rx.recv() => match event {
                        Ok(event) => controller.handle_event(&event).await,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "controller event receiver lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        } => {
            info!("inbound channel closed");
        }

        // Wait for shutdown signal
        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    // Cleanup
    info!("shutting down...");

    controller.shutdown().await;
    server.shutdown().await;

    info!("vans-daemon stopped");

    Ok(())
}
