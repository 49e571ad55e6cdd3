//! Routing between the browser client, the bridge and the active session
//!
//! The controller owns the recognition feature's lifetime: the first hello
//! activates it, a fatal session event tears it down, and daemon shutdown
//! releases whatever is still running.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

use crate::audio::VolumeSample;
use crate::bridge::{Inbound, IpcBridge};
use crate::collab::Collaborators;
use crate::commands::CommandRegistry;
use crate::config::Config;
use crate::events::SessionEvent;

use super::Activation;

pub struct Controller {
    config: Config,
    registry: Arc<CommandRegistry>,
    bridge: Arc<IpcBridge>,
    event_tx: broadcast::Sender<SessionEvent>,
    /// Taken by the one activation attempt
    volume_tx: Option<watch::Sender<VolumeSample>>,
    activation: Option<Activation>,
}

impl Controller {
    pub fn new(
        config: Config,
        registry: Arc<CommandRegistry>,
        bridge: Arc<IpcBridge>,
        event_tx: broadcast::Sender<SessionEvent>,
        volume_tx: watch::Sender<VolumeSample>,
    ) -> Self {
        Self {
            config,
            registry,
            bridge,
            event_tx,
            volume_tx: Some(volume_tx),
            activation: None,
        }
    }

    fn collaborators(&self) -> Collaborators {
        Collaborators {
            engine: self.bridge.clone(),
            output: Some(self.bridge.clone()),
            tabs: self.bridge.clone(),
            notifier: self.bridge.clone(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.activation.is_some()
    }

    /// Apply one client report; the first hello activates voice commands
    pub async fn handle_inbound(&mut self, inbound: Inbound) {
        if let Inbound::AudioBlock(block) = inbound {
            match &self.activation {
                Some(activation) => activation.feed_audio(block),
                None => self.bridge.route(Inbound::AudioBlock(block), None),
            }
            return;
        }

        let hello = matches!(inbound, Inbound::Hello { .. });
        let session = self.activation.as_ref().map(Activation::session);
        self.bridge.route(inbound, session);

        if hello {
            self.activate().await;
        }
    }

    async fn activate(&mut self) {
        let Some(volume_tx) = self.volume_tx.take() else {
            return;
        };
        match Activation::start(
            &self.config,
            Arc::clone(&self.registry),
            self.collaborators(),
            self.event_tx.clone(),
            volume_tx,
        )
        .await
        {
            Ok(activation) => self.activation = Some(activation),
            Err(e) => warn!(%e, "voice commands not activated"),
        }
    }

    /// Release the session and audio path once the session reports a fatal error
    pub async fn handle_event(&mut self, event: &SessionEvent) {
        if let SessionEvent::Fatal { error } = event {
            if let Some(activation) = self.activation.take() {
                warn!(%error, "fatal session error, releasing audio");
                activation.teardown().await;
            }
        }
    }

    pub async fn shutdown(mut self) {
        if let Some(activation) = self.activation.take() {
            activation.teardown().await;
        }
        info!("controller stopped");
    }
}
