//! Bringing the recognition feature up and down
//!
//! Activation happens once the browser client has said hello: the session is
//! launched (which checks engine support), the microphone is acquired, and
//! only then is the session started. Teardown reverses it.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::audio::{AudioPipeline, VolumeSample};
use crate::collab::Collaborators;
use crate::commands::CommandRegistry;
use crate::config::Config;
use crate::dispatch::NOTICE_TITLE;
use crate::events::SessionEvent;
use crate::session::{self, SessionHandle, StartupError};

/// A running session with its audio path
pub struct Activation {
    session: SessionHandle,
    task: JoinHandle<()>,
    audio: AudioPipeline,
}

impl Activation {
    /// Launch, acquire the microphone, then start listening.
    ///
    /// Each fatal condition is reported to the user exactly once before the
    /// error is returned; nothing is left running on failure.
    pub async fn start(
        config: &Config,
        registry: Arc<CommandRegistry>,
        collaborators: Collaborators,
        event_tx: broadcast::Sender<SessionEvent>,
        volume_tx: watch::Sender<VolumeSample>,
    ) -> Result<Self, StartupError> {
        let (session, task) = session::launch(
            config.session(),
            registry,
            collaborators.clone(),
            event_tx.clone(),
        )?;

        let audio = match AudioPipeline::start(config, Arc::clone(&collaborators.engine), volume_tx)
        {
            Ok(audio) => audio,
            Err(err) => {
                error!(%err, "recognition disabled");
                collaborators
                    .notifier
                    .display(NOTICE_TITLE, &format!("Voice commands are unavailable: {err}."));
                let _ = event_tx.send(SessionEvent::Fatal {
                    error: err.to_string(),
                });
                session.stop();
                if let Err(e) = task.await {
                    warn!(?e, "session task failed");
                }
                return Err(err);
            }
        };

        session.start();
        info!("voice commands active");

        Ok(Self {
            session,
            task,
            audio,
        })
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Hand a client-captured block to the audio path
    pub fn feed_audio(&self, block: Vec<f32>) {
        self.audio.feed(block);
    }

    /// Stop the session, then release the microphone
    pub async fn teardown(self) {
        self.session.stop();
        if let Err(e) = self.task.await {
            warn!(?e, "session task failed");
        }
        self.audio.shutdown().await;
        info!("voice commands stopped");
    }
}

#[cfg(all(test, not(feature = "microphone")))]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::collab::mock::{OutputMode, Recorders, RecordingEngine};
    use crate::commands::builtin_registry;
    use crate::session::State;

    fn config() -> Config {
        let vars = HashMap::from([("HOME".to_string(), "/tmp/vans-test".to_string())]);
        Config::from_lookup(|key| vars.get(key).cloned()).unwrap()
    }

    #[tokio::test]
    async fn test_activation_starts_and_tears_down() {
        let recorders = Recorders::new(RecordingEngine::default(), OutputMode::Immediate);
        let (event_tx, mut event_rx) = broadcast::channel(32);
        let (volume_tx, _volume_rx) = watch::channel(VolumeSample::default());

        let activation = Activation::start(
            &config(),
            Arc::new(builtin_registry()),
            recorders.collaborators(),
            event_tx,
            volume_tx,
        )
        .await
        .unwrap();
        assert!(!activation.session().is_closed());

        activation.teardown().await;
        assert_eq!(recorders.engine.starts(), 1);
        assert_eq!(recorders.engine.stops(), 1);

        let mut last = None;
        while let Ok(event) = event_rx.try_recv() {
            if let SessionEvent::StateChanged { to, .. } = event {
                last = Some(to);
            }
        }
        assert_eq!(last, Some(State::Stopped));
    }

    #[tokio::test]
    async fn test_unsupported_engine_is_reported_once() {
        let recorders = Recorders::new(RecordingEngine::unsupported(), OutputMode::Immediate);
        let (event_tx, _event_rx) = broadcast::channel(32);
        let (volume_tx, _volume_rx) = watch::channel(VolumeSample::default());

        let result = Activation::start(
            &config(),
            Arc::new(builtin_registry()),
            recorders.collaborators(),
            event_tx,
            volume_tx,
        )
        .await;

        assert!(matches!(result, Err(StartupError::EngineUnsupported)));
        assert_eq!(recorders.notifier.shown().len(), 1);
        assert_eq!(recorders.engine.calls(), 0);
    }
}
