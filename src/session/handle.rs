//! Session handle and launch
//!
//! The handle is the only way into a running session: every input,
//! including timer expiry and feedback completion, is queued on the same
//! channel and consumed by one task.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::collab::{Collaborators, EngineErrorKind};
use crate::commands::CommandRegistry;
use crate::dispatch::{Dispatcher, NOTICE_TITLE};
use crate::events::SessionEvent;

use super::machine::{FeedbackTicket, RecognitionSession, SessionConfig, SessionInput};

/// Notice shown when no recognizer exists
const UNSUPPORTED_NOTICE: &str = "Speech recognition is not supported in this browser.";

/// Fatal startup conditions; everything else is recovered inside the session
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StartupError {
    #[error("speech recognition is not supported on this platform")]
    EngineUnsupported,

    #[error("microphone unavailable: {0}")]
    DeviceUnavailable(String),
}

/// Cloneable sender into a session's input queue
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<SessionInput>,
}

impl SessionHandle {
    /// Create a handle and the receiving end of its queue
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SessionInput>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue an input; returns false once the session has exited
    pub fn send(&self, input: SessionInput) -> bool {
        match self.tx.send(input) {
            Ok(()) => true,
            Err(mpsc::error::SendError(input)) => {
                debug!(?input, "session gone, input dropped");
                false
            }
        }
    }

    pub fn start(&self) -> bool {
        self.send(SessionInput::Start)
    }

    pub fn stop(&self) -> bool {
        self.send(SessionInput::Stop)
    }

    pub fn engine_started(&self) -> bool {
        self.send(SessionInput::EngineStarted)
    }

    pub fn engine_result(&self, transcript: String, is_final: bool) -> bool {
        self.send(SessionInput::EngineResult {
            transcript,
            is_final,
        })
    }

    pub fn engine_end(&self) -> bool {
        self.send(SessionInput::EngineEnd)
    }

    pub fn engine_attached(&self) -> bool {
        self.send(SessionInput::EngineAttached)
    }

    pub fn engine_error(&self, kind: EngineErrorKind) -> bool {
        self.send(SessionInput::EngineError(kind))
    }

    pub fn feedback_finished(&self, ticket: FeedbackTicket) -> bool {
        self.send(SessionInput::FeedbackFinished(ticket))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Create and spawn a session in `Idle`.
///
/// Fails with [`StartupError::EngineUnsupported`] before touching the engine
/// again when the platform has no recognizer; one notice is shown. The caller
/// sends `start` once its other resources are in place.
pub fn launch(
    config: SessionConfig,
    registry: Arc<CommandRegistry>,
    collaborators: Collaborators,
    event_tx: broadcast::Sender<SessionEvent>,
) -> Result<(SessionHandle, JoinHandle<()>), StartupError> {
    if !collaborators.engine.is_supported() {
        let err = StartupError::EngineUnsupported;
        error!(%err, "recognition disabled");
        collaborators.notifier.display(NOTICE_TITLE, UNSUPPORTED_NOTICE);
        let _ = event_tx.send(SessionEvent::Fatal {
            error: err.to_string(),
        });
        return Err(err);
    }

    let (handle, rx) = SessionHandle::channel();
    let dispatcher = Dispatcher::new(handle.clone(), &collaborators);
    let session = RecognitionSession::new(
        config,
        Arc::clone(&collaborators.engine),
        registry,
        dispatcher,
        handle.clone(),
        event_tx,
    );

    let task = tokio::spawn(session.run(rx));
    info!("recognition session launched");

    Ok((handle, task))
}
