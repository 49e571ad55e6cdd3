//! Recognition session state machine
//!
//! Turns speech-engine events into at most one dispatched command per
//! finalization window. Every input arrives on one queue and is handled by
//! one consumer, so the fields here are never touched concurrently.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::collab::{EngineErrorKind, SpeechEngine};
use crate::commands::{normalize, CommandRegistry, Utterance};
use crate::dispatch::Dispatcher;
use crate::events::SessionEvent;

use super::handle::{SessionHandle, StartupError};

/// Largest power of two applied to the restart backoff
const MAX_BACKOFF_DOUBLINGS: u32 = 16;

/// Session states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    /// Created, not yet started
    #[default]
    Idle,
    /// Waiting for a final transcript
    Listening,
    /// Wake token heard, waiting for the command utterance
    Armed,
    /// Debounce window running on a final transcript
    Finalizing,
    /// Wake acknowledgment playing, engine paused
    Acknowledging,
    /// Handler ran, feedback playing, engine paused
    Dispatching,
    /// Torn down; no further transitions
    Stopped,
}

impl State {
    fn accepts_speech(self) -> bool {
        matches!(self, State::Listening | State::Armed | State::Finalizing)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Idle => write!(f, "Idle"),
            State::Listening => write!(f, "Listening"),
            State::Armed => write!(f, "Armed"),
            State::Finalizing => write!(f, "Finalizing"),
            State::Acknowledging => write!(f, "Acknowledging"),
            State::Dispatching => write!(f, "Dispatching"),
            State::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Identifies one feedback episode so late completions can be ignored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeedbackTicket(u64);

impl FeedbackTicket {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for FeedbackTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Inputs consumed by the session loop
#[derive(Debug)]
pub enum SessionInput {
    /// Begin listening
    Start,
    /// The engine reports that it is running
    EngineStarted,
    EngineResult { transcript: String, is_final: bool },
    /// The engine stopped on its own
    EngineEnd,
    /// The engine became reachable (again)
    EngineAttached,
    EngineError(EngineErrorKind),
    DebounceElapsed { generation: u64 },
    RestartDue { generation: u64 },
    FeedbackFinished(FeedbackTicket),
    /// Explicit teardown
    Stop,
}

/// Session tuning
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Wake token; `None` treats every utterance as a command
    pub wake_word: Option<String>,
    pub debounce: Duration,
    pub restart_backoff: Duration,
    pub restart_backoff_max: Duration,
    /// Spoken after the wake token
    pub acknowledgment: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            wake_word: Some("hey vans".to_string()),
            debounce: Duration::from_millis(1500),
            restart_backoff: Duration::from_millis(500),
            restart_backoff_max: Duration::from_secs(8),
            acknowledgment: "I'm listening.".to_string(),
        }
    }
}

/// A scheduled input that a newer one can supersede
#[derive(Debug)]
struct Timer {
    generation: u64,
    task: JoinHandle<()>,
}

impl Timer {
    fn cancel(self) {
        self.task.abort();
    }
}

pub struct RecognitionSession {
    config: SessionConfig,
    /// Normalized wake token
    wake_word: Option<String>,
    state: State,
    state_entered_at: Instant,
    armed: bool,
    engine_running: bool,
    /// Utterance waiting for the debounce timer
    pending: Option<Utterance>,
    debounce: Option<Timer>,
    restart: Option<Timer>,
    next_generation: u64,
    /// Consecutive error-driven restarts
    restart_attempts: u32,
    /// Feedback episode the session is paused on
    feedback: Option<FeedbackTicket>,
    next_ticket: u64,
    engine: Arc<dyn SpeechEngine>,
    registry: Arc<CommandRegistry>,
    dispatcher: Dispatcher,
    handle: SessionHandle,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl RecognitionSession {
    pub fn new(
        config: SessionConfig,
        engine: Arc<dyn SpeechEngine>,
        registry: Arc<CommandRegistry>,
        dispatcher: Dispatcher,
        handle: SessionHandle,
        event_tx: broadcast::Sender<SessionEvent>,
    ) -> Self {
        let wake_word = config
            .wake_word
            .as_deref()
            .map(normalize)
            .filter(|word| !word.is_empty());

        Self {
            config,
            wake_word,
            state: State::Idle,
            state_entered_at: Instant::now(),
            armed: false,
            engine_running: false,
            pending: None,
            debounce: None,
            restart: None,
            next_generation: 0,
            restart_attempts: 0,
            feedback: None,
            next_ticket: 0,
            engine,
            registry,
            dispatcher,
            handle,
            event_tx,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn engine_running(&self) -> bool {
        self.engine_running
    }

    /// Consume inputs until the session is stopped
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SessionInput>) {
        info!(wake_word = ?self.wake_word, "recognition session started in Idle state");

        while let Some(input) = rx.recv().await {
            self.handle(input);
            if self.state == State::Stopped {
                break;
            }
        }

        info!("recognition session stopped");
    }

    /// Apply one input
    pub fn handle(&mut self, input: SessionInput) {
        if self.state == State::Stopped {
            debug!(?input, "session stopped, input ignored");
            return;
        }

        match input {
            SessionInput::Start => self.start(),
            SessionInput::EngineStarted => {
                debug!("engine reports running");
                self.engine_running = true;
            }
            SessionInput::EngineResult {
                transcript,
                is_final,
            } => self.on_result(transcript, is_final),
            SessionInput::EngineEnd => self.on_engine_end(),
            SessionInput::EngineAttached => self.on_engine_attached(),
            SessionInput::EngineError(kind) => self.on_engine_error(kind),
            SessionInput::DebounceElapsed { generation } => self.on_debounce(generation),
            SessionInput::RestartDue { generation } => self.on_restart_due(generation),
            SessionInput::FeedbackFinished(ticket) => self.on_feedback_finished(ticket),
            SessionInput::Stop => self.stop(),
        }
    }

    fn start(&mut self) {
        if self.state != State::Idle {
            debug!(state = %self.state, "start ignored, session already active");
            return;
        }
        self.transition_to(State::Listening);
        self.ensure_engine_running();
    }

    fn on_result(&mut self, transcript: String, is_final: bool) {
        let _ = self.event_tx.send(SessionEvent::TranscriptUpdated {
            text: transcript.clone(),
            is_final,
        });

        if !is_final {
            return;
        }
        if !self.state.accepts_speech() {
            debug!(state = %self.state, "final result outside listening, ignored");
            return;
        }

        self.restart_attempts = 0;
        self.arm_debounce(Utterance::new(&transcript));
        if self.state != State::Finalizing {
            self.transition_to(State::Finalizing);
        }
    }

    /// Start the finalization window, replacing any pending utterance
    fn arm_debounce(&mut self, utterance: Utterance) {
        if let Some(timer) = self.debounce.take() {
            debug!(generation = timer.generation, "pending utterance superseded");
            timer.cancel();
        }

        let generation = self.next_generation();
        let delay = self.config.debounce;
        let handle = self.handle.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            handle.send(SessionInput::DebounceElapsed { generation });
        });

        debug!(generation, utterance = %utterance, delay_ms = delay.as_millis() as u64, "debounce armed");
        self.pending = Some(utterance);
        self.debounce = Some(Timer { generation, task });
    }

    fn on_debounce(&mut self, generation: u64) {
        if self.debounce.as_ref().map(|t| t.generation) != Some(generation) {
            debug!(generation, "stale debounce ignored");
            return;
        }
        self.debounce = None;

        let Some(utterance) = self.pending.take() else {
            return;
        };
        if self.state != State::Finalizing {
            debug!(state = %self.state, "debounce fired outside finalizing");
            return;
        }
        self.classify(utterance);
    }

    /// Decide between wake token, command and noise
    fn classify(&mut self, utterance: Utterance) {
        if let Some(wake_word) = self.wake_word.as_deref() {
            if !self.armed {
                if utterance.text() == wake_word {
                    info!("wake word detected");
                    self.armed = true;
                    let _ = self.event_tx.send(SessionEvent::WakeWordDetected);
                    self.acknowledge();
                } else {
                    debug!(utterance = %utterance, "not the wake word, discarded");
                    self.resume_listening();
                }
                return;
            }
        }

        if !utterance.has_words() {
            debug!("utterance has no words, discarded");
            self.resume_listening();
            return;
        }

        self.dispatch(utterance);
    }

    fn acknowledge(&mut self) {
        self.transition_to(State::Acknowledging);
        self.pause_engine();
        let ticket = self.issue_ticket();
        self.dispatcher.acknowledge(&self.config.acknowledgment, ticket);
    }

    fn dispatch(&mut self, utterance: Utterance) {
        self.transition_to(State::Dispatching);
        self.pause_engine();

        let ticket = self.issue_ticket();
        let matched = self.registry.match_utterance(&utterance);
        let result = self.dispatcher.dispatch(matched, ticket);

        let _ = self.event_tx.send(SessionEvent::CommandHandled {
            utterance: utterance.text().to_string(),
            command: result.command,
            argument: result.argument,
            feedback: result.feedback,
        });
    }

    fn on_feedback_finished(&mut self, ticket: FeedbackTicket) {
        if self.feedback != Some(ticket) {
            debug!(%ticket, "stale feedback completion ignored");
            return;
        }
        self.feedback = None;

        match self.state {
            State::Acknowledging => {
                self.transition_to(State::Armed);
                self.ensure_engine_running();
            }
            State::Dispatching => {
                // one command per wake activation
                self.armed = false;
                self.transition_to(State::Listening);
                self.ensure_engine_running();
            }
            other => warn!(state = %other, %ticket, "feedback finished in unexpected state"),
        }
    }

    fn on_engine_end(&mut self) {
        self.engine_running = false;

        match self.state {
            State::Listening | State::Armed | State::Finalizing => {
                if self.restart.is_some() {
                    debug!("engine ended, restart already scheduled");
                    return;
                }
                self.restart_attempts = 0;
                self.schedule_restart(self.config.restart_backoff);
            }
            State::Acknowledging | State::Dispatching => {
                debug!(state = %self.state, "engine ended while paused for feedback");
            }
            State::Idle | State::Stopped => {}
        }
    }

    fn on_engine_attached(&mut self) {
        if !self.state.accepts_speech() {
            debug!(state = %self.state, "engine attached, start deferred");
            return;
        }
        info!("speech engine attached");
        self.ensure_engine_running();
    }

    fn on_engine_error(&mut self, kind: EngineErrorKind) {
        self.engine_running = false;

        if kind.is_fatal() {
            let err = StartupError::DeviceUnavailable(kind.to_string());
            error!(%err, "speech engine cannot access the microphone");
            self.dispatcher.report(&err.to_string());
            let _ = self.event_tx.send(SessionEvent::Fatal {
                error: err.to_string(),
            });
            self.stop();
            return;
        }

        if kind == EngineErrorKind::NoSpeech {
            debug!("no speech detected");
            self.on_engine_end();
            return;
        }

        warn!(error = %kind, attempts = self.restart_attempts, "speech engine error");
        let _ = self.event_tx.send(SessionEvent::EngineFault {
            error: kind.to_string(),
        });

        if self.state.accepts_speech() {
            let delay = self.error_backoff();
            self.restart_attempts = self.restart_attempts.saturating_add(1);
            self.schedule_restart(delay);
        }
    }

    /// Delay for the next error-driven restart: base * 2^attempts, capped
    fn error_backoff(&self) -> Duration {
        let factor = 1u32 << self.restart_attempts.min(MAX_BACKOFF_DOUBLINGS);
        self.config
            .restart_backoff
            .saturating_mul(factor)
            .min(self.config.restart_backoff_max)
    }

    fn schedule_restart(&mut self, delay: Duration) {
        if let Some(timer) = self.restart.take() {
            timer.cancel();
        }

        let generation = self.next_generation();
        let handle = self.handle.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            handle.send(SessionInput::RestartDue { generation });
        });

        info!(
            delay_ms = delay.as_millis() as u64,
            attempts = self.restart_attempts,
            "speech engine restart scheduled"
        );
        self.restart = Some(Timer { generation, task });
    }

    fn on_restart_due(&mut self, generation: u64) {
        if self.restart.as_ref().map(|t| t.generation) != Some(generation) {
            debug!(generation, "stale restart ignored");
            return;
        }
        self.restart = None;

        if self.state.accepts_speech() {
            self.ensure_engine_running();
        }
    }

    /// Start the engine unless it is already running
    fn ensure_engine_running(&mut self) {
        if self.engine_running {
            debug!("engine already running, start skipped");
            return;
        }
        if let Some(timer) = self.restart.take() {
            timer.cancel();
        }
        debug!("starting speech engine");
        if !self.engine.start() {
            warn!("speech engine unreachable, waiting for it to attach");
            return;
        }
        self.engine_running = true;
    }

    /// Stop the engine while feedback plays
    fn pause_engine(&mut self) {
        if let Some(timer) = self.restart.take() {
            timer.cancel();
        }
        if self.engine_running {
            debug!("pausing speech engine for feedback");
            self.engine.stop();
            self.engine_running = false;
        }
    }

    fn resume_listening(&mut self) {
        let next = if self.armed {
            State::Armed
        } else {
            State::Listening
        };
        self.transition_to(next);
    }

    fn stop(&mut self) {
        if let Some(timer) = self.debounce.take() {
            timer.cancel();
        }
        if let Some(timer) = self.restart.take() {
            timer.cancel();
        }
        self.pending = None;
        self.feedback = None;
        self.armed = false;

        self.engine.stop();
        self.engine_running = false;
        self.transition_to(State::Stopped);
    }

    fn issue_ticket(&mut self) -> FeedbackTicket {
        self.next_ticket += 1;
        let ticket = FeedbackTicket(self.next_ticket);
        self.feedback = Some(ticket);
        ticket
    }

    fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    /// Perform a state transition
    fn transition_to(&mut self, new_state: State) {
        let old_state = self.state;
        let duration_ms = self.state_entered_at.elapsed().as_millis() as u64;

        info!(
            from = %old_state,
            to = %new_state,
            duration_ms = duration_ms,
            "state transition"
        );

        self.state = new_state;
        self.state_entered_at = Instant::now();

        let _ = self.event_tx.send(SessionEvent::StateChanged {
            from: old_state,
            to: new_state,
            duration_ms,
        });
    }
}
