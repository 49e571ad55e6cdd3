//! Events module for session observers
//!
//! Provides structured event types for state transitions, transcript
//! updates, handled commands and engine faults. The IPC server folds them
//! into the UI projection and pushes them to subscribed clients.

use serde::{Deserialize, Serialize};

use crate::session::State;

/// Events emitted by the recognition session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Session moved between states
    StateChanged {
        from: State,
        to: State,
        /// Time spent in `from`, in milliseconds
        duration_ms: u64,
    },

    /// Live transcript from the engine (interim or final)
    TranscriptUpdated { text: String, is_final: bool },

    /// The wake token was heard; the next utterance is a command
    WakeWordDetected,

    /// An utterance reached dispatch
    CommandHandled {
        utterance: String,
        /// Matched command name, `None` when unrecognized
        command: Option<String>,
        argument: Option<String>,
        feedback: String,
    },

    /// Recoverable engine error, restart scheduled
    EngineFault { error: String },

    /// The feature stopped and will not recover
    Fatal { error: String },
}

impl std::fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionEvent::StateChanged { from, to, .. } => {
                write!(f, "STATE_CHANGED ({} -> {})", from, to)
            }
            SessionEvent::TranscriptUpdated { is_final, .. } => {
                write!(f, "TRANSCRIPT_UPDATED (final: {})", is_final)
            }
            SessionEvent::WakeWordDetected => write!(f, "WAKE_WORD_DETECTED"),
            SessionEvent::CommandHandled { command, .. } => match command {
                Some(name) => write!(f, "COMMAND_HANDLED ({})", name),
                None => write!(f, "COMMAND_HANDLED (unrecognized)"),
            },
            SessionEvent::EngineFault { error } => write!(f, "ENGINE_FAULT ({})", error),
            SessionEvent::Fatal { error } => write!(f, "FATAL ({})", error),
        }
    }
}
