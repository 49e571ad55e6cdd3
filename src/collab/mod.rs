//! External collaborators driven by the recognition core
//!
//! The speech engine, speech output, tab controller and notification
//! surface live outside this process. The core only talks to them through
//! these traits; the daemon wires all four to the IPC bridge.

#[cfg(test)]
pub mod mock;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::dispatch::{Completion, OutputUnavailable};

/// Speech-to-text engine lifecycle
pub trait SpeechEngine: Send + Sync {
    /// Whether the platform provides a recognizer at all
    fn is_supported(&self) -> bool;

    /// Ask the engine to begin listening.
    ///
    /// Returns false when the request could not reach the engine; the session
    /// then treats it as stopped until the engine attaches again.
    fn start(&self) -> bool;

    /// Ask the engine to stop; it reports `end` when done
    fn stop(&self);

    /// Gated microphone audio for engines that consume raw PCM
    fn accept_audio(&self, _block: &[f32]) {}
}

/// Text-to-speech playback
pub trait SpeechOutput: Send + Sync {
    /// Speak `text` and fire `on_complete` once playback ends.
    ///
    /// When playback cannot start, the untouched completion is handed back
    /// inside the error so the caller can resume immediately.
    fn speak(&self, text: &str, on_complete: Completion) -> Result<(), OutputUnavailable>;
}

/// Browser tab operations, all fire-and-forget
pub trait TabController: Send + Sync {
    fn create_tab(&self, url: &str);
    fn close_active_tab(&self);
    fn cycle_tab(&self, direction: TabDirection);
    fn query_active_tab(&self) -> Option<TabInfo>;
}

/// Best-effort user notifications
pub trait Notifier: Send + Sync {
    fn display(&self, title: &str, message: &str);
}

/// Everything the session and dispatcher need from the outside world
#[derive(Clone)]
pub struct Collaborators {
    pub engine: Arc<dyn SpeechEngine>,
    /// `None` when the platform has no speech output
    pub output: Option<Arc<dyn SpeechOutput>>,
    pub tabs: Arc<dyn TabController>,
    pub notifier: Arc<dyn Notifier>,
}

/// Direction for tab cycling, wrapping at either end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TabDirection {
    Next,
    Previous,
}

/// Snapshot of a browser tab
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabInfo {
    pub id: u64,
    pub index: usize,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
}

/// Error reported by the speech engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineErrorKind {
    /// Nothing was heard before the engine timed out
    NoSpeech,
    Aborted,
    /// Audio capture failed inside the engine
    AudioCapture,
    Network,
    /// Microphone permission denied
    NotAllowed,
    /// Recognition service refused by the platform
    ServiceNotAllowed,
    Other(String),
}

impl EngineErrorKind {
    /// Classify an engine error code such as `no-speech`
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "no-speech" => Self::NoSpeech,
            "aborted" => Self::Aborted,
            "audio-capture" => Self::AudioCapture,
            "network" => Self::Network,
            "not-allowed" => Self::NotAllowed,
            "service-not-allowed" => Self::ServiceNotAllowed,
            other => Self::Other(other.to_string()),
        }
    }

    /// Permission errors end the feature; everything else self-heals
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::NotAllowed | Self::ServiceNotAllowed)
    }
}

impl fmt::Display for EngineErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSpeech => write!(f, "no-speech"),
            Self::Aborted => write!(f, "aborted"),
            Self::AudioCapture => write!(f, "audio-capture"),
            Self::Network => write!(f, "network"),
            Self::NotAllowed => write!(f, "not-allowed"),
            Self::ServiceNotAllowed => write!(f, "service-not-allowed"),
            Self::Other(code) => write!(f, "{code}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_round_trip_through_display() {
        for code in ["no-speech", "aborted", "network", "not-allowed", "bad-grammar"] {
            assert_eq!(EngineErrorKind::from_code(code).to_string(), code);
        }
    }

    #[test]
    fn test_only_permission_errors_are_fatal() {
        assert!(EngineErrorKind::NotAllowed.is_fatal());
        assert!(EngineErrorKind::ServiceNotAllowed.is_fatal());
        assert!(!EngineErrorKind::NoSpeech.is_fatal());
        assert!(!EngineErrorKind::Network.is_fatal());
        assert!(!EngineErrorKind::from_code("language-not-supported").is_fatal());
    }

    #[test]
    fn test_tab_direction_serialization() {
        let json = serde_json::to_string(&TabDirection::Previous).unwrap();
        assert_eq!(json, "\"previous\"");
    }
}
