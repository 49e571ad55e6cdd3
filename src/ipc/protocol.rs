//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use serde::{Deserialize, Serialize};

use crate::audio::VolumeSample;
use crate::bridge::{Capabilities, ClientId, Inbound, Outbound};
use crate::collab::TabInfo;
use crate::commands::CommandInfo;
use crate::events::SessionEvent;
use crate::session::State;

/// Largest accepted frame body
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Requests from clients to the daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Ping to check connectivity
    Ping,

    /// Request the current UI projection
    GetSnapshot,

    /// List registered voice commands
    ListCommands,

    /// Subscribe to session events and bridge actions
    Subscribe,

    /// Browser client announces what its platform supports
    Hello {
        speech_recognition: bool,
        speech_synthesis: bool,
        /// The client's engine wants gated PCM pushed to it
        #[serde(default)]
        audio_input: bool,
    },

    EngineStarted,

    EngineResult {
        /// Ranked transcripts, best first
        alternatives: Vec<String>,
        is_final: bool,
    },

    EngineEnd,

    EngineError { error: String },

    /// A `speak` action finished playing (or was cancelled)
    SpeechFinished { id: u64 },

    ActiveTab {
        #[serde(default)]
        tab: Option<TabInfo>,
    },

    /// Mono PCM captured by the client, at the configured sample rate
    AudioBlock { samples: Vec<f32> },
}

impl Request {
    /// Bridge reports are forwarded inward; `None` for plain queries
    pub fn into_inbound(self, client: ClientId, subscribed: bool) -> Option<Inbound> {
        let inbound = match self {
            Request::Ping | Request::GetSnapshot | Request::ListCommands | Request::Subscribe => {
                return None
            }
            Request::Hello {
                speech_recognition,
                speech_synthesis,
                audio_input,
            } => Inbound::Hello {
                client,
                capabilities: Capabilities {
                    speech_recognition,
                    speech_synthesis,
                    audio_input,
                },
                subscribed,
            },
            Request::EngineStarted => Inbound::EngineStarted,
            Request::EngineResult {
                alternatives,
                is_final,
            } => Inbound::EngineResult {
                alternatives,
                is_final,
            },
            Request::EngineEnd => Inbound::EngineEnd,
            Request::EngineError { error } => Inbound::EngineError { error },
            Request::SpeechFinished { id } => Inbound::SpeechFinished { id },
            Request::ActiveTab { tab } => Inbound::ActiveTab(tab),
            Request::AudioBlock { samples } => Inbound::AudioBlock(samples),
        };
        Some(inbound)
    }
}

/// Responses from the daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Pong response to ping
    Pong,

    Snapshot(Snapshot),

    Commands { commands: Vec<CommandInfo> },

    /// Subscription confirmed
    Subscribed,

    /// Bridge report accepted
    Ack,

    /// Error response
    Error { code: String, message: String },
}

/// Push notification to subscribed clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Notification {
    Event(SessionEvent),
    Action(Outbound),
}

/// One utterance that reached dispatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub utterance: String,
    /// `None` when the utterance matched no command
    pub command: Option<String>,
}

/// UI projection of the daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: String,
    pub state: State,
    pub live_transcript: String,
    pub volume: VolumeSample,
    /// Oldest first
    pub command_history: Vec<HistoryEntry>,
    pub commands: Vec<CommandInfo>,
    pub uptime_secs: u64,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            state: State::default(),
            live_transcript: String::new(),
            volume: VolumeSample::default(),
            command_history: Vec::new(),
            commands: Vec::new(),
            uptime_secs: 0,
        }
    }
}
