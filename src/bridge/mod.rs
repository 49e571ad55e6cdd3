//! IPC bridge to the browser-side client
//!
//! The browser extension hosts the real speech engine, speech synthesis,
//! tab API and notifications. The bridge implements the collaborator traits
//! by broadcasting [`Outbound`] actions to subscribed IPC clients, and turns
//! the client's [`Inbound`] reports back into session inputs.
//!
//! Only one connection is the bridge client at a time: the latest one to say
//! hello. Engine starts and speech requests count as delivered only while
//! that connection is subscribed to notifications.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::collab::{
    EngineErrorKind, Notifier, SpeechEngine, SpeechOutput, TabController, TabDirection, TabInfo,
};
use crate::dispatch::{Completion, OutputUnavailable};
use crate::session::SessionHandle;

/// Identifies one IPC connection
pub type ClientId = u64;

/// Actions pushed to the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Outbound {
    StartEngine,
    StopEngine,
    Speak { id: u64, text: String },
    CreateTab { url: String },
    CloseActiveTab,
    CycleTab { direction: TabDirection },
    Notify { title: String, message: String },
    /// Gated microphone block for engines that take raw PCM
    Audio { samples: Vec<f32> },
}

/// What the client's platform provides
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub speech_recognition: bool,
    pub speech_synthesis: bool,
    /// The client's engine consumes gated PCM blocks
    #[serde(default)]
    pub audio_input: bool,
}

/// Reports received from the client
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Hello {
        client: ClientId,
        capabilities: Capabilities,
        /// Whether the connection already subscribed to notifications
        subscribed: bool,
    },
    /// The bridge client subscribed after its hello
    Subscribed { client: ClientId },
    EngineStarted,
    EngineResult {
        alternatives: Vec<String>,
        is_final: bool,
    },
    EngineEnd,
    EngineError {
        error: String,
    },
    SpeechFinished {
        id: u64,
    },
    ActiveTab(Option<TabInfo>),
    /// Raw microphone samples captured by the client
    AudioBlock(Vec<f32>),
    /// A connection that said hello has closed
    Disconnected { client: ClientId },
}

/// The connection currently acting as bridge client
#[derive(Debug, Clone, Copy)]
struct Attachment {
    client: ClientId,
    capabilities: Capabilities,
    subscribed: bool,
}

pub struct IpcBridge {
    outbound: broadcast::Sender<Outbound>,
    attachment: Mutex<Option<Attachment>>,
    next_speech_id: AtomicU64,
    pending_speech: Mutex<HashMap<u64, Completion>>,
    active_tab: Mutex<Option<TabInfo>>,
}

impl IpcBridge {
    pub fn new(outbound: broadcast::Sender<Outbound>) -> Self {
        Self {
            outbound,
            attachment: Mutex::new(None),
            next_speech_id: AtomicU64::new(1),
            pending_speech: Mutex::new(HashMap::new()),
            active_tab: Mutex::new(None),
        }
    }

    /// Capabilities of the current bridge client, all false without one
    pub fn capabilities(&self) -> Capabilities {
        lock(&self.attachment)
            .map(|a| a.capabilities)
            .unwrap_or_default()
    }

    /// Whether actions currently reach the bridge client
    fn reachable(&self) -> bool {
        lock(&self.attachment).is_some_and(|a| a.subscribed)
    }

    /// Apply a client report, forwarding engine events to the session
    pub fn route(&self, inbound: Inbound, session: Option<&SessionHandle>) {
        match inbound {
            Inbound::Hello {
                client,
                capabilities,
                subscribed,
            } => {
                let previous = {
                    let mut attachment = lock(&self.attachment);
                    let previous = attachment.replace(Attachment {
                        client,
                        capabilities,
                        subscribed,
                    });
                    if let (Some(prev), Some(current)) = (previous, attachment.as_mut()) {
                        if prev.client == client {
                            current.subscribed |= prev.subscribed;
                        }
                    }
                    previous
                };
                info!(client, ?capabilities, subscribed, "bridge client connected");

                if let Some(prev) = previous.filter(|p| p.client != client) {
                    // the replaced client's engine is no longer ours
                    info!(replaced = prev.client, "bridge client replaced");
                    forward(session, |s| s.engine_end());
                }
                if self.reachable() {
                    forward(session, |s| s.engine_attached());
                }
            }
            Inbound::Subscribed { client } => {
                let attached = {
                    let mut attachment = lock(&self.attachment);
                    match attachment.as_mut() {
                        Some(current) if current.client == client => {
                            current.subscribed = true;
                            true
                        }
                        _ => false,
                    }
                };
                if attached {
                    debug!(client, "bridge client subscribed");
                    forward(session, |s| s.engine_attached());
                } else {
                    debug!(client, "subscription from a non-bridge client");
                }
            }
            Inbound::EngineStarted => forward(session, |s| s.engine_started()),
            Inbound::EngineResult {
                alternatives,
                is_final,
            } => {
                let transcript = alternatives.into_iter().next().unwrap_or_default();
                forward(session, |s| s.engine_result(transcript, is_final));
            }
            Inbound::EngineEnd => forward(session, |s| s.engine_end()),
            Inbound::EngineError { error } => {
                let kind = EngineErrorKind::from_code(&error);
                forward(session, |s| s.engine_error(kind));
            }
            Inbound::SpeechFinished { id } => {
                let completion = lock(&self.pending_speech).remove(&id);
                match completion {
                    Some(completion) => completion.complete(),
                    None => debug!(id, "unknown speech id"),
                }
            }
            Inbound::ActiveTab(tab) => {
                *lock(&self.active_tab) = tab;
            }
            Inbound::AudioBlock(samples) => {
                debug!(len = samples.len(), "no audio pipeline, client block dropped");
            }
            Inbound::Disconnected { client } => {
                let current = {
                    let mut attachment = lock(&self.attachment);
                    if attachment.is_some_and(|a| a.client == client) {
                        attachment.take();
                        true
                    } else {
                        false
                    }
                };
                if !current {
                    debug!(client, "former bridge client disconnected");
                    return;
                }

                warn!(client, "bridge client disconnected");
                let drained: Vec<Completion> =
                    lock(&self.pending_speech).drain().map(|(_, c)| c).collect();
                // unfired completions resume the session as they drop
                drop(drained);
                forward(session, |s| s.engine_end());
            }
        }
    }

    fn publish(&self, action: Outbound) -> bool {
        match self.outbound.send(action) {
            Ok(_) => true,
            Err(broadcast::error::SendError(action)) => {
                warn!(?action, "no bridge client subscribed, action dropped");
                false
            }
        }
    }
}

impl SpeechEngine for IpcBridge {
    fn is_supported(&self) -> bool {
        self.capabilities().speech_recognition
    }

    fn start(&self) -> bool {
        if !self.reachable() {
            debug!("bridge client not subscribed, engine start undelivered");
            return false;
        }
        self.publish(Outbound::StartEngine)
    }

    fn stop(&self) {
        self.publish(Outbound::StopEngine);
    }

    fn accept_audio(&self, block: &[f32]) {
        if self.capabilities().audio_input && self.reachable() {
            let _ = self.outbound.send(Outbound::Audio {
                samples: block.to_vec(),
            });
        }
    }
}

impl SpeechOutput for IpcBridge {
    fn speak(&self, text: &str, on_complete: Completion) -> Result<(), OutputUnavailable> {
        if !self.capabilities().speech_synthesis || !self.reachable() {
            return Err(OutputUnavailable(on_complete));
        }

        let id = self.next_speech_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.pending_speech).insert(id, on_complete);

        let sent = self.publish(Outbound::Speak {
            id,
            text: text.to_string(),
        });
        if !sent {
            if let Some(completion) = lock(&self.pending_speech).remove(&id) {
                return Err(OutputUnavailable(completion));
            }
        }
        Ok(())
    }
}

impl TabController for IpcBridge {
    fn create_tab(&self, url: &str) {
        self.publish(Outbound::CreateTab {
            url: url.to_string(),
        });
    }

    fn close_active_tab(&self) {
        self.publish(Outbound::CloseActiveTab);
    }

    fn cycle_tab(&self, direction: TabDirection) {
        self.publish(Outbound::CycleTab { direction });
    }

    fn query_active_tab(&self) -> Option<TabInfo> {
        lock(&self.active_tab).clone()
    }
}

impl Notifier for IpcBridge {
    fn display(&self, title: &str, message: &str) {
        self.publish(Outbound::Notify {
            title: title.to_string(),
            message: message.to_string(),
        });
    }
}

fn forward(session: Option<&SessionHandle>, send: impl FnOnce(&SessionHandle) -> bool) {
    match session {
        Some(session) => {
            send(session);
        }
        None => debug!("no active session, engine report dropped"),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{FeedbackTicket, SessionInput};

    const FULL: Capabilities = Capabilities {
        speech_recognition: true,
        speech_synthesis: true,
        audio_input: false,
    };

    fn hello(client: ClientId, subscribed: bool) -> Inbound {
        Inbound::Hello {
            client,
            capabilities: FULL,
            subscribed,
        }
    }

    fn bridge() -> (IpcBridge, broadcast::Receiver<Outbound>) {
        let (tx, rx) = broadcast::channel(16);
        let bridge = IpcBridge::new(tx);
        bridge.route(hello(1, true), None);
        (bridge, rx)
    }

    #[test]
    fn test_engine_support_follows_hello() {
        let (tx, _rx) = broadcast::channel(4);
        let bridge = IpcBridge::new(tx);
        assert!(!bridge.is_supported());

        bridge.route(
            Inbound::Hello {
                client: 1,
                capabilities: Capabilities {
                    speech_recognition: true,
                    ..Capabilities::default()
                },
                subscribed: true,
            },
            None,
        );
        assert!(bridge.is_supported());
    }

    #[test]
    fn test_tab_actions_are_published() {
        let (bridge, mut rx) = bridge();
        bridge.create_tab("https://example.com");
        bridge.cycle_tab(TabDirection::Next);

        assert_eq!(
            rx.try_recv().unwrap(),
            Outbound::CreateTab {
                url: "https://example.com".into()
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            Outbound::CycleTab {
                direction: TabDirection::Next
            }
        );
    }

    #[test]
    fn test_start_reports_delivery() {
        let (tx, mut rx) = broadcast::channel(4);
        let bridge = IpcBridge::new(tx);
        assert!(!bridge.start());

        bridge.route(hello(1, false), None);
        assert!(!bridge.start());
        assert!(rx.try_recv().is_err());

        bridge.route(Inbound::Subscribed { client: 1 }, None);
        assert!(bridge.start());
        assert_eq!(rx.try_recv().unwrap(), Outbound::StartEngine);
    }

    #[test]
    fn test_subscribe_after_hello_attaches_engine() {
        let (tx, _rx) = broadcast::channel(4);
        let bridge = IpcBridge::new(tx);
        let (handle, mut session_rx) = SessionHandle::channel();

        bridge.route(hello(5, false), Some(&handle));
        assert!(session_rx.try_recv().is_err());

        // another connection subscribing does not count
        bridge.route(Inbound::Subscribed { client: 6 }, Some(&handle));
        assert!(session_rx.try_recv().is_err());

        bridge.route(Inbound::Subscribed { client: 5 }, Some(&handle));
        assert!(matches!(
            session_rx.try_recv(),
            Ok(SessionInput::EngineAttached)
        ));
    }

    #[test]
    fn test_new_client_replaces_old_one() {
        let (bridge, _rx) = bridge();
        let (handle, mut session_rx) = SessionHandle::channel();

        bridge.route(hello(2, true), Some(&handle));
        assert!(matches!(session_rx.try_recv(), Ok(SessionInput::EngineEnd)));
        assert!(matches!(
            session_rx.try_recv(),
            Ok(SessionInput::EngineAttached)
        ));

        // the replaced connection closing leaves the new one attached
        bridge.route(Inbound::Disconnected { client: 1 }, Some(&handle));
        assert!(session_rx.try_recv().is_err());
        assert!(bridge.capabilities().speech_synthesis);
        assert!(bridge.start());
    }

    #[test]
    fn test_other_disconnect_keeps_client() {
        let (bridge, _rx) = bridge();
        let (handle, mut session_rx) = SessionHandle::channel();

        bridge.route(Inbound::Disconnected { client: 9 }, Some(&handle));

        assert!(session_rx.try_recv().is_err());
        assert!(bridge.is_supported());
    }

    #[test]
    fn test_speech_completes_on_finished_report() {
        let (bridge, mut rx) = bridge();
        let (handle, mut session_rx) = SessionHandle::channel();

        bridge
            .speak("Opening a new tab.", Completion::new(handle, FeedbackTicket::new(9)))
            .unwrap();
        let Outbound::Speak { id, text } = rx.try_recv().unwrap() else {
            panic!("expected speak action");
        };
        assert_eq!(text, "Opening a new tab.");
        assert!(session_rx.try_recv().is_err());

        bridge.route(Inbound::SpeechFinished { id }, None);
        assert!(matches!(
            session_rx.try_recv(),
            Ok(SessionInput::FeedbackFinished(t)) if t == FeedbackTicket::new(9)
        ));

        // a repeated report is ignored
        bridge.route(Inbound::SpeechFinished { id }, None);
        assert!(session_rx.try_recv().is_err());
    }

    #[test]
    fn test_speak_without_subscriber_is_unavailable() {
        let (tx, rx) = broadcast::channel(4);
        drop(rx);
        let bridge = IpcBridge::new(tx);
        bridge.route(hello(1, true), None);
        let (handle, _session_rx) = SessionHandle::channel();

        let result = bridge.speak("hi", Completion::new(handle, FeedbackTicket::new(1)));
        assert!(result.is_err());
    }

    #[test]
    fn test_speak_before_subscribe_is_unavailable() {
        let (tx, _rx) = broadcast::channel(4);
        let bridge = IpcBridge::new(tx);
        bridge.route(hello(1, false), None);
        let (handle, _session_rx) = SessionHandle::channel();

        let result = bridge.speak("hi", Completion::new(handle, FeedbackTicket::new(1)));
        assert!(result.is_err());
    }

    #[test]
    fn test_disconnect_releases_pending_speech() {
        let (bridge, _rx) = bridge();
        let (handle, mut session_rx) = SessionHandle::channel();
        bridge
            .speak("hi", Completion::new(handle.clone(), FeedbackTicket::new(4)))
            .unwrap();

        bridge.route(Inbound::Disconnected { client: 1 }, Some(&handle));

        assert!(matches!(
            session_rx.try_recv(),
            Ok(SessionInput::FeedbackFinished(_))
        ));
        assert!(matches!(session_rx.try_recv(), Ok(SessionInput::EngineEnd)));
        assert!(!bridge.capabilities().speech_synthesis);
        assert!(!bridge.start());
    }

    #[test]
    fn test_audio_forwarded_only_to_pcm_clients() {
        let (bridge, mut rx) = bridge();
        bridge.accept_audio(&[0.5, -0.5]);
        assert!(rx.try_recv().is_err());

        bridge.route(
            Inbound::Hello {
                client: 1,
                capabilities: Capabilities {
                    audio_input: true,
                    ..FULL
                },
                subscribed: true,
            },
            None,
        );
        bridge.accept_audio(&[0.5, -0.5]);
        assert_eq!(
            rx.try_recv().unwrap(),
            Outbound::Audio {
                samples: vec![0.5, -0.5]
            }
        );
    }

    #[test]
    fn test_engine_reports_are_forwarded() {
        let (bridge, _rx) = bridge();
        let (handle, mut session_rx) = SessionHandle::channel();

        bridge.route(
            Inbound::EngineResult {
                alternatives: vec!["open tab".into(), "often tab".into()],
                is_final: true,
            },
            Some(&handle),
        );
        bridge.route(
            Inbound::EngineError {
                error: "no-speech".into(),
            },
            Some(&handle),
        );

        match session_rx.try_recv() {
            Ok(SessionInput::EngineResult {
                transcript,
                is_final,
            }) => {
                assert_eq!(transcript, "open tab");
                assert!(is_final);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            session_rx.try_recv(),
            Ok(SessionInput::EngineError(EngineErrorKind::NoSpeech))
        ));
    }

    #[test]
    fn test_active_tab_is_cached() {
        let (bridge, _rx) = bridge();
        let tab = TabInfo {
            id: 3,
            index: 1,
            title: "Docs".into(),
            url: "https://docs.rs".into(),
        };
        bridge.route(Inbound::ActiveTab(Some(tab.clone())), None);
        assert_eq!(bridge.query_active_tab(), Some(tab));
    }

    #[test]
    fn test_outbound_serialization() {
        let json = serde_json::to_string(&Outbound::Speak {
            id: 2,
            text: "Please try again.".into(),
        })
        .unwrap();
        assert!(json.contains(r#""action":"speak""#));
    }
}
