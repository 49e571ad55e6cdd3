//! Unix domain socket server for IPC
//!
//! Provides request-response communication, push notifications for session
//! events and bridge actions to subscribed clients, and the inbound path for
//! the browser client's engine reports.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::audio::VolumeSample;
use crate::bridge::{ClientId, Inbound, Outbound};
use crate::commands::CommandInfo;
use crate::events::SessionEvent;

use super::protocol::{HistoryEntry, Notification, Request, Response, Snapshot, MAX_FRAME_LEN};

/// Utterances kept in the command history
pub const HISTORY_LIMIT: usize = 50;

/// Channels connecting client handlers to the rest of the daemon
#[derive(Clone)]
pub struct ClientLinks {
    /// Bridge reports, consumed by the daemon's main loop
    pub inbound: mpsc::UnboundedSender<Inbound>,
    pub events: broadcast::Sender<SessionEvent>,
    pub actions: broadcast::Sender<Outbound>,
    pub volume: watch::Receiver<VolumeSample>,
}

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    state: Arc<RwLock<ServerState>>,
    shutdown_tx: broadcast::Sender<()>,
    links: ClientLinks,
    next_client: AtomicU64,
}

/// Shared server state
struct ServerState {
    snapshot: Snapshot,
    start_time: Instant,
}

impl Server {
    /// Create a new IPC server
    pub fn new(socket_path: &Path, commands: Vec<CommandInfo>, links: ClientLinks) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))
                .context("failed to restrict socket permissions")?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        let state = Arc::new(RwLock::new(ServerState {
            snapshot: Snapshot {
                commands,
                ..Snapshot::default()
            },
            start_time: Instant::now(),
        }));

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener: Some(listener),
            state,
            shutdown_tx,
            links,
            next_client: AtomicU64::new(1),
        })
    }

    /// Fold a session event into the UI projection
    pub async fn apply_event(&self, event: &SessionEvent) {
        let mut state = self.state.write().await;
        let snapshot = &mut state.snapshot;

        match event {
            SessionEvent::StateChanged { to, .. } => {
                snapshot.state = *to;
            }
            SessionEvent::TranscriptUpdated { text, .. } => {
                snapshot.live_transcript.clone_from(text);
            }
            SessionEvent::CommandHandled {
                utterance, command, ..
            } => {
                if snapshot.command_history.len() == HISTORY_LIMIT {
                    snapshot.command_history.remove(0);
                }
                snapshot.command_history.push(HistoryEntry {
                    utterance: utterance.clone(),
                    command: command.clone(),
                });
                snapshot.live_transcript.clear();
            }
            SessionEvent::WakeWordDetected
            | SessionEvent::EngineFault { .. }
            | SessionEvent::Fatal { .. } => {}
        }
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("server not initialized")?;

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let id = self.next_client.fetch_add(1, Ordering::Relaxed);
                    debug!(client = id, "client connected");
                    let state = Arc::clone(&self.state);
                    let links = self.links.clone();
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(id, stream, state, links) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Handle a single client connection
    async fn handle_client(
        id: ClientId,
        stream: UnixStream,
        state: Arc<RwLock<ServerState>>,
        links: ClientLinks,
    ) -> Result<()> {
        let (mut reader, writer) = stream.into_split();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        tokio::spawn(write_frames(writer, out_rx));
        let mut client = ClientTasks {
            id,
            forwarder: None,
            is_bridge: false,
            inbound: links.inbound.clone(),
        };

        let mut len_buf = [0u8; 4];

        loop {
            // Read message length (4-byte little-endian)
            match reader.read_exact(&mut len_buf).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    debug!(client = id, "client disconnected");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }

            let len = u32::from_le_bytes(len_buf) as usize;
            if len > MAX_FRAME_LEN {
                warn!(len, "message too large, disconnecting");
                return Ok(());
            }

            // Read message body
            let mut msg_buf = vec![0u8; len];
            reader.read_exact(&mut msg_buf).await?;

            let response = match serde_json::from_slice::<Request>(&msg_buf) {
                Ok(request) => {
                    debug!(?request, "received request");
                    Self::process_request(request, &state, &links, &out_tx, &mut client).await
                }
                Err(e) => {
                    warn!(%e, "failed to parse request");
                    Response::Error {
                        code: "invalid_request".to_string(),
                        message: e.to_string(),
                    }
                }
            };

            if out_tx.send(encode_frame(&response)?).is_err() {
                debug!("client writer closed");
                return Ok(());
            }
        }
    }

    /// Process a request and return a response
    async fn process_request(
        request: Request,
        state: &RwLock<ServerState>,
        links: &ClientLinks,
        out_tx: &mpsc::UnboundedSender<Vec<u8>>,
        client: &mut ClientTasks,
    ) -> Response {
        match request {
            Request::Ping => Response::Pong,

            Request::GetSnapshot => {
                let state = state.read().await;
                let mut snapshot = state.snapshot.clone();
                snapshot.volume = *links.volume.borrow();
                snapshot.uptime_secs = state.start_time.elapsed().as_secs();
                Response::Snapshot(snapshot)
            }

            Request::ListCommands => Response::Commands {
                commands: state.read().await.snapshot.commands.clone(),
            },

            Request::Subscribe => {
                if client.forwarder.is_none() {
                    client.forwarder = Some(spawn_forwarder(links, out_tx.clone()));
                    debug!(client = client.id, "client subscribed to notifications");
                    if client.is_bridge {
                        let _ = links.inbound.send(Inbound::Subscribed { client: client.id });
                    }
                }
                Response::Subscribed
            }

            request => {
                if matches!(request, Request::Hello { .. }) {
                    client.is_bridge = true;
                }
                let subscribed = client.forwarder.is_some();
                match request.into_inbound(client.id, subscribed) {
                    Some(inbound) => match links.inbound.send(inbound) {
                        Ok(()) => Response::Ack,
                        Err(_) => Response::Error {
                            code: "unavailable".to_string(),
                            message: "daemon is shutting down".to_string(),
                        },
                    },
                    None => Response::Error {
                        code: "invalid_request".to_string(),
                        message: "not a bridge report".to_string(),
                    },
                }
            }
        }
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

/// Per-connection state, torn down however the handler exits
struct ClientTasks {
    id: ClientId,
    forwarder: Option<JoinHandle<()>>,
    is_bridge: bool,
    inbound: mpsc::UnboundedSender<Inbound>,
}

impl Drop for ClientTasks {
    fn drop(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        if self.is_bridge {
            let _ = self.inbound.send(Inbound::Disconnected { client: self.id });
        }
    }
}

/// Push events and actions to one subscribed client
fn spawn_forwarder(links: &ClientLinks, out_tx: mpsc::UnboundedSender<Vec<u8>>) -> JoinHandle<()> {
    // subscribe before spawning so nothing published after the ack is missed
    let mut events = links.events.subscribe();
    let mut actions = links.actions.subscribe();

    tokio::spawn(async move {
        loop {
            let notification = tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => Notification::Event(event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "event subscriber lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                action = actions.recv() => match action {
                    Ok(action) => Notification::Action(action),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "action subscriber lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            };

            let frame = match encode_frame(&notification) {
                Ok(frame) => frame,
                Err(e) => {
                    error!(?e, "failed to encode notification");
                    continue;
                }
            };
            if out_tx.send(frame).is_err() {
                break;
            }
        }
    })
}

async fn write_frames(mut writer: OwnedWriteHalf, mut frames: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(frame) = frames.recv().await {
        if let Err(e) = writer.write_all(&frame).await {
            debug!(?e, "client write failed");
            break;
        }
    }
}

/// Encode a length-prefixed JSON message
fn encode_frame<T: Serialize>(msg: &T) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(msg)?;
    let mut frame = Vec::with_capacity(body.len() + 4);
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}
