//! Unix domain socket server for IPC
//!
//! Provides request-response communication, forwards learner actions to the
//! stage controller, and pushes tutor events to subscribed clients. A
//! subscribed client is also the one servicing speech requests.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, error, info, warn};

use crate::events::TutorEvent;
use crate::state::LearnerAction;
use crate::voice::{ClientRelay, ListenerGuard, SpeechSynthesizer};

use super::protocol::{
    recognition_outcome, speech_failure, Notification, Request, Response, TutorStatus,
};

/// Largest accepted request body
const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// Channels a client connection talks to
#[derive(Clone)]
pub struct ServerLinks {
    /// Learner actions for the stage controller
    pub actions: mpsc::Sender<LearnerAction>,
    /// Speech requests waiting on the front end
    pub relay: Arc<ClientRelay>,
    /// Tutor event bus, subscribed per client
    pub events: broadcast::Sender<TutorEvent>,
}

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    state: Arc<RwLock<ServerState>>,
    links: ServerLinks,
    shutdown_tx: broadcast::Sender<()>,
}

/// Shared server state
struct ServerState {
    status: TutorStatus,
    start_time: Instant,
}

impl Server {
    /// Create a new IPC server bound to `socket_path`
    pub fn new(socket_path: &Path, links: ServerLinks, status: TutorStatus) -> Result<Self> {
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Stale socket from a previous run
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))
                .context("failed to restrict socket permissions")?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener: Some(listener),
            state: Arc::new(RwLock::new(ServerState {
                status,
                start_time: Instant::now(),
            })),
            links,
            shutdown_tx,
        })
    }

    /// Fold a tutor event into the status snapshot
    pub async fn apply_event(&self, event: &TutorEvent) {
        let TutorEvent::StageEntered {
            letter_index,
            glyph,
            stage,
        } = *event
        else {
            return;
        };

        let mut state = self.state.write().await;
        let status = &mut state.status;
        if status.letter_index != letter_index || status.stage != stage {
            debug!(from = %status.stage, to = %stage, letter_index, "IPC server: status updated");
        }
        status.letter_index = letter_index;
        status.glyph = glyph;
        status.stage = stage;
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("server not initialized")?;

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let state = Arc::clone(&self.state);
                    let links = self.links.clone();
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, state, links) => {
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
        stream: UnixStream,
        state: Arc<RwLock<ServerState>>,
        links: ServerLinks,
    ) -> Result<()> {
        let (reader, mut writer) = stream.into_split();

        // Frames are read on their own task so the loop below only selects
        // over cancel-safe channel receives
        let (request_tx, mut request_rx) = mpsc::channel(16);
        let reader_task = tokio::spawn(Self::read_requests(reader, request_tx));

        let mut subscription: Option<(broadcast::Receiver<TutorEvent>, ListenerGuard)> = None;

        let result = loop {
            tokio::select! {
                request = request_rx.recv() => {
                    let Some(request) = request else {
                        debug!("client disconnected");
                        break Ok(());
                    };
                    let response = match request {
                        Ok(Request::Subscribe) => {
                            if subscription.is_none() {
                                subscription =
                                    Some((links.events.subscribe(), links.relay.attach()));
                                debug!("client subscribed to notifications");
                            }
                            Response::Subscribed
                        }
                        Ok(request) => Self::process_request(request, &state, &links).await,
                        Err(e) => {
                            warn!(%e, "invalid request");
                            Response::error("invalid_request", e.to_string())
                        }
                    };
                    if let Err(e) = Self::send_message(&mut writer, &response).await {
                        break Err(e);
                    }
                }
                event = next_event(&mut subscription) => match event {
                    Ok(event) => {
                        let note = Notification::Event { event };
                        if let Err(e) = Self::send_message(&mut writer, &note).await {
                            break Err(e);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "client event receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break Ok(()),
                },
            }
        };

        reader_task.abort();
        result
    }

    /// Read length-prefixed frames until the client hangs up
    async fn read_requests(
        mut reader: OwnedReadHalf,
        request_tx: mpsc::Sender<Result<Request, serde_json::Error>>,
    ) -> Result<()> {
        let mut len_buf = [0u8; 4];

        loop {
            match reader.read_exact(&mut len_buf).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) => return Err(e.into()),
            }

            let len = u32::from_le_bytes(len_buf) as usize;
            if len > MAX_MESSAGE_LEN {
                warn!(len, "message too large, disconnecting");
                return Ok(());
            }

            let mut msg_buf = vec![0u8; len];
            reader.read_exact(&mut msg_buf).await?;

            let request = serde_json::from_slice::<Request>(&msg_buf);
            if request_tx.send(request).await.is_err() {
                return Ok(());
            }
        }
    }

    /// Send a length-prefixed JSON message
    async fn send_message<T: serde::Serialize>(writer: &mut OwnedWriteHalf, msg: &T) -> Result<()> {
        let msg_bytes = serde_json::to_vec(msg)?;
        let msg_len = (msg_bytes.len() as u32).to_le_bytes();

        writer.write_all(&msg_len).await?;
        writer.write_all(&msg_bytes).await?;

        Ok(())
    }

    /// Process a request and return a response
    async fn process_request(
        request: Request,
        state: &Arc<RwLock<ServerState>>,
        links: &ServerLinks,
    ) -> Response {
        debug!(?request, "received request");

        match request {
            Request::Ping => Response::Pong,

            Request::GetStatus => {
                let mut state = state.write().await;
                state.status.uptime_secs = state.start_time.elapsed().as_secs();
                Response::Status(state.status.clone())
            }

            // Handled by the connection loop
            Request::Subscribe => Response::Subscribed,

            // Never block the connection on a busy controller: it may be
            // waiting for this very client to finish speaking
            Request::Action { action } => match links.actions.try_send(action) {
                Ok(()) => Response::Accepted,
                Err(TrySendError::Full(action)) => {
                    warn!(?action, "controller busy, action dropped");
                    Response::error("busy", "tutor is busy, try again")
                }
                Err(TrySendError::Closed(_)) => {
                    Response::error("unavailable", "tutor is shutting down")
                }
            },

            Request::SpeechFinished { id } => {
                links.relay.complete_speech(id, Ok(()));
                Response::Accepted
            }
            Request::SpeechFailed { id, unavailable } => {
                links
                    .relay
                    .complete_speech(id, Err(speech_failure(unavailable, "speech")));
                Response::Accepted
            }
            Request::RecognitionResult { id, transcript } => {
                links
                    .relay
                    .complete_recognition(id, Ok(recognition_outcome(transcript)));
                Response::Accepted
            }
            Request::RecognitionFailed { id, unavailable } => {
                links
                    .relay
                    .complete_recognition(id, Err(speech_failure(unavailable, "recognition")));
                Response::Accepted
            }

            Request::StopAudio => {
                links.relay.stop();
                Response::Accepted
            }
        }
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

/// Next event for a subscribed client; pending forever otherwise
async fn next_event(
    subscription: &mut Option<(broadcast::Receiver<TutorEvent>, ListenerGuard)>,
) -> Result<TutorEvent, broadcast::error::RecvError> {
    match subscription {
        Some((event_rx, _)) => event_rx.recv().await,
        None => std::future::pending().await,
    }
}
