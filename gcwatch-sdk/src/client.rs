//! Session handle for a game-coordinator transport.
//!
//! The transport itself (connection, login, coordinator protocol) lives
//! outside this crate. This module defines the contract between it and the
//! core: commands flow out through a [`SessionHandle`], events and responses
//! flow back through the [`TransportLink`] handed to the transport driver.
//!
//! ## Request/response pairing
//!
//! Every coordinator request gets a fresh id. The router task spawned by
//! [`attach`] completes the matching pending request when an
//! [`Inbound::Response`] with that id arrives, so responses may come back in
//! any order. Events are forwarded to the consumer in arrival order.
//!
//! ## Shutdown
//!
//! After [`SessionHandle::close`] no command or request leaves the handle,
//! and every outstanding request resolves to [`TransportError::Closed`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::event::Event;
use crate::types::{BroadcastPage, LogOnDetails, ServerEndpoint, SpectateReply, SteamId};

/// Tunables for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long a coordinator request may stay unanswered.
    pub request_timeout: Duration,
    /// Capacity of the outgoing command queue.
    pub command_buffer: usize,
    /// Capacity of the incoming event/response queues.
    pub event_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            command_buffer: 256,
            event_buffer: 4096,
        }
    }
}

/// Requests that expect exactly one response from the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GcRequest {
    /// One page of the broadcast ("source TV") game list.
    SourceTvGames { start_game: u32 },
    /// Locate the live match a player is in.
    SpectateFriendGame { steam_id: SteamId },
}

/// Coordinator responses, one per [`GcRequest`] kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GcResponse {
    SourceTvGames(BroadcastPage),
    SpectateFriendGame(SpectateReply),
}

/// Commands the core sends to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Open the transport connection, optionally skipping server discovery.
    Connect { servers: Vec<ServerEndpoint> },
    Disconnect,
    LogOn(LogOnDetails),
    /// Answer to [`Event::UpdateMachineAuth`].
    MachineAuthAck { job_id: u64, sha_file: Vec<u8> },
    /// Start the game coordinator session.
    Launch,
    /// Leave the game coordinator session.
    Exit,
    Request { id: u64, request: GcRequest },
}

/// What the transport feeds back into the session.
#[derive(Debug)]
pub enum Inbound {
    Event(Event),
    Response {
        id: u64,
        result: Result<GcResponse, String>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("session closed")]
    Closed,
    #[error("request timed out")]
    Timeout,
    #[error("coordinator error: {0}")]
    Remote(String),
    #[error("response did not match request kind")]
    UnexpectedResponse,
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<GcResponse, TransportError>>>>>;

/// The transport driver's end of a session.
pub struct TransportLink {
    pub commands: mpsc::Receiver<Command>,
    pub inbound: mpsc::Sender<Inbound>,
}

/// A handle to a coordinator session. Cheap to clone; all clones share the
/// same pending-request table and closed flag.
#[derive(Clone)]
pub struct SessionHandle {
    cmd_tx: mpsc::Sender<Command>,
    pending: Pending,
    last_id: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
    request_timeout: Duration,
}

/// Create a session: the handle for the core, the event stream, and the link
/// for the transport driver. Spawns the response router, so it must be
/// called inside a tokio runtime.
pub fn attach(config: SessionConfig) -> (SessionHandle, mpsc::Receiver<Event>, TransportLink) {
    let (cmd_tx, cmd_rx) = mpsc::channel(config.command_buffer);
    let (inbound_tx, inbound_rx) = mpsc::channel(config.event_buffer);
    let (event_tx, event_rx) = mpsc::channel(config.event_buffer);
    let pending: Pending = Arc::new(Mutex::new(HashMap::new()));

    let handle = SessionHandle {
        cmd_tx,
        pending: Arc::clone(&pending),
        last_id: Arc::new(AtomicU64::new(1)),
        closed: Arc::new(AtomicBool::new(false)),
        request_timeout: config.request_timeout,
    };

    tokio::spawn(route(inbound_rx, pending, event_tx));

    let link = TransportLink {
        commands: cmd_rx,
        inbound: inbound_tx,
    };
    (handle, event_rx, link)
}

async fn route(
    mut inbound_rx: mpsc::Receiver<Inbound>,
    pending: Pending,
    event_tx: mpsc::Sender<Event>,
) {
    while let Some(inbound) = inbound_rx.recv().await {
        match inbound {
            Inbound::Response { id, result } => {
                let waiter = pending.lock().remove(&id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(result.map_err(TransportError::Remote));
                    }
                    None => tracing::debug!(id, "Response for unknown or expired request"),
                }
            }
            Inbound::Event(event) => {
                if event_tx.send(event).await.is_err() {
                    tracing::trace!("Event receiver dropped");
                }
            }
        }
    }
    tracing::debug!("Transport link closed, failing pending requests");
    for (_, tx) in pending.lock().drain() {
        let _ = tx.send(Err(TransportError::Closed));
    }
}

impl SessionHandle {
    pub async fn connect(&self, servers: Vec<ServerEndpoint>) -> Result<(), TransportError> {
        self.send(Command::Connect { servers }).await
    }

    pub async fn disconnect(&self) -> Result<(), TransportError> {
        self.send(Command::Disconnect).await
    }

    pub async fn log_on(&self, details: LogOnDetails) -> Result<(), TransportError> {
        self.send(Command::LogOn(details)).await
    }

    pub async fn ack_machine_auth(&self, job_id: u64, sha_file: Vec<u8>) -> Result<(), TransportError> {
        self.send(Command::MachineAuthAck { job_id, sha_file }).await
    }

    pub async fn launch(&self) -> Result<(), TransportError> {
        self.send(Command::Launch).await
    }

    pub async fn exit(&self) -> Result<(), TransportError> {
        self.send(Command::Exit).await
    }

    /// Request one page of the broadcast list.
    pub async fn request_source_tv_games(&self, start_game: u32) -> Result<BroadcastPage, TransportError> {
        match self.request(GcRequest::SourceTvGames { start_game }).await? {
            GcResponse::SourceTvGames(page) => Ok(page),
            _ => Err(TransportError::UnexpectedResponse),
        }
    }

    /// Ask the coordinator which server hosts the player's live match.
    pub async fn spectate_friend_game(&self, steam_id: SteamId) -> Result<SpectateReply, TransportError> {
        match self.request(GcRequest::SpectateFriendGame { steam_id }).await? {
            GcResponse::SpectateFriendGame(reply) => Ok(reply),
            _ => Err(TransportError::UnexpectedResponse),
        }
    }

    /// Stop issuing commands and fail every outstanding request.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        for (_, tx) in self.pending.lock().drain() {
            let _ = tx.send(Err(TransportError::Closed));
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of requests still waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.pending.lock().len()
    }

    async fn send(&self, command: Command) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.cmd_tx.send(command).await.map_err(|_| TransportError::Closed)
    }

    async fn request(&self, request: GcRequest) -> Result<GcResponse, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let id = self.last_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        // Released on every exit path, including the caller dropping this future.
        let _slot = PendingSlot {
            pending: &self.pending,
            id,
        };

        // close() may have drained the table between the check and the insert
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        if self.cmd_tx.send(Command::Request { id, request }).await.is_err() {
            return Err(TransportError::Closed);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => Err(TransportError::Timeout),
        }
    }
}

struct PendingSlot<'a> {
    pending: &'a Pending,
    id: u64,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}
