//! Scripted in-process coordinator for tests.
//!
//! Plays the transport-driver role on a [`TransportLink`]: records every
//! command it receives, answers lifecycle commands with the usual events and
//! answers coordinator requests from the closures in a [`Script`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::client::{Command, GcRequest, GcResponse, Inbound, TransportLink};
use crate::event::Event;
use crate::types::{BroadcastPage, EResult, SpectateReply};

/// How the fake answers one request.
#[derive(Debug, Clone)]
pub enum Reply<T> {
    /// Respond with `T` after the delay.
    After(Duration, T),
    /// Respond with a coordinator error.
    Fail(String),
    /// Never respond.
    Silent,
}

impl<T> Reply<T> {
    pub fn now(value: T) -> Self {
        Reply::After(Duration::ZERO, value)
    }

    fn map<U>(self, f: impl FnOnce(T) -> U) -> Reply<U> {
        match self {
            Reply::After(delay, value) => Reply::After(delay, f(value)),
            Reply::Fail(msg) => Reply::Fail(msg),
            Reply::Silent => Reply::Silent,
        }
    }
}

/// Broadcast-list answers keyed by requested offset.
pub type BroadcastScript = Arc<dyn Fn(u32) -> Reply<BroadcastPage> + Send + Sync>;
/// Spectate answers keyed by 1-based attempt number.
pub type SpectateScript = Arc<dyn Fn(u32) -> Reply<SpectateReply> + Send + Sync>;

#[derive(Clone)]
pub struct Script {
    /// Answer `Connect` with `Connected`.
    pub connect: bool,
    /// Answer `LogOn` with this result; `None` leaves login hanging.
    pub log_on_result: Option<EResult>,
    /// Answer `Launch` with `CoordinatorReady`.
    pub ready_on_launch: bool,
    pub broadcast: BroadcastScript,
    pub spectate: SpectateScript,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            connect: true,
            log_on_result: Some(EResult::OK),
            ready_on_launch: true,
            broadcast: Arc::new(|start_game: u32| {
                Reply::now(BroadcastPage {
                    start_game,
                    ..Default::default()
                })
            }),
            spectate: Arc::new(|_: u32| Reply::now(SpectateReply::default())),
        }
    }
}

/// Handle to a running fake coordinator.
#[derive(Clone)]
pub struct FakeCoordinator {
    inbound: mpsc::Sender<Inbound>,
    commands: Arc<Mutex<Vec<Command>>>,
    spectate_attempts: Arc<AtomicU32>,
}

impl FakeCoordinator {
    pub fn spawn(link: TransportLink, script: Script) -> Self {
        let TransportLink { mut commands, inbound } = link;
        let fake = Self {
            inbound: inbound.clone(),
            commands: Arc::new(Mutex::new(Vec::new())),
            spectate_attempts: Arc::new(AtomicU32::new(0)),
        };

        let log = Arc::clone(&fake.commands);
        let attempts = Arc::clone(&fake.spectate_attempts);
        tokio::spawn(async move {
            while let Some(command) = commands.recv().await {
                log.lock().push(command.clone());
                match command {
                    Command::Connect { .. } if script.connect => {
                        let _ = inbound.send(Inbound::Event(Event::Connected)).await;
                    }
                    Command::LogOn(_) => {
                        if let Some(result) = script.log_on_result {
                            let _ = inbound
                                .send(Inbound::Event(Event::LogOnResponse { result }))
                                .await;
                        }
                    }
                    Command::Launch if script.ready_on_launch => {
                        let _ = inbound.send(Inbound::Event(Event::CoordinatorReady)).await;
                    }
                    Command::Request { id, request } => {
                        let reply = match request {
                            GcRequest::SourceTvGames { start_game } => {
                                (script.broadcast)(start_game).map(GcResponse::SourceTvGames)
                            }
                            GcRequest::SpectateFriendGame { .. } => {
                                let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                                (script.spectate)(attempt).map(GcResponse::SpectateFriendGame)
                            }
                        };
                        answer(&inbound, id, reply).await;
                    }
                    _ => {}
                }
            }
        });

        fake
    }

    /// Inject an event as if the transport raised it.
    pub async fn emit(&self, event: Event) {
        let _ = self.inbound.send(Inbound::Event(event)).await;
    }

    /// Every command received so far, in order.
    pub fn commands(&self) -> Vec<Command> {
        self.commands.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&Command) -> bool) -> usize {
        self.commands.lock().iter().filter(|c| pred(c)).count()
    }

    pub fn spectate_attempts(&self) -> u32 {
        self.spectate_attempts.load(Ordering::SeqCst)
    }

    /// Poll the command log until `pred` holds, for at most ~2 s of
    /// (possibly paused) runtime time.
    pub async fn wait_until(&self, pred: impl Fn(&[Command]) -> bool) -> bool {
        for _ in 0..400 {
            if pred(&self.commands.lock()) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }
}

async fn answer(inbound: &mpsc::Sender<Inbound>, id: u64, reply: Reply<GcResponse>) {
    match reply {
        Reply::After(delay, response) => {
            let inbound = inbound.clone();
            tokio::spawn(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let _ = inbound
                    .send(Inbound::Response {
                        id,
                        result: Ok(response),
                    })
                    .await;
            });
        }
        Reply::Fail(message) => {
            let _ = inbound
                .send(Inbound::Response {
                    id,
                    result: Err(message),
                })
                .await;
        }
        Reply::Silent => {}
    }
}
