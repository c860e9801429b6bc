//! Connection lifecycle manager.
//!
//! Owns the coordinator session: connects with the cached server list, logs
//! in, launches the coordinator, answers machine-auth challenges and reacts to
//! drops. The current [`ConnectionState`] is published on a watch channel;
//! other components observe it through [`Readiness`] and never change it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use gcwatch_sdk::client::SessionHandle;
use gcwatch_sdk::event::Event;
use gcwatch_sdk::types::{EResult, LogOnDetails};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::Credentials;
use crate::credentials::{CredentialStore, sentry_digest};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    LoggedOn,
    CoordinatorReady,
    /// Terminal.
    ShutDown,
}

impl ConnectionState {
    pub fn is_logged_on(self) -> bool {
        matches!(self, ConnectionState::LoggedOn | ConnectionState::CoordinatorReady)
    }
}

/// Read-only view of the session state.
#[derive(Debug, Clone)]
pub struct Readiness {
    rx: watch::Receiver<ConnectionState>,
}

impl Readiness {
    pub fn state(&self) -> ConnectionState {
        *self.rx.borrow()
    }

    /// Logged on and the coordinator is up.
    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::CoordinatorReady
    }

    /// Current state, marked as seen so [`Readiness::changed`] only reports
    /// later transitions.
    pub fn current(&mut self) -> ConnectionState {
        *self.rx.borrow_and_update()
    }

    /// Wait for the next state change. A dropped manager reads as shut down.
    pub async fn changed(&mut self) -> ConnectionState {
        if self.rx.changed().await.is_err() {
            return ConnectionState::ShutDown;
        }
        *self.rx.borrow_and_update()
    }

    /// Wait until the session reaches `target`. Returns `false` if it shuts
    /// down first.
    pub async fn wait_for(&mut self, target: ConnectionState) -> bool {
        match self
            .rx
            .wait_for(|s| *s == target || *s == ConnectionState::ShutDown)
            .await
        {
            Ok(state) => *state == target,
            Err(_) => target == ConnectionState::ShutDown,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Reconnect after an error or logoff instead of shutting down.
    pub reconnect: bool,
    /// Wait before relaunching after a hello timeout.
    pub relaunch_delay: Duration,
}

#[derive(Default)]
struct Inner {
    sentry: Option<Vec<u8>>,
    relaunch: Option<JoinHandle<()>>,
    events: Option<JoinHandle<()>>,
}

pub struct SessionManager {
    handle: SessionHandle,
    store: CredentialStore,
    credentials: Credentials,
    options: SessionOptions,
    state: watch::Sender<ConnectionState>,
    inner: Mutex<Inner>,
    started: AtomicBool,
    shut_down: AtomicBool,
}

enum Flow {
    Continue,
    Stop,
}

impl SessionManager {
    pub fn new(
        handle: SessionHandle,
        store: CredentialStore,
        credentials: Credentials,
        options: SessionOptions,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Arc::new(Self {
            handle,
            store,
            credentials,
            options,
            state,
            inner: Mutex::new(Inner::default()),
            started: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Load cached login material, connect and start consuming transport
    /// events. Calling it a second time is a no-op.
    pub async fn start(self: &Arc<Self>, events: mpsc::Receiver<Event>) -> Result<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(Error::ShutDown);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::debug!("Session already started");
            return Ok(());
        }

        let sentry = self.store.load_sentry();
        let servers = self.store.load_servers().unwrap_or_default();
        tracing::info!(
            account = %self.credentials.account_name,
            cached_servers = servers.len(),
            has_sentry = sentry.is_some(),
            "Starting session"
        );
        self.inner.lock().sentry = sentry;

        let manager = Arc::clone(self);
        let task = tokio::spawn(async move { manager.run(events).await });
        self.inner.lock().events = Some(task);

        self.set_state(ConnectionState::Connecting);
        self.handle.connect(servers).await?;
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        *self.state.borrow() == ConnectionState::CoordinatorReady
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn readiness(&self) -> Readiness {
        Readiness {
            rx: self.state.subscribe(),
        }
    }

    /// The session handle shared with the poller and resolver.
    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    /// Tear everything down. Returns once cleanup is complete; later calls
    /// return immediately.
    pub async fn shutdown(&self) {
        self.teardown().await;
        // A teardown started by the event loop may still be running.
        self.readiness().wait_for(ConnectionState::ShutDown).await;
        let events = self.inner.lock().events.take();
        if let Some(task) = events {
            task.abort();
            let _ = task.await;
        }
    }

    async fn teardown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Shutting down session");
        let relaunch = self.inner.lock().relaunch.take();
        if let Some(task) = relaunch {
            task.abort();
        }
        if let Err(e) = self.handle.exit().await {
            tracing::debug!(error = %e, "Exit not sent");
        }
        if let Err(e) = self.handle.disconnect().await {
            tracing::debug!(error = %e, "Disconnect not sent");
        }
        self.handle.close();
        self.state.send_replace(ConnectionState::ShutDown);
    }

    async fn run(self: Arc<Self>, mut events: mpsc::Receiver<Event>) {
        while let Some(event) = events.recv().await {
            tracing::debug!(event = event.name(), "Transport event");
            if let Flow::Stop = self.handle_event(event).await {
                return;
            }
        }
        tracing::warn!("Transport event stream ended");
        self.set_state(ConnectionState::Disconnected);
    }

    async fn handle_event(&self, event: Event) -> Flow {
        match event {
            Event::Connected => {
                tracing::info!("Connected, logging on");
                let details = LogOnDetails {
                    account_name: self.credentials.account_name.clone(),
                    password: self.credentials.password.clone(),
                    sha_sentryfile: self.inner.lock().sentry.clone(),
                };
                if let Err(e) = self.handle.log_on(details).await {
                    tracing::warn!(error = %e, "Failed to send logon");
                }
            }
            Event::LogOnResponse { result } if result.is_ok() => {
                tracing::info!("Logged on, launching coordinator session");
                self.set_state(ConnectionState::LoggedOn);
                if let Err(e) = self.handle.launch().await {
                    tracing::warn!(error = %e, "Failed to send launch");
                }
            }
            Event::LogOnResponse { result } => {
                tracing::error!(
                    eresult = %result,
                    class = ?result.classify(),
                    "Login failed"
                );
                self.set_state(ConnectionState::Disconnected);
            }
            Event::LoggedOff { result } => {
                tracing::warn!(eresult = %result, class = ?result.classify(), "Logged off");
                return self.on_connection_lost(Some(result)).await;
            }
            Event::Error { message } => {
                tracing::error!(error = %message, "Transport error");
                return self.on_connection_lost(None).await;
            }
            Event::Servers(servers) => {
                tracing::debug!(count = servers.len(), "Saving server list");
                if let Err(e) = self.store.save_servers(&servers) {
                    tracing::error!(error = %e, "Failed to save server list");
                }
            }
            Event::UpdateMachineAuth { job_id, bytes } => {
                let digest = sentry_digest(&bytes).to_vec();
                if let Err(e) = self.store.save_sentry(&digest) {
                    tracing::error!(job_id, error = %e, "Failed to save sentry, not acknowledging machine auth");
                    return Flow::Continue;
                }
                self.inner.lock().sentry = Some(digest.clone());
                tracing::info!(job_id, "Answering machine-auth challenge");
                if let Err(e) = self.handle.ack_machine_auth(job_id, digest).await {
                    tracing::warn!(error = %e, "Failed to acknowledge machine auth");
                }
            }
            Event::CoordinatorReady => {
                if self.state().is_logged_on() {
                    tracing::info!("Coordinator ready");
                    self.set_state(ConnectionState::CoordinatorReady);
                } else {
                    tracing::warn!(state = ?self.state(), "Coordinator ready while not logged on");
                }
            }
            Event::CoordinatorUnready => {
                if self.state() == ConnectionState::CoordinatorReady {
                    tracing::warn!("Coordinator unready");
                    self.set_state(ConnectionState::LoggedOn);
                }
            }
            Event::HelloTimeout => self.on_hello_timeout().await,
        }
        Flow::Continue
    }

    async fn on_connection_lost(&self, result: Option<EResult>) -> Flow {
        self.set_state(ConnectionState::Disconnected);
        let relaunch = self.inner.lock().relaunch.take();
        if let Some(task) = relaunch {
            task.abort();
        }

        if self.options.reconnect {
            let servers = self.store.load_servers().unwrap_or_default();
            tracing::info!(eresult = ?result, cached_servers = servers.len(), "Reconnecting");
            self.set_state(ConnectionState::Connecting);
            if let Err(e) = self.handle.connect(servers).await {
                tracing::error!(error = %e, "Failed to send reconnect");
            }
            Flow::Continue
        } else {
            tracing::info!("Not reconnecting outside production");
            self.teardown().await;
            Flow::Stop
        }
    }

    async fn on_hello_timeout(&self) {
        tracing::warn!(delay = ?self.options.relaunch_delay, "Coordinator hello timed out, relaunching later");
        if let Err(e) = self.handle.exit().await {
            tracing::warn!(error = %e, "Failed to send exit");
        }
        if self.state().is_logged_on() {
            self.set_state(ConnectionState::LoggedOn);
        }

        let handle = self.handle.clone();
        let state = self.state.subscribe();
        let delay = self.options.relaunch_delay;
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !state.borrow().is_logged_on() {
                tracing::info!("No longer logged on, skipping relaunch");
                return;
            }
            tracing::info!("Relaunching coordinator session");
            if let Err(e) = handle.launch().await {
                tracing::warn!(error = %e, "Failed to send relaunch");
            }
        });

        let previous = self.inner.lock().relaunch.replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn set_state(&self, next: ConnectionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == ConnectionState::ShutDown || *current == next {
                return false;
            }
            *current = next;
            true
        });
        if changed {
            tracing::debug!(state = ?next, "Session state");
        }
    }
}
