//! Composition root: one session, one poller and one resolver per process.

use std::sync::Arc;

use anyhow::Context;
use gcwatch_sdk::client::SessionHandle;
use gcwatch_sdk::event::Event;
use gcwatch_sdk::types::AccountId;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::backoff::RetryPolicy;
use crate::config::Config;
use crate::credentials::CredentialStore;
use crate::error::Result;
use crate::poller::{GamePoller, PollerOptions};
use crate::resolver::{ServerAddress, SpectateResolver};
use crate::session::{Readiness, SessionManager, SessionOptions};
use crate::store::{DELAYED_GAMES, MatchSink, SqliteStore};

pub struct Harvester {
    session: Arc<SessionManager>,
    resolver: SpectateResolver,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

/// Open the SQLite store named in the config, creating its directory.
pub fn open_store(config: &Config) -> anyhow::Result<SqliteStore> {
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    SqliteStore::open(&config.db_path)
        .with_context(|| format!("Failed to open database {}", config.db_path.display()))
}

impl Harvester {
    /// Validate credentials, wire the components and start the session and
    /// the poll task. Missing credentials fail before anything connects.
    pub async fn start(
        config: &Config,
        session: (SessionHandle, mpsc::Receiver<Event>),
        sink: Arc<dyn MatchSink>,
    ) -> Result<Self> {
        let credentials = config.credentials()?;
        let (handle, events) = session;

        let manager = SessionManager::new(
            handle.clone(),
            CredentialStore::new(&config.state_dir),
            credentials,
            SessionOptions {
                reconnect: config.is_production(),
                relaunch_delay: config.relaunch_delay(),
            },
        );
        let poller = GamePoller::new(
            handle.clone(),
            manager.readiness(),
            sink,
            PollerOptions {
                interval: config.poll_interval(),
                collect_timeout: config.collect_timeout(),
                collection: DELAYED_GAMES.to_string(),
            },
        );
        let resolver = SpectateResolver::new(handle, RetryPolicy::default());

        if let Err(e) = manager.start(events).await {
            manager.shutdown().await;
            return Err(e);
        }
        let poll_task = tokio::spawn(poller.run());
        tracing::info!(environment = %config.environment, "Harvester started");

        Ok(Self {
            session: manager,
            resolver,
            poll_task: Mutex::new(Some(poll_task)),
        })
    }

    /// Process entry point: install logging as configured, open the
    /// configured store and start.
    pub async fn launch(config: &Config, session: (SessionHandle, mpsc::Receiver<Event>)) -> anyhow::Result<Self> {
        crate::logging::init(config.log_json);
        let store = open_store(config)?;
        let harvester = Self::start(config, session, Arc::new(store)).await?;
        Ok(harvester)
    }

    /// [`Harvester::launch`] with configuration read from the environment.
    pub async fn from_env(session: (SessionHandle, mpsc::Receiver<Event>)) -> anyhow::Result<Self> {
        let config = Config::from_env()?;
        Self::launch(&config, session).await
    }

    pub async fn resolve_server(&self, account_id: AccountId) -> Result<ServerAddress> {
        self.resolver.resolve_server(account_id).await
    }

    pub fn is_ready(&self) -> bool {
        self.session.is_ready()
    }

    pub fn readiness(&self) -> Readiness {
        self.session.readiness()
    }

    /// Stop polling, then tear down the session.
    pub async fn shutdown(&self) {
        let task = self.poll_task.lock().take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }
        self.session.shutdown().await;
        tracing::info!("Harvester stopped");
    }
}
