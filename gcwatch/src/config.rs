//! Runtime configuration.
//!
//! Every option can come from the command line or, more usually, from the
//! environment. Credentials may hold a `|`-separated list (one entry per
//! bot account); only the first entry is used.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use gcwatch_sdk::client::SessionConfig;

use crate::error::{Error, Result};

/// Value of `GCWATCH_ENV` that turns on automatic reconnection.
pub const PRODUCTION: &str = "production";

#[derive(Parser, Debug, Clone)]
#[command(name = "gcwatch", about = "Game-coordinator match harvester")]
pub struct Config {
    /// Account name(s), `|`-separated
    #[arg(long, env = "STEAM_USER", hide_env_values = true)]
    pub steam_user: Option<String>,

    /// Password(s), `|`-separated, same order as the account names
    #[arg(long, env = "STEAM_PASS", hide_env_values = true)]
    pub steam_pass: Option<String>,

    /// Deployment environment; `production` reconnects after drops
    #[arg(long, env = "GCWATCH_ENV", default_value = "development")]
    pub environment: String,

    /// Directory for the server-list cache and the sentry file
    #[arg(long, env = "GCWATCH_STATE_DIR", default_value = "./volumes")]
    pub state_dir: PathBuf,

    /// SQLite database backing the match store
    #[arg(long, env = "GCWATCH_DB", default_value = "./volumes/gcwatch.db")]
    pub db_path: PathBuf,

    /// Emit JSON logs
    #[arg(long, env = "GCWATCH_LOG_JSON")]
    pub log_json: bool,

    /// Seconds between broadcast-list polls
    #[arg(long, default_value_t = 30)]
    pub poll_interval_secs: u64,

    /// Seconds to wait before relaunching after a hello timeout
    #[arg(long, default_value_t = 30)]
    pub relaunch_delay_secs: u64,

    /// Seconds a single coordinator request may stay unanswered
    #[arg(long, default_value_t = 10)]
    pub request_timeout_secs: u64,

    /// Seconds one poll may spend collecting pages
    #[arg(long, default_value_t = 20)]
    pub collect_timeout_secs: u64,
}

/// The account the session logs in with.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub account_name: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("account_name", &self.account_name)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Build from the process environment only (no command-line parsing).
    pub fn from_env() -> Result<Self> {
        Ok(Self::try_parse_from(["gcwatch"])?)
    }

    pub fn is_production(&self) -> bool {
        self.environment == PRODUCTION
    }

    /// First account name and password. Missing or empty values are fatal.
    pub fn credentials(&self) -> Result<Credentials> {
        let account_name = first_entry(self.steam_user.as_deref()).ok_or(Error::MissingCredentials("STEAM_USER"))?;
        let password = first_entry(self.steam_pass.as_deref()).ok_or(Error::MissingCredentials("STEAM_PASS"))?;
        Ok(Credentials {
            account_name: account_name.to_string(),
            password: password.to_string(),
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn relaunch_delay(&self) -> Duration {
        Duration::from_secs(self.relaunch_delay_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn collect_timeout(&self) -> Duration {
        Duration::from_secs(self.collect_timeout_secs)
    }

    /// Settings for [`gcwatch_sdk::client::attach`].
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            request_timeout: self.request_timeout(),
            ..Default::default()
        }
    }
}

fn first_entry(list: Option<&str>) -> Option<&str> {
    list?.split('|').next().filter(|s| !s.is_empty())
}
