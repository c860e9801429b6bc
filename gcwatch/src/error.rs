//! Error type for the gcwatch core.

use gcwatch_sdk::client::TransportError;
use gcwatch_sdk::types::AccountId;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Required login material is absent. Startup must abort.
    #[error("{0} not set")]
    MissingCredentials(&'static str),

    /// The resolver used its whole retry budget without a server id.
    #[error("no spectatable match found for account {account_id} after {attempts} attempts")]
    NotFound { account_id: AccountId, attempts: u32 },

    #[error("subsystem is shut down")]
    ShutDown,

    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("store: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("invalid collection name {0:?}")]
    InvalidCollection(String),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config: {0}")]
    Config(#[from] clap::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
