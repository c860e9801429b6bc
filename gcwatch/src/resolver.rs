//! Spectate resolver: which server hosts a player's live match.

use gcwatch_sdk::client::{SessionHandle, TransportError};
use gcwatch_sdk::types::{AccountId, SpectateReply, SteamId};

use crate::backoff::{Backoff, RetryPolicy};
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    pub steam_server_id: String,
}

#[derive(Clone)]
pub struct SpectateResolver {
    handle: SessionHandle,
    policy: RetryPolicy,
}

impl SpectateResolver {
    pub fn new(handle: SessionHandle, policy: RetryPolicy) -> Self {
        Self { handle, policy }
    }

    /// Ask the coordinator until it names a server or the retry budget runs
    /// out. Empty answers and failed requests both count as a retryable
    /// attempt.
    pub async fn resolve_server(&self, account_id: AccountId) -> Result<ServerAddress> {
        let steam_id = SteamId::from_account_id(account_id);
        let mut backoff = Backoff::new(self.policy.clone());

        loop {
            let attempt = backoff.attempts() + 1;
            match self.handle.spectate_friend_game(steam_id).await {
                Ok(SpectateReply {
                    server_steamid: Some(server),
                }) if server != 0 => {
                    tracing::info!(%account_id, attempt, server, "Resolved match server");
                    return Ok(ServerAddress {
                        steam_server_id: server.to_string(),
                    });
                }
                Ok(_) => tracing::debug!(%account_id, attempt, "No server yet"),
                Err(TransportError::Closed) => return Err(Error::ShutDown),
                Err(e) => tracing::debug!(%account_id, attempt, error = %e, "Spectate request failed"),
            }

            match backoff.next_delay() {
                Some(delay) => tokio::time::sleep(delay).await,
                None => {
                    tracing::warn!(%account_id, attempts = backoff.attempts(), "Giving up on match server");
                    return Err(Error::NotFound {
                        account_id,
                        attempts: backoff.attempts(),
                    });
                }
            }
        }
    }
}
