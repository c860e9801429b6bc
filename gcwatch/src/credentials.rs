//! Credential & server-cache store.
//!
//! Two small files in the state directory:
//! - `servers.json`: last edge-server list reported by the transport
//! - `sentry`: raw SHA-1 digest answering the machine-auth challenge
//!
//! Both are read once at startup and rewritten in place on the matching event.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use gcwatch_sdk::types::ServerEndpoint;
use sha1::{Digest, Sha1};

const SERVERS_FILE: &str = "servers.json";
const SENTRY_FILE: &str = "sentry";

/// Device fingerprint for a machine-auth challenge payload.
pub fn sentry_digest(bytes: &[u8]) -> [u8; 20] {
    let mut out = [0u8; 20];
    out.copy_from_slice(&Sha1::digest(bytes));
    out
}

#[derive(Debug, Clone)]
pub struct CredentialStore {
    dir: PathBuf,
}

impl CredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cached server list, if one was saved and still parses.
    pub fn load_servers(&self) -> Option<Vec<ServerEndpoint>> {
        let path = self.dir.join(SERVERS_FILE);
        if !path.exists() {
            return None;
        }
        match std::fs::read_to_string(&path) {
            Ok(s) => match serde_json::from_str(&s) {
                Ok(servers) => Some(servers),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable server list");
                    None
                }
            },
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Can't read server list");
                None
            }
        }
    }

    pub fn save_servers(&self, servers: &[ServerEndpoint]) -> Result<()> {
        let json = serde_json::to_string(servers).context("Failed to serialize server list")?;
        self.write(SERVERS_FILE, json.as_bytes())
    }

    /// Stored sentry digest. An empty file counts as absent.
    pub fn load_sentry(&self) -> Option<Vec<u8>> {
        let path = self.dir.join(SENTRY_FILE);
        match std::fs::read(&path) {
            Ok(bytes) if !bytes.is_empty() => Some(bytes),
            Ok(_) => None,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Can't read sentry file");
                None
            }
        }
    }

    pub fn save_sentry(&self, digest: &[u8]) -> Result<()> {
        self.write(SENTRY_FILE, digest)
    }

    fn write(&self, name: &str, contents: &[u8]) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create state directory {}", self.dir.display()))?;
        let path = self.dir.join(name);
        std::fs::write(&path, contents).with_context(|| format!("Failed to write {}", path.display()))
    }
}
