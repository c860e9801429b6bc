//! Game-coordinator match harvester.
//!
//! Keeps a coordinator session alive ([`session`]), periodically stores the
//! live broadcast matches ([`poller`]) and resolves which server hosts a
//! player's match on demand ([`resolver`]). [`harvester::Harvester`] wires
//! them together.

pub mod backoff;
pub mod config;
pub mod credentials;
pub mod error;
pub mod harvester;
pub mod logging;
pub mod poller;
pub mod resolver;
pub mod session;
pub mod store;

pub use error::{Error, Result};
pub use harvester::Harvester;
