//! Events emitted by the coordinator transport for the core to consume.

use crate::types::{EResult, ServerEndpoint};

/// Events the transport emits to the consumer (lifecycle manager, tests).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Transport connection established; login may begin.
    Connected,

    /// Result of a `LogOn` command.
    LogOnResponse {
        result: EResult,
    },

    /// The session was logged off by the remote side.
    LoggedOff {
        result: EResult,
    },

    /// Transport-level failure. The connection is gone.
    Error {
        message: String,
    },

    /// Updated list of edge servers.
    Servers(Vec<ServerEndpoint>),

    /// Machine-auth challenge. Must be answered with
    /// [`Command::MachineAuthAck`](crate::client::Command::MachineAuthAck)
    /// carrying the same `job_id`.
    UpdateMachineAuth {
        job_id: u64,
        bytes: Vec<u8>,
    },

    /// The game coordinator session is up.
    CoordinatorReady,

    /// The game coordinator session went away (transport still logged on).
    CoordinatorUnready,

    /// The coordinator never acknowledged the hello handshake.
    HelloTimeout,
}

impl Event {
    /// Short name used in log fields.
    pub fn name(&self) -> &'static str {
        match self {
            Event::Connected => "connected",
            Event::LogOnResponse { .. } => "logOnResponse",
            Event::LoggedOff { .. } => "loggedOff",
            Event::Error { .. } => "error",
            Event::Servers(_) => "servers",
            Event::UpdateMachineAuth { .. } => "updateMachineAuth",
            Event::CoordinatorReady => "ready",
            Event::CoordinatorUnready => "unready",
            Event::HelloTimeout => "helloTimeout",
        }
    }
}
