//! gcwatch-sdk: the contract between the core and a game-coordinator
//! transport.
//!
//! The wire protocol is not implemented here. A transport driver consumes
//! [`client::Command`]s from a [`client::TransportLink`] and feeds back
//! [`event::Event`]s and id-tagged responses; the core talks to it through a
//! [`client::SessionHandle`].

pub mod client;
pub mod event;
pub mod types;

#[cfg(feature = "testing")]
pub mod testing;
