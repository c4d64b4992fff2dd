//! Structures to communicate with a streaming message broker
//!
//! The broker is modelled by a small set of traits in [`broker`]. A [`BrokerClient`] establishes
//! [`BrokerSession`]s which publish raw payloads onto subjects and create durable, queue-grouped
//! consumers. Every consumer hands [`BrokerMessage`]s to a [`MessageHandler`] which is responsible
//! for acknowledging them. Anything that has not been acknowledged within the configured ack-wait
//! duration is delivered again.
//!
//! Third-party broker clients are not trusted to fail gracefully. The [`ConnectionManager`] wraps
//! every call into a session in a recovery boundary so that panics surface as ordinary
//! [`BrokerError`]s, and [`SharedConnection`] builds a reconnectable, shareable handle on top of it.

mod broker;
mod connection;
mod error;
mod shared;

pub mod implementation;

pub use broker::*;
pub use connection::*;
pub use error::BrokerError;
pub use shared::SharedConnection;
