//! Lifecycle of two-party payment channels: proposing and funding a channel,
//! negotiating payments, watching the adjudicator and settling on-chain.
//!
//! Signing, the peer connection and the contracts are not part of this
//! crate, they are reached through the traits in [backend], [wire] and
//! [persistence]. Everything starts at [PerunClient].

pub mod backend;
pub mod channel;
mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod messages;
pub mod persistence;
pub mod types;
pub mod wire;

#[cfg(test)]
mod testing;

pub use client::PerunClient;
pub use error::{Error, Result};
pub use types::{Address, Asset, Hash, U256};

/// Protobuf message types as they are sent over the wire.
pub mod perunwire {
    pub use crate::wire::proto::*;
}
