mod encoding;
pub(crate) mod proto;

use core::fmt::Debug;

use async_trait::async_trait;
use thiserror::Error;

pub use encoding::ProtoBufEncodingLayer;

use crate::{messages::ParticipantMessage, types::Address};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("peer {0:?} is unreachable")]
    Unreachable(Address),
    #[error("encoding: {0}")]
    Encoding(String),
    #[error("{0}")]
    Other(String),
}

/// Byte based transport, e.g. a TCP connection per peer.
#[async_trait]
pub trait BytesBus: Debug + Send + Sync {
    async fn send(&self, peer: &Address, msg: &[u8]) -> Result<(), TransportError>;
}

/// Delivers participant messages to peers.
///
/// Inbound messages are handed to
/// [PerunClient::handle_message](crate::PerunClient::handle_message) by
/// whoever receives them.
#[async_trait]
pub trait Transport: Debug + Send + Sync {
    async fn send(&self, peer: &Address, msg: ParticipantMessage) -> Result<(), TransportError>;
}
