//! Interfaces of the chain-side collaborators: funder, adjudicator, wallet.

use core::fmt::Debug;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::time::Instant;

use crate::{
    context::Context,
    error::BackendError,
    messages::{AdjudicatorReq, LedgerChannelFundingRequest},
    types::{Address, Hash},
};

#[async_trait]
pub trait Funder: Debug + Send + Sync {
    /// Deposit our share and wait until the channel is fully funded.
    async fn fund(&self, req: LedgerChannelFundingRequest, ctx: &Context)
        -> Result<(), BackendError>;
}

/// On-chain events of an adjudicator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdjudicatorEvent {
    /// A state was registered. It can be refuted with a newer one until
    /// `timeout`.
    Registered {
        id: Hash,
        version: u64,
        timeout: Instant,
    },
    /// The channel is concluded, funds can be withdrawn.
    Concluded { id: Hash, version: u64 },
}

impl AdjudicatorEvent {
    pub fn channel_id(&self) -> Hash {
        match self {
            AdjudicatorEvent::Registered { id, .. } => *id,
            AdjudicatorEvent::Concluded { id, .. } => *id,
        }
    }
}

pub type EventStream = BoxStream<'static, Result<AdjudicatorEvent, BackendError>>;

#[async_trait]
pub trait Adjudicator: Debug + Send + Sync {
    /// Register `req.state` on-chain.
    ///
    /// The watcher and a foreground settlement may both call this for the same
    /// channel. Registering the same or an older version than what is
    /// already registered must succeed without effect.
    async fn register(&self, req: &AdjudicatorReq, ctx: &Context) -> Result<(), BackendError>;

    /// Withdraw participant `req.idx`'s funds of a concluded channel to
    /// `req.acc`.
    async fn withdraw(&self, req: &AdjudicatorReq, ctx: &Context) -> Result<(), BackendError>;

    /// Events concerning channel `id`. Implementations may deliver events of
    /// other channels too, they are ignored.
    async fn subscribe(&self, id: Hash) -> Result<EventStream, BackendError>;
}

/// Source of participant identities. Every channel gets a fresh one.
pub trait Wallet: Debug + Send + Sync {
    fn new_account(&self) -> Address;
}
