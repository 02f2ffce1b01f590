//! Crate-level error type.

use core::fmt;

use crate::{
    channel::{InvalidUpdate, LedgerError, StateError},
    context::ContextError,
    messages::ConversionError,
    types::{Address, Hash},
    wire::TransportError,
};
use thiserror::Error;

/// Which part of the channel lifecycle an error happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Proposal,
    Funding,
    Update,
    Register,
    Withdraw,
    Settle,
    Watch,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Proposal => "proposal",
            Phase::Funding => "funding",
            Phase::Update => "update",
            Phase::Register => "register",
            Phase::Withdraw => "withdraw",
            Phase::Settle => "settle",
            Phase::Watch => "watch",
        };
        f.write_str(s)
    }
}

/// Failure reported by a chain or storage collaborator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("chain: {0}")]
    Chain(String),
    #[error("event subscription closed")]
    SubscriptionClosed,
    #[error("storage: {0}")]
    Storage(String),
}

#[derive(Debug, Error)]
pub enum Error {
    // Validation, detected before anything is sent.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("invalid balances: {0}")]
    InvalidBalances(String),
    #[error("invalid parameters: {0}")]
    InvalidParams(String),
    #[error("unsupported proposal: {0}")]
    UnsupportedProposal(String),
    #[error("channel {0:?}: state is already final")]
    AlreadyFinal(Hash),
    #[error("channel {0:?}: another update is in progress")]
    UpdateInProgress(Hash),
    #[error("channel {0:?} is closed")]
    ChannelClosed(Hash),
    #[error("channel {0:?} is already being watched")]
    AlreadyWatching(Hash),
    #[error("unknown channel {0:?}")]
    UnknownChannel(Hash),
    #[error("channel {id:?}: invalid update: {source}")]
    InvalidUpdate {
        id: Hash,
        #[source]
        source: InvalidUpdate,
    },
    #[error("channel {id:?}: no pending update with version {version}")]
    UnknownUpdate { id: Hash, version: u64 },
    #[error("no pending proposal {0:?}")]
    UnknownProposal(Hash),
    #[error("message from {got:?}, expected {expected:?}")]
    UnexpectedSender { expected: Address, got: Address },

    // Negotiation.
    #[error("{phase} rejected by peer: {reason}")]
    Rejected { phase: Phase, reason: String },
    #[error("{phase} cancelled")]
    Cancelled { phase: Phase },
    #[error("{phase} timed out")]
    Timeout { phase: Phase },
    #[error("{phase}: transport: {source}")]
    Transport {
        phase: Phase,
        #[source]
        source: TransportError,
    },
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    // Chain.
    #[error("channel {id:?}: funding failed: {source}")]
    Funding {
        id: Hash,
        #[source]
        source: BackendError,
    },
    #[error("channel {id:?}: registration failed: {source}")]
    RegistrationFailed {
        id: Hash,
        #[source]
        source: BackendError,
    },
    #[error("channel {id:?}: withdrawal failed: {source}")]
    WithdrawalFailed {
        id: Hash,
        #[source]
        source: BackendError,
    },
    #[error("channel {id:?}: watcher stopped: {source}")]
    WatcherFailed {
        id: Hash,
        #[source]
        source: BackendError,
    },
    #[error("persistence: {0}")]
    Persistence(#[source] BackendError),
}

impl Error {
    pub(crate) fn from_ctx(e: ContextError, phase: Phase) -> Self {
        match e {
            ContextError::Cancelled => Error::Cancelled { phase },
            ContextError::Timeout => Error::Timeout { phase },
        }
    }

    pub(crate) fn from_state(e: StateError, id: Hash) -> Self {
        match e {
            StateError::AlreadyFinal => Error::AlreadyFinal(id),
            StateError::Ledger(e) => Error::Ledger(e),
        }
    }

    /// Whether the same operation may succeed when retried, possibly with a
    /// fresh context.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Rejected { .. }
                | Error::Cancelled { .. }
                | Error::Timeout { .. }
                | Error::Transport { .. }
                | Error::UpdateInProgress(_)
                | Error::Funding { .. }
                | Error::RegistrationFailed { .. }
                | Error::WithdrawalFailed { .. }
                | Error::WatcherFailed { .. }
        )
    }
}

pub type Result<T, E = Error> = core::result::Result<T, E>;
