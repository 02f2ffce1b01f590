mod funding_request;
mod proposal;
mod update;

pub use funding_request::{AdjudicatorReq, LedgerChannelFundingRequest};
pub use proposal::{LedgerChannelProposal, LedgerChannelProposalAcc};
pub use update::{LedgerChannelUpdate, LedgerChannelUpdateAccepted};

use crate::{
    channel::{Balances, State},
    perunwire,
    types::{Address, Asset, Hash, U256},
};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConversionError {
    #[error("asset count mismatch")]
    AssetSizeMissmatch,
    #[error("byte length mismatch")]
    ByteLengthMissmatch,
    #[error("expected a field that was missing")]
    ExptectedSome,
    #[error("state channels (app data) are not supported")]
    StateChannelsNotSupported,
    #[error("frame length mismatch")]
    FrameLength,
    #[error("protobuf: {0}")]
    Decode(#[from] prost::DecodeError),
}

/// Messages sent between participants of a channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ParticipantMessage {
    ChannelProposal(LedgerChannelProposal),
    ProposalAccepted(LedgerChannelProposalAcc),
    ProposalRejected {
        id: Hash,
        reason: String,
    },
    ChannelUpdate(LedgerChannelUpdate),
    ChannelUpdateAccepted(LedgerChannelUpdateAccepted),
    ChannelUpdateRejected {
        id: Hash,
        version: u64,
        reason: String,
    },
}

pub(crate) fn hash_from(bytes: Vec<u8>) -> Result<Hash, ConversionError> {
    Hash::try_from(bytes.as_slice()).or(Err(ConversionError::ByteLengthMissmatch))
}

pub(crate) fn address_from(bytes: Vec<u8>) -> Result<Address, ConversionError> {
    Address::try_from(bytes.as_slice()).or(Err(ConversionError::ByteLengthMissmatch))
}

fn u256_from(bytes: &[u8]) -> Result<U256, ConversionError> {
    U256::from_be_slice(bytes).ok_or(ConversionError::ByteLengthMissmatch)
}

impl TryFrom<perunwire::Asset> for Asset {
    type Error = ConversionError;

    fn try_from(value: perunwire::Asset) -> Result<Self, Self::Error> {
        Ok(Asset {
            chain_id: u256_from(&value.chain_id)?,
            holder: address_from(value.holder)?,
        })
    }
}

impl From<Asset> for perunwire::Asset {
    fn from(value: Asset) -> Self {
        Self {
            chain_id: value.chain_id.to_be_bytes().to_vec(),
            holder: value.holder.0.to_vec(),
        }
    }
}

impl TryFrom<perunwire::Balance> for Balances {
    type Error = ConversionError;

    fn try_from(value: perunwire::Balance) -> Result<Self, Self::Error> {
        let balances = value
            .balance
            .iter()
            .map(|b| u256_from(b))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Balances(balances))
    }
}

impl From<Balances> for perunwire::Balance {
    fn from(value: Balances) -> Self {
        perunwire::Balance {
            balance: value.0.iter().map(|v| v.to_be_bytes().to_vec()).collect(),
        }
    }
}

/// Decode an allocation into its assets and the per-asset balances.
///
/// The asset count is not checked here: proposals with more than one asset
/// must still decode, so that they can be rejected with a reason.
pub(crate) fn allocation_from(
    value: perunwire::Allocation,
) -> Result<Vec<(Asset, Balances)>, ConversionError> {
    let balances = value.balances.ok_or(ConversionError::ExptectedSome)?.balances;
    if balances.len() != value.assets.len() {
        return Err(ConversionError::AssetSizeMissmatch);
    }
    value
        .assets
        .into_iter()
        .zip(balances)
        .map(|(a, b)| Ok((a.try_into()?, b.try_into()?)))
        .collect()
}

pub(crate) fn allocation_into(alloc: Vec<(Asset, Balances)>) -> perunwire::Allocation {
    let (assets, balances): (Vec<_>, Vec<_>) = alloc
        .into_iter()
        .map(|(a, b)| (a.into(), b.into()))
        .unzip();
    perunwire::Allocation {
        assets,
        balances: Some(perunwire::Balances { balances }),
    }
}

impl TryFrom<perunwire::State> for State {
    type Error = ConversionError;

    fn try_from(value: perunwire::State) -> Result<Self, Self::Error> {
        if !value.data.is_empty() || value.app.iter().any(|b| *b != 0) {
            return Err(ConversionError::StateChannelsNotSupported);
        }
        let mut alloc = allocation_from(value.allocation.ok_or(ConversionError::ExptectedSome)?)?;
        if alloc.len() != 1 {
            return Err(ConversionError::AssetSizeMissmatch);
        }
        let (asset, balances) = alloc.remove(0);

        Ok(State::from_parts(
            hash_from(value.id)?,
            value.version,
            asset,
            balances,
            value.is_final,
        ))
    }
}

impl From<State> for perunwire::State {
    fn from(value: State) -> Self {
        Self {
            id: value.channel_id().0.to_vec(),
            version: value.version(),
            allocation: Some(allocation_into(vec![(
                value.asset,
                value.balances().clone(),
            )])),
            app: vec![], // Only different if it is a state channel, which we don't support
            data: vec![],
            is_final: value.is_final(),
        }
    }
}
