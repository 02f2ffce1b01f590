use super::{address_from, allocation_from, allocation_into, hash_from, ConversionError};
use crate::{
    channel::Balances,
    perunwire,
    types::{Address, Asset, Hash, U256},
};

/// Channel configuration (also exchanged over the network)
///
/// Kept general enough to carry what a peer might send (several assets, an
/// app), so unsupported proposals can be decoded and rejected with a reason.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerChannelProposal {
    pub proposal_id: Hash,
    pub challenge_duration: u64,
    pub nonce: U256,
    pub app: Address,
    pub init_bals: Vec<(Asset, Balances)>,
    /// Participant address of the proposer (index 0).
    pub participant: Address,
}

/// Message sent when a participant accepts the proposed channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerChannelProposalAcc {
    pub proposal_id: Hash,
    pub participant: Address,
}

impl TryFrom<perunwire::LedgerChannelProposalMsg> for LedgerChannelProposal {
    type Error = ConversionError;

    fn try_from(value: perunwire::LedgerChannelProposalMsg) -> Result<Self, Self::Error> {
        let init_bals = match value.init_bals {
            Some(v) => v,
            None => return Err(ConversionError::ExptectedSome),
        };
        let app = if value.app.is_empty() {
            Address::default()
        } else {
            address_from(value.app)?
        };

        Ok(LedgerChannelProposal {
            proposal_id: hash_from(value.proposal_id)?,
            challenge_duration: value.challenge_duration,
            nonce: U256::from_be_slice(&value.nonce).ok_or(ConversionError::ByteLengthMissmatch)?,
            app,
            init_bals: allocation_from(init_bals)?,
            participant: address_from(value.participant)?,
        })
    }
}

impl From<LedgerChannelProposal> for perunwire::LedgerChannelProposalMsg {
    fn from(value: LedgerChannelProposal) -> Self {
        Self {
            proposal_id: value.proposal_id.0.to_vec(),
            challenge_duration: value.challenge_duration,
            nonce: value.nonce.to_be_bytes().to_vec(),
            app: value.app.0.to_vec(),
            init_bals: Some(allocation_into(value.init_bals)),
            participant: value.participant.0.to_vec(),
        }
    }
}

impl TryFrom<perunwire::LedgerChannelProposalAccMsg> for LedgerChannelProposalAcc {
    type Error = ConversionError;

    fn try_from(value: perunwire::LedgerChannelProposalAccMsg) -> Result<Self, Self::Error> {
        Ok(Self {
            proposal_id: hash_from(value.proposal_id)?,
            participant: address_from(value.participant)?,
        })
    }
}

impl From<LedgerChannelProposalAcc> for perunwire::LedgerChannelProposalAccMsg {
    fn from(value: LedgerChannelProposalAcc) -> Self {
        Self {
            proposal_id: value.proposal_id.0.to_vec(),
            participant: value.participant.0.to_vec(),
        }
    }
}
