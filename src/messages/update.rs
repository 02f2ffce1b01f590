use super::{hash_from, ConversionError};
use crate::{
    channel::{PartIdx, State},
    perunwire,
    types::Hash,
};

#[derive(Debug, Clone, PartialEq)]
pub struct LedgerChannelUpdate {
    pub state: State,
    pub actor_idx: PartIdx,
}

impl TryFrom<perunwire::ChannelUpdateMsg> for LedgerChannelUpdate {
    type Error = ConversionError;

    fn try_from(value: perunwire::ChannelUpdateMsg) -> Result<Self, Self::Error> {
        let update = value.channel_update.ok_or(ConversionError::ExptectedSome)?;

        Ok(Self {
            state: update
                .state
                .ok_or(ConversionError::ExptectedSome)?
                .try_into()?,
            actor_idx: update.actor_idx as usize,
        })
    }
}

impl From<LedgerChannelUpdate> for perunwire::ChannelUpdateMsg {
    fn from(value: LedgerChannelUpdate) -> Self {
        Self {
            channel_update: Some(perunwire::ChannelUpdate {
                state: Some(value.state.into()),
                actor_idx: value.actor_idx as u32,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerChannelUpdateAccepted {
    pub channel: Hash,
    pub version: u64,
}

impl TryFrom<perunwire::ChannelUpdateAccMsg> for LedgerChannelUpdateAccepted {
    type Error = ConversionError;

    fn try_from(value: perunwire::ChannelUpdateAccMsg) -> Result<Self, Self::Error> {
        Ok(LedgerChannelUpdateAccepted {
            channel: hash_from(value.channel_id)?,
            version: value.version,
        })
    }
}

impl From<LedgerChannelUpdateAccepted> for perunwire::ChannelUpdateAccMsg {
    fn from(value: LedgerChannelUpdateAccepted) -> Self {
        Self {
            channel_id: value.channel.0.to_vec(),
            version: value.version,
        }
    }
}
