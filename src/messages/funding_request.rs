use crate::{
    channel::{PartIdx, Params, State},
    types::Address,
};

/// Asks the funder to deposit participant `part_idx`'s share of the initial
/// balances.
#[derive(Debug, Clone)]
pub struct LedgerChannelFundingRequest {
    pub part_idx: PartIdx,
    pub params: Params,
    pub state: State,
}

/// Everything the adjudicator needs to register a state or withdraw from a
/// concluded channel.
#[derive(Debug, Clone)]
pub struct AdjudicatorReq {
    /// Contract the request is sent to.
    pub adjudicator: Address,
    pub params: Params,
    /// On-chain receiver of withdrawn funds.
    pub acc: Address,
    pub state: State,
    pub idx: PartIdx,
    /// Set when the counterparty is expected to conclude the channel on-chain.
    pub secondary: bool,
}
