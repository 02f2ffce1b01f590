//! Responding to channel proposals.
//!
//! The proposing side lives in [PerunClient::propose_channel](crate::PerunClient::propose_channel).
//! Here we check incoming proposals, hand the valid ones to the
//! [ProposalHandler] and send its answer back.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{ActiveChannel, Balances, Params, State, PARTICIPANTS};
use crate::{
    client::ClientInner,
    context::Context,
    error::{Error, Phase},
    messages::{LedgerChannelProposal, LedgerChannelProposalAcc, ParticipantMessage},
    types::{Address, Asset, Hash, U256},
};

/// Answer of the peer to a proposal we sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ProposalReply {
    Accepted { participant: Address },
    Rejected { reason: String },
}

/// A proposal to open a new channel, as shown to the user.
///
/// The proposer has index 0 and the proposee index 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelProposal {
    pub proposal_id: Hash,
    /// The peer proposing the channel.
    pub peer: Address,
    /// Challenge duration in case of disputes, in seconds.
    pub challenge_duration: u64,
    pub asset: Asset,
    pub init_bals: Balances,
    pub nonce: U256,
}

/// Decides how to handle incoming channel proposals.
#[async_trait]
pub trait ProposalHandler: Send + Sync {
    async fn handle_proposal(&self, proposal: ChannelProposal, responder: ProposalResponder);
}

/// Lets the user accept or reject one channel proposal.
///
/// Both `accept` and `reject` consume the responder, so a proposal can only
/// be answered once:
///
/// ```compile_fail
/// # use perun::{channel::ProposalResponder, context::Context};
/// # async fn answer_twice(responder: ProposalResponder, ctx: Context) {
/// responder.reject(&ctx, "no").await.ok();
/// responder.accept(&ctx).await.ok();
/// # }
/// ```
///
/// Dropping it without an answer rejects the proposal.
pub struct ProposalResponder {
    client: Arc<ClientInner>,
    peer: Address,
    proposal: LedgerChannelProposal,
    answered: bool,
}

impl core::fmt::Debug for ProposalResponder {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProposalResponder")
            .field("peer", &self.peer)
            .field("proposal_id", &self.proposal.proposal_id)
            .finish()
    }
}

impl ProposalResponder {
    /// Accept the proposal, fund the channel and return it.
    ///
    /// A fresh participant address is drawn from the wallet for us. It is
    /// important that `ctx` lives long enough for the funding to complete.
    pub async fn accept(mut self, ctx: &Context) -> Result<Arc<ActiveChannel>, Error> {
        self.answered = true;
        let prop = &self.proposal;
        let (asset, init_bals) = prop.init_bals[0].clone();

        let participant = self.client.wallet.new_account();
        let params = Params {
            challenge_duration: prop.challenge_duration,
            nonce: prop.nonce,
            participants: vec![prop.participant, participant],
            app: Address::default(),
        };
        let state = State::new(&params, asset, init_bals);

        // The channel has to exist before the proposer learns about our
        // acceptance, it may start sending updates right away.
        let client = self.client.clone();
        let channel = client.add_channel(params, state, 1, self.peer);
        let acc = ParticipantMessage::ProposalAccepted(LedgerChannelProposalAcc {
            proposal_id: prop.proposal_id,
            participant,
        });
        if let Err(e) = client.send_msg(ctx, Phase::Proposal, &self.peer, acc).await {
            client.forget_channel(&channel.id());
            return Err(e);
        }
        debug!(proposal = ?prop.proposal_id, channel = ?channel.id(), "proposal accepted");

        client.fund_channel(ctx, &channel).await?;
        Ok(channel)
    }

    /// Reject the proposal, telling the proposer why.
    pub async fn reject(mut self, ctx: &Context, reason: &str) -> Result<(), Error> {
        self.answered = true;
        send_reject(&self.client, ctx, self.peer, self.proposal.proposal_id, reason).await
    }
}

impl Drop for ProposalResponder {
    fn drop(&mut self) {
        if self.answered {
            return;
        }
        warn!(proposal = ?self.proposal.proposal_id, "proposal dropped without answer, rejecting");
        if let Ok(rt) = tokio::runtime::Handle::try_current() {
            let client = self.client.clone();
            let peer = self.peer;
            let id = self.proposal.proposal_id;
            rt.spawn(async move {
                let _ = send_reject(&client, &Context::background(), peer, id, "not answered").await;
            });
        }
    }
}

async fn send_reject(
    client: &ClientInner,
    ctx: &Context,
    peer: Address,
    id: Hash,
    reason: &str,
) -> Result<(), Error> {
    client
        .send_msg(
            ctx,
            Phase::Proposal,
            &peer,
            ParticipantMessage::ProposalRejected {
                id,
                reason: reason.to_string(),
            },
        )
        .await
}

/// Checks initial balances of a two-party channel.
pub(crate) fn validate_init_bals(bals: &Balances) -> Result<(), String> {
    if bals.len() != PARTICIPANTS {
        return Err(format!(
            "expected {} balances, got {}",
            PARTICIPANTS,
            bals.len()
        ));
    }
    if bals.total().is_none() {
        return Err("total balance overflows".into());
    }
    Ok(())
}

/// Everything the user is not asked about: proposals we cannot serve at all.
fn validate_proposal(prop: &LedgerChannelProposal, asset: &Asset) -> Result<(), String> {
    if prop.app != Address::default() {
        return Err("only payment channels are supported".into());
    }
    if prop.init_bals.len() != 1 {
        return Err(format!("expected exactly one asset, got {}", prop.init_bals.len()));
    }
    let (prop_asset, bals) = &prop.init_bals[0];
    if prop_asset != asset {
        return Err(format!("unsupported asset {:?}", prop_asset.holder));
    }
    if prop.challenge_duration == 0 {
        return Err("challenge duration must be positive".into());
    }
    validate_init_bals(bals)
}

/// Entry point for incoming proposals.
///
/// Unsupported proposals, and all proposals while no handler is set, are
/// rejected without involving the user. Valid ones are handed to the handler
/// on a separate task.
pub(crate) async fn handle_proposal(
    client: &Arc<ClientInner>,
    handler: Option<Arc<dyn ProposalHandler>>,
    sender: Address,
    prop: LedgerChannelProposal,
) -> Result<(), Error> {
    let id = prop.proposal_id;
    let verdict = match handler {
        None => Err("not accepting proposals".to_string()),
        Some(h) => validate_proposal(&prop, &client.config.asset).map(|_| h),
    };
    let handler = match verdict {
        Ok(h) => h,
        Err(reason) => {
            warn!(proposal = ?id, peer = ?sender, %reason, "rejecting proposal");
            send_reject(client, &Context::background(), sender, id, &reason).await?;
            return Err(Error::UnsupportedProposal(reason));
        }
    };

    let (asset, init_bals) = prop.init_bals[0].clone();
    let proposal = ChannelProposal {
        proposal_id: id,
        peer: sender,
        challenge_duration: prop.challenge_duration,
        asset,
        init_bals,
        nonce: prop.nonce,
    };
    let responder = ProposalResponder {
        client: client.clone(),
        peer: sender,
        proposal: prop,
        answered: false,
    };
    debug!(proposal = ?id, peer = ?sender, "handing proposal to user");
    tokio::spawn(async move { handler.handle_proposal(proposal, responder).await });
    Ok(())
}
