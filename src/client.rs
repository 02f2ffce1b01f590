use std::{
    collections::HashMap,
    sync::{Arc, Mutex, RwLock},
};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::{
    backend::{Adjudicator, Funder, Wallet},
    channel::{
        validate_init_bals, ActiveChannel, Balances, PartIdx, Params, ProposalHandler,
        ProposalReply, State, UpdateHandler,
    },
    config::Config,
    context::Context,
    error::{Error, Phase},
    messages::{LedgerChannelFundingRequest, LedgerChannelProposal, ParticipantMessage},
    persistence::{ChannelSnapshot, Persister},
    types::{Address, Hash},
    wire::Transport,
};

#[derive(Debug)]
pub(crate) struct PendingProposal {
    pub peer: Address,
    pub reply: oneshot::Sender<ProposalReply>,
}

pub(crate) struct ClientInner {
    pub config: Config,
    /// Our peer address, also the on-chain receiver of withdrawals.
    pub address: Address,
    pub transport: Arc<dyn Transport>,
    pub funder: Arc<dyn Funder>,
    pub adjudicator: Arc<dyn Adjudicator>,
    pub wallet: Arc<dyn Wallet>,
    pub persister: Arc<dyn Persister>,
    proposal_handler: RwLock<Option<Arc<dyn ProposalHandler>>>,
    update_handler: RwLock<Option<Arc<dyn UpdateHandler>>>,
    pending_proposals: Mutex<HashMap<Hash, PendingProposal>>,
    channels: Mutex<HashMap<Hash, Arc<ActiveChannel>>>,
}

impl core::fmt::Debug for ClientInner {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PerunClient")
            .field("address", &self.address)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ClientInner {
    pub(crate) async fn send_msg(
        &self,
        ctx: &Context,
        phase: Phase,
        peer: &Address,
        msg: ParticipantMessage,
    ) -> Result<(), Error> {
        ctx.run(self.transport.send(peer, msg))
            .await
            .map_err(|e| Error::from_ctx(e, phase))?
            .map_err(|source| Error::Transport { phase, source })
    }

    pub(crate) fn default_update_handler(&self) -> Option<Arc<dyn UpdateHandler>> {
        self.update_handler.read().ok()?.clone()
    }

    pub(crate) fn take_pending_proposal(&self, id: &Hash) -> Option<PendingProposal> {
        self.pending_proposals.lock().ok()?.remove(id)
    }

    pub(crate) fn forget_channel(&self, id: &Hash) {
        if let Ok(mut channels) = self.channels.lock() {
            channels.remove(id);
        }
    }

    fn channel(&self, id: &Hash) -> Option<Arc<ActiveChannel>> {
        self.channels.lock().ok()?.get(id).cloned()
    }

    /// Make a channel known, so that messages for it are dispatched to it.
    pub(crate) fn add_channel(
        self: &Arc<Self>,
        params: Params,
        state: State,
        idx: PartIdx,
        peer: Address,
    ) -> Arc<ActiveChannel> {
        let channel = ActiveChannel::new(self.clone(), params, state, idx, peer);
        if let Ok(mut channels) = self.channels.lock() {
            channels.insert(channel.id(), channel.clone());
        }
        channel
    }

    /// Fund a freshly added channel and persist its initial state. A failed
    /// funding removes the channel again.
    pub(crate) async fn fund_channel(
        &self,
        ctx: &Context,
        channel: &Arc<ActiveChannel>,
    ) -> Result<(), Error> {
        let id = channel.id();
        let req = LedgerChannelFundingRequest {
            part_idx: channel.idx(),
            params: channel.params().clone(),
            state: channel.state(),
        };
        let funded = ctx
            .run(self.funder.fund(req, ctx))
            .await
            .map_err(|e| Error::from_ctx(e, Phase::Funding))
            .and_then(|r| r.map_err(|source| Error::Funding { id, source }));
        if let Err(e) = funded {
            warn!(channel = ?id, error = %e, "funding failed");
            self.forget_channel(&id);
            return Err(e);
        }

        self.persister
            .save(&channel.snapshot())
            .await
            .map_err(Error::Persistence)?;
        info!(channel = ?id, idx = channel.idx(), peer = ?channel.peer(), "channel opened");
        Ok(())
    }
}

/// The main Perun object used to create new channels and dispatch incoming
/// messages to them.
///
/// Cheap to clone, all clones share the same channels. Usually you only need
/// one PerunClient.
#[derive(Debug, Clone)]
pub struct PerunClient {
    pub(crate) inner: Arc<ClientInner>,
}

impl PerunClient {
    pub fn new(
        config: Config,
        address: Address,
        transport: Arc<dyn Transport>,
        funder: Arc<dyn Funder>,
        adjudicator: Arc<dyn Adjudicator>,
        wallet: Arc<dyn Wallet>,
        persister: Arc<dyn Persister>,
    ) -> Self {
        PerunClient {
            inner: Arc::new(ClientInner {
                config,
                address,
                transport,
                funder,
                adjudicator,
                wallet,
                persister,
                proposal_handler: RwLock::new(None),
                update_handler: RwLock::new(None),
                pending_proposals: Mutex::new(HashMap::new()),
                channels: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn address(&self) -> Address {
        self.inner.address
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Incoming channel proposals are handed to `handler`. Without a handler
    /// all proposals are rejected.
    pub fn handle_channel_proposals(&self, handler: impl ProposalHandler + 'static) {
        if let Ok(mut h) = self.inner.proposal_handler.write() {
            *h = Some(Arc::new(handler));
        }
    }

    /// Handler for incoming updates on channels that have none of their own,
    /// see [ActiveChannel::handle_updates].
    pub fn handle_updates(&self, handler: impl UpdateHandler + 'static) {
        if let Ok(mut h) = self.inner.update_handler.write() {
            *h = Some(Arc::new(handler));
        }
    }

    pub fn channel(&self, id: &Hash) -> Option<Arc<ActiveChannel>> {
        self.inner.channel(id)
    }

    pub fn channels(&self) -> Vec<Arc<ActiveChannel>> {
        self.inner
            .channels
            .lock()
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Propose a new channel to `peer` and wait until it is accepted and
    /// funded.
    ///
    /// We are participant 0. If `ctx` ends before the peer answers, no channel
    /// is created. It is important that the context lives long enough for the
    /// funding to complete.
    pub async fn propose_channel(
        &self,
        ctx: &Context,
        peer: Address,
        challenge_duration: u64,
        init_bals: Balances,
    ) -> Result<Arc<ActiveChannel>, Error> {
        if challenge_duration == 0 {
            return Err(Error::InvalidParams("challenge duration must be positive".into()));
        }
        validate_init_bals(&init_bals).map_err(Error::InvalidBalances)?;

        let participant = self.inner.wallet.new_account();
        let prop = LedgerChannelProposal {
            proposal_id: rand::random(),
            challenge_duration,
            // Uniform over all of U256, so identical proposals still get
            // distinct channel ids.
            nonce: rand::random(),
            app: Address::default(),
            init_bals: vec![(self.inner.config.asset, init_bals.clone())],
            participant,
        };
        let proposal_id = prop.proposal_id;
        let nonce = prop.nonce;

        let (tx, rx) = oneshot::channel();
        if let Ok(mut pending) = self.inner.pending_proposals.lock() {
            pending.insert(proposal_id, PendingProposal { peer, reply: tx });
        }
        debug!(proposal = ?proposal_id, peer = ?peer, "proposing channel");

        let reply = self.await_proposal_reply(ctx, peer, prop, rx).await;
        self.inner.take_pending_proposal(&proposal_id);
        let their_participant = reply?;

        let params = Params {
            challenge_duration,
            nonce,
            participants: vec![participant, their_participant],
            app: Address::default(),
        };
        let state = State::new(&params, self.inner.config.asset, init_bals);
        let channel = self.inner.add_channel(params, state, 0, peer);
        self.inner.fund_channel(ctx, &channel).await?;
        Ok(channel)
    }

    async fn await_proposal_reply(
        &self,
        ctx: &Context,
        peer: Address,
        prop: LedgerChannelProposal,
        rx: oneshot::Receiver<ProposalReply>,
    ) -> Result<Address, Error> {
        self.inner
            .send_msg(ctx, Phase::Proposal, &peer, ParticipantMessage::ChannelProposal(prop))
            .await?;

        match ctx.run(rx).await {
            Err(e) => Err(Error::from_ctx(e, Phase::Proposal)),
            Ok(Err(_)) => Err(Error::Cancelled {
                phase: Phase::Proposal,
            }),
            Ok(Ok(ProposalReply::Accepted { participant })) => Ok(participant),
            Ok(Ok(ProposalReply::Rejected { reason })) => Err(Error::Rejected {
                phase: Phase::Proposal,
                reason,
            }),
        }
    }

    /// Feed a message received from `sender` into the client.
    ///
    /// Proposal and update handlers run on their own tasks, so this never
    /// waits for the user.
    pub async fn handle_message(&self, sender: Address, msg: ParticipantMessage) -> Result<(), Error> {
        match msg {
            ParticipantMessage::ChannelProposal(prop) => {
                let handler = self.inner.proposal_handler.read().ok().and_then(|h| h.clone());
                crate::channel::handle_proposal(&self.inner, handler, sender, prop).await
            }
            ParticipantMessage::ProposalAccepted(acc) => {
                self.resolve_proposal(sender, acc.proposal_id, ProposalReply::Accepted {
                    participant: acc.participant,
                })
            }
            ParticipantMessage::ProposalRejected { id, reason } => {
                self.resolve_proposal(sender, id, ProposalReply::Rejected { reason })
            }
            ParticipantMessage::ChannelUpdate(update) => {
                let id = update.state.channel_id();
                let channel = self.channel(&id).ok_or(Error::UnknownChannel(id))?;
                channel.handle_update(sender, update).await
            }
            ParticipantMessage::ChannelUpdateAccepted(acc) => {
                let channel = self.channel(&acc.channel).ok_or(Error::UnknownChannel(acc.channel))?;
                channel.resolve_update(sender, acc.version, Ok(()))
            }
            ParticipantMessage::ChannelUpdateRejected {
                id,
                version,
                reason,
            } => {
                let channel = self.channel(&id).ok_or(Error::UnknownChannel(id))?;
                channel.resolve_update(sender, version, Err(reason))
            }
        }
    }

    fn resolve_proposal(&self, sender: Address, id: Hash, reply: ProposalReply) -> Result<(), Error> {
        let mut pending = match self.inner.pending_proposals.lock() {
            Ok(p) => p,
            Err(_) => return Err(Error::UnknownProposal(id)),
        };
        match pending.get(&id) {
            None => Err(Error::UnknownProposal(id)),
            Some(p) if p.peer != sender => Err(Error::UnexpectedSender {
                expected: p.peer,
                got: sender,
            }),
            Some(_) => {
                if let Some(p) = pending.remove(&id) {
                    // The proposer may have given up in the meantime.
                    let _ = p.reply.send(reply);
                }
                Ok(())
            }
        }
    }

    /// Dispatch incoming messages until the sending side closes.
    ///
    /// Errors caused by single messages (unknown channels, unexpected
    /// senders) are logged and do not stop the loop.
    pub async fn listen(&self, mut incoming: mpsc::Receiver<(Address, ParticipantMessage)>) {
        while let Some((sender, msg)) = incoming.recv().await {
            if let Err(e) = self.handle_message(sender, msg).await {
                warn!(sender = ?sender, error = %e, "dropping message");
            }
        }
        debug!("incoming message stream closed");
    }

    /// Bring back all persisted channels that are not loaded yet.
    ///
    /// Watchers are not restarted, call [ActiveChannel::watch] on the
    /// returned channels.
    pub async fn restore_channels(&self) -> Result<Vec<Arc<ActiveChannel>>, Error> {
        let snapshots = self
            .inner
            .persister
            .load_all()
            .await
            .map_err(Error::Persistence)?;

        let mut restored = Vec::new();
        for ChannelSnapshot {
            params,
            state,
            idx,
            peer,
        } in snapshots
        {
            let id = state.channel_id();
            if self.channel(&id).is_some() {
                continue;
            }
            if params.channel_id() != id {
                warn!(channel = ?id, "persisted state does not match its parameters, skipping");
                continue;
            }
            let channel = self.inner.add_channel(params, state, idx, peer);
            info!(channel = ?id, version = channel.version(), "channel restored");
            restored.push(channel);
        }
        Ok(restored)
    }
}
