use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard, RwLock,
};

use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

use super::{
    channel_update::{ChannelUpdate, UpdateHandler, UpdateResponder},
    settle::Registration,
    PartIdx, Params, State, StateError,
};
use crate::{
    client::ClientInner,
    context::Context,
    error::{Error, Phase},
    messages::{AdjudicatorReq, LedgerChannelUpdate, ParticipantMessage},
    persistence::ChannelSnapshot,
    types::{Address, Hash, U256},
};

/// Reasons to reject an update proposed by the peer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvalidUpdate {
    #[error("wrong channel id")]
    InvalidChannelID,
    #[error("expected version {expected}, got {got}")]
    InvalidVersionNumber { expected: u64, got: u64 },
    #[error("current state is final")]
    CurrentStateIsFinal,
    #[error("asset changed")]
    AssetsMismatch,
    #[error("number of balances changed")]
    BalancesLengthMismatch,
    #[error("total balance changed")]
    TotalAllocationAmountMismatch,
    #[error("invalid actor index {0}")]
    InvalidActor(PartIdx),
    #[error("update increases the balance of its actor")]
    ActorGains,
}

/// Our own update waiting for the peer's answer.
#[derive(Debug)]
struct PendingUpdate {
    version: u64,
    reply: oneshot::Sender<Result<(), String>>,
}

/// A funded channel, shared between the user, the client's message dispatch
/// and the watcher.
///
/// Updates are strictly sequential: while one update (ours or the peer's) is
/// being negotiated, [send_payment](Self::send_payment) and
/// [finalize](Self::finalize) fail with [Error::UpdateInProgress] and
/// incoming updates are rejected.
pub struct ActiveChannel {
    client: Arc<ClientInner>,
    params: Params,
    idx: PartIdx,
    peer: Address,
    state: RwLock<State>,
    /// Held for the whole negotiation of an update and during settlement.
    pub(super) update_slot: Arc<tokio::sync::Mutex<()>>,
    pending_update: Mutex<Option<PendingUpdate>>,
    update_handler: RwLock<Option<Arc<dyn UpdateHandler>>>,
    pub(super) watching: AtomicBool,
    pub(super) closed: watch::Sender<bool>,
    pub(super) concluded: watch::Sender<bool>,
    pub(super) registration: tokio::sync::Mutex<Option<Registration>>,
    /// Held while withdrawing, so the watcher and `settle` withdraw once.
    pub(super) withdrawn: tokio::sync::Mutex<bool>,
}

impl core::fmt::Debug for ActiveChannel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ActiveChannel")
            .field("id", &self.id())
            .field("idx", &self.idx)
            .field("peer", &self.peer)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ActiveChannel {
    pub(crate) fn new(
        client: Arc<ClientInner>,
        params: Params,
        state: State,
        idx: PartIdx,
        peer: Address,
    ) -> Arc<Self> {
        debug_assert!(idx < params.num_parts());
        debug_assert_eq!(params.channel_id(), state.channel_id());

        Arc::new(ActiveChannel {
            client,
            params,
            idx,
            peer,
            state: RwLock::new(state),
            update_slot: Arc::new(tokio::sync::Mutex::new(())),
            pending_update: Mutex::new(None),
            update_handler: RwLock::new(None),
            watching: AtomicBool::new(false),
            closed: watch::channel(false).0,
            concluded: watch::channel(false).0,
            registration: tokio::sync::Mutex::new(None),
            withdrawn: tokio::sync::Mutex::new(false),
        })
    }

    pub fn id(&self) -> Hash {
        self.params.channel_id()
    }

    /// Our participant index.
    pub fn idx(&self) -> PartIdx {
        self.idx
    }

    pub fn counterparty_idx(&self) -> PartIdx {
        1 - self.idx
    }

    /// Network address of the other participant.
    pub fn peer(&self) -> Address {
        self.peer
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// A copy of the current state.
    pub fn state(&self) -> State {
        match self.state.read() {
            Ok(s) => s.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn version(&self) -> u64 {
        self.state().version()
    }

    pub fn is_watching(&self) -> bool {
        self.watching.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    pub(crate) fn client(&self) -> &Arc<ClientInner> {
        &self.client
    }

    pub(crate) fn snapshot(&self) -> ChannelSnapshot {
        ChannelSnapshot {
            params: self.params.clone(),
            state: self.state(),
            idx: self.idx,
            peer: self.peer,
        }
    }

    /// Handle updates on this channel with `handler` instead of the client's
    /// default handler.
    pub fn handle_updates(&self, handler: impl UpdateHandler + 'static) {
        if let Ok(mut h) = self.update_handler.write() {
            *h = Some(Arc::new(handler));
        }
    }

    /// Stop using this channel: the watcher ends, the client forgets it and
    /// its persisted state is removed, so it is not restored after a restart.
    /// Funds are not touched, use [settle](Self::settle) for that.
    pub async fn close(&self) {
        let id = self.id();
        if self.closed.send_replace(true) {
            return;
        }
        self.client.forget_channel(&id);
        if let Err(e) = self.client.persister.remove(&id).await {
            error!(channel = ?id, error = %e, "could not remove persisted channel");
        }
        info!(channel = ?id, "channel closed");
    }

    pub(super) fn check_open(&self) -> Result<(), Error> {
        if self.is_closed() {
            Err(Error::ChannelClosed(self.id()))
        } else {
            Ok(())
        }
    }

    /// Pay `amount` to the other participant.
    pub async fn send_payment(&self, ctx: &Context, amount: U256) -> Result<(), Error> {
        if amount.is_zero() {
            return Err(crate::channel::LedgerError::InvalidAmount.into());
        }
        let (from, to) = (self.idx, self.counterparty_idx());
        self.update_by(ctx, |s| s.transfer(from, to, amount)).await
    }

    /// Agree with the peer on the current balances as the final state.
    pub async fn finalize(&self, ctx: &Context) -> Result<(), Error> {
        self.update_by(ctx, State::mark_final).await
    }

    /// Propose the successor of the current state, built by `transform`, and
    /// replace the current state with it once the peer accepts.
    ///
    /// If the peer rejects or `ctx` ends first the state stays untouched.
    /// Note that when `ctx` ends after the update was sent, the peer may
    /// still accept it and be one version ahead of us.
    pub async fn update_by<F>(&self, ctx: &Context, transform: F) -> Result<(), Error>
    where
        F: FnOnce(&mut State) -> Result<(), StateError>,
    {
        let id = self.id();
        self.check_open()?;
        let _slot = self
            .update_slot
            .clone()
            .try_lock_owned()
            .map_err(|_| Error::UpdateInProgress(id))?;

        let next = self
            .state()
            .clone_with(transform)
            .map_err(|e| Error::from_state(e, id))?;
        let version = next.version();

        let (tx, rx) = oneshot::channel();
        *self.pending() = Some(PendingUpdate { version, reply: tx });
        debug!(channel = ?id, version, "proposing update");
        let answer = self.negotiate(ctx, next.clone(), rx).await;
        self.pending().take();
        answer?;

        self.commit(next).await;
        Ok(())
    }

    fn pending(&self) -> MutexGuard<'_, Option<PendingUpdate>> {
        match self.pending_update.lock() {
            Ok(p) => p,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn negotiate(
        &self,
        ctx: &Context,
        next: State,
        rx: oneshot::Receiver<Result<(), String>>,
    ) -> Result<(), Error> {
        let msg = ParticipantMessage::ChannelUpdate(LedgerChannelUpdate {
            state: next,
            actor_idx: self.idx,
        });
        self.client
            .send_msg(ctx, Phase::Update, &self.peer, msg)
            .await?;

        match ctx.run(rx).await {
            Err(e) => Err(Error::from_ctx(e, Phase::Update)),
            Ok(Err(_)) => Err(Error::Cancelled {
                phase: Phase::Update,
            }),
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(reason))) => Err(Error::Rejected {
                phase: Phase::Update,
                reason,
            }),
        }
    }

    /// Replace the current state and persist it.
    ///
    /// Both parties agreed on `next` at this point, so it becomes the current
    /// state even if persisting fails. The failure is only logged, the next
    /// commit persists again.
    pub(super) async fn commit(&self, next: State) {
        let version = next.version();
        let is_final = next.is_final();
        match self.state.write() {
            Ok(mut s) => *s = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
        info!(channel = ?self.id(), version, is_final, "update committed");

        if self.is_closed() {
            return;
        }
        if let Err(e) = self.client.persister.save(&self.snapshot()).await {
            error!(channel = ?self.id(), version, error = %e, "could not persist committed state");
        }
    }

    fn check_valid_transition(
        &self,
        current: &State,
        update: &LedgerChannelUpdate,
    ) -> Result<(), InvalidUpdate> {
        let next = &update.state;
        if next.channel_id() != current.channel_id() {
            return Err(InvalidUpdate::InvalidChannelID);
        }
        if current.is_final() {
            return Err(InvalidUpdate::CurrentStateIsFinal);
        }
        if next.version() != current.version() + 1 {
            return Err(InvalidUpdate::InvalidVersionNumber {
                expected: current.version() + 1,
                got: next.version(),
            });
        }
        if next.asset != current.asset {
            return Err(InvalidUpdate::AssetsMismatch);
        }
        if next.balances().len() != current.balances().len() {
            return Err(InvalidUpdate::BalancesLengthMismatch);
        }
        if next.balances().total() != current.balances().total() {
            return Err(InvalidUpdate::TotalAllocationAmountMismatch);
        }
        if update.actor_idx != self.counterparty_idx() {
            return Err(InvalidUpdate::InvalidActor(update.actor_idx));
        }
        // The peer may give funds away, never take them.
        if next.balances().get(update.actor_idx) > current.balances().get(update.actor_idx) {
            return Err(InvalidUpdate::ActorGains);
        }
        Ok(())
    }

    /// Entry point for updates proposed by the peer.
    ///
    /// Invalid updates, updates colliding with one in progress and all
    /// updates while no handler is set are rejected right away. Valid ones
    /// are handed to the update handler on a separate task.
    pub(crate) async fn handle_update(
        self: &Arc<Self>,
        sender: Address,
        update: LedgerChannelUpdate,
    ) -> Result<(), Error> {
        let id = self.id();
        if sender != self.peer {
            return Err(Error::UnexpectedSender {
                expected: self.peer,
                got: sender,
            });
        }
        let version = update.state.version();

        let slot = match self.update_slot.clone().try_lock_owned() {
            Ok(slot) => slot,
            Err(_) => {
                warn!(channel = ?id, version, "update collides with one in progress, rejecting");
                self.send_update_reject(&Context::background(), version, "update in progress")
                    .await?;
                return Err(Error::UpdateInProgress(id));
            }
        };

        if let Err(e) = self.check_open() {
            self.send_update_reject(&Context::background(), version, "channel closed")
                .await?;
            return Err(e);
        }
        let current = self.state();
        if let Err(e) = self.check_valid_transition(&current, &update) {
            warn!(channel = ?id, version, error = %e, "rejecting invalid update");
            self.send_update_reject(&Context::background(), version, &e.to_string())
                .await?;
            return Err(Error::InvalidUpdate { id, source: e });
        }

        let handler = self
            .update_handler
            .read()
            .ok()
            .and_then(|h| h.clone())
            .or_else(|| self.client.default_update_handler());
        let handler = match handler {
            Some(h) => h,
            None => {
                warn!(channel = ?id, version, "no update handler, rejecting");
                return self
                    .send_update_reject(&Context::background(), version, "not accepting updates")
                    .await;
            }
        };

        let proposal = ChannelUpdate {
            current,
            state: update.state.clone(),
            actor_idx: update.actor_idx,
        };
        let responder = UpdateResponder::new(self.clone(), update.state, slot);
        debug!(channel = ?id, version, "handing update to user");
        tokio::spawn(async move { handler.handle_update(proposal, responder).await });
        Ok(())
    }

    pub(super) async fn send_update_reject(
        &self,
        ctx: &Context,
        version: u64,
        reason: &str,
    ) -> Result<(), Error> {
        self.client
            .send_msg(
                ctx,
                Phase::Update,
                &self.peer,
                ParticipantMessage::ChannelUpdateRejected {
                    id: self.id(),
                    version,
                    reason: reason.to_string(),
                },
            )
            .await
    }

    /// Deliver the peer's answer to the update we are waiting for.
    pub(crate) fn resolve_update(
        &self,
        sender: Address,
        version: u64,
        answer: Result<(), String>,
    ) -> Result<(), Error> {
        if sender != self.peer {
            return Err(Error::UnexpectedSender {
                expected: self.peer,
                got: sender,
            });
        }
        let pending = {
            let mut p = self.pending();
            if p.as_ref().map_or(false, |u| u.version == version) {
                p.take()
            } else {
                None
            }
        };
        match pending {
            Some(p) => {
                // The proposer may have given up in the meantime.
                let _ = p.reply.send(answer);
                Ok(())
            }
            None => Err(Error::UnknownUpdate {
                id: self.id(),
                version,
            }),
        }
    }

    pub(super) fn make_adjudicator_req(&self, secondary: bool) -> AdjudicatorReq {
        AdjudicatorReq {
            adjudicator: self.client.config.adjudicator,
            params: self.params.clone(),
            acc: self.client.address,
            state: self.state(),
            idx: self.idx,
            secondary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{channel::Balances, testing, types::Asset};

    fn channel(idx: PartIdx) -> Arc<ActiveChannel> {
        let client = testing::client_inner(Address([0xaa; 20]));
        let params = Params {
            challenge_duration: 10,
            nonce: 3.into(),
            participants: vec![Address([1; 20]), Address([2; 20])],
            app: Address::default(),
        };
        let state = State::new(
            &params,
            Asset::default(),
            Balances(vec![100.into(), 50.into()]),
        );
        ActiveChannel::new(client, params, state, idx, Address([0xbb; 20]))
    }

    fn update(ch: &ActiveChannel, f: impl FnOnce(&mut State) -> Result<(), StateError>) -> LedgerChannelUpdate {
        LedgerChannelUpdate {
            state: ch.state().clone_with(f).unwrap(),
            actor_idx: ch.counterparty_idx(),
        }
    }

    #[test]
    fn peer_may_pay_us() {
        let ch = channel(0);
        let u = update(&ch, |s| s.transfer(1, 0, 10.into()));
        assert_eq!(ch.check_valid_transition(&ch.state(), &u), Ok(()));
        let fin = update(&ch, State::mark_final);
        assert_eq!(ch.check_valid_transition(&ch.state(), &fin), Ok(()));
    }

    #[test]
    fn peer_may_not_take_our_funds() {
        let ch = channel(0);
        let u = update(&ch, |s| s.transfer(0, 1, 10.into()));
        assert_eq!(
            ch.check_valid_transition(&ch.state(), &u),
            Err(InvalidUpdate::ActorGains)
        );
    }

    #[test]
    fn rejects_malformed_updates() {
        let ch = channel(1);
        let current = ch.state();

        let mut wrong_actor = update(&ch, |s| s.transfer(0, 1, 1.into()));
        wrong_actor.actor_idx = 1;
        assert_eq!(
            ch.check_valid_transition(&current, &wrong_actor),
            Err(InvalidUpdate::InvalidActor(1))
        );

        let skipped = LedgerChannelUpdate {
            state: current
                .clone_with(|_| Ok(()))
                .and_then(|s| s.clone_with(|_| Ok(())))
                .unwrap(),
            actor_idx: 0,
        };
        assert_eq!(
            ch.check_valid_transition(&current, &skipped),
            Err(InvalidUpdate::InvalidVersionNumber {
                expected: 1,
                got: 2
            })
        );

        let mut minted = update(&ch, |_| Ok(()));
        minted.state = State::from_parts(
            current.channel_id(),
            1,
            current.asset,
            Balances(vec![100.into(), 60.into()]),
            false,
        );
        assert_eq!(
            ch.check_valid_transition(&current, &minted),
            Err(InvalidUpdate::TotalAllocationAmountMismatch)
        );

        let mut other_asset = update(&ch, |_| Ok(()));
        other_asset.state.asset.holder = Address([7; 20]);
        assert_eq!(
            ch.check_valid_transition(&current, &other_asset),
            Err(InvalidUpdate::AssetsMismatch)
        );

        let fin = current.clone_with(State::mark_final).unwrap();
        let after_final = LedgerChannelUpdate {
            state: fin.clone_with(|_| Ok(())).unwrap_or_else(|_| {
                State::from_parts(fin.channel_id(), 2, fin.asset, fin.balances().clone(), true)
            }),
            actor_idx: 0,
        };
        assert_eq!(
            ch.check_valid_transition(&fin, &after_final),
            Err(InvalidUpdate::CurrentStateIsFinal)
        );
    }

    #[test]
    fn answers_only_the_pending_update() {
        let ch = channel(0);
        let (tx, mut rx) = oneshot::channel();
        *ch.pending_update.lock().unwrap() = Some(PendingUpdate {
            version: 1,
            reply: tx,
        });

        assert!(matches!(
            ch.resolve_update(Address([0xcc; 20]), 1, Ok(())),
            Err(Error::UnexpectedSender { .. })
        ));
        assert!(matches!(
            ch.resolve_update(ch.peer(), 2, Ok(())),
            Err(Error::UnknownUpdate { version: 2, .. })
        ));
        ch.resolve_update(ch.peer(), 1, Err("no".into())).unwrap();
        assert_eq!(rx.try_recv().unwrap(), Err("no".to_string()));
        assert!(ch.pending_update.lock().unwrap().is_none());
    }

    #[test]
    fn poisoned_pending_update_still_works() {
        let ch = channel(0);
        let holder = ch.clone();
        let _ = std::thread::spawn(move || {
            let _pending = holder.pending_update.lock().unwrap();
            panic!("handler panicked");
        })
        .join();
        assert!(ch.pending_update.is_poisoned());

        let (tx, mut rx) = oneshot::channel();
        *ch.pending() = Some(PendingUpdate {
            version: 1,
            reply: tx,
        });
        ch.resolve_update(ch.peer(), 1, Ok(())).unwrap();
        assert_eq!(rx.try_recv().unwrap(), Ok(()));
    }
}
