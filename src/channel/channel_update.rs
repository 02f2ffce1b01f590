//! Answering updates proposed by the peer.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};

use super::{active::ActiveChannel, PartIdx, State};
use crate::{
    context::Context,
    error::{Error, Phase},
    messages::{LedgerChannelUpdateAccepted, ParticipantMessage},
};

/// An update proposed by the peer, as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelUpdate {
    /// Our current state.
    pub current: State,
    /// The proposed successor of `current`.
    pub state: State,
    /// Participant that proposed the update.
    pub actor_idx: PartIdx,
}

/// Decides how to handle updates proposed by the peer.
#[async_trait]
pub trait UpdateHandler: Send + Sync {
    async fn handle_update(&self, update: ChannelUpdate, responder: UpdateResponder);
}

/// Lets the user accept or reject one update. Consumed by answering, so an
/// update can only be answered once:
///
/// ```compile_fail
/// # use perun::{channel::UpdateResponder, context::Context};
/// # async fn answer_twice(responder: UpdateResponder, ctx: Context) {
/// responder.accept(&ctx).await.ok();
/// responder.reject(&ctx, "changed my mind").await.ok();
/// # }
/// ```
///
/// Until it is answered no other update can happen on the channel. Dropping
/// it without an answer rejects the update.
pub struct UpdateResponder {
    channel: Arc<ActiveChannel>,
    state: State,
    slot: Option<OwnedMutexGuard<()>>,
}

impl core::fmt::Debug for UpdateResponder {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UpdateResponder")
            .field("channel", &self.channel.id())
            .field("version", &self.state.version())
            .finish()
    }
}

impl UpdateResponder {
    pub(super) fn new(
        channel: Arc<ActiveChannel>,
        state: State,
        slot: OwnedMutexGuard<()>,
    ) -> Self {
        UpdateResponder {
            channel,
            state,
            slot: Some(slot),
        }
    }

    pub fn channel(&self) -> &Arc<ActiveChannel> {
        &self.channel
    }

    /// Accept the update and make it the channel's current state.
    pub async fn accept(mut self, ctx: &Context) -> Result<(), Error> {
        let _slot = self.slot.take();
        let state = self.state.clone();
        let acc = LedgerChannelUpdateAccepted {
            channel: self.channel.id(),
            version: state.version(),
        };
        self.channel
            .client()
            .send_msg(
                ctx,
                Phase::Update,
                &self.channel.peer(),
                ParticipantMessage::ChannelUpdateAccepted(acc),
            )
            .await?;
        debug!(channel = ?acc.channel, version = acc.version, "update accepted");
        self.channel.commit(state).await;
        Ok(())
    }

    /// Reject the update, the channel keeps its current state.
    pub async fn reject(mut self, ctx: &Context, reason: &str) -> Result<(), Error> {
        let _slot = self.slot.take();
        self.channel
            .send_update_reject(ctx, self.state.version(), reason)
            .await
    }
}

impl Drop for UpdateResponder {
    fn drop(&mut self) {
        let slot = match self.slot.take() {
            Some(slot) => slot,
            None => return,
        };
        let channel = self.channel.clone();
        let version = self.state.version();
        warn!(channel = ?channel.id(), version, "update dropped without answer, rejecting");
        if let Ok(rt) = tokio::runtime::Handle::try_current() {
            rt.spawn(async move {
                let _slot = slot;
                let _ = channel
                    .send_update_reject(&Context::background(), version, "not answered")
                    .await;
            });
        }
    }
}
