//! Registering, waiting out the challenge duration and withdrawing.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::active::ActiveChannel;
use crate::{
    context::Context,
    error::{Error, Phase},
};

/// The latest state registered on-chain for a channel, as far as we know.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub version: u64,
    /// After this point the registered state can no longer be refuted.
    pub timeout: Instant,
}

impl ActiveChannel {
    pub(super) async fn record_registration(&self, reg: Registration) {
        let mut current = self.registration.lock().await;
        match *current {
            Some(r) if r.version > reg.version => {}
            _ => *current = Some(reg),
        }
    }

    pub async fn registration(&self) -> Option<Registration> {
        *self.registration.lock().await
    }

    /// Register the current state on-chain.
    ///
    /// Nothing is sent if the same or a newer version is already registered,
    /// so the watcher and [settle](Self::settle) can both call this.
    pub async fn register(&self, ctx: &Context) -> Result<Registration, Error> {
        let id = self.id();
        let mut current = self.registration.lock().await;
        let state = self.state();
        if let Some(r) = *current {
            if r.version >= state.version() {
                debug!(channel = ?id, version = r.version, "already registered");
                return Ok(r);
            }
        }

        let req = self.make_adjudicator_req(false);
        ctx.run(self.client().adjudicator.register(&req, ctx))
            .await
            .map_err(|e| Error::from_ctx(e, Phase::Register))?
            .map_err(|source| Error::RegistrationFailed { id, source })?;

        // Final states conclude right away.
        let timeout = if state.is_final() {
            Instant::now()
        } else {
            Instant::now() + Duration::from_secs(self.params().challenge_duration)
        };
        let reg = Registration {
            version: state.version(),
            timeout,
        };
        *current = Some(reg);
        info!(channel = ?id, version = reg.version, is_final = state.is_final(), "state registered");
        Ok(reg)
    }

    /// Withdraw our funds from the concluded channel. Does nothing after the
    /// first success.
    pub async fn withdraw(&self, ctx: &Context) -> Result<(), Error> {
        self.withdraw_as(ctx, false).await
    }

    pub(super) async fn withdraw_as(&self, ctx: &Context, secondary: bool) -> Result<(), Error> {
        let id = self.id();
        let mut withdrawn = self.withdrawn.lock().await;
        if *withdrawn {
            return Ok(());
        }
        let req = self.make_adjudicator_req(secondary);
        ctx.run(self.client().adjudicator.withdraw(&req, ctx))
            .await
            .map_err(|e| Error::from_ctx(e, Phase::Withdraw))?
            .map_err(|source| Error::WithdrawalFailed { id, source })?;
        *withdrawn = true;
        info!(channel = ?id, version = req.state.version(), "funds withdrawn");
        Ok(())
    }

    /// Settle the channel on-chain and withdraw our funds, then close it.
    ///
    /// The current state is registered first. A final state is withdrawn
    /// right away, otherwise we wait until the challenge duration of the
    /// registration passed or the watcher saw the channel conclude.
    ///
    /// `secondary` is for when the peer settles too: we first wait up to
    /// [Config::secondary_grace](crate::config::Config::secondary_grace) for
    /// the watcher to see the peer conclude the channel and save our own
    /// registration. Without a running watcher, or if the peer does nothing
    /// in time, we settle like the primary party.
    pub async fn settle(&self, ctx: &Context, secondary: bool) -> Result<(), Error> {
        let id = self.id();
        if *self.withdrawn.lock().await {
            return Ok(());
        }
        let _slot = self
            .update_slot
            .clone()
            .try_lock_owned()
            .map_err(|_| Error::UpdateInProgress(id))?;

        if secondary && self.peer_concluded(ctx).await? {
            self.withdraw_as(ctx, true).await?;
            self.close().await;
            return Ok(());
        }

        let reg = self.register(ctx).await?;
        if !self.state().is_final() {
            debug!(channel = ?id, version = reg.version, "waiting for challenge duration");
            ctx.run(async {
                tokio::select! {
                    _ = tokio::time::sleep_until(reg.timeout) => {}
                    _ = self.wait_concluded() => {}
                }
            })
            .await
            .map_err(|e| Error::from_ctx(e, Phase::Settle))?;
        }

        self.withdraw_as(ctx, secondary).await?;
        self.close().await;
        Ok(())
    }

    /// Waits for the peer to conclude the channel. Returns whether it did
    /// within the grace period.
    async fn peer_concluded(&self, ctx: &Context) -> Result<bool, Error> {
        if *self.concluded.borrow() {
            return Ok(true);
        }
        if !self.is_watching() {
            warn!(channel = ?self.id(), "secondary settlement without watcher, settling as primary");
            return Ok(false);
        }

        let grace = self.client().config.secondary_grace();
        let concluded = ctx
            .run(tokio::time::timeout(grace, self.wait_concluded()))
            .await
            .map_err(|e| Error::from_ctx(e, Phase::Settle))?
            .is_ok();
        if !concluded {
            warn!(channel = ?self.id(), ?grace, "peer did not conclude, settling as primary");
        }
        Ok(concluded)
    }
}
