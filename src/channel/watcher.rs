//! Reacting to adjudicator events of a channel.

use std::sync::{atomic::Ordering, Arc};

use futures::StreamExt;
use tokio::{sync::watch, time::Instant};
use tracing::{debug, error, info, warn};

use super::{active::ActiveChannel, settle::Registration};
use crate::{
    backend::AdjudicatorEvent,
    context::Context,
    error::{BackendError, Error},
    types::Hash,
};

/// Called once the channel is concluded on-chain.
pub trait ConcludedHandler: Send + Sync {
    fn handle_concluded(&self, id: Hash);
}

impl<F> ConcludedHandler for F
where
    F: Fn(Hash) + Send + Sync,
{
    fn handle_concluded(&self, id: Hash) {
        self(id)
    }
}

/// Resets the watching flag however the watcher ends.
struct Watching<'a>(&'a ActiveChannel);

impl Drop for Watching<'_> {
    fn drop(&mut self) {
        self.0.watching.store(false, Ordering::Release);
    }
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => futures::future::pending().await,
    }
}

async fn wait_until_set(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|set| *set).await.is_err() {
        futures::future::pending::<()>().await;
    }
}

impl ActiveChannel {
    /// Watch the adjudicator for events of this channel until it is
    /// concluded or closed.
    ///
    /// Registrations of older states are refuted by registering ours. Once
    /// the channel concludes, or the challenge duration of a registration
    /// passed, our funds are withdrawn, `handler` is called and the channel
    /// is closed. Usually run on its own task:
    ///
    /// ```ignore
    /// let ch = channel.clone();
    /// tokio::spawn(async move { ch.watch(|id| println!("{id:?} concluded")).await });
    /// ```
    ///
    /// A failing subscription ends the watcher with [Error::WatcherFailed].
    /// It is not restarted, call `watch` again once the cause is fixed.
    pub async fn watch<H: ConcludedHandler>(self: &Arc<Self>, handler: H) -> Result<(), Error> {
        let id = self.id();
        self.check_open()?;
        if self.watching.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyWatching(id));
        }
        let _watching = Watching(self);

        let mut events = self
            .client()
            .adjudicator
            .subscribe(id)
            .await
            .map_err(|source| Error::WatcherFailed { id, source })?;
        let mut closed = self.closed.subscribe();
        // Challenge duration of the latest registration.
        let mut dispute: Option<Instant> = None;
        debug!(channel = ?id, "watching adjudicator");

        loop {
            let event = tokio::select! {
                biased;
                _ = wait_until_set(&mut closed) => {
                    debug!(channel = ?id, "channel closed, watcher stops");
                    return Ok(());
                }
                event = events.next() => event,
                _ = sleep_until_some(dispute) => {
                    info!(channel = ?id, "challenge duration passed");
                    self.withdraw_watched(false).await?;
                    return self.finish_watch(&handler).await;
                }
            };

            let event = match event {
                Some(Ok(event)) => event,
                Some(Err(source)) => {
                    error!(channel = ?id, error = %source, "adjudicator subscription failed");
                    return Err(Error::WatcherFailed { id, source });
                }
                None => {
                    error!(channel = ?id, "adjudicator subscription ended");
                    return Err(Error::WatcherFailed {
                        id,
                        source: BackendError::SubscriptionClosed,
                    });
                }
            };
            if event.channel_id() != id {
                continue;
            }

            match event {
                AdjudicatorEvent::Registered {
                    version, timeout, ..
                } => {
                    self.handle_registered(version, timeout).await?;
                    dispute = self.registration().await.map(|r| r.timeout);
                }
                AdjudicatorEvent::Concluded { version, .. } => {
                    info!(channel = ?id, version, "channel concluded");
                    self.concluded.send_replace(true);
                    // Someone else concluded it, we only withdraw.
                    self.withdraw_watched(true).await?;
                    return self.finish_watch(&handler).await;
                }
            }
        }
    }

    async fn withdraw_watched(&self, secondary: bool) -> Result<(), Error> {
        self.withdraw_as(&Context::background(), secondary)
            .await
            .map_err(|e| {
                error!(channel = ?self.id(), error = %e, "watcher could not withdraw");
                e
            })
    }

    async fn finish_watch<H: ConcludedHandler>(&self, handler: &H) -> Result<(), Error> {
        self.concluded.send_replace(true);
        handler.handle_concluded(self.id());
        self.close().await;
        Ok(())
    }

    async fn handle_registered(&self, version: u64, timeout: Instant) -> Result<(), Error> {
        let id = self.id();
        let ours = self.version();
        if version < ours {
            warn!(channel = ?id, registered = version, ours, "refuting outdated registration");
            return self
                .register(&Context::background())
                .await
                .map(|_| ())
                .map_err(|e| match e {
                    Error::RegistrationFailed { source, .. } => Error::WatcherFailed { id, source },
                    e => e,
                });
        }

        debug!(channel = ?id, version, "state registered");
        self.record_registration(Registration { version, timeout })
            .await;
        Ok(())
    }

    /// Resolves once the watcher saw the channel conclude.
    pub(super) async fn wait_concluded(&self) {
        let mut rx = self.concluded.subscribe();
        wait_until_set(&mut rx).await
    }
}
