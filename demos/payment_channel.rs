//! Walkthrough of a channel's life between Alice and Bob in one process:
//! open, pay, finalize and settle.
//!
//! Network and chain are simulated, run with `RUST_LOG=perun=debug` to see
//! what the clients do.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use perun::{
    backend::{Adjudicator, AdjudicatorEvent, EventStream, Funder, Wallet},
    channel::{
        Balances, ChannelProposal, ChannelUpdate, ProposalHandler, ProposalResponder,
        UpdateHandler, UpdateResponder,
    },
    config::Config,
    context::Context,
    error::BackendError,
    messages::{AdjudicatorReq, LedgerChannelFundingRequest, ParticipantMessage},
    persistence::MemoryPersister,
    wire::{Transport, TransportError},
    Address, Asset, PerunClient,
};
use tokio::sync::{broadcast, mpsc};
use tracing::info;
use tracing_subscriber::EnvFilter;

type Inboxes = Arc<Mutex<HashMap<Address, mpsc::Sender<(Address, ParticipantMessage)>>>>;

#[derive(Debug)]
struct Net {
    me: Address,
    inboxes: Inboxes,
}

#[async_trait]
impl Transport for Net {
    async fn send(&self, peer: &Address, msg: ParticipantMessage) -> Result<(), TransportError> {
        let tx = self
            .inboxes
            .lock()
            .map_err(|e| TransportError::Other(e.to_string()))?
            .get(peer)
            .cloned()
            .ok_or(TransportError::Unreachable(*peer))?;
        tx.send((self.me, msg))
            .await
            .map_err(|_| TransportError::Unreachable(*peer))
    }
}

/// Funds instantly and concludes final states on registration.
#[derive(Debug)]
struct Chain {
    events: broadcast::Sender<AdjudicatorEvent>,
}

#[async_trait]
impl Funder for Chain {
    async fn fund(&self, req: LedgerChannelFundingRequest, _: &Context) -> Result<(), BackendError> {
        info!(idx = req.part_idx, "deposited");
        Ok(())
    }
}

#[async_trait]
impl Adjudicator for Chain {
    async fn register(&self, req: &AdjudicatorReq, _: &Context) -> Result<(), BackendError> {
        let id = req.state.channel_id();
        let version = req.state.version();
        let _ = self.events.send(AdjudicatorEvent::Registered {
            id,
            version,
            timeout: tokio::time::Instant::now(),
        });
        if req.state.is_final() {
            let _ = self.events.send(AdjudicatorEvent::Concluded { id, version });
        }
        Ok(())
    }

    async fn withdraw(&self, req: &AdjudicatorReq, _: &Context) -> Result<(), BackendError> {
        let amount = req.state.balances().get(req.idx).unwrap_or_default();
        info!(receiver = ?req.acc, %amount, "withdrawn");
        Ok(())
    }

    async fn subscribe(&self, _id: perun::Hash) -> Result<EventStream, BackendError> {
        let rx = self.events.subscribe();
        Ok(Box::pin(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.ok().map(|e| (Ok(e), rx))
        })))
    }
}

#[derive(Debug)]
struct Accounts(u8, AtomicU8);

impl Wallet for Accounts {
    fn new_account(&self) -> Address {
        let mut addr = [self.0; 20];
        addr[19] = self.1.fetch_add(1, Ordering::SeqCst);
        Address(addr)
    }
}

struct AcceptAll(mpsc::UnboundedSender<Arc<perun::channel::ActiveChannel>>);

#[async_trait]
impl ProposalHandler for AcceptAll {
    async fn handle_proposal(&self, proposal: ChannelProposal, responder: ProposalResponder) {
        info!(from = ?proposal.peer, bals = ?proposal.init_bals, "got proposal");
        match responder.accept(&Context::background()).await {
            Ok(channel) => {
                let _ = self.0.send(channel);
            }
            Err(e) => info!(error = %e, "could not accept"),
        }
    }
}

struct AcceptUpdates;

#[async_trait]
impl UpdateHandler for AcceptUpdates {
    async fn handle_update(&self, update: ChannelUpdate, responder: UpdateResponder) {
        info!(version = update.state.version(), bals = ?update.state.balances(), "got update");
        let _ = responder.accept(&Context::background()).await;
    }
}

fn client(name: u8, inboxes: &Inboxes, chain: &Arc<Chain>) -> PerunClient {
    let address = Address([name; 20]);
    let config = Config::new(
        Asset {
            chain_id: 1337.into(),
            holder: Address([0x11; 20]),
        },
        Address([0x22; 20]),
    );
    let (tx, rx) = mpsc::channel(16);
    inboxes.lock().unwrap().insert(address, tx);

    let client = PerunClient::new(
        config,
        address,
        Arc::new(Net {
            me: address,
            inboxes: inboxes.clone(),
        }),
        chain.clone(),
        chain.clone(),
        Arc::new(Accounts(name, AtomicU8::new(0))),
        Arc::new(MemoryPersister::new()),
    );
    let listener = client.clone();
    tokio::spawn(async move { listener.listen(rx).await });
    client
}

#[tokio::main]
async fn main() -> Result<(), perun::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let inboxes = Inboxes::default();
    let chain = Arc::new(Chain {
        events: broadcast::channel(16).0,
    });
    let alice = client(0xa, &inboxes, &chain);
    let bob = client(0xb, &inboxes, &chain);

    let (tx, mut accepted) = mpsc::unbounded_channel();
    bob.handle_channel_proposals(AcceptAll(tx));
    bob.handle_updates(AcceptUpdates);

    let ctx = Context::background();
    let init = Balances(vec![100.into(), 50.into()]);
    let channel = alice.propose_channel(&ctx, bob.address(), 60, init).await?;
    let theirs = accepted.recv().await.ok_or(perun::Error::UnknownChannel(channel.id()))?;
    info!(id = ?channel.id(), "channel open");

    // Bob only watches, his watcher withdraws once Alice concluded.
    let watcher = tokio::spawn(async move {
        theirs
            .watch(|id: perun::Hash| info!(?id, "bob sees the channel concluded"))
            .await
    });

    channel.send_payment(&ctx, 30.into()).await?;
    channel.send_payment(&ctx, 5.into()).await?;
    info!(bals = ?channel.state().balances(), "payments done");

    channel.finalize(&ctx).await?;
    channel.settle(&ctx, false).await?;

    if let Ok(watched) = watcher.await {
        watched?;
    }
    Ok(())
}
