//! In-memory collaborators for tests: a local network, a funder that always
//! succeeds unless told otherwise and an adjudicator that only records calls.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, Once,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    sync::{broadcast, mpsc},
    time::Instant,
};

use crate::{
    backend::{Adjudicator, AdjudicatorEvent, EventStream, Funder, Wallet},
    channel::{
        ActiveChannel, ChannelProposal, ChannelUpdate, ProposalHandler, ProposalResponder,
        UpdateHandler, UpdateResponder,
    },
    client::ClientInner,
    config::Config,
    context::Context,
    error::BackendError,
    messages::{AdjudicatorReq, LedgerChannelFundingRequest, ParticipantMessage},
    persistence::{ChannelSnapshot, MemoryPersister, Persister},
    types::{Address, Asset, Hash},
    wire::{Transport, TransportError},
    PerunClient,
};

pub type Inbox = mpsc::Receiver<(Address, ParticipantMessage)>;

/// Delivers messages between clients of the same process.
#[derive(Debug, Clone, Default)]
pub struct LocalNetwork {
    peers: Arc<Mutex<HashMap<Address, mpsc::Sender<(Address, ParticipantMessage)>>>>,
}

impl LocalNetwork {
    /// Messages sent to `addr` end up in the returned inbox.
    pub fn join(&self, addr: Address) -> Inbox {
        let (tx, rx) = mpsc::channel(64);
        self.peers.lock().unwrap().insert(addr, tx);
        rx
    }

    pub fn transport(&self, me: Address) -> Arc<NetTransport> {
        Arc::new(NetTransport {
            me,
            net: self.clone(),
        })
    }
}

#[derive(Debug)]
pub struct NetTransport {
    me: Address,
    net: LocalNetwork,
}

#[async_trait]
impl Transport for NetTransport {
    async fn send(&self, peer: &Address, msg: ParticipantMessage) -> Result<(), TransportError> {
        let tx = self
            .net
            .peers
            .lock()
            .unwrap()
            .get(peer)
            .cloned()
            .ok_or(TransportError::Unreachable(*peer))?;
        tx.send((self.me, msg))
            .await
            .map_err(|_| TransportError::Unreachable(*peer))
    }
}

#[derive(Debug, Default)]
pub struct MockFunder {
    pub requests: Mutex<Vec<LedgerChannelFundingRequest>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl Funder for MockFunder {
    async fn fund(
        &self,
        req: LedgerChannelFundingRequest,
        _ctx: &Context,
    ) -> Result<(), BackendError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(BackendError::Chain("insufficient gas".into()));
        }
        self.requests.lock().unwrap().push(req);
        Ok(())
    }
}

/// Records registrations and withdrawals and broadcasts the resulting events
/// to all subscribers. Registering a final state concludes the channel.
#[derive(Debug)]
pub struct MockAdjudicator {
    events: broadcast::Sender<Result<AdjudicatorEvent, BackendError>>,
    pub registered: Mutex<Vec<(Hash, u64)>>,
    pub withdrawals: Mutex<Vec<AdjudicatorReq>>,
}

impl MockAdjudicator {
    pub fn new() -> Arc<Self> {
        Arc::new(MockAdjudicator {
            events: broadcast::channel(64).0,
            registered: Mutex::new(Vec::new()),
            withdrawals: Mutex::new(Vec::new()),
        })
    }

    pub fn emit(&self, event: Result<AdjudicatorEvent, BackendError>) {
        let _ = self.events.send(event);
    }

    pub fn subscribers(&self) -> usize {
        self.events.receiver_count()
    }

    pub fn registered(&self) -> Vec<(Hash, u64)> {
        self.registered.lock().unwrap().clone()
    }

    pub fn withdrawn_by(&self) -> Vec<Address> {
        self.withdrawals
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.acc)
            .collect()
    }
}

#[async_trait]
impl Adjudicator for MockAdjudicator {
    async fn register(&self, req: &AdjudicatorReq, _ctx: &Context) -> Result<(), BackendError> {
        let id = req.state.channel_id();
        let version = req.state.version();
        {
            let mut registered = self.registered.lock().unwrap();
            let newest = registered.iter().filter(|(i, _)| *i == id).map(|(_, v)| *v).max();
            if newest.map_or(false, |v| v >= version) {
                return Ok(());
            }
            registered.push((id, version));
        }

        let timeout = if req.state.is_final() {
            Instant::now()
        } else {
            Instant::now() + Duration::from_secs(req.params.challenge_duration)
        };
        self.emit(Ok(AdjudicatorEvent::Registered {
            id,
            version,
            timeout,
        }));
        if req.state.is_final() {
            self.emit(Ok(AdjudicatorEvent::Concluded { id, version }));
        }
        Ok(())
    }

    async fn withdraw(&self, req: &AdjudicatorReq, _ctx: &Context) -> Result<(), BackendError> {
        self.withdrawals.lock().unwrap().push(req.clone());
        Ok(())
    }

    async fn subscribe(&self, _id: Hash) -> Result<EventStream, BackendError> {
        let rx = self.events.subscribe();
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => return Some((event, rx)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(Box::pin(stream))
    }
}

/// Stores snapshots in memory, saving fails while `fail` is set.
#[derive(Debug, Default)]
pub struct MockPersister {
    store: MemoryPersister,
    pub fail: AtomicBool,
}

#[async_trait]
impl Persister for MockPersister {
    async fn save(&self, snapshot: &ChannelSnapshot) -> Result<(), BackendError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(BackendError::Storage("disk full".into()));
        }
        self.store.save(snapshot).await
    }

    async fn load_all(&self) -> Result<Vec<ChannelSnapshot>, BackendError> {
        self.store.load_all().await
    }

    async fn remove(&self, id: &Hash) -> Result<(), BackendError> {
        self.store.remove(id).await
    }
}

/// Hands out distinct addresses with a per-wallet prefix.
#[derive(Debug)]
pub struct CountingWallet {
    prefix: u8,
    next: AtomicU64,
}

impl CountingWallet {
    pub fn new(prefix: u8) -> Self {
        CountingWallet {
            prefix,
            next: AtomicU64::new(1),
        }
    }
}

impl Wallet for CountingWallet {
    fn new_account(&self) -> Address {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        let mut addr = [0u8; 20];
        addr[0] = self.prefix;
        addr[12..].copy_from_slice(&n.to_be_bytes());
        Address(addr)
    }
}

pub fn asset() -> Asset {
    Asset {
        chain_id: 1337.into(),
        holder: Address([0x11; 20]),
    }
}

pub fn config() -> Config {
    Config::new(asset(), Address([0x22; 20]))
}

/// One client plus the collaborators tests want to look at.
#[derive(Debug, Clone)]
pub struct Party {
    pub client: PerunClient,
    pub funder: Arc<MockFunder>,
    pub persister: Arc<MockPersister>,
}

impl Party {
    pub fn address(&self) -> Address {
        self.client.address()
    }
}

/// A client on `net` that is not listening yet.
pub fn party_with(
    net: &LocalNetwork,
    adjudicator: &Arc<MockAdjudicator>,
    persister: Arc<MockPersister>,
    address: Address,
    config: Config,
) -> Party {
    let funder = Arc::new(MockFunder::default());
    let client = PerunClient::new(
        config,
        address,
        net.transport(address),
        funder.clone(),
        adjudicator.clone(),
        Arc::new(CountingWallet::new(address.0[0])),
        persister.clone(),
    );
    Party {
        client,
        funder,
        persister,
    }
}

/// A listening client on `net`.
pub fn party(net: &LocalNetwork, adjudicator: &Arc<MockAdjudicator>, address: Address) -> Party {
    let p = party_with(
        net,
        adjudicator,
        Arc::new(MockPersister::default()),
        address,
        config(),
    );
    listen(net, &p.client);
    p
}

pub fn listen(net: &LocalNetwork, client: &PerunClient) {
    let inbox = net.join(client.address());
    let client = client.clone();
    tokio::spawn(async move { client.listen(inbox).await });
}

static INIT: Once = Once::new();

/// Log to the test output, filtered by `RUST_LOG`.
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "perun=debug".into()),
            )
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Alice and Bob on a shared network and chain.
pub fn setup() -> (Party, Party, Arc<MockAdjudicator>) {
    init_tracing();
    let net = LocalNetwork::default();
    let adjudicator = MockAdjudicator::new();
    let alice = party(&net, &adjudicator, Address([0xa0; 20]));
    let bob = party(&net, &adjudicator, Address([0xb0; 20]));
    (alice, bob, adjudicator)
}

/// Client internals for tests of a single channel, not connected to anyone.
pub fn client_inner(address: Address) -> Arc<ClientInner> {
    let net = LocalNetwork::default();
    party_with(
        &net,
        &MockAdjudicator::new(),
        Arc::new(MockPersister::default()),
        address,
        config(),
    )
    .client
    .inner
}

/// Accepts every proposal and passes the resulting channels on.
#[derive(Debug)]
pub struct AcceptProposals(pub mpsc::UnboundedSender<Arc<ActiveChannel>>);

#[async_trait]
impl ProposalHandler for AcceptProposals {
    async fn handle_proposal(&self, _proposal: ChannelProposal, responder: ProposalResponder) {
        if let Ok(channel) = responder.accept(&Context::background()).await {
            let _ = self.0.send(channel);
        }
    }
}

#[derive(Debug)]
pub struct RejectProposals(pub &'static str);

#[async_trait]
impl ProposalHandler for RejectProposals {
    async fn handle_proposal(&self, _proposal: ChannelProposal, responder: ProposalResponder) {
        let _ = responder.reject(&Context::background(), self.0).await;
    }
}

/// Drops every responder unanswered.
#[derive(Debug)]
pub struct IgnoreProposals(pub mpsc::UnboundedSender<ChannelProposal>);

#[async_trait]
impl ProposalHandler for IgnoreProposals {
    async fn handle_proposal(&self, proposal: ChannelProposal, _responder: ProposalResponder) {
        let _ = self.0.send(proposal);
    }
}

#[derive(Debug)]
pub struct AcceptUpdates;

#[async_trait]
impl UpdateHandler for AcceptUpdates {
    async fn handle_update(&self, _update: ChannelUpdate, responder: UpdateResponder) {
        let _ = responder.accept(&Context::background()).await;
    }
}

#[derive(Debug)]
pub struct RejectUpdates(pub &'static str);

#[async_trait]
impl UpdateHandler for RejectUpdates {
    async fn handle_update(&self, _update: ChannelUpdate, responder: UpdateResponder) {
        let _ = responder.reject(&Context::background(), self.0).await;
    }
}

/// Passes updates on to the test without answering them.
#[derive(Debug)]
pub struct HoldUpdates(pub mpsc::UnboundedSender<(ChannelUpdate, UpdateResponder)>);

#[async_trait]
impl UpdateHandler for HoldUpdates {
    async fn handle_update(&self, update: ChannelUpdate, responder: UpdateResponder) {
        let _ = self.0.send((update, responder));
    }
}

/// Yield to other tasks until `cond` holds.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if cond() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}
