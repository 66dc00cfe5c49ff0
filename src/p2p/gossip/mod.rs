//! Gossip protocol engine.
//!
//! One send/receive pair per wire message, sharing the stream plumbing,
//! admission checks and broadcaster selection defined here. Handlers for
//! the individual messages live in the submodules.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use primitive_types::U256;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::TtlCache;
use crate::chain::{Chain, ChainTip};
use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::events::EventBus;
use crate::identity::{LocalIdentity, NodeAddr, PeerId, RemotePeer};
use crate::p2p::history::HistoryCache;
use crate::p2p::peer_manager::PeerManager;
use crate::p2p::queues::{BlockHashQueue, TxBroadcastQueue};
use crate::p2p::sync_state::{BestBlockInfo, SyncState};
use crate::transport::{BoxStream, Transport};
use crate::txpool::TxPool;
use crate::wire::{self, protocol_ids};

pub mod addr;
pub mod block;
pub mod handshake;
pub mod intro;
pub mod ping;
pub mod transaction;

pub use transaction::TxSessions;

/// Client version string carried in handshakes.
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Cached flood-relay intermediaries.
///
/// Replaced wholesale on refresh; reads clone the member list so relay
/// calls never hold the cache lock across network I/O.
#[derive(Default)]
pub struct BroadcastPeers {
    peers: Vec<RemotePeer>,
    updated_at: Option<Instant>,
}

impl BroadcastPeers {
    fn len(&self) -> usize {
        self.peers.len()
    }

    fn add(&mut self, peer: RemotePeer) {
        if !self.peers.iter().any(|p| p.id == peer.id) {
            self.peers.push(peer);
        }
    }

    fn is_fresh(&self, max_age: Duration) -> bool {
        matches!(self.updated_at, Some(at) if at.elapsed() <= max_age)
    }
}

pub struct Gossip {
    config: Arc<NodeConfig>,
    local: LocalIdentity,
    transport: Arc<dyn Transport>,
    pm: Arc<PeerManager>,
    chain: Arc<dyn Chain>,
    pool: Arc<dyn TxPool>,
    events: EventBus,
    history: HistoryCache,
    /// Peer ids announced via Intro, kept for the intro TTL.
    intros: Arc<TtlCache<String, ()>>,
    broadcasters: Mutex<BroadcastPeers>,
    sync_state: SyncState,
    block_hash_queue: BlockHashQueue,
    tx_queue: TxBroadcastQueue,
    tx_sessions: TxSessions,
}

impl Gossip {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<NodeConfig>,
        local: LocalIdentity,
        transport: Arc<dyn Transport>,
        pm: Arc<PeerManager>,
        chain: Arc<dyn Chain>,
        pool: Arc<dyn TxPool>,
        events: EventBus,
    ) -> Arc<Self> {
        let history = HistoryCache::new(config.history_cache_capacity);
        let intros = Arc::new(TtlCache::new(config.history_cache_capacity));
        Arc::new(Self {
            config,
            local,
            transport,
            pm,
            chain,
            pool,
            events,
            history,
            intros,
            broadcasters: Mutex::new(BroadcastPeers::default()),
            sync_state: SyncState::default(),
            block_hash_queue: BlockHashQueue::new(),
            tx_queue: TxBroadcastQueue::new(),
            tx_sessions: TxSessions::new(),
        })
    }

    pub fn pm(&self) -> &Arc<PeerManager> {
        &self.pm
    }

    pub fn chain(&self) -> &Arc<dyn Chain> {
        &self.chain
    }

    pub fn pool(&self) -> &Arc<dyn TxPool> {
        &self.pool
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn history(&self) -> &HistoryCache {
        &self.history
    }

    pub fn intros(&self) -> &TtlCache<String, ()> {
        &self.intros
    }

    pub fn sync_state(&self) -> &SyncState {
        &self.sync_state
    }

    pub fn block_hash_queue(&self) -> &BlockHashQueue {
        &self.block_hash_queue
    }

    pub fn tx_queue(&self) -> &TxBroadcastQueue {
        &self.tx_queue
    }

    pub fn tx_sessions(&self) -> &TxSessions {
        &self.tx_sessions
    }

    pub(crate) fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub(crate) fn local(&self) -> &LocalIdentity {
        &self.local
    }

    // ---- stream plumbing ----

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.message_timeout_secs)
    }

    /// Open a timeout-bounded stream to the peer for one protocol id.
    pub(crate) async fn new_stream(
        &self,
        peer: &RemotePeer,
        protocol: &str,
    ) -> Result<BoxStream, NodeError> {
        match tokio::time::timeout(
            self.timeout(),
            self.transport.open_stream(&peer.addr, protocol),
        )
        .await
        {
            Err(_) => Err(NodeError::Timeout),
            Ok(Err(e)) => Err(NodeError::Io(e)),
            Ok(Ok(stream)) => Ok(stream),
        }
    }

    pub(crate) async fn write_msg<T: Serialize>(
        &self,
        stream: &mut BoxStream,
        msg: &T,
    ) -> Result<(), NodeError> {
        match tokio::time::timeout(self.timeout(), wire::write_message(stream, msg)).await {
            Err(_) => Err(NodeError::Timeout),
            Ok(result) => result.map_err(NodeError::from),
        }
    }

    pub(crate) async fn read_msg<T: DeserializeOwned>(
        &self,
        stream: &mut BoxStream,
    ) -> Result<T, NodeError> {
        match tokio::time::timeout(self.timeout(), wire::read_message(stream)).await {
            Err(_) => Err(NodeError::Timeout),
            Ok(result) => result.map_err(NodeError::from),
        }
    }

    /// Record a connect failure; three strikes earn a temporary ban.
    pub(crate) fn log_connect_err(
        &self,
        err: NodeError,
        peer: &RemotePeer,
        context: &str,
    ) -> NodeError {
        let fails = self.pm.incr_conn_fail(&peer.addr);
        if !peer.is_hardcoded_seed && fails >= self.config.max_conn_fail_count {
            self.pm.add_time_ban(peer, self.config.ban_duration_secs);
        }
        debug!(
            "[GOSSIP] {context}: {err} (peer: {}, failures: {fails})",
            peer.id.short()
        );
        NodeError::Connect(err.to_string())
    }

    pub(crate) fn log_err(&self, err: NodeError, peer: &RemotePeer, context: &str) -> NodeError {
        debug!("[GOSSIP] {context}: {err} (peer: {})", peer.id.short());
        err
    }

    // ---- inbound dispatch ----

    /// Register every protocol handler on the transport.
    pub fn register_handlers(self: &Arc<Self>) {
        for protocol in protocol_ids::ALL {
            let gossip = Arc::clone(self);
            let protocol_owned = protocol.to_string();
            self.transport.set_stream_handler(
                protocol,
                Arc::new(move |stream, from| {
                    let gossip = Arc::clone(&gossip);
                    let protocol = protocol_owned.clone();
                    Box::pin(async move {
                        gossip.handle_stream(&protocol, stream, from).await;
                    })
                }),
            );
        }
    }

    /// Pre-handling shared by every inbound stream: stop check, admission
    /// check, peer bookkeeping, then dispatch to the message handler.
    async fn handle_stream(self: &Arc<Self>, protocol: &str, mut stream: BoxStream, from: NodeAddr) {
        if self.pm.has_stopped() {
            return;
        }

        let rp = RemotePeer::new(from);

        // Handshakes and pings are always allowed (they are how peers
        // become acquainted); an Addr from an unknown peer is accepted so
        // that discovery stays effective.
        let skip_acquaintance = protocol == protocol_ids::HANDSHAKE
            || protocol == protocol_ids::PING
            || (protocol == protocol_ids::ADDR && !self.pm.peer_exists(&rp.id));
        if let Err(e) = self.pm.can_accept_peer(&rp, skip_acquaintance) {
            debug!(
                "[GOSSIP] message ({protocol}) unaccepted: {e} (peer: {})",
                rp.id.short()
            );
            return;
        }

        self.pm.add_or_update_peer(&rp);

        let result = match protocol {
            protocol_ids::HANDSHAKE => self.on_handshake(&mut stream, &rp).await,
            protocol_ids::PING => self.on_ping(&mut stream, &rp).await,
            protocol_ids::GET_ADDR => self.on_get_addr(&mut stream, &rp).await,
            protocol_ids::ADDR => self.on_addr_stream(&mut stream, &rp).await,
            protocol_ids::INTRO => self.on_intro(&mut stream, &rp).await,
            protocol_ids::REQUEST_BLOCK => self.on_request_block(&mut stream, &rp).await,
            protocol_ids::GET_BLOCK_HASHES => self.on_get_block_hashes(&mut stream, &rp).await,
            protocol_ids::BLOCK_BODY => self.on_block_body(&mut stream, &rp).await,
            protocol_ids::GET_BLOCK_BODIES => self.on_get_block_bodies(&mut stream, &rp).await,
            protocol_ids::TX => self.on_tx(&mut stream, &rp).await,
            other => {
                warn!("[GOSSIP] stream for unknown protocol {other}");
                Ok(())
            }
        };

        if let Err(e) = result {
            debug!(
                "[GOSSIP] handler ({protocol}) failed: {e} (peer: {})",
                rp.id.short()
            );
        }
    }

    // ---- broadcaster selection ----

    /// Select up to `n` broadcaster peers from candidate addresses.
    ///
    /// Candidates are hashed (blake3 of the address) to a big-integer key
    /// and sorted ascending; the first `n` win. Pseudo-random yet
    /// reproducible, so an adversary cannot bias selection by reordering
    /// its Addr messages. The selection is cached and reused until it is
    /// over the refresh age or has fewer than `n` members.
    pub fn pick_broadcasters(&self, candidates: &[(NodeAddr, i64)], n: usize) -> Vec<RemotePeer> {
        let mut cache = self.broadcasters.lock();
        let max_age = Duration::from_secs(self.config.broadcaster_refresh_secs);
        if cache.len() >= n && cache.is_fresh(max_age) {
            return cache.peers.clone();
        }

        let mut keyed: Vec<(U256, &NodeAddr, i64)> = candidates
            .iter()
            .filter(|(addr, _)| !self.local.is_same_id(&PeerId::from_addr(addr)))
            .map(|(addr, ts)| {
                let digest = blake3::hash(addr.as_str().as_bytes());
                (U256::from_big_endian(digest.as_bytes()), addr, *ts)
            })
            .collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0));

        if keyed.len() >= n {
            cache.peers.clear();
        }

        for (_, addr, ts) in keyed {
            let mut peer = RemotePeer::new(addr.clone());
            peer.last_seen = ts.max(0) as u64;
            cache.add(peer);
            if cache.len() == n {
                break;
            }
        }
        cache.updated_at = Some(Instant::now());

        cache.peers.clone()
    }

    /// Like `pick_broadcasters`, from peer records.
    pub fn pick_broadcasters_from_peers(&self, peers: &[RemotePeer], n: usize) -> Vec<RemotePeer> {
        let candidates: Vec<(NodeAddr, i64)> = peers
            .iter()
            .map(|p| (p.addr.clone(), p.last_seen as i64))
            .collect();
        self.pick_broadcasters(&candidates, n)
    }

    /// Current broadcaster set without refreshing.
    pub fn broadcasters(&self) -> Vec<RemotePeer> {
        self.broadcasters.lock().peers.clone()
    }

    // ---- chain comparison ----

    pub(crate) fn local_tip(&self) -> ChainTip {
        self.chain.tip()
    }

    /// Compare a freshly revealed remote tip with the local chain and
    /// asynchronously request block hashes when the remote is heavier.
    /// The request uses the local tip as sole locator. Comparison never
    /// errors; unreachable peers fail silently at the transport layer.
    pub(crate) fn maybe_start_sync(self: &Arc<Self>, peer: &RemotePeer, remote: BestBlockInfo) {
        if self.sync_state.is_disabled() {
            return;
        }

        let tip = self.local_tip();
        self.sync_state.clear_if_reached(tip.total_difficulty);

        if remote.total_difficulty <= tip.total_difficulty {
            return;
        }
        self.sync_state.update_best(remote);

        let gossip = Arc::clone(self);
        let peer = peer.clone();
        tokio::spawn(async move {
            let locators = crate::types::Locators::single(gossip.local_tip().hash);
            if let Err(e) = gossip.send_get_block_hashes(&peer, Some(locators)).await {
                debug!(
                    "[GOSSIP] sync trigger failed: {e} (peer: {})",
                    peer.id.short()
                );
            }
        });
    }

    // ---- background drivers ----

    /// Register handlers and start the relay/sync background loops. They
    /// stop together with the peer manager's shutdown signal.
    pub fn start(self: &Arc<Self>) {
        self.register_handlers();
        self.history
            .start_sweep(Duration::from_secs(5), self.pm.shutdown_rx());
        self.spawn_tx_broadcast_loop();
        self.spawn_sync_driver();
    }
}
