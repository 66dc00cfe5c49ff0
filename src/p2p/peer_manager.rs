//! Peer Manager: the authoritative registry of known remote peers.
//!
//! Owns admission, activity classification, persistence and the periodic
//! maintenance loops. All liveness-timestamp mutation happens behind this
//! manager's locks; no other component writes `last_seen` directly.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::identity::{now_unix, LocalIdentity, NodeAddr, PeerId, RemotePeer};
use crate::p2p::gossip::Gossip;
use crate::transport::Direction;

/// One hour; the punitive backdate applied to disconnected peers and the
/// benefit-of-the-doubt start for newly learned ones.
const LAST_SEEN_BACKDATE_SECS: u64 = 3600;

/// A banned peer still serving more than this much ban time cannot talk
/// to us at all and is dropped from the registry by the sweep.
const LONG_BAN_HORIZON_SECS: u64 = 3 * 3600;

/// Persisted registry record: address + timestamps, keyed by peer id.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedPeer {
    address: String,
    created_at: u64,
    last_seen: u64,
    ban_until: Option<u64>,
}

/// Inbound/outbound connection counts plus the connected-peer map, shared
/// between the peer manager and the connection manager.
#[derive(Default)]
pub struct ConnsInfo {
    inbound: AtomicUsize,
    outbound: AtomicUsize,
    connected: RwLock<HashMap<PeerId, Direction>>,
}

impl ConnsInfo {
    pub fn counts(&self) -> (usize, usize) {
        (
            self.inbound.load(Ordering::SeqCst),
            self.outbound.load(Ordering::SeqCst),
        )
    }

    /// Record a connection; returns the updated count for its direction.
    pub fn add(&self, peer: PeerId, direction: Direction) -> usize {
        self.connected.write().insert(peer, direction);
        match direction {
            Direction::Inbound => self.inbound.fetch_add(1, Ordering::SeqCst) + 1,
            Direction::Outbound => self.outbound.fetch_add(1, Ordering::SeqCst) + 1,
        }
    }

    pub fn remove(&self, peer: &PeerId) -> Option<Direction> {
        let direction = self.connected.write().remove(peer)?;
        let counter = match direction {
            Direction::Inbound => &self.inbound,
            Direction::Outbound => &self.outbound,
        };
        // Saturating decrement: ceiling-closes can race the disconnect.
        let _ = counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| {
            Some(c.saturating_sub(1))
        });
        Some(direction)
    }

    pub fn is_connected(&self, peer: &PeerId) -> bool {
        self.connected.read().contains_key(peer)
    }
}

pub struct PeerManager {
    config: Arc<NodeConfig>,
    local: LocalIdentity,
    peers: RwLock<HashMap<PeerId, RemotePeer>>,
    acquainted: RwLock<HashSet<PeerId>>,
    /// IP string -> unban time (unix seconds).
    time_ban: RwLock<HashMap<String, u64>>,
    /// IP string -> consecutive connection failures.
    conn_fail: RwLock<HashMap<String, u32>>,
    conns: Arc<ConnsInfo>,
    db: Option<sled::Tree>,
    shutdown_tx: watch::Sender<bool>,
    stopped: AtomicBool,
}

impl PeerManager {
    pub fn new(config: Arc<NodeConfig>, local: LocalIdentity, db: Option<sled::Db>) -> Arc<Self> {
        let tree = db.map(|db| {
            db.open_tree(b"peers")
                .expect("failed to open peer registry tree")
        });
        let (shutdown_tx, _) = watch::channel(false);

        let pm = Arc::new(Self {
            config,
            local,
            peers: RwLock::new(HashMap::new()),
            acquainted: RwLock::new(HashSet::new()),
            time_ban: RwLock::new(HashMap::new()),
            conn_fail: RwLock::new(HashMap::new()),
            conns: Arc::new(ConnsInfo::default()),
            db: tree,
            shutdown_tx,
            stopped: AtomicBool::new(false),
        });

        for seed in &pm.config.bootstrap_peers {
            let peer = RemotePeer::seed(NodeAddr::new(seed.clone()));
            pm.peers.write().insert(peer.id.clone(), peer);
        }

        pm
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn local(&self) -> &LocalIdentity {
        &self.local
    }

    pub fn conns(&self) -> Arc<ConnsInfo> {
        Arc::clone(&self.conns)
    }

    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn has_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    // ---- registry ----

    pub fn peer_exists(&self, id: &PeerId) -> bool {
        self.peers.read().contains_key(id)
    }

    pub fn get_peer(&self, id: &PeerId) -> Option<RemotePeer> {
        self.peers.read().get(id).cloned()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.read().len()
    }

    fn persist_one(&self, peer: &RemotePeer) {
        let Some(db) = &self.db else { return };
        if peer.is_hardcoded_seed {
            return;
        }
        let record = PersistedPeer {
            address: peer.addr.as_str().to_string(),
            created_at: peer.created_at,
            last_seen: peer.last_seen,
            ban_until: self.ban_until(&peer.addr),
        };
        if let Ok(encoded) = bincode::serialize(&record) {
            let _ = db.insert(peer.id.as_str().as_bytes(), encoded);
        }
    }

    /// Add a peer to the registry. The local node is never a member.
    pub fn add_peer(&self, peer: RemotePeer) {
        if self.local.is_same_id(&peer.id) {
            return;
        }
        self.persist_one(&peer);
        self.peers.write().insert(peer.id.clone(), peer);
    }

    /// Registry bookkeeping applied on every interaction with a peer.
    ///
    /// Unknown peers start with `last_seen` an hour in the past so that a
    /// single sighting is not enough to survive the next sweep; connected
    /// peers are bumped to now; known-but-disconnected peers are backdated
    /// to accelerate their cleanup while still tolerating reconnection.
    pub fn add_or_update_peer(&self, candidate: &RemotePeer) {
        if self.local.is_same_id(&candidate.id) {
            return;
        }

        let now = now_unix();
        let updated = {
            let mut peers = self.peers.write();
            if let Some(peer) = peers.get_mut(&candidate.id) {
                if self.conns.is_connected(&peer.id) {
                    peer.last_seen = now;
                } else {
                    peer.last_seen = peer.last_seen.saturating_sub(LAST_SEEN_BACKDATE_SECS);
                }
                Some(peer.clone())
            } else {
                None
            }
        };

        match updated {
            Some(snapshot) => self.persist_one(&snapshot),
            None => {
                let mut peer = candidate.clone();
                peer.last_seen = now.saturating_sub(LAST_SEEN_BACKDATE_SECS);
                self.add_peer(peer);
            }
        }
    }

    /// Admission for addresses learned from Addr messages. Idempotent:
    /// repeated registration of the same address keeps the stored state
    /// rather than compounding any demotion the caller applied.
    pub fn register_discovered(&self, addr: NodeAddr, last_seen: u64) {
        let peer_id = PeerId::from_addr(&addr);
        if self.local.is_same_id(&peer_id) {
            return;
        }
        let mut peers = self.peers.write();
        if peers.contains_key(&peer_id) {
            return;
        }
        let mut peer = RemotePeer::new(addr);
        peer.last_seen = last_seen;
        peers.insert(peer.id.clone(), peer.clone());
        drop(peers);
        self.persist_one(&peer);
    }

    /// Remember that a peer first reached us over an inbound connection.
    pub fn set_inbound(&self, id: &PeerId, inbound: bool) {
        if let Some(peer) = self.peers.write().get_mut(id) {
            peer.is_inbound = inbound;
        }
    }

    pub fn update_last_seen(&self, id: &PeerId) {
        let now = now_unix();
        if let Some(peer) = self.peers.write().get_mut(id) {
            peer.last_seen = now;
        }
    }

    // ---- acquaintance ----

    pub fn add_acquainted(&self, id: &PeerId) {
        self.acquainted.write().insert(id.clone());
    }

    pub fn remove_acquainted(&self, id: &PeerId) {
        self.acquainted.write().remove(id);
    }

    pub fn is_acquainted(&self, id: &PeerId) -> bool {
        self.acquainted.read().contains(id)
    }

    // ---- bans and failure counts ----

    fn ban_key(addr: &NodeAddr) -> String {
        addr.ip()
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| addr.as_str().to_string())
    }

    /// Extend a peer's ban by `dur_secs`. Hardcoded seeds cannot be banned.
    pub fn add_time_ban(&self, peer: &RemotePeer, dur_secs: u64) {
        if peer.is_hardcoded_seed {
            return;
        }
        let now = now_unix();
        let mut bans = self.time_ban.write();
        let entry = bans.entry(Self::ban_key(&peer.addr)).or_insert(now);
        if *entry < now {
            *entry = now;
        }
        *entry += dur_secs;
    }

    pub fn ban_until(&self, addr: &NodeAddr) -> Option<u64> {
        self.time_ban.read().get(&Self::ban_key(addr)).copied()
    }

    pub fn is_banned(&self, peer: &RemotePeer) -> bool {
        matches!(self.ban_until(&peer.addr), Some(until) if until > now_unix())
    }

    pub fn incr_conn_fail(&self, addr: &NodeAddr) -> u32 {
        let mut fails = self.conn_fail.write();
        let count = fails.entry(Self::ban_key(addr)).or_insert(0);
        *count += 1;
        *count
    }

    pub fn clear_conn_fail(&self, addr: &NodeAddr) {
        self.conn_fail.write().remove(&Self::ban_key(addr));
    }

    pub fn conn_fail_count(&self, addr: &NodeAddr) -> u32 {
        self.conn_fail
            .read()
            .get(&Self::ban_key(addr))
            .copied()
            .unwrap_or(0)
    }

    // ---- classification ----

    fn seen_recently(&self, peer: &RemotePeer, now: u64) -> bool {
        peer.last_seen + self.config.active_window_secs > now
    }

    /// A peer is active when it is not banned and was seen within the
    /// rolling activity window.
    pub fn is_active(&self, peer: &RemotePeer) -> bool {
        !self.is_banned(peer) && self.seen_recently(peer, now_unix())
    }

    pub fn get_peers(&self) -> Vec<RemotePeer> {
        self.peers.read().values().cloned().collect()
    }

    pub fn get_connected_peers(&self) -> Vec<RemotePeer> {
        self.peers
            .read()
            .values()
            .filter(|p| self.conns.is_connected(&p.id))
            .cloned()
            .collect()
    }

    /// Peers that are unconnected, or connected but never acquainted.
    pub fn get_lonely_peers(&self) -> Vec<RemotePeer> {
        self.peers
            .read()
            .values()
            .filter(|p| !self.conns.is_connected(&p.id) || !self.is_acquainted(&p.id))
            .cloned()
            .collect()
    }

    /// Known peers that have not completed a handshake or ping.
    pub fn get_unacquainted_peers(&self) -> Vec<RemotePeer> {
        self.peers
            .read()
            .values()
            .filter(|p| !self.is_acquainted(&p.id))
            .cloned()
            .collect()
    }

    /// Active peers; a zero limit means no limit.
    pub fn get_active_peers(&self, limit: usize) -> Vec<RemotePeer> {
        let peers = self.peers.read();
        let mut active = Vec::new();
        for p in peers.values() {
            if limit > 0 && active.len() >= limit {
                break;
            }
            if self.is_active(p) {
                active.push(p.clone());
            }
        }
        active
    }

    /// A random sample of up to `limit` active peers.
    pub fn get_random_active_peers(&self, limit: usize) -> Vec<RemotePeer> {
        use rand::seq::SliceRandom;
        let mut peers = self.get_active_peers(0);
        peers.shuffle(&mut rand::thread_rng());
        peers.truncate(limit);
        peers
    }

    fn reached_outbound_limit(&self) -> bool {
        let (_, outbound) = self.conns.counts();
        outbound >= self.config.max_outbound_connections
    }

    /// Whether the node should keep hunting for peers.
    pub fn require_peers(&self) -> bool {
        self.get_active_peers(0).len() < self.config.active_peer_target
            && !self.reached_outbound_limit()
    }

    // ---- admission ----

    /// Whether we may keep interacting with this peer. Handshakes skip the
    /// acquaintance requirement; Addr messages from unknown peers may also
    /// skip it so that discovery stays effective.
    pub fn can_accept_peer(
        &self,
        peer: &RemotePeer,
        skip_acquaintance_check: bool,
    ) -> Result<(), NodeError> {
        if !skip_acquaintance_check && !self.is_acquainted(&peer.id) {
            return Err(NodeError::Unacquainted);
        }
        if self.is_banned(peer) {
            let until = self.ban_until(&peer.addr).unwrap_or(0);
            if until > now_unix() + LONG_BAN_HORIZON_SECS {
                return Err(NodeError::Banned);
            }
        }
        Ok(())
    }

    // ---- lifecycle bookkeeping ----

    /// Disconnect bookkeeping: backdate the peer's `last_seen` by an hour
    /// to accelerate cleanup while still tolerating quick reconnection.
    /// `None` mirrors the original nil-argument contract.
    pub fn has_disconnected(&self, addr: Option<&NodeAddr>) -> Result<(), NodeError> {
        let addr = addr.ok_or(NodeError::NilPassed)?;
        let id = PeerId::from_addr(addr);

        {
            let mut peers = self.peers.write();
            let peer = peers.get_mut(&id).ok_or(NodeError::PeerNotFound)?;
            debug!("[PEER MANAGER] Peer has disconnected: {}", peer.id.short());
            peer.last_seen = peer.last_seen.saturating_sub(LAST_SEEN_BACKDATE_SECS);
        }

        self.clean_peers();
        Ok(())
    }

    /// Evict stale peers. Keeps active peers and banned peers whose ban
    /// ends within the horizon; everything else is dropped along with its
    /// acquaintance entry. Returns the number evicted.
    pub fn clean_peers(&self) -> usize {
        let now = now_unix();
        let mut peers = self.peers.write();

        let mut evicted = Vec::new();
        peers.retain(|id, peer| {
            let banned =
                matches!(self.time_ban.read().get(&Self::ban_key(&peer.addr)),
                    Some(&until) if until > now);
            let keep = if banned {
                matches!(self.time_ban.read().get(&Self::ban_key(&peer.addr)),
                    Some(&until) if until <= now + LONG_BAN_HORIZON_SECS)
            } else {
                self.seen_recently(peer, now)
            };
            if !keep {
                evicted.push(id.clone());
            }
            keep
        });
        drop(peers);

        let mut acquainted = self.acquainted.write();
        for id in &evicted {
            acquainted.remove(id);
        }

        evicted.len()
    }

    // ---- persistence ----

    /// Persist active, non-seed, sufficiently aged peers in one batch.
    pub fn save_peers(&self) -> Result<usize, NodeError> {
        let Some(db) = &self.db else { return Ok(0) };

        let now = now_unix();
        let mut batch = sled::Batch::default();
        let mut saved = 0usize;

        for peer in self.peers.read().values() {
            let old_enough = peer.age_secs(now) >= self.config.min_save_age_secs;
            if !old_enough || !self.seen_recently(peer, now) || peer.is_hardcoded_seed {
                continue;
            }
            let record = PersistedPeer {
                address: peer.addr.as_str().to_string(),
                created_at: peer.created_at,
                last_seen: peer.last_seen,
                ban_until: self.ban_until(&peer.addr),
            };
            let encoded =
                bincode::serialize(&record).map_err(|e| NodeError::Storage(e.to_string()))?;
            batch.insert(peer.id.as_str().as_bytes(), encoded);
            saved += 1;
        }

        db.apply_batch(batch)?;
        Ok(saved)
    }

    /// Restore persisted peers without clobbering entries that already
    /// exist in the registry (bootstrap may have added them first).
    pub fn load_peers(&self) -> Result<usize, NodeError> {
        let Some(db) = &self.db else { return Ok(0) };

        let mut loaded = 0usize;
        for item in db.iter() {
            let (_, value) = item?;
            let Ok(record) = bincode::deserialize::<PersistedPeer>(&value) else {
                continue;
            };

            let addr = NodeAddr::new(record.address);
            let mut peer = RemotePeer::new(addr);
            if self.peer_exists(&peer.id) {
                continue;
            }
            peer.created_at = record.created_at;
            peer.last_seen = record.last_seen;

            if let Some(until) = record.ban_until {
                self.time_ban
                    .write()
                    .insert(Self::ban_key(&peer.addr), until);
            }

            self.peers.write().insert(peer.id.clone(), peer);
            loaded += 1;
        }

        if loaded > 0 {
            info!("[PEER MANAGER] Loaded {} peers from storage", loaded);
        }
        Ok(loaded)
    }

    /// Drop every peer from memory and storage.
    pub fn forget_peers(&self) {
        self.peers.write().clear();
        self.acquainted.write().clear();
        if let Some(db) = &self.db {
            let _ = db.clear();
        }
    }

    // ---- connection establishment ----

    /// Handshake + GetAddr to a known peer.
    pub async fn connect_to_peer(
        &self,
        gossip: &Arc<Gossip>,
        id: &PeerId,
    ) -> Result<(), NodeError> {
        let peer = self.get_peer(id).ok_or(NodeError::PeerNotFound)?;
        debug!(
            "[PEER MANAGER] Attempting to connect to peer {}",
            peer.id.short()
        );
        gossip.send_handshake(&peer).await?;
        gossip.send_get_addr_to_peer(&peer).await?;
        Ok(())
    }

    // ---- periodic management ----

    /// Load persisted peers and start the maintenance loops. Loops run
    /// until `stop()` flips the shared shutdown signal.
    pub fn manage(self: &Arc<Self>, gossip: Arc<Gossip>) {
        if let Err(e) = self.load_peers() {
            warn!("[PEER MANAGER] failed to load peer addresses: {e}");
        }

        self.spawn_loop(
            self.config.self_adv_interval_secs,
            "self-advertise",
            gossip.clone(),
            |pm, gossip| async move {
                let connected = pm.get_connected_peers();
                if !connected.is_empty() {
                    gossip.self_advertise(&connected).await;
                }
                pm.clean_peers();
            },
        );

        self.spawn_loop(
            self.config.intro_interval_secs,
            "intro",
            gossip.clone(),
            |_, gossip| async move {
                gossip.send_intro(None).await;
            },
        );

        self.spawn_loop(
            self.config.get_addr_interval_secs,
            "get-addr",
            gossip.clone(),
            |pm, gossip| async move {
                gossip.send_get_addr(pm.get_active_peers(0)).await;
            },
        );

        self.spawn_loop(
            self.config.ping_interval_secs,
            "ping",
            gossip.clone(),
            |pm, gossip| async move {
                gossip.send_ping(pm.get_unacquainted_peers()).await;
            },
        );

        self.spawn_loop(
            self.config.clean_up_interval_secs,
            "cleanup",
            gossip,
            |pm, _| async move {
                let cleaned = pm.clean_peers();
                if let Err(e) = pm.save_peers() {
                    warn!("[PEER MANAGER] failed to save peers: {e}");
                }
                debug!(
                    "[PEER MANAGER] Cleaned and saved peers (known: {}, cleaned: {})",
                    pm.peer_count(),
                    cleaned
                );
            },
        );
    }

    fn spawn_loop<F, Fut>(
        self: &Arc<Self>,
        interval_secs: u64,
        name: &'static str,
        gossip: Arc<Gossip>,
        body: F,
    ) where
        F: Fn(Arc<PeerManager>, Arc<Gossip>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let pm = Arc::clone(self);
        let mut shutdown = self.shutdown_rx();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // tokio's first tick fires immediately; swallow it so the loop
            // waits a full interval before its first run.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        body(Arc::clone(&pm), Arc::clone(&gossip)).await;
                    }
                    _ = shutdown.changed() => {
                        debug!("[PEER MANAGER] {name} loop stopped");
                        return;
                    }
                }
            }
        });
    }

    /// Persist peers and stop every loop. Safe to call from any number of
    /// tasks; only the first caller does the work.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.clean_peers();
        if let Err(e) = self.save_peers() {
            warn!("[PEER MANAGER] failed to save peers on stop: {e}");
        }
        let _ = self.shutdown_tx.send(true);
        info!("[PEER MANAGER] Peer manager has stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> Arc<PeerManager> {
        let config = Arc::new(NodeConfig::default());
        let local = LocalIdentity::new(NodeAddr::new("9.9.9.9:7000"));
        PeerManager::new(config, local, None)
    }

    fn manager_with_db(db: sled::Db) -> Arc<PeerManager> {
        let config = Arc::new(NodeConfig::default());
        let local = LocalIdentity::new(NodeAddr::new("9.9.9.9:7000"));
        PeerManager::new(config, local, Some(db))
    }

    fn peer(n: u8) -> RemotePeer {
        RemotePeer::new(NodeAddr::new(format!("8.8.8.{n}:7000")))
    }

    #[test]
    fn local_node_never_enters_registry() {
        let pm = manager();
        let own = RemotePeer::new(NodeAddr::new("9.9.9.9:7000"));
        pm.add_peer(own.clone());
        assert!(!pm.peer_exists(&own.id));
        pm.add_or_update_peer(&own);
        assert!(!pm.peer_exists(&own.id));
    }

    #[test]
    fn unknown_peer_starts_backdated() {
        let pm = manager();
        let p = peer(1);
        pm.add_or_update_peer(&p);
        let stored = pm.get_peer(&p.id).unwrap();
        let now = now_unix();
        assert!(stored.last_seen <= now - LAST_SEEN_BACKDATE_SECS + 5);
        // Still active: the window is three hours.
        assert!(pm.is_active(&stored));
    }

    #[test]
    fn connected_peer_is_bumped_to_now() {
        let pm = manager();
        let p = peer(1);
        pm.add_peer(p.clone());
        pm.conns().add(p.id.clone(), Direction::Outbound);
        pm.add_or_update_peer(&p);
        let stored = pm.get_peer(&p.id).unwrap();
        assert!(stored.last_seen + 5 >= now_unix());
    }

    #[test]
    fn disconnected_known_peer_is_backdated_again() {
        let pm = manager();
        let p = peer(1);
        pm.add_peer(p.clone());
        let before = pm.get_peer(&p.id).unwrap().last_seen;
        pm.add_or_update_peer(&p);
        let after = pm.get_peer(&p.id).unwrap().last_seen;
        assert!(after <= before - LAST_SEEN_BACKDATE_SECS + 5);
    }

    #[test]
    fn has_disconnected_contract() {
        let pm = manager();
        assert!(matches!(
            pm.has_disconnected(None),
            Err(NodeError::NilPassed)
        ));
        assert_eq!(
            pm.has_disconnected(None).unwrap_err().to_string(),
            "nil passed"
        );

        let unknown = NodeAddr::new("1.2.3.4:5");
        assert!(matches!(
            pm.has_disconnected(Some(&unknown)),
            Err(NodeError::PeerNotFound)
        ));

        let p = peer(1);
        pm.add_peer(p.clone());
        let before = pm.get_peer(&p.id).unwrap().last_seen;
        pm.has_disconnected(Some(&p.addr)).unwrap();
        let after = pm.get_peer(&p.id).unwrap().last_seen;
        assert!(after <= before - LAST_SEEN_BACKDATE_SECS + 5);
    }

    #[test]
    fn connect_fail_count_escalates_to_ban() {
        let pm = manager();
        let p = peer(1);
        pm.add_peer(p.clone());
        assert_eq!(pm.incr_conn_fail(&p.addr), 1);
        assert_eq!(pm.incr_conn_fail(&p.addr), 2);
        assert_eq!(pm.incr_conn_fail(&p.addr), 3);
        pm.add_time_ban(&p, 900);
        assert!(pm.is_banned(&p));
        pm.clear_conn_fail(&p.addr);
        assert_eq!(pm.conn_fail_count(&p.addr), 0);
    }

    #[test]
    fn seeds_cannot_be_banned() {
        let pm = manager();
        let seed = RemotePeer::seed(NodeAddr::new("8.8.8.8:7000"));
        pm.add_time_ban(&seed, 900);
        assert!(!pm.is_banned(&seed));
    }

    #[test]
    fn clean_peers_evicts_stale_and_drops_acquaintance() {
        let pm = manager();
        let mut stale = peer(1);
        stale.last_seen = now_unix() - 4 * 3600;
        let fresh = peer(2);
        pm.add_peer(stale.clone());
        pm.add_peer(fresh.clone());
        pm.add_acquainted(&stale.id);

        let cleaned = pm.clean_peers();
        assert_eq!(cleaned, 1);
        assert!(!pm.peer_exists(&stale.id));
        assert!(!pm.is_acquainted(&stale.id));
        assert!(pm.peer_exists(&fresh.id));
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();

        let pm = manager_with_db(db.clone());
        let mut old = peer(1);
        old.created_at = now_unix() - 30 * 60;
        old.last_seen = now_unix();
        pm.add_peer(old.clone());

        // Too young to save.
        let young = peer(2);
        pm.add_peer(young.clone());

        // Seeds are never saved.
        let seed = RemotePeer::seed(NodeAddr::new("8.8.8.3:7000"));
        pm.add_peer(seed);

        assert_eq!(pm.save_peers().unwrap(), 1);

        let pm2 = manager_with_db(db);
        assert_eq!(pm2.load_peers().unwrap(), 1);
        let restored = pm2.get_peer(&old.id).unwrap();
        assert_eq!(restored.addr, old.addr);
        assert_eq!(restored.created_at, old.created_at);
    }

    #[test]
    fn register_discovered_is_idempotent() {
        let pm = manager();
        let addr = NodeAddr::new("8.8.8.5:7000");
        let demoted = now_unix() - 5 * 24 * 3600;
        pm.register_discovered(addr.clone(), demoted);
        pm.register_discovered(addr.clone(), demoted);
        let id = PeerId::from_addr(&addr);
        let stored = pm.get_peer(&id).unwrap();
        assert_eq!(stored.last_seen, demoted);
        assert_eq!(pm.peer_count(), 1);
    }

    #[test]
    fn require_peers_respects_outbound_ceiling() {
        let pm = manager();
        assert!(pm.require_peers());
        for n in 0..pm.config.max_outbound_connections {
            pm.conns()
                .add(PeerId::from_raw(format!("out-{n}")), Direction::Outbound);
        }
        assert!(!pm.require_peers());
    }

    #[test]
    fn stop_is_idempotent() {
        let pm = manager();
        pm.stop();
        pm.stop();
        assert!(pm.has_stopped());
    }

    #[test]
    fn can_accept_requires_acquaintance() {
        let pm = manager();
        let p = peer(1);
        pm.add_peer(p.clone());
        assert!(matches!(
            pm.can_accept_peer(&p, false),
            Err(NodeError::Unacquainted)
        ));
        assert!(pm.can_accept_peer(&p, true).is_ok());
        pm.add_acquainted(&p.id);
        assert!(pm.can_accept_peer(&p, false).is_ok());
    }
}
