//! Loop-suppression history: "have I already sent/received this logical
//! event for this peer" within a TTL window.
//!
//! Keys are composite tuples of opaque values serialized with length
//! prefixes so that key equality is exactly tuple equality. Dedup is
//! best-effort: two workers racing check-then-insert on the same key may
//! rarely double-relay, which the protocol tolerates.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::cache::{expire_in, TtlCache};
use crate::identity::PeerId;

/// Opaque composite key over an ordered value tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HistoryKey(String);

fn compose(parts: &[&[u8]]) -> HistoryKey {
    let mut buf = Vec::with_capacity(parts.iter().map(|p| p.len() + 4).sum());
    for part in parts {
        buf.extend_from_slice(&(part.len() as u32).to_be_bytes());
        buf.extend_from_slice(part);
    }
    HistoryKey(hex::encode(blake3::hash(&buf).as_bytes()))
}

/// Key for a block relayed to / received from a peer.
pub fn block_key(hash: &str, peer: &PeerId) -> HistoryKey {
    compose(&[b"b", hash.as_bytes(), peer.as_str().as_bytes()])
}

/// Key for an orphan/requested block; distinct from `block_key` so that a
/// targeted request never suppresses an ordinary relay.
pub fn orphan_block_key(hash: &str, peer: &PeerId) -> HistoryKey {
    compose(&[b"ob", hash.as_bytes(), peer.as_str().as_bytes()])
}

/// Key for a transaction exchanged with a peer.
pub fn tx_key(tx_id: &str, peer: &PeerId) -> HistoryKey {
    compose(&[tx_id.as_bytes(), peer.as_str().as_bytes()])
}

/// Key for an address set relayed to a peer.
pub fn addr_relay_key(addr_msg: &[u8], peer: &PeerId) -> HistoryKey {
    compose(&[addr_msg, peer.as_str().as_bytes()])
}

/// Key for an intro exchanged with a peer.
pub fn intro_key(peer: &PeerId, intro_hash: &str) -> HistoryKey {
    compose(&[peer.as_str().as_bytes(), intro_hash.as_bytes()])
}

/// Capacity-bounded, internally synchronized idempotency ledger.
pub struct HistoryCache {
    cache: Arc<TtlCache<HistoryKey, ()>>,
}

impl HistoryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: Arc::new(TtlCache::new(capacity)),
        }
    }

    /// Record an event for `ttl_secs`. Idempotent.
    pub fn add(&self, key: HistoryKey, ttl_secs: u64) {
        self.cache.add_with_expiry(key, (), expire_in(ttl_secs));
    }

    pub fn has(&self, key: &HistoryKey) -> bool {
        self.cache.has(key)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Start the active expiry sweep.
    pub fn start_sweep(&self, interval: Duration, shutdown: watch::Receiver<bool>) {
        let _ = self.cache.start_sweep(interval, shutdown);
    }
}
