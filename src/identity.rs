//! Peer identity: addresses, derived ids and the local/remote peer split.
//!
//! A peer's cryptographic identity is a pure function of its address, so
//! two values carrying the same address string always name the same peer.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Current wall-clock time as unix seconds.
pub fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// Transport-level peer address in `host:port` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeAddr(String);

impl NodeAddr {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// An address is valid when it parses as a socket address.
    pub fn is_valid(&self) -> bool {
        self.0.parse::<SocketAddr>().is_ok()
    }

    /// IP portion of the address, used as the ban-table key.
    pub fn ip(&self) -> Option<IpAddr> {
        self.0.parse::<SocketAddr>().ok().map(|s| s.ip())
    }

    /// Whether the address points at the publicly routable internet.
    /// Loopback, private-range, link-local and unspecified addresses are
    /// not routable; production mode refuses to relay them.
    pub fn is_routable(&self) -> bool {
        match self.ip() {
            Some(IpAddr::V4(v4)) => {
                !v4.is_unspecified() && !v4.is_loopback() && !is_private_ipv4(&v4)
            }
            Some(IpAddr::V6(v6)) => !v6.is_unspecified() && !v6.is_loopback(),
            None => false,
        }
    }
}

impl fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// RFC1918 ranges plus link-local and CGNAT.
fn is_private_ipv4(ip: &Ipv4Addr) -> bool {
    let o = ip.octets();
    o[0] == 10
        || (o[0] == 172 && (16..=31).contains(&o[1]))
        || (o[0] == 192 && o[1] == 168)
        || (o[0] == 169 && o[1] == 254)
        || (o[0] == 100 && (64..=127).contains(&o[1]))
}

/// Derived peer identity: hex blake3 of the address string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn from_addr(addr: &NodeAddr) -> Self {
        Self(hex::encode(blake3::hash(addr.as_str().as_bytes()).as_bytes()))
    }

    pub fn from_raw(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Common view over the local and remote peer variants.
pub trait PeerHandle {
    fn peer_id(&self) -> &PeerId;
    fn addr(&self) -> &NodeAddr;
}

/// The local node's own identity. Owns the listen address; the id is
/// derived exactly as for remote peers.
#[derive(Debug, Clone)]
pub struct LocalIdentity {
    addr: NodeAddr,
    id: PeerId,
}

impl LocalIdentity {
    pub fn new(addr: NodeAddr) -> Self {
        let id = PeerId::from_addr(&addr);
        Self { addr, id }
    }

    pub fn is_same_id(&self, id: &PeerId) -> bool {
        &self.id == id
    }
}

impl PeerHandle for LocalIdentity {
    fn peer_id(&self) -> &PeerId {
        &self.id
    }

    fn addr(&self) -> &NodeAddr {
        &self.addr
    }
}

/// A known remote peer. Liveness timestamps are mutated only through the
/// peer manager; everything else is fixed at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemotePeer {
    pub addr: NodeAddr,
    pub id: PeerId,
    /// Unix seconds of the last interaction with this peer.
    pub last_seen: u64,
    /// Unix seconds when this peer entered the registry.
    pub created_at: u64,
    /// Peer came from the configured bootstrap list; exempt from bans and
    /// from persistence.
    pub is_hardcoded_seed: bool,
    /// Peer first reached us over an inbound connection.
    pub is_inbound: bool,
}

impl RemotePeer {
    pub fn new(addr: NodeAddr) -> Self {
        let id = PeerId::from_addr(&addr);
        let now = now_unix();
        Self {
            addr,
            id,
            last_seen: now,
            created_at: now,
            is_hardcoded_seed: false,
            is_inbound: false,
        }
    }

    pub fn seed(addr: NodeAddr) -> Self {
        Self {
            is_hardcoded_seed: true,
            ..Self::new(addr)
        }
    }

    /// Age of the registry entry in seconds.
    pub fn age_secs(&self, now: u64) -> u64 {
        now.saturating_sub(self.created_at)
    }
}

impl PeerHandle for RemotePeer {
    fn peer_id(&self) -> &PeerId {
        &self.id
    }

    fn addr(&self) -> &NodeAddr {
        &self.addr
    }
}

/// Whether an advertised timestamp is implausible: zero, too far in the
/// future, or too far in the past. The thresholds are independent of the
/// registry's activity window.
pub fn is_bad_timestamp(ts: i64, now: u64, max_future_secs: u64, max_past_secs: u64) -> bool {
    if ts <= 0 {
        return true;
    }
    let ts = ts as u64;
    if ts > now + max_future_secs {
        return true;
    }
    if ts + max_past_secs < now {
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_pure_function_of_addr() {
        let a = NodeAddr::new("10.0.0.1:9000");
        let b = NodeAddr::new("10.0.0.1:9000");
        assert_eq!(PeerId::from_addr(&a), PeerId::from_addr(&b));
        assert_ne!(
            PeerId::from_addr(&a),
            PeerId::from_addr(&NodeAddr::new("10.0.0.1:9001"))
        );
    }

    #[test]
    fn routability() {
        assert!(!NodeAddr::new("127.0.0.1:9000").is_routable());
        assert!(!NodeAddr::new("10.1.2.3:9000").is_routable());
        assert!(!NodeAddr::new("192.168.1.4:9000").is_routable());
        assert!(!NodeAddr::new("0.0.0.0:9000").is_routable());
        assert!(NodeAddr::new("8.8.8.8:9000").is_routable());
        assert!(!NodeAddr::new("not-an-addr").is_routable());
    }

    #[test]
    fn bad_timestamps() {
        let now = 1_700_000_000u64;
        // zero
        assert!(is_bad_timestamp(0, now, 600, 10_800));
        // 10 minutes + 1 second in the future
        assert!(is_bad_timestamp(now as i64 + 601, now, 600, 10_800));
        // exactly at the future bound is fine
        assert!(!is_bad_timestamp(now as i64 + 600, now, 600, 10_800));
        // 3 hours + 1 second in the past
        assert!(is_bad_timestamp(now as i64 - 10_801, now, 600, 10_800));
        // recent
        assert!(!is_bad_timestamp(now as i64 - 60, now, 600, 10_800));
    }
}
