//! Address exchange and relay: GetAddr/Addr, bounded flood relay of
//! discovered addresses and periodic self-advertisement.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{AddrError, NodeError, RelayError};
use crate::events::NodeEvent;
use crate::identity::{is_bad_timestamp, now_unix, PeerHandle, PeerId, RemotePeer};
use crate::p2p::history;
use crate::transport::BoxStream;
use crate::wire::{protocol_ids, Addr, AddrEntry, GetAddr};

use super::Gossip;

/// Ceiling on addresses returned from one GetAddr request.
const MAX_GET_ADDR_RESPONSE: usize = 2500;

/// Ceiling on addresses carried by one relayed Addr message.
const MAX_ADDRS_PER_RELAY: usize = 10;

/// Relayed addresses must have been seen within the last hour.
const MAX_RELAY_ADDR_AGE_SECS: u64 = 3600;

/// Demotion applied to implausible timestamps: "five days ago".
const DEMOTED_AGE_SECS: u64 = 5 * 24 * 3600;

impl Gossip {
    /// Decode and validate an inbound Addr payload, registering each
    /// plausible address. Implausible timestamps demote the peer to
    /// minimum activity priority instead of discarding it. Returns the
    /// entries worth relaying onward.
    async fn read_addr_payload(
        &self,
        stream: &mut BoxStream,
        rp: &RemotePeer,
    ) -> Result<Vec<AddrEntry>, NodeError> {
        let resp: Addr = match self.read_msg(stream).await {
            Ok(m) => m,
            Err(e) => return Err(self.log_err(e, rp, "[OnAddr] Failed to read stream")),
        };

        if resp.addresses.len() > self.config().max_addrs_expected {
            debug!(
                "[GOSSIP] Too many addresses received from {} ({})",
                rp.id.short(),
                resp.addresses.len()
            );
            return Err(NodeError::Protocol(AddrError::TooManyReceived.to_string()));
        }

        let now = now_unix();
        let mut accepted = Vec::new();
        let mut invalid = 0usize;

        for entry in resp.addresses {
            if !entry.address.is_valid() {
                invalid += 1;
                continue;
            }

            let candidate = RemotePeer::new(entry.address.clone());
            if self.pm().is_banned(&candidate) {
                invalid += 1;
                continue;
            }

            let last_seen = if is_bad_timestamp(
                entry.timestamp,
                now,
                self.config().bad_timestamp_future_secs,
                self.config().bad_timestamp_past_secs,
            ) {
                now.saturating_sub(DEMOTED_AGE_SECS)
            } else {
                entry.timestamp.max(0) as u64
            };

            self.pm().register_discovered(entry.address.clone(), last_seen);
            accepted.push(entry);
        }

        debug!(
            "[GOSSIP] Received addresses from {} (accepted: {}, invalid: {})",
            rp.id.short(),
            accepted.len(),
            invalid
        );

        Ok(accepted)
    }

    /// Handle an unsolicited Addr message; accepted addresses are relayed.
    pub(crate) async fn on_addr_stream(
        self: &Arc<Self>,
        stream: &mut BoxStream,
        rp: &RemotePeer,
    ) -> Result<(), NodeError> {
        let addresses = match self.read_addr_payload(stream, rp).await {
            Ok(a) => a,
            Err(e) => {
                self.events().publish(NodeEvent::AddrProcessed {
                    error: Some(e.to_string()),
                });
                return Err(e);
            }
        };

        if !addresses.is_empty() {
            let gossip = Arc::clone(self);
            tokio::spawn(async move {
                gossip.relay_addresses(&addresses).await;
            });
        }

        self.events()
            .publish(NodeEvent::AddrProcessed { error: None });
        Ok(())
    }

    /// Ask one peer for addresses and process its Addr response.
    pub async fn send_get_addr_to_peer(
        self: &Arc<Self>,
        rp: &RemotePeer,
    ) -> Result<Vec<AddrEntry>, NodeError> {
        let mut stream = match self.new_stream(rp, protocol_ids::GET_ADDR).await {
            Ok(s) => s,
            Err(e) => {
                return Err(self.log_connect_err(e, rp, "[SendGetAddrToPeer] Failed to connect"))
            }
        };

        if let Err(e) = self.write_msg(&mut stream, &GetAddr::default()).await {
            return Err(self.log_err(e, rp, "[SendGetAddrToPeer] Failed to write"));
        }
        debug!("[GOSSIP] GetAddr sent to peer {}", rp.id.short());

        let addresses = self.read_addr_payload(&mut stream, rp).await?;
        self.events().publish(NodeEvent::AddrReceived {
            count: addresses.len(),
        });
        Ok(addresses)
    }

    /// Request addresses from the given peers; responses are relayed per
    /// the discovery protocol. A no-op while no more peers are required.
    pub async fn send_get_addr(self: &Arc<Self>, peers: Vec<RemotePeer>) {
        if !self.pm().require_peers() {
            return;
        }
        for peer in peers {
            let gossip = Arc::clone(self);
            tokio::spawn(async move {
                match gossip.send_get_addr_to_peer(&peer).await {
                    Ok(addresses) if !addresses.is_empty() => {
                        gossip.relay_addresses(&addresses).await;
                    }
                    _ => {}
                }
            });
        }
    }

    /// Answer a GetAddr with up to 2,500 active addresses, excluding the
    /// local node, the requester and hardcoded seeds.
    pub(crate) async fn on_get_addr(
        &self,
        stream: &mut BoxStream,
        rp: &RemotePeer,
    ) -> Result<(), NodeError> {
        let _req: GetAddr = match self.read_msg(stream).await {
            Ok(m) => m,
            Err(e) => return Err(self.log_err(e, rp, "[OnGetAddr] Failed to read")),
        };
        debug!("[GOSSIP] Received GetAddr from {}", rp.id.short());

        let mut active = self.pm().get_active_peers(0);
        if active.len() > MAX_GET_ADDR_RESPONSE {
            active = self.pm().get_random_active_peers(MAX_GET_ADDR_RESPONSE);
        }

        let mut msg = Addr::default();
        for peer in active {
            if peer.id == rp.id || peer.is_hardcoded_seed {
                continue;
            }
            msg.addresses.push(AddrEntry {
                address: peer.addr.clone(),
                timestamp: peer.last_seen as i64,
            });
        }

        if let Err(e) = self.write_msg(stream, &msg).await {
            return Err(self.log_err(e, rp, "[OnGetAddr] Failed to write"));
        }
        debug!("[GOSSIP] Sent GetAddr response to {}", rp.id.short());
        Ok(())
    }

    /// Flood a validated address batch to the broadcaster peers.
    ///
    /// Rules: at most ten addresses per batch; every address must be
    /// valid, not our own, seen within the last hour and (in production)
    /// publicly routable. A batch already sent to the same peer within
    /// the history TTL is skipped before any stream is opened. Errors
    /// accumulate per address and per target; partial success is fine.
    pub async fn relay_addresses(self: &Arc<Self>, addrs: &[AddrEntry]) -> Vec<RelayError> {
        let mut errs = Vec::new();
        let now = now_unix();

        if addrs.len() > MAX_ADDRS_PER_RELAY {
            errs.push(RelayError::TooManyAddresses);
            return errs;
        }

        let mut relayable = Vec::new();
        for entry in addrs {
            if !entry.address.is_valid() {
                errs.push(RelayError::NotValid(entry.address.clone()));
                continue;
            }

            let entry_id = PeerId::from_addr(&entry.address);
            if self.local().is_same_id(&entry_id) {
                errs.push(RelayError::SameAsLocal(entry.address.clone()));
                continue;
            }

            let ts = entry.timestamp.max(0) as u64;
            let age_ok = ts + MAX_RELAY_ADDR_AGE_SECS > now && ts <= now + MAX_RELAY_ADDR_AGE_SECS;
            if !age_ok {
                errs.push(RelayError::TooOld(entry.address.clone()));
                continue;
            }

            if self.config().production_mode && !entry.address.is_routable() {
                errs.push(RelayError::NotRoutable(entry.address.clone()));
                continue;
            }

            if self.pm().is_banned(&RemotePeer::new(entry.address.clone())) {
                errs.push(RelayError::BannedPeer(entry.address.clone()));
                continue;
            }

            relayable.push(entry.clone());
        }

        if relayable.is_empty() {
            errs.push(RelayError::NoAddrToRelay);
            return errs;
        }

        let candidates: Vec<_> = relayable
            .iter()
            .map(|e| (e.address.clone(), e.timestamp))
            .collect();
        let broadcasters =
            self.pick_broadcasters(&candidates, self.config().num_broadcasters);

        debug!(
            "[GOSSIP] Relaying addresses (count: {}, broadcasters: {})",
            relayable.len(),
            broadcasters.len()
        );

        let msg = Addr {
            addresses: relayable.clone(),
        };
        let msg_bytes = bincode::serialize(&msg).unwrap_or_default();

        let mut relayed = 0usize;
        for rp in &broadcasters {
            let key = history::addr_relay_key(&msg_bytes, &rp.id);
            if self.history().has(&key) {
                debug!(
                    "[GOSSIP] Already sent same Addr to {}; skipping",
                    rp.id.short()
                );
                continue;
            }

            let mut stream = match self.new_stream(rp, protocol_ids::ADDR).await {
                Ok(s) => s,
                Err(e) => {
                    self.log_connect_err(e, rp, "[RelayAddresses] Failed to connect to peer");
                    errs.push(RelayError::Connect(rp.id.short().to_string()));
                    continue;
                }
            };

            if let Err(e) = self.write_msg(&mut stream, &msg).await {
                self.log_err(e, rp, "[RelayAddresses] Failed to write to peer");
                errs.push(RelayError::Write(rp.id.short().to_string()));
                continue;
            }

            self.history().add(key, self.config().addr_relay_ttl_secs);
            relayed += 1;
        }

        info!(
            "[GOSSIP] Address relay completed (count: {}, relayed to: {})",
            relayable.len(),
            relayed
        );
        self.events()
            .publish(NodeEvent::AddressesRelayed { count: relayed });

        errs
    }

    /// Broadcast the local address to broadcasters chosen from the
    /// connected peers. Returns how many peers were advertised to.
    pub async fn self_advertise(self: &Arc<Self>, connected: &[RemotePeer]) -> usize {
        let msg = Addr {
            addresses: vec![AddrEntry {
                address: self.local().addr().clone(),
                timestamp: now_unix() as i64,
            }],
        };

        let broadcasters =
            self.pick_broadcasters_from_peers(connected, self.config().num_broadcasters);

        let mut sent = 0usize;
        for rp in &broadcasters {
            let mut stream = match self.new_stream(rp, protocol_ids::ADDR).await {
                Ok(s) => s,
                Err(e) => {
                    self.log_connect_err(e, rp, "[SelfAdvertise] Failed to connect");
                    continue;
                }
            };
            if let Err(e) = self.write_msg(&mut stream, &msg).await {
                self.log_err(e, rp, "[SelfAdvertise] Failed to write");
                continue;
            }
            sent += 1;
        }

        debug!(
            "[GOSSIP] Self advertisement completed (connected: {}, advertised to: {})",
            connected.len(),
            sent
        );
        sent
    }
}
