//! Ping/Pong: liveness probing with the same chain-comparison-driven sync
//! trigger as the handshake, minus version negotiation. A completed
//! round-trip acquaints the peer, exempting it from further unsolicited
//! pings.

use std::sync::Arc;

use tracing::debug;

use crate::error::NodeError;
use crate::identity::RemotePeer;
use crate::p2p::sync_state::BestBlockInfo;
use crate::transport::BoxStream;
use crate::wire::{protocol_ids, Ping, Pong};

use super::Gossip;

impl Gossip {
    fn ping_msg(&self) -> Ping {
        let tip = self.local_tip();
        Ping {
            best_block_hash: tip.hash,
            best_block_number: tip.number,
            best_block_total_difficulty: tip.total_difficulty,
        }
    }

    /// Ping one peer and process its pong.
    pub async fn send_ping_to_peer(self: &Arc<Self>, rp: &RemotePeer) -> Result<(), NodeError> {
        let mut stream = match self.new_stream(rp, protocol_ids::PING).await {
            Ok(s) => s,
            Err(e) => return Err(self.log_connect_err(e, rp, "[SendPingToPeer] Failed to connect")),
        };

        if let Err(e) = self.write_msg(&mut stream, &self.ping_msg()).await {
            return Err(self.log_err(e, rp, "[SendPingToPeer] Failed to write message"));
        }
        debug!("[GOSSIP] Sent ping to peer {}", rp.id.short());

        let pong: Pong = match self.read_msg(&mut stream).await {
            Ok(p) => p,
            Err(e) => return Err(self.log_err(e, rp, "[SendPingToPeer] Failed to read message")),
        };

        self.pm().add_or_update_peer(rp);
        self.pm().update_last_seen(&rp.id);
        self.pm().add_acquainted(&rp.id);
        debug!("[GOSSIP] Received pong from peer {}", rp.id.short());

        self.maybe_start_sync(
            rp,
            BestBlockInfo {
                hash: pong.best_block_hash,
                number: pong.best_block_number,
                total_difficulty: pong.best_block_total_difficulty,
            },
        );

        Ok(())
    }

    /// Ping the given peers concurrently. A failed ping counts as a
    /// disconnect for that peer.
    pub async fn send_ping(self: &Arc<Self>, peers: Vec<RemotePeer>) {
        let total = peers.len();
        for peer in peers {
            let gossip = Arc::clone(self);
            tokio::spawn(async move {
                if gossip.send_ping_to_peer(&peer).await.is_err() {
                    let _ = gossip.pm().has_disconnected(Some(&peer.addr));
                }
            });
        }
        debug!("[GOSSIP] Sent ping to {total} peer(s)");
    }

    /// Answer a ping with our chain summary.
    pub(crate) async fn on_ping(
        self: &Arc<Self>,
        stream: &mut BoxStream,
        rp: &RemotePeer,
    ) -> Result<(), NodeError> {
        let ping: Ping = match self.read_msg(stream).await {
            Ok(p) => p,
            Err(e) => return Err(self.log_err(e, rp, "[OnPing] Failed to read message")),
        };
        debug!("[GOSSIP] Received ping from {}", rp.id.short());

        let tip = self.local_tip();
        let pong = Pong {
            best_block_hash: tip.hash,
            best_block_number: tip.number,
            best_block_total_difficulty: tip.total_difficulty,
        };
        if let Err(e) = self.write_msg(stream, &pong).await {
            return Err(self.log_err(e, rp, "[OnPing] Failed to write message"));
        }

        // The round-trip completed from the responder's perspective too.
        self.pm().update_last_seen(&rp.id);
        self.pm().add_acquainted(&rp.id);

        self.maybe_start_sync(
            rp,
            BestBlockInfo {
                hash: ping.best_block_hash,
                number: ping.best_block_number,
                total_difficulty: ping.best_block_total_difficulty,
            },
        );

        Ok(())
    }
}
