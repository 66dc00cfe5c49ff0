//! Handshake: the introductory exchange of client version and best-chain
//! state. Completing it acquaints the two peers and may trigger chain
//! synchronization when the counterpart's chain is heavier.

use std::sync::Arc;

use tracing::{debug, info};

use crate::cache::expire_in;
use crate::error::NodeError;
use crate::identity::RemotePeer;
use crate::p2p::sync_state::BestBlockInfo;
use crate::transport::BoxStream;
use crate::wire::{protocol_ids, Handshake};

use super::{Gossip, CLIENT_VERSION};

impl Gossip {
    fn handshake_msg(&self) -> Handshake {
        let tip = self.local_tip();
        Handshake {
            version: CLIENT_VERSION.to_string(),
            best_block_hash: tip.hash,
            best_block_number: tip.number,
            best_block_total_difficulty: tip.total_difficulty,
        }
    }

    fn note_counterpart(self: &Arc<Self>, rp: &RemotePeer, msg: &Handshake) {
        // The peer answered: it is alive and acquainted, and its id goes
        // into the intro cache for the intro TTL.
        self.pm().add_or_update_peer(rp);
        self.pm().update_last_seen(&rp.id);
        self.pm().add_acquainted(&rp.id);
        self.intros().add_with_expiry(
            rp.id.as_str().to_string(),
            (),
            expire_in(self.config().intro_ttl_secs),
        );

        self.maybe_start_sync(
            rp,
            BestBlockInfo {
                hash: msg.best_block_hash.clone(),
                number: msg.best_block_number,
                total_difficulty: msg.best_block_total_difficulty,
            },
        );
    }

    /// Send a handshake and process the counterpart's response.
    pub async fn send_handshake(self: &Arc<Self>, rp: &RemotePeer) -> Result<(), NodeError> {
        let mut stream = match self.new_stream(rp, protocol_ids::HANDSHAKE).await {
            Ok(s) => s,
            Err(e) => {
                return Err(self.log_connect_err(e, rp, "[SendHandshake] Failed to connect to peer"))
            }
        };

        let msg = self.handshake_msg();
        if let Err(e) = self.write_msg(&mut stream, &msg).await {
            return Err(self.log_err(e, rp, "[SendHandshake] Failed to write to stream"));
        }

        debug!(
            "[GOSSIP] Sent handshake to peer {} (td: {})",
            rp.id.short(),
            msg.best_block_total_difficulty
        );

        let resp: Handshake = match self.read_msg(&mut stream).await {
            Ok(r) => r,
            Err(e) => return Err(self.log_err(e, rp, "[SendHandshake] Failed to read from stream")),
        };

        self.note_counterpart(rp, &resp);

        info!(
            "[GOSSIP] Received handshake response from {} (version: {}, height: {}, td: {})",
            rp.id.short(),
            resp.version,
            resp.best_block_number,
            resp.best_block_total_difficulty
        );

        Ok(())
    }

    /// Respond to an inbound handshake with our own chain state.
    pub(crate) async fn on_handshake(
        self: &Arc<Self>,
        stream: &mut BoxStream,
        rp: &RemotePeer,
    ) -> Result<(), NodeError> {
        let msg: Handshake = match self.read_msg(stream).await {
            Ok(m) => m,
            Err(e) => return Err(self.log_err(e, rp, "[OnHandshake] Failed to read message")),
        };

        info!(
            "[GOSSIP] Received handshake from {} (version: {}, height: {}, td: {})",
            rp.id.short(),
            msg.version,
            msg.best_block_number,
            msg.best_block_total_difficulty
        );

        // Acquaint before answering: the counterpart may follow up on a
        // new stream the moment it reads our response.
        self.note_counterpart(rp, &msg);
        self.pm().set_inbound(&rp.id, true);

        let resp = self.handshake_msg();
        if let Err(e) = self.write_msg(stream, &resp).await {
            return Err(self.log_err(e, rp, "[OnHandshake] Failed to send response"));
        }

        Ok(())
    }
}
