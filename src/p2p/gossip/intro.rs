//! Intro: a lightweight "I exist" announcement flooded through up to two
//! broadcaster peers, loop-suppressed by history. Receivers cache the
//! announced peer id and re-relay to their own broadcasters.

use std::sync::Arc;

use tracing::debug;

use crate::cache::expire_in;
use crate::error::NodeError;
use crate::events::NodeEvent;
use crate::identity::{PeerHandle, PeerId, RemotePeer};
use crate::p2p::history;
use crate::transport::BoxStream;
use crate::wire::{protocol_ids, Intro};

use super::Gossip;

impl Gossip {
    /// Broadcast an intro to broadcasters chosen from the connected
    /// peers. `None` announces the local node; `Some` relays a received
    /// intro onward (bounded flood, not full broadcast).
    pub async fn send_intro(self: &Arc<Self>, intro: Option<Intro>) {
        let connected = self.pm().get_connected_peers();
        let broadcasters =
            self.pick_broadcasters_from_peers(&connected, self.config().num_broadcasters);

        let msg = intro.unwrap_or_else(|| Intro {
            peer_id: self.local().peer_id().as_str().to_string(),
        });
        let msg_hash = msg.hash();

        let mut sent = 0usize;
        for peer in &broadcasters {
            // Never relay an intro back to its author.
            if peer.id.as_str() == msg.peer_id {
                continue;
            }

            let key = history::intro_key(&peer.id, &msg_hash);
            if self.history().has(&key) {
                continue;
            }

            let mut stream = match self.new_stream(peer, protocol_ids::INTRO).await {
                Ok(s) => s,
                Err(e) => {
                    self.log_connect_err(e, peer, "[SendIntro] Failed to connect");
                    continue;
                }
            };
            if let Err(e) = self.write_msg(&mut stream, &msg).await {
                self.log_err(e, peer, "[SendIntro] Failed to write");
                continue;
            }

            self.pm().update_last_seen(&peer.id);
            self.history().add(key, self.config().intro_ttl_secs);
            sent += 1;
        }

        debug!(
            "[GOSSIP] Sent intro to {} of {} broadcaster(s)",
            sent,
            broadcasters.len()
        );
    }

    /// Cache a received intro and re-relay it to our own broadcasters.
    pub(crate) async fn on_intro(
        self: &Arc<Self>,
        stream: &mut BoxStream,
        rp: &RemotePeer,
    ) -> Result<(), NodeError> {
        let msg: Intro = match self.read_msg(stream).await {
            Ok(m) => m,
            Err(e) => return Err(self.log_err(e, rp, "[OnIntro] Failed to read")),
        };

        self.intros().add_with_expiry(
            msg.peer_id.clone(),
            (),
            expire_in(self.config().intro_ttl_secs),
        );
        debug!(
            "[GOSSIP] Received and cached intro (total cached: {})",
            self.intros().len()
        );

        self.events().publish(NodeEvent::IntroReceived {
            peer_id: PeerId::from_raw(msg.peer_id.clone()),
        });

        let gossip = Arc::clone(self);
        tokio::spawn(async move {
            gossip.send_intro(Some(msg)).await;
        });

        Ok(())
    }
}
