//! Transaction receive and relay, open-session tracking and the
//! background broadcast drain loop.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::NodeError;
use crate::events::NodeEvent;
use crate::identity::RemotePeer;
use crate::p2p::history;
use crate::transport::BoxStream;
use crate::txpool::validate_tx;
use crate::types::Tx;
use crate::wire::{protocol_ids, Transaction};

use super::Gossip;

/// Open transaction sessions: ids currently being worked on by the node.
/// Pure set semantics; adding an existing id or removing an absent one is
/// a no-op.
#[derive(Default)]
pub struct TxSessions {
    open: Mutex<HashSet<String>>,
}

impl TxSessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, tx_id: &str) {
        let mut open = self.open.lock();
        if open.insert(tx_id.to_string()) {
            info!(
                "[GOSSIP] New transaction session opened (tx: {}, open: {})",
                tx_id,
                open.len()
            );
        }
    }

    pub fn has(&self, tx_id: &str) -> bool {
        self.open.lock().contains(tx_id)
    }

    pub fn remove(&self, tx_id: &str) {
        self.open.lock().remove(tx_id);
    }

    pub fn count(&self) -> usize {
        self.open.lock().len()
    }
}

impl Gossip {
    /// Handle an inbound transaction: history and pool dedup, business
    /// validation, then pool admission. Outcomes are always published as
    /// events so callers never have to inspect stream internals.
    pub(crate) async fn on_tx(
        self: &Arc<Self>,
        stream: &mut BoxStream,
        rp: &RemotePeer,
    ) -> Result<(), NodeError> {
        let msg: Transaction = match self.read_msg(stream).await {
            Ok(m) => m,
            Err(e) => return Err(self.log_err(e, rp, "[OnTx] Failed to read tx message")),
        };
        let tx = msg.tx;
        let tx_id = tx.id();

        info!(
            "[GOSSIP] Received new transaction {} from {}",
            &tx_id[..12.min(tx_id.len())],
            rp.id.short()
        );

        let key = history::tx_key(&tx_id, &rp.id);
        if self.history().has(&key) {
            return Ok(());
        }

        if self.pool().has(&tx_id) {
            return Ok(());
        }

        if let Err(e) = validate_tx(&tx, self.config().min_tx_fee) {
            debug!("[GOSSIP] Transaction is not valid: {e}");
            self.events().publish(NodeEvent::TransactionProcessed {
                id: tx_id,
                error: Some(e.to_string()),
            });
            return Ok(());
        }

        if let Err(e) = self.pool().put(tx.clone()) {
            debug!("[GOSSIP] Failed to add transaction to pool: {e}");
            self.events().publish(NodeEvent::TransactionProcessed {
                id: tx_id,
                error: Some(e.to_string()),
            });
            return Ok(());
        }

        self.history().add(key, self.config().relay_history_ttl_secs);
        // Keep a session open until the broadcast loop has relayed it.
        self.tx_sessions().add(&tx_id);
        self.tx_queue().append(tx);
        self.events().publish(NodeEvent::TransactionProcessed {
            id: tx_id,
            error: None,
        });

        Ok(())
    }

    /// Relay a transaction to the given peers, skipping any with recent
    /// history for this id. Per-target errors accumulate.
    pub async fn relay_tx(self: &Arc<Self>, tx: &Tx, peers: &[RemotePeer]) -> Vec<NodeError> {
        let tx_id = tx.id();
        debug!(
            "[GOSSIP] Relaying transaction {} to {} peer(s)",
            &tx_id[..12.min(tx_id.len())],
            peers.len()
        );

        let mut errs = Vec::new();
        let mut sent = 0usize;
        for peer in peers {
            let key = history::tx_key(&tx_id, &peer.id);
            if self.history().has(&key) {
                continue;
            }

            let mut stream = match self.new_stream(peer, protocol_ids::TX).await {
                Ok(s) => s,
                Err(e) => {
                    errs.push(self.log_connect_err(e, peer, "[RelayTx] Failed to connect"));
                    continue;
                }
            };

            let msg = Transaction { tx: tx.clone() };
            if let Err(e) = self.write_msg(&mut stream, &msg).await {
                errs.push(self.log_err(e, peer, "[RelayTx] Failed to write to stream"));
                continue;
            }

            self.history().add(key, self.config().relay_history_ttl_secs);
            sent += 1;
        }

        info!(
            "[GOSSIP] Finished relaying transaction (sent to: {})",
            sent
        );
        errs
    }

    /// Background drain of the transaction broadcast queue: validated
    /// transactions are flooded to broadcasters picked from the active
    /// peer set.
    pub(crate) fn spawn_tx_broadcast_loop(self: &Arc<Self>) {
        let gossip = Arc::clone(self);
        let mut shutdown = self.pm().shutdown_rx();
        tokio::spawn(async move {
            let interval = Duration::from_secs(gossip.config().tx_broadcast_interval_secs.max(1));
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        while let Some(tx) = gossip.tx_queue().shift() {
                            let active = gossip.pm().get_active_peers(0);
                            let broadcasters = gossip.pick_broadcasters_from_peers(
                                &active,
                                gossip.config().num_broadcasters,
                            );
                            gossip.relay_tx(&tx, &broadcasters).await;
                            gossip.tx_sessions().remove(&tx.id());
                        }
                    }
                    _ = shutdown.changed() => return,
                }
            }
        });
    }
}
