//! Block relay and chain synchronization: full-body relay, locator-based
//! hash sync, batched body fetching and the single-block request path.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::chain::BlockContext;
use crate::error::NodeError;
use crate::events::NodeEvent;
use crate::identity::RemotePeer;
use crate::p2p::history;
use crate::p2p::queues::QueuedBlockHash;
use crate::transport::BoxStream;
use crate::types::{Block, Locators};
use crate::wire::{
    protocol_ids, BlockBodies, BlockBody, BlockHashes, GetBlockBodies, GetBlockHashes,
    RequestBlock,
};

use super::Gossip;

impl Gossip {
    /// Send the full block to each target peer that has no recorded
    /// history for this hash. Per-target failures accumulate; partial
    /// relay success is acceptable.
    pub async fn relay_block(
        self: &Arc<Self>,
        block: &Block,
        peers: &[RemotePeer],
    ) -> Vec<NodeError> {
        debug!(
            "[GOSSIP] Relaying block {} to {} peer(s)",
            block.number(),
            peers.len()
        );

        let mut errs = Vec::new();
        let mut sent = 0usize;
        for peer in peers {
            let key = history::block_key(&block.hash, &peer.id);
            if self.history().has(&key) {
                continue;
            }

            let mut stream = match self.new_stream(peer, protocol_ids::BLOCK_BODY).await {
                Ok(s) => s,
                Err(e) => {
                    errs.push(self.log_connect_err(e, peer, "[RelayBlock] Failed to connect to peer"));
                    continue;
                }
            };

            let msg = BlockBody {
                block: block.clone(),
            };
            if let Err(e) = self.write_msg(&mut stream, &msg).await {
                errs.push(self.log_err(e, peer, "[RelayBlock] Failed to write to peer"));
                continue;
            }

            self.history().add(key, self.config().relay_history_ttl_secs);
            sent += 1;
        }

        info!(
            "[GOSSIP] Finished relaying block {} (sent to: {})",
            block.number(),
            sent
        );
        errs
    }

    /// Process a relayed block body. Success or failure is always
    /// published as an event, never silently dropped; out-of-order blocks
    /// surface as orphan errors from the chain capability.
    pub(crate) async fn on_block_body(
        self: &Arc<Self>,
        stream: &mut BoxStream,
        rp: &RemotePeer,
    ) -> Result<(), NodeError> {
        let msg: BlockBody = match self.read_msg(stream).await {
            Ok(m) => m,
            Err(e) => return Err(self.log_err(e, rp, "[OnBlockBody] Failed to read")),
        };
        let block = msg.block;

        info!(
            "[GOSSIP] Received block {} from {} (difficulty: {})",
            block.number(),
            rp.id.short(),
            block.header.difficulty
        );

        let key = history::block_key(&block.hash, &rp.id);
        if self.history().has(&key) {
            return Ok(());
        }

        let ctx = BlockContext {
            broadcaster: Some(rp.id.clone()),
            sync_context: false,
        };
        match self.chain().process_block(&block, &ctx) {
            Err(e) => {
                self.events().publish(NodeEvent::BlockProcessed {
                    hash: block.hash.clone(),
                    number: block.number(),
                    error: Some(e.to_string()),
                });
                Err(NodeError::Protocol(e.to_string()))
            }
            Ok(()) => {
                self.events().publish(NodeEvent::BlockProcessed {
                    hash: block.hash.clone(),
                    number: block.number(),
                    error: None,
                });
                self.history().add(key, self.config().relay_history_ttl_secs);
                Ok(())
            }
        }
    }

    /// Request one specific block (typically an orphan's parent) and
    /// process it in sync context. Loop-suppressed by a history key
    /// distinct from the relay key.
    pub async fn request_block(self: &Arc<Self>, rp: &RemotePeer, hash: &str) -> Result<(), NodeError> {
        let key = history::orphan_block_key(hash, &rp.id);
        if self.history().has(&key) {
            return Ok(());
        }

        let mut stream = match self.new_stream(rp, protocol_ids::REQUEST_BLOCK).await {
            Ok(s) => s,
            Err(e) => {
                return Err(self.log_connect_err(e, rp, "[RequestBlock] Failed to connect to peer"))
            }
        };

        let msg = RequestBlock {
            hash: hash.to_string(),
        };
        if let Err(e) = self.write_msg(&mut stream, &msg).await {
            return Err(self.log_err(e, rp, "[RequestBlock] Failed to write to peer"));
        }

        let body: BlockBody = match self.read_msg(&mut stream).await {
            Ok(b) => b,
            Err(e) => return Err(self.log_err(e, rp, "[RequestBlock] Failed to read")),
        };
        let block = body.block;

        let ctx = BlockContext {
            broadcaster: Some(rp.id.clone()),
            sync_context: true,
        };
        match self.chain().process_block(&block, &ctx) {
            Err(e) => {
                debug!("[GOSSIP] Unable to process requested block: {e}");
                self.events().publish(NodeEvent::BlockProcessed {
                    hash: block.hash.clone(),
                    number: block.number(),
                    error: Some(e.to_string()),
                });
                Err(NodeError::Protocol(e.to_string()))
            }
            Ok(()) => {
                self.events().publish(NodeEvent::BlockProcessed {
                    hash: block.hash.clone(),
                    number: block.number(),
                    error: None,
                });
                self.history().add(key, self.config().relay_history_ttl_secs);
                Ok(())
            }
        }
    }

    /// Serve a single-block request.
    pub(crate) async fn on_request_block(
        &self,
        stream: &mut BoxStream,
        rp: &RemotePeer,
    ) -> Result<(), NodeError> {
        let msg: RequestBlock = match self.read_msg(stream).await {
            Ok(m) => m,
            Err(e) => return Err(self.log_err(e, rp, "[OnRequestBlock] Failed to read")),
        };

        if msg.hash.is_empty() {
            let err = NodeError::Protocol("Invalid RequestBlock message: empty 'Hash' field".into());
            debug!("[GOSSIP] {err} (peer: {})", rp.id.short());
            return Err(err);
        }

        let Some(block) = self.chain().get_block_by_hash(&msg.hash) else {
            debug!(
                "[GOSSIP] Requested block not found (peer: {}, hash: {})",
                rp.id.short(),
                msg.hash
            );
            return Err(NodeError::Protocol("block not found".into()));
        };

        let body = BlockBody { block };
        if let Err(e) = self.write_msg(stream, &body).await {
            return Err(self.log_err(e, rp, "[OnRequestBlock] Failed to write"));
        }
        Ok(())
    }

    /// Ask a peer for block hashes after the most recent common ancestor.
    ///
    /// Without explicit locators the local main-chain locator set is
    /// used. Returned hashes are appended to the block-hash queue paired
    /// with the advertising peer.
    pub async fn send_get_block_hashes(
        self: &Arc<Self>,
        rp: &RemotePeer,
        locators: Option<Locators>,
    ) -> Result<(), NodeError> {
        debug!("[GOSSIP] Requesting block hashes from {}", rp.id.short());

        let mut stream = match self.new_stream(rp, protocol_ids::GET_BLOCK_HASHES).await {
            Ok(s) => s,
            Err(e) => {
                return Err(self.log_connect_err(e, rp, "[SendGetBlockHashes] Failed to connect"))
            }
        };

        self.sync_state().set_syncing(true);

        let locators = match locators {
            Some(l) if !l.is_empty() => l,
            _ => self.chain().locator_hashes(),
        };

        let msg = GetBlockHashes {
            locators: locators.clone(),
            max_blocks: self.config().max_get_block_hashes,
        };
        if let Err(e) = self.write_msg(&mut stream, &msg).await {
            return Err(self.log_err(e, rp, "[SendGetBlockHashes] Failed to write"));
        }

        self.events().publish(NodeEvent::RequestedBlockHashes {
            locators,
            max_blocks: msg.max_blocks,
        });

        let hashes: BlockHashes = match self.read_msg(&mut stream).await {
            Ok(h) => h,
            Err(e) => return Err(self.log_err(e, rp, "[SendGetBlockHashes] Failed to read")),
        };

        let count = hashes.hashes.len();
        self.block_hash_queue()
            .append(hashes.hashes.into_iter().map(|hash| QueuedBlockHash {
                hash,
                broadcaster: rp.id.clone(),
            }));

        self.events()
            .publish(NodeEvent::ReceivedBlockHashes { count });
        info!(
            "[GOSSIP] Block hash request to {} returned {} hash(es)",
            rp.id.short(),
            count
        );
        Ok(())
    }

    /// Serve a GetBlockHashes request.
    ///
    /// Locators are scanned in the order supplied (callers send them
    /// newest-first). A hash on a side branch re-anchors the response at
    /// that branch's main-chain root ancestor; no shared history yields
    /// an empty list rather than a guess.
    pub(crate) async fn on_get_block_hashes(
        &self,
        stream: &mut BoxStream,
        rp: &RemotePeer,
    ) -> Result<(), NodeError> {
        let msg: GetBlockHashes = match self.read_msg(stream).await {
            Ok(m) => m,
            Err(e) => return Err(self.log_err(e, rp, "[OnGetBlockHashes] Failed to read")),
        };

        let mut response = BlockHashes::default();

        let located = msg
            .locators
            .iter()
            .find_map(|hash| self.chain().branch_of(hash));

        if let Some(branch) = located {
            let start_number = if branch.is_main {
                branch.block_number
            } else {
                branch.root_number
            };

            let mut cursor = start_number + 1;
            while (response.hashes.len() as u64) < msg.max_blocks {
                let Some(block) = self.chain().get_main_block_by_number(cursor) else {
                    break;
                };
                response.hashes.push(block.hash);
                cursor += 1;
            }
        }

        if let Err(e) = self.write_msg(stream, &response).await {
            return Err(self.log_err(e, rp, "[OnGetBlockHashes] Failed to write"));
        }
        Ok(())
    }

    /// Fetch whole bodies for a batch of hashes and feed them to the
    /// chain in sync context. Publishes one event per block plus a single
    /// aggregate event for the batch.
    pub async fn send_get_block_bodies(
        self: &Arc<Self>,
        rp: &RemotePeer,
        hashes: Vec<String>,
    ) -> Result<(), NodeError> {
        if hashes.is_empty() {
            return Ok(());
        }
        debug!(
            "[GOSSIP] Requesting {} block bodies from {}",
            hashes.len(),
            rp.id.short()
        );

        let mut stream = match self.new_stream(rp, protocol_ids::GET_BLOCK_BODIES).await {
            Ok(s) => s,
            Err(e) => {
                return Err(self.log_connect_err(e, rp, "[SendGetBlockBodies] Failed to connect"))
            }
        };

        let msg = GetBlockBodies { hashes };
        if let Err(e) = self.write_msg(&mut stream, &msg).await {
            return Err(self.log_err(e, rp, "[SendGetBlockBodies] Failed to write"));
        }

        let bodies: BlockBodies = match self.read_msg(&mut stream).await {
            Ok(b) => b,
            Err(e) => return Err(self.log_err(e, rp, "[SendGetBlockBodies] Failed to read")),
        };
        info!("[GOSSIP] Received {} block bodies", bodies.blocks.len());

        let count = bodies.blocks.len();
        for block in bodies.blocks {
            // Suppress relaying this block back to the peer that just
            // served it.
            self.history().add(
                history::block_key(&block.hash, &rp.id),
                self.config().relay_history_ttl_secs,
            );

            let ctx = BlockContext {
                broadcaster: Some(rp.id.clone()),
                sync_context: true,
            };
            let error = self
                .chain()
                .process_block(&block, &ctx)
                .err()
                .map(|e| e.to_string());
            if let Some(e) = &error {
                debug!("[GOSSIP] Unable to process synced block: {e}");
            }
            self.events().publish(NodeEvent::BlockProcessed {
                hash: block.hash.clone(),
                number: block.number(),
                error,
            });
        }

        let tip = self.local_tip();
        self.sync_state().clear_if_reached(tip.total_difficulty);

        self.events()
            .publish(NodeEvent::BlockBodiesProcessed { count });
        Ok(())
    }

    /// Serve a GetBlockBodies request; unknown hashes are silently
    /// skipped, never an error.
    pub(crate) async fn on_get_block_bodies(
        &self,
        stream: &mut BoxStream,
        rp: &RemotePeer,
    ) -> Result<(), NodeError> {
        let msg: GetBlockBodies = match self.read_msg(stream).await {
            Ok(m) => m,
            Err(e) => return Err(self.log_err(e, rp, "[OnGetBlockBodies] Failed to read")),
        };

        let mut bodies = BlockBodies::default();
        for hash in &msg.hashes {
            if let Some(block) = self.chain().get_block_by_hash(hash) {
                bodies.blocks.push(block);
            }
        }

        if let Err(e) = self.write_msg(stream, &bodies).await {
            return Err(self.log_err(e, rp, "[OnGetBlockBodies] Failed to write"));
        }
        Ok(())
    }

    /// Background sync driver: drains the block-hash queue in FIFO order,
    /// one same-advertiser batch per body request. An empty queue means
    /// sync is idle.
    pub(crate) fn spawn_sync_driver(self: &Arc<Self>) {
        let gossip = Arc::clone(self);
        let mut shutdown = self.pm().shutdown_rx();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let batch = gossip
                            .block_hash_queue()
                            .shift_batch(gossip.config().max_block_bodies_per_request);
                        if batch.is_empty() {
                            if gossip.sync_state().is_syncing() {
                                gossip.sync_state().set_syncing(false);
                            }
                            continue;
                        }

                        let Some(peer) = gossip.pm().get_peer(&batch[0].broadcaster) else {
                            continue;
                        };
                        let hashes: Vec<String> =
                            batch.into_iter().map(|item| item.hash).collect();
                        if let Err(e) = gossip.send_get_block_bodies(&peer, hashes).await {
                            debug!("[GOSSIP] body fetch failed: {e}");
                        }
                    }
                    _ = shutdown.changed() => return,
                }
            }
        });
    }
}
