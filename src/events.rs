//! Typed domain events published by the gossip engine.
//!
//! A closed set of events delivered over a broadcast bus injected at
//! construction. Consumers (metrics, orchestration, tests) subscribe;
//! publishing never blocks and a lagging subscriber only loses its own
//! backlog.

use tokio::sync::broadcast;

use crate::identity::PeerId;
use crate::types::Locators;

/// Everything the networking core announces to the rest of the node.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    /// A GetBlockHashes request went out with these locators.
    RequestedBlockHashes { locators: Locators, max_blocks: u64 },
    /// A GetBlockHashes response delivered this many hashes.
    ReceivedBlockHashes { count: usize },
    /// A relayed or requested block went through the chain capability.
    BlockProcessed {
        hash: String,
        number: u64,
        error: Option<String>,
    },
    /// One batch of synced block bodies finished processing.
    BlockBodiesProcessed { count: usize },
    /// An inbound transaction was accepted or rejected.
    TransactionProcessed {
        id: String,
        error: Option<String>,
    },
    /// An inbound Addr message finished processing.
    AddrProcessed { error: Option<String> },
    /// Addresses were relayed to broadcaster peers.
    AddressesRelayed { count: usize },
    /// A GetAddr round-trip returned addresses.
    AddrReceived { count: usize },
    /// An Intro message was received and cached.
    IntroReceived { peer_id: PeerId },
}

/// Broadcast bus for `NodeEvent`s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<NodeEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Dropped silently when nobody listens.
    pub fn publish(&self, event: NodeEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(NodeEvent::AddrReceived { count: 3 });
        match rx.recv().await.unwrap() {
            NodeEvent::AddrReceived { count } => assert_eq!(count, 3),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        let bus = EventBus::new(8);
        bus.publish(NodeEvent::BlockBodiesProcessed { count: 0 });
    }
}
