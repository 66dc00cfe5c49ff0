//! Shared fixtures for the gossip integration suite: deterministic block
//! and transaction builders plus a fully wired node over the in-process
//! memory transport.

use std::sync::Arc;
use std::time::Duration;

use ed25519_dalek::{Signer, SigningKey};
use primitive_types::U256;

use ember_node::chain::InMemoryChain;
use ember_node::config::NodeConfig;
use ember_node::events::{EventBus, NodeEvent};
use ember_node::identity::NodeAddr;
use ember_node::p2p::P2pService;
use ember_node::transport::memory::{MemoryNetwork, MemoryTransport};
use ember_node::transport::Transport;
use ember_node::txpool::InMemoryTxPool;
use ember_node::types::{Block, BlockHeader, Tx, TX_TYPE_BALANCE};

/// Deterministic block builder; total difficulty accumulates.
pub fn make_block(parent: Option<&Block>, difficulty: u64) -> Block {
    let (parent_hash, number, parent_td) = match parent {
        Some(p) => (p.hash.clone(), p.number() + 1, p.total_difficulty()),
        None => ("00".repeat(32), 0, U256::zero()),
    };
    let header = BlockHeader {
        parent_hash,
        number,
        timestamp: 1_700_000_000 + number,
        difficulty,
        total_difficulty: parent_td + U256::from(difficulty),
        nonce: number,
        tx_root: "00".repeat(32),
        state_root: "00".repeat(32),
    };
    let hash = Block::compute_hash(&header);
    Block {
        header,
        transactions: Vec::new(),
        hash,
        signature: String::new(),
    }
}

/// A chain whose blocks have the given difficulties (first is genesis).
pub fn chain_of(difficulties: &[u64]) -> (Arc<InMemoryChain>, Vec<Block>) {
    let genesis = make_block(None, difficulties[0]);
    let chain = Arc::new(InMemoryChain::with_genesis(genesis.clone()));
    let mut blocks = vec![genesis];
    for &d in &difficulties[1..] {
        let next = make_block(blocks.last(), d);
        chain.push_block(next.clone());
        blocks.push(next);
    }
    (chain, blocks)
}

/// A correctly signed transaction from a fixed key seed.
pub fn signed_tx(seed: u8, tx_type: i64, value: &str, fee: &str) -> Tx {
    let key = SigningKey::from_bytes(&[seed; 32]);
    let mut tx = Tx {
        tx_type,
        nonce: 1,
        to: "ember1dest".into(),
        sender_pub_key: hex::encode(key.verifying_key().to_bytes()),
        value: value.into(),
        fee: fee.into(),
        timestamp: 1_700_000_000,
        sig: String::new(),
    };
    let sig = key.sign(&tx.signable_bytes());
    tx.sig = hex::encode(sig.to_bytes());
    tx
}

pub struct TestNode {
    pub service: P2pService,
    pub transport: Arc<MemoryTransport>,
    pub chain: Arc<InMemoryChain>,
    pub pool: Arc<InMemoryTxPool>,
    pub bus: EventBus,
}

impl TestNode {
    pub fn addr(&self) -> NodeAddr {
        self.transport.local_addr()
    }
}

/// Wire a node onto the memory fabric with protocol handlers registered.
/// Background loops stay off unless the test starts them.
pub fn build_node_with(
    net: &Arc<MemoryNetwork>,
    addr: &str,
    chain: Arc<InMemoryChain>,
    config: NodeConfig,
) -> TestNode {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let transport = net.endpoint(NodeAddr::new(addr));
    let pool = Arc::new(InMemoryTxPool::new(128));
    let bus = EventBus::new(128);

    let service = P2pService::build(
        Arc::new(config),
        transport.clone() as Arc<dyn Transport>,
        chain.clone(),
        pool.clone(),
        bus.clone(),
        None,
    );
    service.gossip.register_handlers();

    TestNode {
        service,
        transport,
        chain,
        pool,
        bus,
    }
}

pub fn build_node(net: &Arc<MemoryNetwork>, addr: &str, chain: Arc<InMemoryChain>) -> TestNode {
    build_node_with(net, addr, chain, NodeConfig::default())
}

/// Await the first event matching the predicate, panicking after two
/// seconds.
pub async fn wait_for_event<F>(
    rx: &mut tokio::sync::broadcast::Receiver<NodeEvent>,
    mut pred: F,
) -> NodeEvent
where
    F: FnMut(&NodeEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let event = rx.recv().await.expect("event bus closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}
