//! Ember node networking core.
//!
//! The gossip protocol that propagates addresses, transactions, blocks
//! and liveness signals across the overlay network, plus the peer
//! management layer deciding which peers to trust, connect to and evict.
//!
//! The transport, the ledger engine and the transaction pool are consumed
//! as capabilities (`transport::Transport`, `chain::Chain`,
//! `txpool::TxPool`); reference in-memory implementations back the test
//! suite. Wire messages are bincode frames, one protocol id per message
//! kind.

pub mod cache;
pub mod chain;
pub mod config;
pub mod error;
pub mod events;
pub mod identity;
pub mod p2p;
pub mod transport;
pub mod txpool;
pub mod types;
pub mod wire;

pub use chain::{Chain, ChainTip, InMemoryChain};
pub use config::{load_config, NodeConfig};
pub use error::{AddrError, ChainError, NodeError, RelayError, TxError, WireError};
pub use events::{EventBus, NodeEvent};
pub use identity::{LocalIdentity, NodeAddr, PeerHandle, PeerId, RemotePeer};
pub use p2p::{Gossip, P2pService, PeerManager};
pub use txpool::{validate_tx, InMemoryTxPool, TxPool};
pub use types::{Block, BlockHeader, Locators, Tx};
