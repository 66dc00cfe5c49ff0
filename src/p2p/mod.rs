//! Peer-to-peer networking core: peer management, connection admission,
//! the gossip protocol engine and chain-synchronization plumbing.

use std::sync::Arc;

use crate::chain::Chain;
use crate::config::NodeConfig;
use crate::events::EventBus;
use crate::identity::LocalIdentity;
use crate::transport::Transport;
use crate::txpool::TxPool;

pub mod connection_manager;
pub mod gossip;
pub mod history;
pub mod peer_manager;
pub mod queues;
pub mod sync_state;

pub use connection_manager::ConnectionManager;
pub use gossip::{Gossip, TxSessions};
pub use peer_manager::{ConnsInfo, PeerManager};
pub use queues::{BlockHashQueue, QueuedBlockHash, TxBroadcastQueue};
pub use sync_state::{BestBlockInfo, SyncState};

/// Fully wired networking stack: peer manager, gossip engine and
/// connection manager sharing one transport and one event bus.
pub struct P2pService {
    pub pm: Arc<PeerManager>,
    pub gossip: Arc<Gossip>,
    pub conn_mgr: Arc<ConnectionManager>,
}

impl P2pService {
    /// Construct the stack. Nothing runs until `start()`.
    pub fn build(
        config: Arc<NodeConfig>,
        transport: Arc<dyn Transport>,
        chain: Arc<dyn Chain>,
        pool: Arc<dyn TxPool>,
        events: EventBus,
        db: Option<sled::Db>,
    ) -> Self {
        let local = LocalIdentity::new(transport.local_addr());
        let pm = PeerManager::new(Arc::clone(&config), local.clone(), db);
        let gossip = Gossip::new(
            Arc::clone(&config),
            local,
            Arc::clone(&transport),
            Arc::clone(&pm),
            chain,
            pool,
            events,
        );
        let conn_mgr =
            ConnectionManager::new(config, Arc::clone(&pm), Arc::clone(&gossip), transport);
        Self {
            pm,
            gossip,
            conn_mgr,
        }
    }

    /// Register handlers and start every background loop.
    pub fn start(&self) {
        self.gossip.start();
        self.conn_mgr.start();
        self.pm.manage(Arc::clone(&self.gossip));
    }

    /// Persist peers and stop all loops; idempotent.
    pub fn stop(&self) {
        self.pm.stop();
    }
}
