//! Connection Manager: listens to transport connection notifications,
//! enforces the inbound/outbound ceilings and drives the periodic
//! connect-to-more-peers loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use crate::config::NodeConfig;
use crate::identity::PeerId;
use crate::p2p::gossip::Gossip;
use crate::p2p::peer_manager::PeerManager;
use crate::transport::{ConnectionEvent, Direction, Transport};

pub struct ConnectionManager {
    config: Arc<NodeConfig>,
    pm: Arc<PeerManager>,
    gossip: Arc<Gossip>,
    transport: Arc<dyn Transport>,
}

impl ConnectionManager {
    pub fn new(
        config: Arc<NodeConfig>,
        pm: Arc<PeerManager>,
        gossip: Arc<Gossip>,
        transport: Arc<dyn Transport>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            pm,
            gossip,
            transport,
        })
    }

    /// Subscribe to connection notifications and start the maintenance
    /// loops. Both stop on the peer manager's shutdown signal.
    pub fn start(self: &Arc<Self>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.transport.set_event_sender(tx);
        self.spawn_event_loop(rx);
        self.spawn_connect_loop();
    }

    fn spawn_event_loop(self: &Arc<Self>, mut rx: mpsc::UnboundedReceiver<ConnectionEvent>) {
        let cm = Arc::clone(self);
        let mut shutdown = self.pm.shutdown_rx();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = rx.recv() => {
                        match event {
                            Some(event) => cm.handle_event(event).await,
                            None => return,
                        }
                    }
                    _ = shutdown.changed() => return,
                }
            }
        });
    }

    async fn handle_event(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connected { addr, direction } => {
                let id = PeerId::from_addr(&addr);
                let count = self.pm.conns().add(id, direction);

                let ceiling = match direction {
                    Direction::Inbound => self.config.max_inbound_connections,
                    Direction::Outbound => self.config.max_outbound_connections,
                };
                if count > ceiling {
                    debug!(
                        "[CONN MANAGER] Closed {:?} connection; max limit {} reached",
                        direction, ceiling
                    );
                    self.transport.disconnect(&addr).await;
                    return;
                }

                // A fresh connection clears the peer's failure streak.
                self.pm.clear_conn_fail(&addr);
            }
            ConnectionEvent::Disconnected { addr, .. } => {
                let id = PeerId::from_addr(&addr);
                self.pm.conns().remove(&id);
                // Unknown peers are fine to ignore here.
                let _ = self.pm.has_disconnected(Some(&addr));
            }
        }
    }

    /// Periodically attempt outbound handshakes to every known, unbanned,
    /// lonely peer while more peers are required.
    fn spawn_connect_loop(self: &Arc<Self>) {
        let cm = Arc::clone(self);
        let mut shutdown = self.pm.shutdown_rx();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(
                cm.config.conn_est_interval_secs.max(1),
            ));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => cm.make_connections().await,
                    _ = shutdown.changed() => return,
                }
            }
        });
    }

    async fn make_connections(&self) {
        if !self.pm.require_peers() {
            return;
        }

        let lonely = self.pm.get_lonely_peers();
        if lonely.is_empty() {
            return;
        }
        debug!(
            "[CONN MANAGER] Establishing connections with more peers (candidates: {})",
            lonely.len()
        );

        for peer in lonely {
            if self.pm.is_banned(&peer) {
                continue;
            }
            if let Err(e) = self.pm.connect_to_peer(&self.gossip, &peer.id).await {
                debug!(
                    "[CONN MANAGER] connect attempt failed: {e} (peer: {})",
                    peer.id.short()
                );
            }
        }
    }
}
