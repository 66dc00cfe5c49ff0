//! In-process transport over paired duplex pipes.
//!
//! Reference implementation of the transport capability: every endpoint
//! lives in one `MemoryNetwork`, streams are `tokio::io::duplex` pairs and
//! connection notifications fire exactly as a socket transport would fire
//! them. The test suite also reads the per-protocol stream-open counters
//! to assert relay suppression without touching handler internals.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{BoxStream, ConnectionEvent, Direction, StreamHandler, Transport};
use crate::identity::NodeAddr;

const STREAM_BUF_BYTES: usize = 256 * 1024;

#[derive(Default)]
struct Endpoint {
    handlers: HashMap<String, StreamHandler>,
    events: Option<mpsc::UnboundedSender<ConnectionEvent>>,
    online: bool,
}

#[derive(Default)]
struct NetworkState {
    endpoints: HashMap<NodeAddr, Endpoint>,
    /// (dialer, listener) pairs currently considered connected.
    connections: HashSet<(NodeAddr, NodeAddr)>,
    /// (dialer, listener, protocol) -> number of streams opened.
    stream_opens: HashMap<(NodeAddr, NodeAddr, String), u64>,
}

/// Shared fabric connecting any number of `MemoryTransport` endpoints.
#[derive(Default)]
pub struct MemoryNetwork {
    state: Mutex<NetworkState>,
}

impl MemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register (or re-register) an endpoint at `addr`.
    pub fn endpoint(self: &Arc<Self>, addr: NodeAddr) -> Arc<MemoryTransport> {
        let mut state = self.state.lock();
        state.endpoints.insert(
            addr.clone(),
            Endpoint {
                online: true,
                ..Endpoint::default()
            },
        );
        Arc::new(MemoryTransport {
            net: Arc::clone(self),
            addr,
        })
    }

    /// How many streams `from` has opened to `to` on `protocol`.
    pub fn stream_opens(&self, from: &NodeAddr, to: &NodeAddr, protocol: &str) -> u64 {
        let state = self.state.lock();
        state
            .stream_opens
            .get(&(from.clone(), to.clone(), protocol.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Total streams opened by `from`, any target, any protocol.
    pub fn total_stream_opens_from(&self, from: &NodeAddr) -> u64 {
        let state = self.state.lock();
        state
            .stream_opens
            .iter()
            .filter(|((f, _, _), _)| f == from)
            .map(|(_, n)| *n)
            .sum()
    }

    /// Take an endpoint offline so that stream opens to it fail.
    pub fn set_online(&self, addr: &NodeAddr, online: bool) {
        if let Some(ep) = self.state.lock().endpoints.get_mut(addr) {
            ep.online = online;
        }
    }

    fn send_event(state: &NetworkState, addr: &NodeAddr, event: ConnectionEvent) {
        if let Some(tx) = state.endpoints.get(addr).and_then(|e| e.events.clone()) {
            let _ = tx.send(event);
        }
    }

    fn drop_connection(&self, a: &NodeAddr, b: &NodeAddr) {
        let mut state = self.state.lock();
        let as_dialer = (a.clone(), b.clone());
        let as_listener = (b.clone(), a.clone());
        for (dialer, listener) in [as_dialer, as_listener] {
            if state.connections.remove(&(dialer.clone(), listener.clone())) {
                Self::send_event(
                    &state,
                    &dialer,
                    ConnectionEvent::Disconnected {
                        addr: listener.clone(),
                        direction: Direction::Outbound,
                    },
                );
                Self::send_event(
                    &state,
                    &listener,
                    ConnectionEvent::Disconnected {
                        addr: dialer.clone(),
                        direction: Direction::Inbound,
                    },
                );
            }
        }
    }
}

/// One endpoint's view of the memory fabric.
pub struct MemoryTransport {
    net: Arc<MemoryNetwork>,
    addr: NodeAddr,
}

impl MemoryTransport {
    pub fn network(&self) -> Arc<MemoryNetwork> {
        Arc::clone(&self.net)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_addr(&self) -> NodeAddr {
        self.addr.clone()
    }

    async fn open_stream(&self, target: &NodeAddr, protocol: &str) -> io::Result<BoxStream> {
        let (handler, server_end, client_end) = {
            let mut state = self.net.state.lock();

            let handler = {
                let ep = state.endpoints.get(target).ok_or_else(|| {
                    io::Error::new(io::ErrorKind::ConnectionRefused, "no such endpoint")
                })?;
                if !ep.online {
                    return Err(io::Error::new(
                        io::ErrorKind::ConnectionRefused,
                        "endpoint offline",
                    ));
                }
                ep.handlers.get(protocol).cloned().ok_or_else(|| {
                    io::Error::new(io::ErrorKind::Unsupported, "protocol not handled")
                })?
            };

            *state
                .stream_opens
                .entry((self.addr.clone(), target.clone(), protocol.to_string()))
                .or_insert(0) += 1;

            // First stream between the pair establishes the connection.
            let pair = (self.addr.clone(), target.clone());
            let reverse = (target.clone(), self.addr.clone());
            if !state.connections.contains(&pair) && !state.connections.contains(&reverse) {
                state.connections.insert(pair);
                MemoryNetwork::send_event(
                    &state,
                    &self.addr,
                    ConnectionEvent::Connected {
                        addr: target.clone(),
                        direction: Direction::Outbound,
                    },
                );
                MemoryNetwork::send_event(
                    &state,
                    target,
                    ConnectionEvent::Connected {
                        addr: self.addr.clone(),
                        direction: Direction::Inbound,
                    },
                );
            }

            let (client_end, server_end) = tokio::io::duplex(STREAM_BUF_BYTES);
            (handler, server_end, client_end)
        };

        let dialer = self.addr.clone();
        tokio::spawn(handler(Box::new(server_end), dialer));

        Ok(Box::new(client_end))
    }

    fn set_stream_handler(&self, protocol: &str, handler: StreamHandler) {
        let mut state = self.net.state.lock();
        if let Some(ep) = state.endpoints.get_mut(&self.addr) {
            ep.handlers.insert(protocol.to_string(), handler);
        }
    }

    fn set_event_sender(&self, tx: mpsc::UnboundedSender<ConnectionEvent>) {
        let mut state = self.net.state.lock();
        if let Some(ep) = state.endpoints.get_mut(&self.addr) {
            ep.events = Some(tx);
        }
    }

    async fn disconnect(&self, target: &NodeAddr) {
        self.net.drop_connection(&self.addr, target);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire;

    #[tokio::test]
    async fn stream_reaches_handler_and_counts() {
        let net = MemoryNetwork::new();
        let a = net.endpoint(NodeAddr::new("10.0.0.1:9000"));
        let b = net.endpoint(NodeAddr::new("10.0.0.2:9000"));

        let (tx, mut rx) = mpsc::unbounded_channel();
        b.set_stream_handler(
            "/test/1",
            Arc::new(move |mut stream, from| {
                let tx = tx.clone();
                Box::pin(async move {
                    let msg: wire::Intro = wire::read_message(&mut stream).await.unwrap();
                    let _ = tx.send((msg, from));
                })
            }),
        );

        let mut s = a.open_stream(&b.local_addr(), "/test/1").await.unwrap();
        wire::write_message(
            &mut s,
            &wire::Intro {
                peer_id: "abc".into(),
            },
        )
        .await
        .unwrap();

        let (msg, from) = rx.recv().await.unwrap();
        assert_eq!(msg.peer_id, "abc");
        assert_eq!(from, a.local_addr());
        assert_eq!(net.stream_opens(&a.local_addr(), &b.local_addr(), "/test/1"), 1);
    }

    #[tokio::test]
    async fn connection_events_fire_once_per_pair() {
        let net = MemoryNetwork::new();
        let a = net.endpoint(NodeAddr::new("10.0.0.1:9000"));
        let b = net.endpoint(NodeAddr::new("10.0.0.2:9000"));
        b.set_stream_handler("/test/1", Arc::new(|_s, _f| Box::pin(async {})));

        let (tx, mut rx) = mpsc::unbounded_channel();
        b.set_event_sender(tx);

        let _ = a.open_stream(&b.local_addr(), "/test/1").await.unwrap();
        let _ = a.open_stream(&b.local_addr(), "/test/1").await.unwrap();

        match rx.try_recv().unwrap() {
            ConnectionEvent::Connected { addr, direction } => {
                assert_eq!(addr, a.local_addr());
                assert_eq!(direction, Direction::Inbound);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(rx.try_recv().is_err(), "second stream must not reconnect");

        a.disconnect(&b.local_addr()).await;
        match rx.try_recv().unwrap() {
            ConnectionEvent::Disconnected { direction, .. } => {
                assert_eq!(direction, Direction::Inbound);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn offline_endpoint_refuses_streams() {
        let net = MemoryNetwork::new();
        let a = net.endpoint(NodeAddr::new("10.0.0.1:9000"));
        let b = net.endpoint(NodeAddr::new("10.0.0.2:9000"));
        b.set_stream_handler("/test/1", Arc::new(|_s, _f| Box::pin(async {})));

        net.set_online(&b.local_addr(), false);
        assert!(a.open_stream(&b.local_addr(), "/test/1").await.is_err());
    }
}
