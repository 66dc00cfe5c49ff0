//! Peer transport capability.
//!
//! The networking core does not own sockets. It consumes an abstract
//! transport exposing per-protocol streams and connection notifications;
//! the process hosting the node supplies the concrete implementation.
//! `transport::memory` is the in-process reference used by the test suite.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use crate::identity::NodeAddr;

pub mod memory;

/// A bidirectional message stream bound to one protocol id.
pub trait MsgStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> MsgStream for T {}

pub type BoxStream = Box<dyn MsgStream>;

/// Inbound stream handler: receives the stream and the dialer's address.
pub type StreamHandler = Arc<dyn Fn(BoxStream, NodeAddr) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Connection lifecycle notifications delivered to the connection manager.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Connected {
        addr: NodeAddr,
        direction: Direction,
    },
    Disconnected {
        addr: NodeAddr,
        direction: Direction,
    },
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// The local node's own listen address.
    fn local_addr(&self) -> NodeAddr;

    /// Open an outbound stream to `target` for the given protocol id.
    async fn open_stream(&self, target: &NodeAddr, protocol: &str) -> io::Result<BoxStream>;

    /// Register the handler invoked for each inbound stream on `protocol`.
    fn set_stream_handler(&self, protocol: &str, handler: StreamHandler);

    /// Route connection notifications to the given channel.
    fn set_event_sender(&self, tx: mpsc::UnboundedSender<ConnectionEvent>);

    /// Forcibly close the connection to `target`, if any.
    async fn disconnect(&self, target: &NodeAddr);
}
