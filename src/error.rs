//! Error taxonomy for the gossip and peer-management core.
//!
//! Protocol-facing error strings are stable and matched verbatim by the
//! test suite; do not reword them.

use thiserror::Error;

use crate::identity::NodeAddr;

/// Peer-level and transport-level failures. Always per-peer, never fatal.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("peer not found")]
    PeerNotFound,

    #[error("nil passed")]
    NilPassed,

    #[error("unacquainted node")]
    Unacquainted,

    #[error("currently serving ban time")]
    Banned,

    #[error("failed to connect to peer: {0}")]
    Connect(String),

    #[error("{0}")]
    Protocol(String),

    #[error("stream timed out")]
    Timeout,

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<sled::Error> for NodeError {
    fn from(e: sled::Error) -> Self {
        NodeError::Storage(e.to_string())
    }
}

/// Codec failures for length-prefixed wire frames.
#[derive(Debug, Error)]
pub enum WireError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to encode message: {0}")]
    Encode(String),

    #[error("failed to decode message: {0}")]
    Decode(String),

    #[error("frame of {0} bytes exceeds the maximum allowed size")]
    FrameTooLarge(u32),
}

/// Errors produced while receiving an Addr message.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddrError {
    #[error("too many addresses received. Ignoring addresses")]
    TooManyReceived,
}

/// Per-address and per-target errors accumulated by `relay_addresses`.
///
/// Partial relay success is acceptable; callers inspect the list rather
/// than aborting on the first failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RelayError {
    #[error("too many addresses in the message")]
    TooManyAddresses,

    #[error("no addr to relay")]
    NoAddrToRelay,

    #[error("address {{{0}}} is not valid")]
    NotValid(NodeAddr),

    #[error("address {{{0}}} is the same as local peer's")]
    SameAsLocal(NodeAddr),

    #[error("address {{{0}}} is over 60 minutes old")]
    TooOld(NodeAddr),

    #[error("address {{{0}}} is not routable")]
    NotRoutable(NodeAddr),

    #[error("address {{{0}}} associated with a banned peer")]
    BannedPeer(NodeAddr),

    #[error("Addr message failed. failed to connect to peer {{{0}}}")]
    Connect(String),

    #[error("Addr message failed. failed to write to peer {{{0}}}")]
    Write(String),
}

/// Business-rule failures for transactions. Sentinel errors; the display
/// strings are part of the protocol contract.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TxError {
    #[error("signature verification failed")]
    VerificationFailed,

    #[error("insufficient fee")]
    InsufficientFee,

    #[error("value must be greater than zero")]
    LowValue,

    #[error("unknown transaction type")]
    TypeUnknown,

    #[error("transaction already in pool")]
    AlreadyInPool,

    #[error("pool is full")]
    PoolFull,
}

/// Failures surfaced by the chain capability when processing a block.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("block not found")]
    BlockNotFound,

    #[error("orphan block: unknown parent {0}")]
    UnknownParent(String),

    #[error("block rejected: {0}")]
    Rejected(String),
}
