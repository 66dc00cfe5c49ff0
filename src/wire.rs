//! Wire protocol: message structs, protocol ids and the framed codec.
//!
//! Every message kind travels on its own stream addressed by a protocol-id
//! string; payloads are bincode, length-prefixed with a u32 big-endian
//! frame header. The same codec applies uniformly to every struct here.

use primitive_types::U256;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::WireError;
use crate::identity::NodeAddr;
use crate::types::{td_decimal, Block, Locators, Tx};

/// One protocol-id string per message kind.
pub mod protocol_ids {
    pub const HANDSHAKE: &str = "/ember/handshake/1.0.0";
    pub const PING: &str = "/ember/ping/1.0.0";
    pub const GET_ADDR: &str = "/ember/getaddr/1.0.0";
    pub const ADDR: &str = "/ember/addr/1.0.0";
    pub const INTRO: &str = "/ember/intro/1.0.0";
    pub const REQUEST_BLOCK: &str = "/ember/requestblock/1.0.0";
    pub const GET_BLOCK_HASHES: &str = "/ember/getblockhashes/1.0.0";
    pub const BLOCK_BODY: &str = "/ember/blockbody/1.0.0";
    pub const GET_BLOCK_BODIES: &str = "/ember/getblockbodies/1.0.0";
    pub const TX: &str = "/ember/tx/1.0.0";

    /// Every id, for handler registration.
    pub const ALL: &[&str] = &[
        HANDSHAKE,
        PING,
        GET_ADDR,
        ADDR,
        INTRO,
        REQUEST_BLOCK,
        GET_BLOCK_HASHES,
        BLOCK_BODY,
        GET_BLOCK_BODIES,
        TX,
    ];
}

/// Upper bound on a single frame. Blocks dominate; 4 MiB leaves headroom
/// over the largest body batch a peer may legally send.
pub const MAX_FRAME_LEN: u32 = 4 * 1024 * 1024;

/// First message between peers: protocol version plus the sender's best
/// chain summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    pub version: String,
    pub best_block_hash: String,
    pub best_block_number: u64,
    #[serde(with = "td_decimal")]
    pub best_block_total_difficulty: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    pub best_block_hash: String,
    pub best_block_number: u64,
    #[serde(with = "td_decimal")]
    pub best_block_total_difficulty: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    pub best_block_hash: String,
    pub best_block_number: u64,
    #[serde(with = "td_decimal")]
    pub best_block_total_difficulty: U256,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetAddr {}

/// A single advertised peer address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddrEntry {
    pub address: NodeAddr,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Addr {
    pub addresses: Vec<AddrEntry>,
}

/// Lightweight "I exist" announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intro {
    pub peer_id: String,
}

impl Intro {
    /// Hash used in the intro relay history key.
    pub fn hash(&self) -> String {
        hex::encode(blake3::hash(self.peer_id.as_bytes()).as_bytes())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestBlock {
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetBlockHashes {
    /// Newest-first; see `Locators`.
    pub locators: Locators,
    pub max_blocks: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHashes {
    pub hashes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetBlockBodies {
    pub hashes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockBodies {
    pub blocks: Vec<Block>,
}

/// Full block payload for relay and single-block responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockBody {
    pub block: Block,
}

/// Transaction relay payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub tx: Tx,
}

/// Sent in place of a normal response to signal protocol-level refusal.
/// Code 0 means "not a rejection".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reject {
    pub message: String,
    pub code: i32,
    pub reason: String,
    pub extra_data: Vec<u8>,
}

impl Reject {
    pub fn new(message: impl Into<String>, code: i32, reason: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code,
            reason: reason.into(),
            extra_data: Vec::new(),
        }
    }

    pub fn is_rejection(&self) -> bool {
        self.code != 0
    }
}

/// Write one framed message to the stream.
pub async fn write_message<S, T>(stream: &mut S, msg: &T) -> Result<(), WireError>
where
    S: AsyncWriteExt + Unpin,
    T: Serialize,
{
    let payload = bincode::serialize(msg).map_err(|e| WireError::Encode(e.to_string()))?;
    let len = payload.len() as u32;
    if len > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(len));
    }
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(&payload).await?;
    stream.flush().await?;
    Ok(())
}

/// Read one framed message from the stream.
pub async fn read_message<S, T>(stream: &mut S) -> Result<T, WireError>
where
    S: AsyncReadExt + Unpin,
    T: DeserializeOwned,
{
    let mut len_bytes = [0u8; 4];
    stream.read_exact(&mut len_bytes).await?;
    let len = u32::from_be_bytes(len_bytes);
    if len > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(len));
    }
    let mut payload = vec![0u8; len as usize];
    stream.read_exact(&mut payload).await?;
    bincode::deserialize(&payload).map_err(|e| WireError::Decode(e.to_string()))
}
