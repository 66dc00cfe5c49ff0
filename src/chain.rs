//! Chain capability consumed by the gossip engine.
//!
//! Block validation and chain selection live in the ledger engine; gossip
//! only needs the tip summary, locator generation, block lookup, branch
//! classification and a processing entry point. `InMemoryChain` is the
//! reference implementation backing the integration suite.

use std::collections::HashMap;

use parking_lot::Mutex;
use primitive_types::U256;

use crate::error::ChainError;
use crate::identity::PeerId;
use crate::types::{Block, Locators};

/// Summary of the best (heaviest) block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTip {
    pub hash: String,
    pub number: u64,
    pub total_difficulty: U256,
}

/// Where a known block hash sits relative to the main chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Branch {
    pub is_main: bool,
    /// Number of the located block itself.
    pub block_number: u64,
    /// Number of the main-chain ancestor the branch sprouted from; equals
    /// `block_number` for main-chain blocks.
    pub root_number: u64,
}

/// Per-block processing context supplied by the gossip layer.
#[derive(Debug, Clone, Default)]
pub struct BlockContext {
    /// Peer that delivered the block, if any.
    pub broadcaster: Option<PeerId>,
    /// Block arrived through chain synchronization: referenced
    /// transactions are not required to pre-exist in the pool.
    pub sync_context: bool,
}

pub trait Chain: Send + Sync {
    fn tip(&self) -> ChainTip;

    /// Main-chain locator hashes, newest first.
    fn locator_hashes(&self) -> Locators;

    fn get_block_by_hash(&self, hash: &str) -> Option<Block>;

    fn get_main_block_by_number(&self, number: u64) -> Option<Block>;

    /// Classify a hash against the known chains. `None` when the hash is
    /// unknown everywhere.
    fn branch_of(&self, hash: &str) -> Option<Branch>;

    fn process_block(&self, block: &Block, ctx: &BlockContext) -> Result<(), ChainError>;
}

struct ChainState {
    main: Vec<Block>,
    /// Blocks off the main chain, keyed by hash.
    side: HashMap<String, Block>,
}

/// Vector-backed chain keeping one main chain plus detached side blocks.
pub struct InMemoryChain {
    state: Mutex<ChainState>,
}

impl InMemoryChain {
    pub fn with_genesis(genesis: Block) -> Self {
        Self {
            state: Mutex::new(ChainState {
                main: vec![genesis],
                side: HashMap::new(),
            }),
        }
    }

    pub fn height(&self) -> u64 {
        let state = self.state.lock();
        state.main.last().map(|b| b.number()).unwrap_or(0)
    }

    /// Append directly to the main chain, bypassing parent checks. Used
    /// when seeding fixtures.
    pub fn push_block(&self, block: Block) {
        self.state.lock().main.push(block);
    }

    /// Record a block on a side branch without reorg handling.
    pub fn push_side_block(&self, block: Block) {
        self.state.lock().side.insert(block.hash.clone(), block);
    }
}

impl Chain for InMemoryChain {
    fn tip(&self) -> ChainTip {
        let state = self.state.lock();
        let best = state.main.last().expect("chain always has genesis");
        ChainTip {
            hash: best.hash.clone(),
            number: best.number(),
            total_difficulty: best.total_difficulty(),
        }
    }

    fn locator_hashes(&self) -> Locators {
        let state = self.state.lock();
        let mut hashes = Vec::new();
        let height = state.main.len().saturating_sub(1);

        // Newest first: dense near the tip, exponential strides after the
        // first ten entries, genesis always included.
        let mut step = 1usize;
        let mut idx = height;
        loop {
            hashes.push(state.main[idx].hash.clone());
            if idx == 0 {
                break;
            }
            if hashes.len() >= 10 {
                step *= 2;
            }
            idx = idx.saturating_sub(step);
        }
        let genesis = state.main[0].hash.clone();
        if hashes.last() != Some(&genesis) {
            hashes.push(genesis);
        }
        Locators::new(hashes)
    }

    fn get_block_by_hash(&self, hash: &str) -> Option<Block> {
        let state = self.state.lock();
        state
            .main
            .iter()
            .find(|b| b.hash == hash)
            .cloned()
            .or_else(|| state.side.get(hash).cloned())
    }

    fn get_main_block_by_number(&self, number: u64) -> Option<Block> {
        let state = self.state.lock();
        state.main.iter().find(|b| b.number() == number).cloned()
    }

    fn branch_of(&self, hash: &str) -> Option<Branch> {
        let state = self.state.lock();

        if let Some(block) = state.main.iter().find(|b| b.hash == hash) {
            return Some(Branch {
                is_main: true,
                block_number: block.number(),
                root_number: block.number(),
            });
        }

        let side = state.side.get(hash)?;
        // Walk side parents until one lands on the main chain; that block
        // is the root ancestor the requester must re-anchor on.
        let mut cursor = side;
        loop {
            let parent_hash = &cursor.header.parent_hash;
            if let Some(main_parent) = state.main.iter().find(|b| &b.hash == parent_hash) {
                return Some(Branch {
                    is_main: false,
                    block_number: side.number(),
                    root_number: main_parent.number(),
                });
            }
            match state.side.get(parent_hash) {
                Some(next) => cursor = next,
                // Detached branch with no known root.
                None => return None,
            }
        }
    }

    fn process_block(&self, block: &Block, _ctx: &BlockContext) -> Result<(), ChainError> {
        let mut state = self.state.lock();

        let known = state.main.iter().any(|b| b.hash == block.hash)
            || state.side.contains_key(&block.hash);
        if known {
            return Err(ChainError::Rejected("block already known".into()));
        }

        let tip_hash = state.main.last().expect("chain always has genesis").hash.clone();
        if block.header.parent_hash == tip_hash {
            state.main.push(block.clone());
            return Ok(());
        }

        // Parent known but not the tip: keep as a side block; parent
        // unknown everywhere: orphan, the caller decides what to request.
        let parent_known = state
            .main
            .iter()
            .any(|b| b.hash == block.header.parent_hash)
            || state.side.contains_key(&block.header.parent_hash);
        if parent_known {
            state.side.insert(block.hash.clone(), block.clone());
            return Ok(());
        }

        Err(ChainError::UnknownParent(block.header.parent_hash.clone()))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::types::BlockHeader;

    /// Deterministic block builder for fixtures.
    pub fn make_block(parent: Option<&Block>, difficulty: u64) -> Block {
        let (parent_hash, number, parent_td) = match parent {
            Some(p) => (
                p.hash.clone(),
                p.number() + 1,
                p.total_difficulty(),
            ),
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
}
