//! Drainable FIFO work queues decoupling receipt of sync metadata and
//! relay candidates from their asynchronous consumption.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::identity::PeerId;
use crate::types::Tx;

/// A block hash paired with the peer that advertised it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedBlockHash {
    pub hash: String,
    pub broadcaster: PeerId,
}

/// Strict FIFO of advertised block hashes. Consumers must drain in
/// arrival order; the sync algorithm assumes ascending block numbers.
/// Empty queue means sync is idle.
#[derive(Default)]
pub struct BlockHashQueue {
    inner: Mutex<VecDeque<QueuedBlockHash>>,
}

impl BlockHashQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append hashes; never replaces what is already queued.
    pub fn append(&self, items: impl IntoIterator<Item = QueuedBlockHash>) {
        self.inner.lock().extend(items);
    }

    pub fn shift(&self) -> Option<QueuedBlockHash> {
        self.inner.lock().pop_front()
    }

    /// Pop up to `max` consecutive entries advertised by the same peer,
    /// preserving arrival order. The batch size bounds one
    /// GetBlockBodies request.
    pub fn shift_batch(&self, max: usize) -> Vec<QueuedBlockHash> {
        let mut inner = self.inner.lock();
        let mut batch: Vec<QueuedBlockHash> = Vec::new();
        while batch.len() < max {
            match inner.front() {
                Some(next)
                    if batch.is_empty() || next.broadcaster == batch[0].broadcaster =>
                {
                    // pop_front is Some by the peek above
                    batch.push(inner.pop_front().unwrap());
                }
                _ => break,
            }
        }
        batch
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// FIFO of transactions awaiting relay to broadcaster peers.
#[derive(Default)]
pub struct TxBroadcastQueue {
    inner: Mutex<VecDeque<Tx>>,
}

impl TxBroadcastQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, tx: Tx) {
        self.inner.lock().push_back(tx);
    }

    pub fn shift(&self) -> Option<Tx> {
        self.inner.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
