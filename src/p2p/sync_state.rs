//! Process-wide view of the best known remote chain tip and the sync
//! control flags. Single writer (the gossip engine), many readers.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use primitive_types::U256;

/// Last known best remote tip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BestBlockInfo {
    pub hash: String,
    pub number: u64,
    pub total_difficulty: U256,
}

#[derive(Default)]
pub struct SyncState {
    best: RwLock<Option<BestBlockInfo>>,
    syncing: AtomicBool,
    disabled: AtomicBool,
}

impl SyncState {
    pub fn new(disabled: bool) -> Self {
        Self {
            best: RwLock::new(None),
            syncing: AtomicBool::new(false),
            disabled: AtomicBool::new(disabled),
        }
    }

    /// Record a remote tip if it is better than what we already know.
    pub fn update_best(&self, candidate: BestBlockInfo) {
        let mut best = self.best.write();
        match &*best {
            Some(cur) if cur.total_difficulty >= candidate.total_difficulty => {}
            _ => *best = Some(candidate),
        }
    }

    pub fn best(&self) -> Option<BestBlockInfo> {
        self.best.read().clone()
    }

    /// Drop the remote-tip record once the local chain has caught up to
    /// the given total difficulty.
    pub fn clear_if_reached(&self, local_td: U256) {
        let mut best = self.best.write();
        if matches!(&*best, Some(b) if b.total_difficulty <= local_td) {
            *best = None;
        }
    }

    pub fn set_syncing(&self, yes: bool) {
        self.syncing.store(yes, Ordering::SeqCst);
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::SeqCst)
    }

    /// Suppress sync triggers entirely (operator control).
    pub fn disable(&self) {
        self.disabled.store(true, Ordering::SeqCst);
    }

    pub fn enable(&self) {
        self.disabled.store(false, Ordering::SeqCst);
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(td: u64) -> BestBlockInfo {
        BestBlockInfo {
            hash: format!("h{td}"),
            number: td,
            total_difficulty: U256::from(td),
        }
    }

    #[test]
    fn keeps_the_heaviest_tip() {
        let state = SyncState::default();
        state.update_best(info(10));
        state.update_best(info(5));
        assert_eq!(state.best().unwrap().total_difficulty, U256::from(10u64));
        state.update_best(info(20));
        assert_eq!(state.best().unwrap().total_difficulty, U256::from(20u64));
    }

    #[test]
    fn clears_once_local_catches_up() {
        let state = SyncState::default();
        state.update_best(info(10));
        state.clear_if_reached(U256::from(9u64));
        assert!(state.best().is_some());
        state.clear_if_reached(U256::from(10u64));
        assert!(state.best().is_none());
    }

    #[test]
    fn disable_flag_round_trips() {
        let state = SyncState::new(false);
        assert!(!state.is_disabled());
        state.disable();
        assert!(state.is_disabled());
        state.enable();
        assert!(!state.is_disabled());
    }
}
