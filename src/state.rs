//! SYNC/HEAD phase tracking. The assembler owns the transition and
//! publishes a snapshot the reader polls without locking, which keeps
//! the reader→assembler relation one-way.

use crate::constants::HEAD_TRANSITION_DISTANCE;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Pipeline phase. SYNC buffers through the ordered queue; HEAD
/// dispatches immediately for minimum latency. The transition is
/// monotonic: once at head, always at head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexerState {
    Sync,
    Head,
}

impl std::fmt::Display for IndexerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sync => write!(f, "sync"),
            Self::Head => write!(f, "head"),
        }
    }
}

/// Shared `{state, last_ordered_block}` snapshot, written by the
/// assembler and read atomically by the reader.
#[derive(Debug, Default)]
pub struct StateCell {
    at_head: AtomicBool,
    last_ordered_block: AtomicU32,
}

impl StateCell {
    pub fn new(last_ordered_block: u32) -> Self {
        Self {
            at_head: AtomicBool::new(false),
            last_ordered_block: AtomicU32::new(last_ordered_block),
        }
    }

    pub fn state(&self) -> IndexerState {
        if self.at_head.load(Ordering::Acquire) {
            IndexerState::Head
        } else {
            IndexerState::Sync
        }
    }

    pub fn last_ordered_block(&self) -> u32 {
        self.last_ordered_block.load(Ordering::Acquire)
    }

    /// Record a processed block and recompute the head distance.
    /// Returns `true` on the single SYNC→HEAD flip.
    pub fn observe(&self, head_block: u32, last_accepted: u32) -> bool {
        self.last_ordered_block
            .store(last_accepted, Ordering::Release);
        let distance = head_block.saturating_sub(last_accepted);
        if distance <= HEAD_TRANSITION_DISTANCE {
            !self.at_head.swap(true, Ordering::AcqRel)
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_is_monotonic() {
        let cell = StateCell::new(0);
        assert_eq!(cell.state(), IndexerState::Sync);

        assert!(!cell.observe(1000, 800));
        assert_eq!(cell.state(), IndexerState::Sync);

        // Distance exactly at the threshold flips.
        assert!(cell.observe(1000, 900));
        assert_eq!(cell.state(), IndexerState::Head);

        // A later larger distance does not revert.
        assert!(!cell.observe(2000, 900));
        assert_eq!(cell.state(), IndexerState::Head);
        assert_eq!(cell.last_ordered_block(), 900);
    }
}
