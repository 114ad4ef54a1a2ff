//! Exit-block subscriber sets
//!
//! A block that reads a routine's return type subscribes to that routine's
//! exit. Subscribers are arena handles rather than references, so cycles
//! through recursion are plain data. Each set has its own lock; contention
//! stays local to one callee.

use super::RoutineId;
use crate::dataflow::cfg::BlockId;
use indexmap::IndexSet;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// A block in some routine's CFG
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockHandle {
    pub routine: RoutineId,
    pub block: BlockId,
}

impl BlockHandle {
    pub fn new(routine: RoutineId, block: BlockId) -> Self {
        Self { routine, block }
    }
}

#[derive(Debug, Default)]
pub struct ExitSubscribers {
    blocks: Mutex<IndexSet<BlockHandle>>,
}

impl ExitSubscribers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent; returns true for a new subscriber.
    pub fn subscribe(&self, handle: BlockHandle) -> bool {
        self.blocks.lock().insert(handle)
    }

    pub fn contains(&self, handle: &BlockHandle) -> bool {
        self.blocks.lock().contains(handle)
    }

    /// Copy of the set, so notification runs without holding the lock
    pub fn snapshot(&self) -> Vec<BlockHandle> {
        self.blocks.lock().iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.blocks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.lock().is_empty()
    }
}
