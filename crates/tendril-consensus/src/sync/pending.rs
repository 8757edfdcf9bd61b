//! Blocks waiting for their parent.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use tendril_p2p::PeerId;
use tendril_types::{Block, QuorumCertificate};

/// A block with its certificate, queued for admission.
#[derive(Debug, Clone)]
pub(crate) struct PendingBlock {
    pub block: Block,
    pub consensus: QuorumCertificate,
    /// Peer that sent the block; `None` for local commits.
    pub from: Option<PeerId>,
}

impl PendingBlock {
    pub fn height(&self) -> u64 {
        self.block.height()
    }
}

impl PartialEq for PendingBlock {
    fn eq(&self, other: &Self) -> bool {
        self.height() == other.height()
    }
}

impl Eq for PendingBlock {}

impl PartialOrd for PendingBlock {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingBlock {
    fn cmp(&self, other: &Self) -> Ordering {
        self.height().cmp(&other.height())
    }
}

/// Min-heap of pending blocks by height.
#[derive(Debug, Default)]
pub(crate) struct PendingQueue {
    heap: BinaryHeap<Reverse<PendingBlock>>,
}

impl PendingQueue {
    /// Queues `block`. A remote block is skipped when the same block is
    /// already pending or its peer already holds an entry at that height;
    /// local commits are always queued.
    pub fn push(&mut self, block: PendingBlock) -> bool {
        if block.from.is_some() {
            let (height, hash) = (block.height(), block.block.hash());
            let repeated = self.heap.iter().any(|Reverse(p)| {
                p.height() == height && (p.from == block.from || p.block.hash() == hash)
            });
            if repeated {
                return false;
            }
        }
        self.heap.push(Reverse(block));
        true
    }

    /// Removes the lowest pending height.
    pub fn pop(&mut self) -> Option<PendingBlock> {
        self.heap.pop().map(|Reverse(block)| block)
    }

    pub fn contains(&self, height: u64) -> bool {
        self.heap.iter().any(|Reverse(p)| p.height() == height)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }
}
