//! Ordered block queue — pending lane work kept in ascending height order.
//!
//! Producers (new blocks, forks) may call in from any task. A single mutex
//! guards the structure; it is held only for the vector surgery and never
//! across storage I/O.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::types::Block;

/// A unit of pending lane work.
#[derive(Debug)]
pub struct QueueElement<T> {
    /// Queue-assigned sequence number; identifies this element across clones.
    pub seq: u64,
    pub block: Block,
    pub transactions: Arc<Vec<T>>,
    /// `true` for a fork marker: undo everything at or above `block.height`.
    pub is_fork: bool,
    pub retry_count: u32,
}

impl<T> Clone for QueueElement<T> {
    fn clone(&self) -> Self {
        Self {
            seq: self.seq,
            block: self.block.clone(),
            transactions: Arc::clone(&self.transactions),
            is_fork: self.is_fork,
            retry_count: self.retry_count,
        }
    }
}

/// Mutex-guarded, height-ordered buffer of [`QueueElement`]s.
pub struct BlockQueue<T> {
    elements: Mutex<Vec<QueueElement<T>>>,
    next_seq: AtomicU64,
}

impl<T> BlockQueue<T> {
    pub fn new() -> Self {
        Self {
            elements: Mutex::new(Vec::new()),
            next_seq: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<QueueElement<T>>> {
        self.elements.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn element(&self, block: Block, transactions: Vec<T>, is_fork: bool) -> QueueElement<T> {
        QueueElement {
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            block,
            transactions: Arc::new(transactions),
            is_fork,
            retry_count: 0,
        }
    }

    /// Insert a new block by height.
    ///
    /// A non-fork element already at the same height is replaced. A fork
    /// marker at that height stays in front of the new block.
    pub fn enqueue_block(&self, block: Block, transactions: Vec<T>) {
        let height = block.height;
        let element = self.element(block, transactions, false);
        let mut queue = self.lock();

        let mut index = queue.partition_point(|e| e.block.height < height);
        while index < queue.len() && queue[index].block.height == height && queue[index].is_fork {
            index += 1;
        }
        if index < queue.len() && queue[index].block.height == height {
            tracing::debug!(height, "replacing queued block at same height");
            queue[index] = element;
        } else {
            queue.insert(index, element);
        }
    }

    /// Drop every element at or above `fork_block.height` and append a fork
    /// marker for it.
    pub fn enqueue_fork(&self, fork_block: Block) {
        let height = fork_block.height;
        let element = self.element(fork_block, Vec::new(), true);
        let mut queue = self.lock();

        let cut = queue.partition_point(|e| e.block.height < height);
        let dropped = queue.len() - cut;
        queue.truncate(cut);
        queue.push(element);
        tracing::debug!(height, dropped, "fork queued");
    }

    /// Snapshot of the head element.
    pub fn head(&self) -> Option<QueueElement<T>> {
        self.lock().first().cloned()
    }

    /// Remove the head only if it is still the element `seq`.
    ///
    /// Returns the number of elements left.
    pub fn remove_head(&self, seq: u64) -> usize {
        let mut queue = self.lock();
        if queue.first().map(|e| e.seq) == Some(seq) {
            queue.remove(0);
        }
        queue.len()
    }

    /// Bump the retry counter of the head if it is still `seq`.
    ///
    /// Returns the new count, or `None` if the head was replaced meanwhile.
    pub fn record_failure(&self, seq: u64) -> Option<u32> {
        let mut queue = self.lock();
        match queue.first_mut() {
            Some(head) if head.seq == seq => {
                head.retry_count += 1;
                Some(head.retry_count)
            }
            _ => None,
        }
    }

    /// Reset the head's retry counter.
    pub fn reset_retries(&self) {
        if let Some(head) = self.lock().first_mut() {
            head.retry_count = 0;
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// `(height, is_fork)` of every queued element, head first.
    pub fn heights(&self) -> Vec<(u64, bool)> {
        self.lock()
            .iter()
            .map(|e| (e.block.height, e.is_fork))
            .collect()
    }
}

impl<T> Default for BlockQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(height: u64, hash: &str) -> Block {
        Block::new(hash, format!("0x{}", height - 1), height, 0)
    }

    #[test]
    fn keeps_ascending_order() {
        let queue = BlockQueue::<u32>::new();
        queue.enqueue_block(block(102, "0x102"), vec![]);
        queue.enqueue_block(block(100, "0x100"), vec![]);
        queue.enqueue_block(block(101, "0x101"), vec![]);
        assert_eq!(
            queue.heights(),
            vec![(100, false), (101, false), (102, false)]
        );
    }

    #[test]
    fn same_height_replaces() {
        let queue = BlockQueue::<u32>::new();
        queue.enqueue_block(block(100, "0xold"), vec![1]);
        queue.enqueue_block(block(100, "0xnew"), vec![2, 3]);
        assert_eq!(queue.len(), 1);
        let head = queue.head().unwrap();
        assert_eq!(head.block.hash, "0xnew");
        assert_eq!(head.transactions.len(), 2);
    }

    #[test]
    fn fork_truncates_and_appends_marker() {
        let queue = BlockQueue::<u32>::new();
        for h in 100..=105 {
            queue.enqueue_block(block(h, &format!("0x{h}")), vec![]);
        }
        queue.enqueue_fork(block(103, "0x103"));
        assert_eq!(
            queue.heights(),
            vec![(100, false), (101, false), (102, false), (103, true)]
        );
    }

    #[test]
    fn block_after_fork_marker_at_same_height() {
        let queue = BlockQueue::<u32>::new();
        queue.enqueue_fork(block(100, "0x100"));
        queue.enqueue_block(block(100, "0x100b"), vec![]);
        queue.enqueue_block(block(100, "0x100c"), vec![]);
        assert_eq!(queue.heights(), vec![(100, true), (100, false)]);
        assert!(queue.head().unwrap().is_fork);
    }

    #[test]
    fn remove_head_checks_identity() {
        let queue = BlockQueue::<u32>::new();
        queue.enqueue_block(block(100, "0x100"), vec![]);
        let stale = queue.head().unwrap();

        // A fork replaces the head while it was being processed.
        queue.enqueue_fork(block(100, "0x100"));
        assert_eq!(queue.remove_head(stale.seq), 1);
        assert!(queue.head().unwrap().is_fork);

        let marker = queue.head().unwrap();
        assert_eq!(queue.remove_head(marker.seq), 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn record_failure_only_for_current_head() {
        let queue = BlockQueue::<u32>::new();
        queue.enqueue_block(block(100, "0x100"), vec![]);
        let head = queue.head().unwrap();
        assert_eq!(queue.record_failure(head.seq), Some(1));
        assert_eq!(queue.record_failure(head.seq), Some(2));
        assert_eq!(queue.head().unwrap().retry_count, 2);

        queue.reset_retries();
        assert_eq!(queue.head().unwrap().retry_count, 0);

        queue.enqueue_block(block(100, "0x100b"), vec![]);
        assert_eq!(queue.record_failure(head.seq), None);
    }
}
