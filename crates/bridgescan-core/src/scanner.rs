//! The scanner lane — applies queued blocks to every registered extractor,
//! one element at a time, in height order.
//!
//! # Lane
//!
//! ```text
//! forward_block / backward_block ──► BlockQueue ──► process_next ──► extractors
//!                                        ▲                │
//!                                        └── retry / re-arm ┘
//! ```
//!
//! Each step takes a snapshot of the queue head, processes it without
//! holding the queue lock, then removes it only if it is still the head (a
//! fork may have replaced it meanwhile). Failures leave the head in place
//! and bump its retry counter; once the ceiling is reached the configured
//! [`RetryExhaustion`] policy decides whether the lane halts.
//!
//! A halt is tied to the element that exhausted its retries. Once that
//! element leaves the head (replaced, cut by a fork, or overtaken by a lower
//! block) the next step re-arms the lane.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::block_store::{BlockStatus, BlockStore};
use crate::config::{LaneState, RetryExhaustion, ScannerConfig};
use crate::error::ScannerError;
use crate::extractor::Extractor;
use crate::queue::{BlockQueue, QueueElement};
use crate::types::Block;

/// Result of a single [`Scanner::process_next`] step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Nothing queued.
    Empty,
    /// The lane is halted; nothing was attempted.
    Halted,
    /// A block was applied by every extractor.
    Applied { height: u64, remaining: usize },
    /// A fork marker was processed.
    Undone { height: u64, remaining: usize },
    /// The head failed and stays queued for another attempt.
    Retry { height: u64, attempt: u32 },
    /// The head failed, but was replaced in the queue while it ran.
    Superseded { height: u64 },
    /// The head failed for the `attempts`-th time, reaching the ceiling.
    Exhausted { height: u64, attempts: u32 },
}

#[derive(Debug, Clone, Copy)]
struct LaneStatus {
    state: LaneState,
    /// Queue seq of the element the lane halted on.
    halted_on: Option<u64>,
}

struct Inner<T> {
    config: ScannerConfig,
    queue: BlockQueue<T>,
    extractors: RwLock<Vec<Arc<dyn Extractor<T>>>>,
    blocks: Arc<dyn BlockStore>,
    status: Mutex<LaneStatus>,
    /// Held for the duration of one step; keeps the lane single.
    lane: tokio::sync::Mutex<()>,
    wake: Notify,
}

/// A single-lane block scanner. Cheap to clone; clones share the lane.
pub struct Scanner<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Scanner<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + Sync + 'static> Scanner<T> {
    pub fn new(config: ScannerConfig, blocks: Arc<dyn BlockStore>) -> Result<Self, ScannerError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                queue: BlockQueue::new(),
                extractors: RwLock::new(Vec::new()),
                blocks,
                status: Mutex::new(LaneStatus {
                    state: LaneState::Idle,
                    halted_on: None,
                }),
                lane: tokio::sync::Mutex::new(()),
                wake: Notify::new(),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.inner.config
    }

    pub fn queue(&self) -> &BlockQueue<T> {
        &self.inner.queue
    }

    pub fn lane_state(&self) -> LaneState {
        self.status().state
    }

    /// Number of queued elements.
    pub fn pending(&self) -> usize {
        self.inner.queue.len()
    }

    fn status(&self) -> MutexGuard<'_, LaneStatus> {
        self.inner.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: LaneState) {
        let mut status = self.status();
        status.state = state;
        status.halted_on = None;
    }

    // ─── Extractor registry ─────────────────────────────────────────────────────

    /// Register an extractor. Returns `false` if one with the same id is
    /// already registered.
    pub fn register_extractor(&self, extractor: Arc<dyn Extractor<T>>) -> bool {
        let mut extractors = self
            .inner
            .extractors
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if extractors.iter().any(|e| e.id() == extractor.id()) {
            warn!(scanner = %self.name(), extractor = %extractor.id(), "extractor already registered");
            return false;
        }
        info!(scanner = %self.name(), extractor = %extractor.id(), "extractor registered");
        extractors.push(extractor);
        true
    }

    /// Unregister the extractor `id`. Returns `false` if it was not registered.
    pub fn remove_extractor(&self, id: &str) -> bool {
        let mut extractors = self
            .inner
            .extractors
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = extractors.len();
        extractors.retain(|e| e.id() != id);
        before != extractors.len()
    }

    pub fn extractor_ids(&self) -> Vec<String> {
        self.extractors().iter().map(|e| e.id().to_string()).collect()
    }

    fn extractors(&self) -> Vec<Arc<dyn Extractor<T>>> {
        self.inner
            .extractors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // ─── Block source entry points ──────────────────────────────────────────────

    /// Announce a new block (or a replacement for a queued height).
    pub fn forward_block(&self, block: Block, transactions: Vec<T>) {
        debug!(scanner = %self.name(), height = block.height, hash = %block.hash, "block queued");
        self.inner.queue.enqueue_block(block, transactions);
        self.inner.wake.notify_one();
    }

    /// Announce a fork: every block at or above `block.height` is invalid.
    pub fn backward_block(&self, block: Block) {
        info!(scanner = %self.name(), height = block.height, "fork queued");
        self.inner.queue.enqueue_fork(block);
        self.inner.wake.notify_one();
    }

    /// Leave the halted state: reset the head's retry counter and re-arm.
    pub fn resume(&self) {
        {
            let mut status = self.status();
            if status.state != LaneState::Halted {
                return;
            }
            status.state = LaneState::Idle;
            status.halted_on = None;
        }
        self.inner.queue.reset_retries();
        info!(scanner = %self.name(), "lane resumed");
        self.inner.wake.notify_one();
    }

    // ─── Lane ───────────────────────────────────────────────────────────────────

    /// Process the queue head once.
    pub async fn process_next(&self) -> StepOutcome {
        let _lane = self.inner.lane.lock().await;

        let element = {
            let mut status = self.status();
            let head = self.inner.queue.head();
            if status.state == LaneState::Halted {
                if head.as_ref().map(|e| e.seq) == status.halted_on {
                    return StepOutcome::Halted;
                }
                info!(scanner = %self.name(), "halted element left the queue head, lane re-armed");
                status.halted_on = None;
            }
            match head {
                Some(element) => {
                    status.state = LaneState::Processing;
                    element
                }
                None => {
                    status.state = LaneState::Idle;
                    return StepOutcome::Empty;
                }
            }
        };
        let height = element.block.height;

        match self.process_element(&element).await {
            Ok(()) => {
                let remaining = self.inner.queue.remove_head(element.seq);
                if remaining == 0 {
                    self.set_state(LaneState::Idle);
                }
                if element.is_fork {
                    StepOutcome::Undone { height, remaining }
                } else {
                    StepOutcome::Applied { height, remaining }
                }
            }
            Err(e) => self.on_failure(&element, e),
        }
    }

    fn on_failure(&self, element: &QueueElement<T>, e: ScannerError) -> StepOutcome {
        let height = element.block.height;
        let ceiling = self.inner.config.retry_ceiling;

        match self.inner.queue.record_failure(element.seq) {
            None => {
                warn!(scanner = %self.name(), height, error = %e, "can not process block; it was replaced in the queue");
                StepOutcome::Superseded { height }
            }
            Some(attempt) if attempt < ceiling && e.is_linkage() => {
                warn!(
                    scanner = %self.name(),
                    height,
                    attempt,
                    error = %e,
                    "block does not link to the last applied block, waiting for the source"
                );
                StepOutcome::Retry { height, attempt }
            }
            Some(attempt) if attempt < ceiling => {
                warn!(
                    scanner = %self.name(),
                    height,
                    attempt,
                    retry_in_ms = self.inner.config.retry_delay_ms,
                    error = %e,
                    "can not process block, retrying"
                );
                StepOutcome::Retry { height, attempt }
            }
            Some(attempts) => {
                let policy = self.inner.config.on_retry_exhausted;
                error!(
                    scanner = %self.name(),
                    height,
                    attempts,
                    policy = ?policy,
                    error = %e,
                    "can not process block, retry ceiling reached"
                );
                let mut status = self.status();
                match policy {
                    RetryExhaustion::Halt => {
                        status.state = LaneState::Halted;
                        status.halted_on = Some(element.seq);
                    }
                    RetryExhaustion::RetryOnNextEvent => {
                        status.state = LaneState::Idle;
                        status.halted_on = None;
                    }
                }
                StepOutcome::Exhausted { height, attempts }
            }
        }
    }

    async fn process_element(&self, element: &QueueElement<T>) -> Result<(), ScannerError> {
        if element.is_fork {
            debug!(scanner = %self.name(), height = element.block.height, "processing fork");
            self.fork_from(element.block.height).await
        } else {
            debug!(scanner = %self.name(), height = element.block.height, "processing block");
            self.apply_block(&element.block, &element.transactions).await
        }
    }

    async fn apply_block(&self, block: &Block, transactions: &[T]) -> Result<(), ScannerError> {
        let name = self.name();
        let store = &self.inner.blocks;

        if let Some(last) = store.last_done(name).await? {
            if last.hash != block.parent_hash {
                return Err(ScannerError::Linkage {
                    height: block.height,
                    expected: last.hash,
                    actual: block.parent_hash.clone(),
                });
            }
        }

        let extractors = self.extractors();

        // Leftovers of an earlier attempt whose block was since replaced.
        for stale in store.processing(name).await? {
            if stale.hash != block.hash {
                warn!(scanner = %name, height = stale.height, hash = %stale.hash, "discarding partially applied block");
                self.undo_everywhere(&extractors, &stale).await?;
            }
        }

        store.save_block(name, block, BlockStatus::Processing).await?;
        for extractor in &extractors {
            if !extractor.apply(transactions, block).await? {
                return Err(ScannerError::Extractor {
                    extractor: extractor.id().to_string(),
                    reason: format!("could not store block at height {}", block.height),
                });
            }
        }
        store.set_status(name, &block.hash, BlockStatus::Done).await?;

        debug!(scanner = %name, height = block.height, txs = transactions.len(), "block applied");
        Ok(())
    }

    async fn fork_from(&self, height: u64) -> Result<(), ScannerError> {
        let name = self.name();
        let extractors = self.extractors();
        let forked = self.inner.blocks.blocks_from(name, height).await?;
        for block in &forked {
            self.undo_everywhere(&extractors, block).await?;
        }
        info!(scanner = %name, height, undone = forked.len(), "fork processed");
        Ok(())
    }

    async fn undo_everywhere(
        &self,
        extractors: &[Arc<dyn Extractor<T>>],
        block: &Block,
    ) -> Result<(), ScannerError> {
        for extractor in extractors {
            extractor.undo(&block.hash).await?;
        }
        self.inner.blocks.remove_block(self.name(), &block.hash).await
    }

    /// Drive the lane until `shutdown` resolves.
    ///
    /// Between steps the loop either sleeps (more work queued, or a retry is
    /// pending) or parks until the next enqueue / [`resume`](Self::resume).
    pub async fn run<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(scanner = %self.name(), "scanner lane started");

        loop {
            let pause = match self.process_next().await {
                StepOutcome::Applied { remaining, .. } | StepOutcome::Undone { remaining, .. }
                    if remaining > 0 =>
                {
                    Some(self.inner.config.step_delay())
                }
                StepOutcome::Superseded { .. } => Some(self.inner.config.step_delay()),
                StepOutcome::Retry { .. } => Some(self.inner.config.retry_delay()),
                _ => None,
            };

            let keep_going = match pause {
                Some(delay) => tokio::select! {
                    _ = tokio::time::sleep(delay) => true,
                    _ = &mut shutdown => false,
                },
                None => tokio::select! {
                    _ = self.inner.wake.notified() => true,
                    _ = &mut shutdown => false,
                },
            };
            if !keep_going {
                break;
            }
        }

        info!(scanner = %self.name(), "scanner lane stopped");
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_store::MemoryBlockStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        id: String,
        applied: Mutex<Vec<u64>>,
        undone: Mutex<Vec<String>>,
        failures_left: AtomicU32,
    }

    impl Recorder {
        fn new(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.into(),
                ..Default::default()
            })
        }

        fn failing(id: &str, times: u32) -> Arc<Self> {
            let r = Self::new(id);
            r.failures_left.store(times, Ordering::Relaxed);
            r
        }

        fn applied(&self) -> Vec<u64> {
            self.applied.lock().unwrap().clone()
        }

        fn undone(&self) -> Vec<String> {
            self.undone.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Extractor<u32> for Recorder {
        fn id(&self) -> &str {
            &self.id
        }

        async fn apply(&self, _txs: &[u32], block: &Block) -> Result<bool, ScannerError> {
            let left = self.failures_left.load(Ordering::Relaxed);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::Relaxed);
                return Ok(false);
            }
            self.applied.lock().unwrap().push(block.height);
            Ok(true)
        }

        async fn undo(&self, block_hash: &str) -> Result<(), ScannerError> {
            self.undone.lock().unwrap().push(block_hash.to_string());
            Ok(())
        }
    }

    fn b(height: u64) -> Block {
        Block::new(format!("0x{height}"), format!("0x{}", height - 1), height, 0)
    }

    fn config(ceiling: u32, policy: RetryExhaustion) -> ScannerConfig {
        ScannerConfig {
            name: "test".into(),
            retry_ceiling: ceiling,
            retry_delay_ms: 1,
            step_delay_ms: 0,
            on_retry_exhausted: policy,
        }
    }

    fn scanner(ceiling: u32, policy: RetryExhaustion) -> (Scanner<u32>, Arc<MemoryBlockStore>) {
        let blocks = Arc::new(MemoryBlockStore::new());
        let scanner = Scanner::new(config(ceiling, policy), blocks.clone()).unwrap();
        (scanner, blocks)
    }

    async fn drain(scanner: &Scanner<u32>) -> Vec<StepOutcome> {
        let mut outcomes = vec![];
        loop {
            let outcome = scanner.process_next().await;
            if matches!(outcome, StepOutcome::Empty | StepOutcome::Halted) {
                return outcomes;
            }
            outcomes.push(outcome);
        }
    }

    #[tokio::test]
    async fn applies_in_height_order() {
        let (scanner, blocks) = scanner(10, RetryExhaustion::Halt);
        let rec = Recorder::new("a");
        scanner.register_extractor(rec.clone());

        scanner.forward_block(b(102), vec![]);
        scanner.forward_block(b(100), vec![]);
        scanner.forward_block(b(101), vec![]);
        drain(&scanner).await;

        assert_eq!(rec.applied(), vec![100, 101, 102]);
        assert_eq!(blocks.last_done("test").await.unwrap().unwrap().height, 102);
        assert_eq!(scanner.lane_state(), LaneState::Idle);
    }

    #[tokio::test]
    async fn parent_mismatch_keeps_head_and_counts_retry() {
        let (scanner, blocks) = scanner(10, RetryExhaustion::Halt);
        let rec = Recorder::new("a");
        scanner.register_extractor(rec.clone());

        let other = Block::new("0xother", "0x99", 100, 0);
        blocks.save_block("test", &other, BlockStatus::Done).await.unwrap();

        scanner.forward_block(b(101), vec![]);
        let outcome = scanner.process_next().await;

        assert_eq!(outcome, StepOutcome::Retry { height: 101, attempt: 1 });
        let head = scanner.queue().head().unwrap();
        assert_eq!(head.block.height, 101);
        assert_eq!(head.retry_count, 1);
        assert!(rec.applied().is_empty());
        assert_eq!(blocks.blocks("test").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn false_from_extractor_is_retried() {
        let (scanner, blocks) = scanner(10, RetryExhaustion::Halt);
        let rec = Recorder::failing("a", 2);
        scanner.register_extractor(rec.clone());

        scanner.forward_block(b(100), vec![]);
        assert_eq!(scanner.process_next().await, StepOutcome::Retry { height: 100, attempt: 1 });
        assert_eq!(scanner.process_next().await, StepOutcome::Retry { height: 100, attempt: 2 });
        assert_eq!(
            scanner.process_next().await,
            StepOutcome::Applied { height: 100, remaining: 0 }
        );
        assert_eq!(rec.applied(), vec![100]);
        assert!(blocks.processing("test").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn halt_policy_stops_lane_until_resume() {
        let (scanner, _) = scanner(2, RetryExhaustion::Halt);
        let rec = Recorder::failing("a", 3);
        scanner.register_extractor(rec.clone());

        scanner.forward_block(b(100), vec![]);
        assert_eq!(scanner.process_next().await, StepOutcome::Retry { height: 100, attempt: 1 });
        assert_eq!(
            scanner.process_next().await,
            StepOutcome::Exhausted { height: 100, attempts: 2 }
        );
        assert_eq!(scanner.lane_state(), LaneState::Halted);

        // New work does not restart a halted lane.
        scanner.forward_block(b(101), vec![]);
        assert_eq!(scanner.process_next().await, StepOutcome::Halted);
        assert_eq!(scanner.pending(), 2);

        scanner.resume();
        assert_eq!(scanner.queue().head().unwrap().retry_count, 0);
        assert_eq!(scanner.process_next().await, StepOutcome::Retry { height: 100, attempt: 1 });
        drain(&scanner).await;
        assert_eq!(rec.applied(), vec![100, 101]);
    }

    #[tokio::test]
    async fn replaced_halted_block_rearms_lane() {
        let (scanner, blocks) = scanner(1, RetryExhaustion::Halt);
        let rec = Recorder::new("a");
        scanner.register_extractor(rec.clone());

        scanner.forward_block(b(100), vec![]);
        drain(&scanner).await;

        scanner.forward_block(Block::new("0x101", "0xelsewhere", 101, 0), vec![]);
        assert_eq!(
            scanner.process_next().await,
            StepOutcome::Exhausted { height: 101, attempts: 1 }
        );
        assert_eq!(scanner.lane_state(), LaneState::Halted);
        assert_eq!(scanner.process_next().await, StepOutcome::Halted);

        // Same height re-announced with the right parent.
        scanner.forward_block(Block::new("0x101b", "0x100", 101, 0), vec![]);
        assert_eq!(
            scanner.process_next().await,
            StepOutcome::Applied { height: 101, remaining: 0 }
        );
        assert_eq!(scanner.lane_state(), LaneState::Idle);
        assert_eq!(blocks.last_done("test").await.unwrap().unwrap().hash, "0x101b");
    }

    #[tokio::test]
    async fn fork_over_halted_block_rearms_lane() {
        let (scanner, _) = scanner(1, RetryExhaustion::Halt);
        let rec = Recorder::new("a");
        scanner.register_extractor(rec.clone());

        scanner.forward_block(b(100), vec![]);
        drain(&scanner).await;
        scanner.forward_block(Block::new("0x101", "0xelsewhere", 101, 0), vec![]);
        assert!(matches!(scanner.process_next().await, StepOutcome::Exhausted { .. }));

        scanner.backward_block(b(101));
        assert_eq!(
            scanner.process_next().await,
            StepOutcome::Undone { height: 101, remaining: 0 }
        );
        assert_eq!(scanner.lane_state(), LaneState::Idle);
    }

    #[tokio::test]
    async fn lower_block_ahead_of_halted_block_rearms_lane() {
        let (scanner, _) = scanner(1, RetryExhaustion::Halt);
        let rec = Recorder::failing("a", 1);
        scanner.register_extractor(rec.clone());

        scanner.forward_block(b(101), vec![]);
        assert!(matches!(scanner.process_next().await, StepOutcome::Exhausted { .. }));
        assert_eq!(scanner.process_next().await, StepOutcome::Halted);

        scanner.forward_block(b(100), vec![]);
        drain(&scanner).await;
        assert_eq!(rec.applied(), vec![100, 101]);
        assert_eq!(scanner.lane_state(), LaneState::Idle);
    }

    #[tokio::test]
    async fn retry_on_next_event_policy_goes_idle() {
        let (scanner, _) = scanner(1, RetryExhaustion::RetryOnNextEvent);
        let rec = Recorder::failing("a", 2);
        scanner.register_extractor(rec.clone());

        scanner.forward_block(b(100), vec![]);
        assert_eq!(
            scanner.process_next().await,
            StepOutcome::Exhausted { height: 100, attempts: 1 }
        );
        assert_eq!(scanner.lane_state(), LaneState::Idle);

        assert_eq!(
            scanner.process_next().await,
            StepOutcome::Exhausted { height: 100, attempts: 2 }
        );
        assert_eq!(
            scanner.process_next().await,
            StepOutcome::Applied { height: 100, remaining: 0 }
        );
    }

    #[tokio::test]
    async fn fork_undoes_newest_first() {
        let (scanner, blocks) = scanner(10, RetryExhaustion::Halt);
        let rec = Recorder::new("a");
        scanner.register_extractor(rec.clone());

        for h in 100..=102 {
            scanner.forward_block(b(h), vec![]);
        }
        drain(&scanner).await;

        scanner.backward_block(b(101));
        assert_eq!(
            scanner.process_next().await,
            StepOutcome::Undone { height: 101, remaining: 0 }
        );
        assert_eq!(rec.undone(), vec!["0x102".to_string(), "0x101".to_string()]);
        assert_eq!(blocks.last_done("test").await.unwrap().unwrap().height, 100);

        // The replacement chain links to 100 again.
        scanner.forward_block(Block::new("0x101b", "0x100", 101, 0), vec![]);
        assert_eq!(
            scanner.process_next().await,
            StepOutcome::Applied { height: 101, remaining: 0 }
        );
    }

    #[tokio::test]
    async fn fork_cancels_queued_descendants() {
        let (scanner, _) = scanner(10, RetryExhaustion::Halt);
        let rec = Recorder::new("a");
        scanner.register_extractor(rec.clone());

        scanner.forward_block(b(100), vec![]);
        drain(&scanner).await;
        scanner.forward_block(b(101), vec![]);
        scanner.forward_block(b(102), vec![]);
        scanner.backward_block(b(101));

        assert_eq!(scanner.queue().heights(), vec![(101, true)]);
        drain(&scanner).await;
        assert_eq!(rec.applied(), vec![100]);
    }

    #[tokio::test]
    async fn stale_partial_block_is_undone_before_replacement() {
        let (scanner, blocks) = scanner(10, RetryExhaustion::Halt);
        let good = Recorder::new("a");
        let flaky = Recorder::failing("b", 1);
        scanner.register_extractor(good.clone());
        scanner.register_extractor(flaky.clone());

        scanner.forward_block(b(100), vec![]);
        assert!(matches!(scanner.process_next().await, StepOutcome::Retry { .. }));
        assert_eq!(good.applied(), vec![100]);

        // Same height re-announced with different content.
        scanner.forward_block(Block::new("0x100b", "0x99", 100, 0), vec![]);
        assert_eq!(
            scanner.process_next().await,
            StepOutcome::Applied { height: 100, remaining: 0 }
        );
        assert_eq!(good.undone(), vec!["0x100".to_string()]);
        assert_eq!(flaky.undone(), vec!["0x100".to_string()]);
        assert_eq!(blocks.last_done("test").await.unwrap().unwrap().hash, "0x100b");
        assert_eq!(blocks.blocks("test").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn registry_rejects_duplicate_ids() {
        let (scanner, _) = scanner(10, RetryExhaustion::Halt);
        assert!(scanner.register_extractor(Recorder::new("a")));
        assert!(!scanner.register_extractor(Recorder::new("a")));
        assert!(scanner.register_extractor(Recorder::new("b")));
        assert_eq!(scanner.extractor_ids(), vec!["a", "b"]);
        assert!(scanner.remove_extractor("a"));
        assert!(!scanner.remove_extractor("a"));
        assert_eq!(scanner.extractor_ids(), vec!["b"]);
    }

    #[tokio::test]
    async fn run_loop_drains_and_stops() {
        let (scanner, _) = scanner(10, RetryExhaustion::Halt);
        let rec = Recorder::failing("a", 1);
        scanner.register_extractor(rec.clone());

        for h in [101, 100, 102] {
            scanner.forward_block(b(h), vec![]);
        }

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let lane = tokio::spawn(scanner.clone().run(async {
            let _ = stop_rx.await;
        }));

        tokio::time::timeout(Duration::from_secs(5), async {
            while rec.applied().len() < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("lane did not drain");

        stop_tx.send(()).unwrap();
        lane.await.unwrap();
        assert_eq!(rec.applied(), vec![100, 101, 102]);
        assert_eq!(scanner.pending(), 0);
    }
}
