//! Block store — which blocks a scanner lane has started or finished applying.
//!
//! The last `Done` block is the linkage anchor for the next block. Every
//! stored block at or above a fork height, whatever its status, is undone
//! when that fork is processed.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ScannerError;
use crate::types::Block;

/// How far the lane got with a stored block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockStatus {
    /// Extractors may have partially applied this block.
    Processing,
    /// Every extractor applied this block.
    Done,
}

impl BlockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Done => "done",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ScannerError> {
        match s {
            "processing" => Ok(Self::Processing),
            "done" => Ok(Self::Done),
            other => Err(ScannerError::Storage(format!("unknown block status '{other}'"))),
        }
    }
}

/// A block row for one scanner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredBlock {
    pub scanner: String,
    pub block: Block,
    pub status: BlockStatus,
    /// Unix timestamp of the last status change.
    pub updated_at: i64,
}

/// Trait for persisting the lane's block progress.
///
/// Implementations include [`MemoryBlockStore`] and the SQLite backend in
/// `bridgescan-storage`.
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Upsert `block` for `scanner` with the given status.
    async fn save_block(
        &self,
        scanner: &str,
        block: &Block,
        status: BlockStatus,
    ) -> Result<(), ScannerError>;

    /// Change the status of a stored block.
    async fn set_status(
        &self,
        scanner: &str,
        hash: &str,
        status: BlockStatus,
    ) -> Result<(), ScannerError>;

    /// The highest `Done` block, if any.
    async fn last_done(&self, scanner: &str) -> Result<Option<Block>, ScannerError>;

    /// Every block still marked `Processing`.
    async fn processing(&self, scanner: &str) -> Result<Vec<Block>, ScannerError>;

    /// Every stored block with `height >= from_height`, highest first.
    async fn blocks_from(&self, scanner: &str, from_height: u64)
        -> Result<Vec<Block>, ScannerError>;

    /// Forget a block.
    async fn remove_block(&self, scanner: &str, hash: &str) -> Result<(), ScannerError>;

    /// All stored blocks, lowest first.
    async fn blocks(&self, scanner: &str) -> Result<Vec<StoredBlock>, ScannerError>;
}

// ─── In-memory store ──────────────────────────────────────────────────────────

/// In-memory block store for tests and ephemeral scanners.
#[derive(Default)]
pub struct MemoryBlockStore {
    data: Mutex<HashMap<(String, String), StoredBlock>>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(String, String), StoredBlock>> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn select(&self, scanner: &str, keep: impl Fn(&StoredBlock) -> bool) -> Vec<StoredBlock> {
        let mut rows: Vec<_> = self
            .lock()
            .values()
            .filter(|b| b.scanner == scanner && keep(b))
            .cloned()
            .collect();
        rows.sort_by_key(|b| b.block.height);
        rows
    }
}

#[async_trait]
impl BlockStore for MemoryBlockStore {
    async fn save_block(
        &self,
        scanner: &str,
        block: &Block,
        status: BlockStatus,
    ) -> Result<(), ScannerError> {
        let row = StoredBlock {
            scanner: scanner.to_string(),
            block: block.clone(),
            status,
            updated_at: chrono::Utc::now().timestamp(),
        };
        self.lock()
            .insert((scanner.to_string(), block.hash.clone()), row);
        Ok(())
    }

    async fn set_status(
        &self,
        scanner: &str,
        hash: &str,
        status: BlockStatus,
    ) -> Result<(), ScannerError> {
        match self.lock().get_mut(&(scanner.to_string(), hash.to_string())) {
            Some(row) => {
                row.status = status;
                row.updated_at = chrono::Utc::now().timestamp();
                Ok(())
            }
            None => Err(ScannerError::Storage(format!(
                "block {hash} not stored for scanner {scanner}"
            ))),
        }
    }

    async fn last_done(&self, scanner: &str) -> Result<Option<Block>, ScannerError> {
        Ok(self
            .select(scanner, |b| b.status == BlockStatus::Done)
            .pop()
            .map(|b| b.block))
    }

    async fn processing(&self, scanner: &str) -> Result<Vec<Block>, ScannerError> {
        Ok(self
            .select(scanner, |b| b.status == BlockStatus::Processing)
            .into_iter()
            .map(|b| b.block)
            .collect())
    }

    async fn blocks_from(
        &self,
        scanner: &str,
        from_height: u64,
    ) -> Result<Vec<Block>, ScannerError> {
        Ok(self
            .select(scanner, |b| b.block.height >= from_height)
            .into_iter()
            .rev()
            .map(|b| b.block)
            .collect())
    }

    async fn remove_block(&self, scanner: &str, hash: &str) -> Result<(), ScannerError> {
        self.lock()
            .remove(&(scanner.to_string(), hash.to_string()));
        Ok(())
    }

    async fn blocks(&self, scanner: &str) -> Result<Vec<StoredBlock>, ScannerError> {
        Ok(self.select(scanner, |_| true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(height: u64) -> Block {
        Block::new(format!("0x{height}"), format!("0x{}", height - 1), height, 0)
    }

    #[tokio::test]
    async fn last_done_ignores_processing() {
        let store = MemoryBlockStore::new();
        assert!(store.last_done("ergo").await.unwrap().is_none());

        store.save_block("ergo", &b(100), BlockStatus::Done).await.unwrap();
        store.save_block("ergo", &b(101), BlockStatus::Processing).await.unwrap();

        assert_eq!(store.last_done("ergo").await.unwrap().unwrap().height, 100);
        assert_eq!(store.processing("ergo").await.unwrap(), vec![b(101)]);

        store.set_status("ergo", "0x101", BlockStatus::Done).await.unwrap();
        assert_eq!(store.last_done("ergo").await.unwrap().unwrap().height, 101);
        assert!(store.processing("ergo").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn blocks_from_is_newest_first() {
        let store = MemoryBlockStore::new();
        for h in 100..=104 {
            store.save_block("ergo", &b(h), BlockStatus::Done).await.unwrap();
        }
        let heights: Vec<_> = store
            .blocks_from("ergo", 102)
            .await
            .unwrap()
            .iter()
            .map(|b| b.height)
            .collect();
        assert_eq!(heights, vec![104, 103, 102]);
    }

    #[tokio::test]
    async fn scanners_are_isolated() {
        let store = MemoryBlockStore::new();
        store.save_block("ergo", &b(100), BlockStatus::Done).await.unwrap();
        store.save_block("cardano", &b(200), BlockStatus::Done).await.unwrap();

        store.remove_block("ergo", "0x100").await.unwrap();
        assert!(store.last_done("ergo").await.unwrap().is_none());
        assert_eq!(store.blocks("cardano").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn set_status_on_missing_block_fails() {
        let store = MemoryBlockStore::new();
        let err = store.set_status("ergo", "0xnope", BlockStatus::Done).await;
        assert!(matches!(err, Err(ScannerError::Storage(_))));
    }
}
