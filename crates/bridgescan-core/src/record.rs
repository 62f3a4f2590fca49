//! Record store trait and the generic record action every extractor reuses.
//!
//! A record store persists [`StoredRecord`] rows keyed by
//! `(record_id, extractor_id)`. Each mutating call is one atomic
//! transaction: either the whole batch lands or nothing does.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info};

use crate::error::ScannerError;
use crate::types::{BatchSummary, Block, ExtractedRecord, SpendInfo, StoredRecord, UndoSummary};

/// Maximum number of ids addressed by a single id-list statement.
pub const ID_CHUNK_SIZE: usize = 100;

/// Creation block hash recorded for rows seeded by a warm start.
pub const WARM_START_BLOCK: &str = "warm-start";

/// Transactional persistence for extracted records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Upsert `creations` and mark `spends` for one block, atomically.
    ///
    /// - missing rows are inserted with creation fields from `block`
    /// - existing rows get their payload and creation fields overwritten
    /// - spends of ids this extractor never stored are silently ignored
    ///
    /// Creations are written before spends, so a record created and spent in
    /// the same block ends up as one row with both field sets populated.
    async fn apply_batch(
        &self,
        extractor_id: &str,
        block: &Block,
        creations: &[ExtractedRecord],
        spends: &[SpendInfo],
    ) -> Result<BatchSummary, ScannerError>;

    /// Undo one forked block, atomically: delete rows created in it, then
    /// clear spend fields on surviving rows spent in it.
    async fn undo_block(
        &self,
        extractor_id: &str,
        block_hash: &str,
    ) -> Result<UndoSummary, ScannerError>;

    /// Replace every row of `extractor_id` with `records`, created at
    /// `height` in [`WARM_START_BLOCK`].
    async fn warm_start(
        &self,
        extractor_id: &str,
        records: &[ExtractedRecord],
        height: u64,
    ) -> Result<(), ScannerError>;

    /// Look up one row.
    async fn get(
        &self,
        extractor_id: &str,
        record_id: &str,
    ) -> Result<Option<StoredRecord>, ScannerError>;

    /// All rows of an extractor, ordered by creation height then id.
    async fn records(&self, extractor_id: &str) -> Result<Vec<StoredRecord>, ScannerError>;

    /// Rows of an extractor that are not spent.
    async fn unspent(&self, extractor_id: &str) -> Result<Vec<StoredRecord>, ScannerError> {
        Ok(self
            .records(extractor_id)
            .await?
            .into_iter()
            .filter(|r| !r.is_spent())
            .collect())
    }

    /// Number of rows of an extractor.
    async fn count(&self, extractor_id: &str) -> Result<u64, ScannerError> {
        Ok(self.records(extractor_id).await?.len() as u64)
    }
}

/// A record store bound to one extractor id.
///
/// Store failures stop here: they are logged and reported as `false`, so the
/// scanner sees a failed block and retries it.
#[derive(Clone)]
pub struct RecordAction {
    store: Arc<dyn RecordStore>,
    extractor_id: String,
}

impl RecordAction {
    pub fn new(store: Arc<dyn RecordStore>, extractor_id: impl Into<String>) -> Self {
        Self {
            store,
            extractor_id: extractor_id.into(),
        }
    }

    pub fn extractor_id(&self) -> &str {
        &self.extractor_id
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Persist one block's creations and spends. Returns `false` if the batch
    /// was rolled back.
    pub async fn store_block(
        &self,
        creations: &[ExtractedRecord],
        spends: &[SpendInfo],
        block: &Block,
    ) -> bool {
        if creations.is_empty() && spends.is_empty() {
            return true;
        }
        match self
            .store
            .apply_batch(&self.extractor_id, block, creations, spends)
            .await
        {
            Ok(summary) => {
                if summary.inserted + summary.updated + summary.spent > 0 {
                    info!(
                        extractor = %self.extractor_id,
                        height = block.height,
                        block = %block.hash,
                        inserted = summary.inserted,
                        updated = summary.updated,
                        spent = summary.spent,
                        "records stored"
                    );
                }
                true
            }
            Err(e) => {
                error!(
                    extractor = %self.extractor_id,
                    height = block.height,
                    error = %e,
                    "storing records failed, batch rolled back"
                );
                false
            }
        }
    }

    /// Undo everything this extractor stored or spent in `block_hash`.
    pub async fn undo_block(&self, block_hash: &str) -> Result<(), ScannerError> {
        let summary = self.store.undo_block(&self.extractor_id, block_hash).await?;
        info!(
            extractor = %self.extractor_id,
            block = %block_hash,
            deleted = summary.deleted,
            unspent = summary.unspent,
            "records undone for forked block"
        );
        Ok(())
    }

    /// Seed this extractor's rows from a snapshot.
    pub async fn warm_start(
        &self,
        records: &[ExtractedRecord],
        height: u64,
    ) -> Result<(), ScannerError> {
        self.store
            .warm_start(&self.extractor_id, records, height)
            .await?;
        debug!(
            extractor = %self.extractor_id,
            count = records.len(),
            height,
            "warm start complete"
        );
        Ok(())
    }
}
