//! In-memory record store.
//!
//! Keeps every extractor's rows in RAM behind one mutex, so each batch is
//! applied all-or-nothing. Useful for tests and short-lived scanners that
//! don't need persistence.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use bridgescan_core::error::ScannerError;
use bridgescan_core::record::{RecordStore, WARM_START_BLOCK};
use bridgescan_core::types::{
    BatchSummary, Block, ExtractedRecord, SpendInfo, StoredRecord, UndoSummary,
};

/// `(extractor_id, record_id)`
type Key = (String, String);

#[derive(Default)]
struct Tables {
    records: BTreeMap<Key, StoredRecord>,
    /// Number of upcoming writes that fail before touching any row.
    failing_writes: u32,
}

/// In-memory record storage.
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct InMemoryStorage {
    tables: Mutex<Tables>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` mutating calls fail with a storage error and leave
    /// the data untouched, the way a rolled-back transaction would.
    #[cfg(any(test, feature = "testing"))]
    pub fn fail_next_writes(&self, n: u32) {
        self.lock().failing_writes = n;
    }

    /// Total number of rows across all extractors.
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    /// Ids of every extractor with at least one row, sorted.
    pub fn extractor_ids(&self) -> Vec<String> {
        let ids: BTreeSet<_> = self
            .lock()
            .records
            .keys()
            .map(|(ex, _)| ex.clone())
            .collect();
        ids.into_iter().collect()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn key(extractor_id: &str, record_id: &str) -> Key {
        (extractor_id.to_string(), record_id.to_string())
    }
}

impl Tables {
    fn check_write(&mut self) -> Result<(), ScannerError> {
        if self.failing_writes > 0 {
            self.failing_writes -= 1;
            return Err(ScannerError::Storage("injected write failure".into()));
        }
        Ok(())
    }

    fn rows<'a>(&'a self, extractor_id: &'a str) -> impl Iterator<Item = &'a StoredRecord> + 'a {
        self.records
            .iter()
            .filter(move |((ex, _), _)| ex == extractor_id)
            .map(|(_, row)| row)
    }
}

#[async_trait]
impl RecordStore for InMemoryStorage {
    async fn apply_batch(
        &self,
        extractor_id: &str,
        block: &Block,
        creations: &[ExtractedRecord],
        spends: &[SpendInfo],
    ) -> Result<BatchSummary, ScannerError> {
        let mut tables = self.lock();
        tables.check_write()?;

        let mut summary = BatchSummary::default();
        for record in creations {
            match tables.records.entry(Self::key(extractor_id, &record.record_id)) {
                Entry::Occupied(mut entry) => {
                    let row = entry.get_mut();
                    row.payload = record.payload.clone();
                    row.creation_block_hash = block.hash.clone();
                    row.creation_height = block.height;
                    summary.updated += 1;
                }
                Entry::Vacant(entry) => {
                    entry.insert(StoredRecord::created(
                        record,
                        extractor_id,
                        &block.hash,
                        block.height,
                    ));
                    summary.inserted += 1;
                }
            }
        }

        for spend in spends {
            let key = Self::key(extractor_id, &spend.record_id);
            if let Some(row) = tables.records.get_mut(&key) {
                row.spend(block, spend.tx_id.clone());
                summary.spent += 1;
            }
        }

        debug!(extractor = %extractor_id, height = block.height, ?summary, "batch applied");
        Ok(summary)
    }

    async fn undo_block(
        &self,
        extractor_id: &str,
        block_hash: &str,
    ) -> Result<UndoSummary, ScannerError> {
        let mut tables = self.lock();
        tables.check_write()?;

        let mut summary = UndoSummary::default();
        tables.records.retain(|(ex, _), row| {
            let created_here = ex == extractor_id && row.creation_block_hash == block_hash;
            if created_here {
                summary.deleted += 1;
            }
            !created_here
        });
        for ((ex, _), row) in tables.records.iter_mut() {
            if ex == extractor_id && row.spend_block_hash.as_deref() == Some(block_hash) {
                row.clear_spend();
                summary.unspent += 1;
            }
        }
        Ok(summary)
    }

    async fn warm_start(
        &self,
        extractor_id: &str,
        records: &[ExtractedRecord],
        height: u64,
    ) -> Result<(), ScannerError> {
        let mut tables = self.lock();
        tables.check_write()?;

        tables.records.retain(|(ex, _), _| ex != extractor_id);
        for record in records {
            let row = StoredRecord::created(record, extractor_id, WARM_START_BLOCK, height);
            tables
                .records
                .insert(Self::key(extractor_id, &record.record_id), row);
        }
        Ok(())
    }

    async fn get(
        &self,
        extractor_id: &str,
        record_id: &str,
    ) -> Result<Option<StoredRecord>, ScannerError> {
        Ok(self
            .lock()
            .records
            .get(&Self::key(extractor_id, record_id))
            .cloned())
    }

    async fn records(&self, extractor_id: &str) -> Result<Vec<StoredRecord>, ScannerError> {
        let tables = self.lock();
        let mut rows: Vec<_> = tables.rows(extractor_id).cloned().collect();
        rows.sort_by(|a, b| {
            (a.creation_height, &a.record_id).cmp(&(b.creation_height, &b.record_id))
        });
        Ok(rows)
    }

    async fn count(&self, extractor_id: &str) -> Result<u64, ScannerError> {
        Ok(self.lock().rows(extractor_id).count() as u64)
    }
}
