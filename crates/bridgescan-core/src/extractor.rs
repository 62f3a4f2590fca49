//! Extractor trait — turns a block's transactions into stored records.

use async_trait::async_trait;

use crate::error::ScannerError;
use crate::types::{Block, ExtractedRecord};

/// A chain-specific extractor over transactions of type `T`.
///
/// Implementations parse their own transaction format and hand the resulting
/// creations and spends to a [`RecordAction`](crate::record::RecordAction).
#[async_trait]
pub trait Extractor<T>: Send + Sync {
    /// Namespace of this extractor's rows in the record store.
    ///
    /// Two extractors with the same id share (and may overwrite) rows.
    fn id(&self) -> &str;

    /// Extract and persist everything relevant in `transactions`.
    ///
    /// Returns `Ok(false)` when the batch could not be stored; the scanner
    /// retries the block. Must be safe to call twice for the same block.
    /// A transaction that fails to parse is skipped, never fatal.
    async fn apply(&self, transactions: &[T], block: &Block) -> Result<bool, ScannerError>;

    /// Remove every effect of the forked block `block_hash`.
    async fn undo(&self, block_hash: &str) -> Result<(), ScannerError>;

    /// Seed the store from a snapshot taken at `height`.
    async fn warm_start(
        &self,
        _records: Vec<ExtractedRecord>,
        _height: u64,
    ) -> Result<(), ScannerError> {
        Ok(())
    }
}
