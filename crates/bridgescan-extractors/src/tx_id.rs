//! Transaction id log: one record per transaction seen in an applied block.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use bridgescan_core::extractor::Extractor;
use bridgescan_core::record::{RecordAction, RecordStore};
use bridgescan_core::types::{Block, ExtractedRecord};
use bridgescan_core::ScannerError;

use crate::cardano::KoiosTransaction;
use crate::ergo::ErgoTransaction;

/// A transaction format with a stable id.
pub trait TransactionId {
    fn tx_id(&self) -> &str;
}

impl TransactionId for ErgoTransaction {
    fn tx_id(&self) -> &str {
        &self.id
    }
}

impl TransactionId for KoiosTransaction {
    fn tx_id(&self) -> &str {
        &self.tx_hash
    }
}

/// Records the id of every transaction, keyed by tx id. Rows are never
/// spent; a fork removes the ids of the forked block.
pub struct TxIdExtractor {
    action: RecordAction,
}

impl TxIdExtractor {
    pub fn new(id: impl Into<String>, store: Arc<dyn RecordStore>) -> Self {
        Self {
            action: RecordAction::new(store, id),
        }
    }
}

#[async_trait]
impl<T> Extractor<T> for TxIdExtractor
where
    T: TransactionId + Send + Sync + 'static,
{
    fn id(&self) -> &str {
        self.action.extractor_id()
    }

    async fn apply(&self, transactions: &[T], block: &Block) -> Result<bool, ScannerError> {
        let records: Vec<_> = transactions
            .iter()
            .map(|tx| {
                ExtractedRecord::new(
                    tx.tx_id(),
                    json!({ "txId": tx.tx_id(), "blockId": block.hash }),
                )
            })
            .collect();

        debug!(
            extractor = %self.action.extractor_id(),
            height = block.height,
            txs = records.len(),
            "transaction ids extracted"
        );
        Ok(self.action.store_block(&records, &[], block).await)
    }

    async fn undo(&self, block_hash: &str) -> Result<(), ScannerError> {
        self.action.undo_block(block_hash).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridgescan_storage::InMemoryStorage;

    fn ergo_tx(id: &str) -> ErgoTransaction {
        ErgoTransaction {
            id: id.into(),
            inputs: vec![],
            outputs: vec![],
        }
    }

    #[tokio::test]
    async fn logs_every_transaction_and_forgets_forked_block() {
        let store = Arc::new(InMemoryStorage::new());
        let extractor = TxIdExtractor::new("tx-ids", store.clone());
        let b1 = Block::new("0xa1", "0xa0", 100, 0);
        let b2 = Block::new("0xa2", "0xa1", 101, 0);

        extractor.apply(&[ergo_tx("t1"), ergo_tx("t2")], &b1).await.unwrap();
        extractor.apply(&[ergo_tx("t3")], &b2).await.unwrap();

        let row = store.get("tx-ids", "t3").await.unwrap().unwrap();
        assert_eq!(row.payload["blockId"], "0xa2");
        assert_eq!(store.count("tx-ids").await.unwrap(), 3);

        Extractor::<ErgoTransaction>::undo(&extractor, "0xa2").await.unwrap();
        assert_eq!(store.count("tx-ids").await.unwrap(), 2);
        assert!(store.get("tx-ids", "t3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn works_over_koios_transactions() {
        let store = Arc::new(InMemoryStorage::new());
        let extractor = TxIdExtractor::new("tx-ids", store.clone());
        let tx = KoiosTransaction {
            tx_hash: "c1".into(),
            metadata: None,
            outputs: vec![],
        };

        let applied = extractor
            .apply(&[tx], &Block::new("0xc1", "0xc0", 7, 0))
            .await
            .unwrap();
        assert!(applied);
        assert_eq!(
            Extractor::<KoiosTransaction>::id(&extractor),
            "tx-ids"
        );
        assert_eq!(store.records("tx-ids").await.unwrap()[0].record_id, "c1");
    }
}
