//! Ergo box tracker.
//!
//! Stores every output box locked to one of the tracked addresses
//! (optionally only boxes carrying a given token) and marks boxes spent when
//! a later transaction consumes them.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use bridgescan_core::extractor::Extractor;
use bridgescan_core::record::{RecordAction, RecordStore};
use bridgescan_core::types::{Block, ExtractedRecord, SpendInfo};
use bridgescan_core::ScannerError;

// ─── Node API shapes ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErgoInput {
    pub box_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErgoAsset {
    pub token_id: String,
    pub amount: u64,
}

/// An output box as returned by the node API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErgoBox {
    pub box_id: String,
    pub value: u64,
    pub ergo_tree: String,
    /// Present when the source resolved the tree to an address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub creation_height: u64,
    #[serde(default)]
    pub assets: Vec<ErgoAsset>,
    #[serde(default)]
    pub additional_registers: BTreeMap<String, serde_json::Value>,
}

impl ErgoBox {
    /// Address if known, otherwise the raw ergo tree.
    pub fn lock(&self) -> &str {
        self.address.as_deref().unwrap_or(&self.ergo_tree)
    }

    pub fn has_token(&self, token_id: &str) -> bool {
        self.assets.iter().any(|a| a.token_id == token_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErgoTransaction {
    pub id: String,
    #[serde(default)]
    pub inputs: Vec<ErgoInput>,
    #[serde(default)]
    pub outputs: Vec<ErgoBox>,
}

// ─── Extractor ────────────────────────────────────────────────────────────────

/// Tracks boxes locked to a set of addresses (or ergo trees).
pub struct ErgoBoxExtractor {
    addresses: HashSet<String>,
    token_id: Option<String>,
    action: RecordAction,
}

impl ErgoBoxExtractor {
    pub fn new<I, S>(
        id: impl Into<String>,
        store: Arc<dyn RecordStore>,
        addresses: I,
        token_id: Option<String>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            addresses: addresses.into_iter().map(Into::into).collect(),
            token_id,
            action: RecordAction::new(store, id),
        }
    }

    /// Whether `output` belongs to this tracker.
    pub fn tracks(&self, output: &ErgoBox) -> bool {
        let locked = self.addresses.contains(output.lock())
            || self.addresses.contains(&output.ergo_tree);
        locked
            && self
                .token_id
                .as_deref()
                .map_or(true, |token| output.has_token(token))
    }

    /// Records for the tracked boxes among `boxes`, for [`Extractor::warm_start`].
    pub fn seed_records(&self, boxes: &[ErgoBox]) -> Vec<ExtractedRecord> {
        boxes
            .iter()
            .filter(|b| self.tracks(b))
            .filter_map(|b| match serde_json::to_value(b) {
                Ok(payload) => Some(ExtractedRecord::new(b.box_id.clone(), payload)),
                Err(e) => {
                    warn!(box_id = %b.box_id, error = %e, "skipping unserializable box");
                    None
                }
            })
            .collect()
    }

    /// Tracked outputs of one transaction, or `None` if any of them fails to
    /// serialize (the whole transaction is then skipped).
    fn outputs_of(&self, tx: &ErgoTransaction) -> Option<Vec<ExtractedRecord>> {
        tx.outputs
            .iter()
            .filter(|output| self.tracks(output))
            .map(|output| {
                serde_json::to_value(output)
                    .map(|payload| ExtractedRecord::new(output.box_id.clone(), payload))
                    .map_err(|e| {
                        warn!(
                            extractor = %self.action.extractor_id(),
                            tx = %tx.id,
                            box_id = %output.box_id,
                            error = %e,
                            "skipping transaction with unserializable output"
                        )
                    })
                    .ok()
            })
            .collect()
    }
}

#[async_trait]
impl Extractor<ErgoTransaction> for ErgoBoxExtractor {
    fn id(&self) -> &str {
        self.action.extractor_id()
    }

    async fn apply(
        &self,
        transactions: &[ErgoTransaction],
        block: &Block,
    ) -> Result<bool, ScannerError> {
        let mut creations = Vec::new();
        let mut spends = Vec::new();

        for tx in transactions {
            let Some(outputs) = self.outputs_of(tx) else {
                continue;
            };
            creations.extend(outputs);
            spends.extend(
                tx.inputs
                    .iter()
                    .map(|input| SpendInfo::new(input.box_id.clone(), Some(tx.id.clone()))),
            );
        }

        debug!(
            extractor = %self.id(),
            height = block.height,
            boxes = creations.len(),
            inputs = spends.len(),
            "ergo block extracted"
        );
        Ok(self.action.store_block(&creations, &spends, block).await)
    }

    async fn undo(&self, block_hash: &str) -> Result<(), ScannerError> {
        self.action.undo_block(block_hash).await
    }

    async fn warm_start(
        &self,
        records: Vec<ExtractedRecord>,
        height: u64,
    ) -> Result<(), ScannerError> {
        self.action.warm_start(&records, height).await
    }
}
