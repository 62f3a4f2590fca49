//! Shared types for the scanning pipeline.

use serde::{Deserialize, Serialize};

// ─── Block ───────────────────────────────────────────────────────────────────

/// A chain block as reported by the block source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Block {
    /// Block hash.
    pub hash: String,
    /// Parent block hash.
    pub parent_hash: String,
    /// Block height; the ordering key everywhere in the pipeline.
    pub height: u64,
    /// Unix timestamp of the block (seconds since epoch).
    #[serde(default)]
    pub timestamp: i64,
}

impl Block {
    pub fn new(
        hash: impl Into<String>,
        parent_hash: impl Into<String>,
        height: u64,
        timestamp: i64,
    ) -> Self {
        Self {
            hash: hash.into(),
            parent_hash: parent_hash.into(),
            height,
            timestamp,
        }
    }
}

// ─── Records ─────────────────────────────────────────────────────────────────

/// A record as produced by an extractor, before it is bound to a block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRecord {
    /// Natural key (box id, request id, …).
    pub record_id: String,
    /// Chain-specific fields.
    pub payload: serde_json::Value,
}

impl ExtractedRecord {
    pub fn new(record_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            record_id: record_id.into(),
            payload,
        }
    }
}

/// A spend notification: `record_id` was consumed, optionally by `tx_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendInfo {
    pub record_id: String,
    pub tx_id: Option<String>,
}

impl SpendInfo {
    pub fn new(record_id: impl Into<String>, tx_id: Option<String>) -> Self {
        Self {
            record_id: record_id.into(),
            tx_id,
        }
    }
}

/// A persisted record row. Unique per `(record_id, extractor_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub record_id: String,
    pub extractor_id: String,
    pub payload: serde_json::Value,
    pub creation_block_hash: String,
    pub creation_height: u64,
    pub spend_block_hash: Option<String>,
    pub spend_height: Option<u64>,
    pub spend_tx_id: Option<String>,
}

impl StoredRecord {
    /// Build a fresh, unspent row for `record` created in `block_hash` at `height`.
    pub fn created(
        record: &ExtractedRecord,
        extractor_id: &str,
        block_hash: &str,
        height: u64,
    ) -> Self {
        Self {
            record_id: record.record_id.clone(),
            extractor_id: extractor_id.to_string(),
            payload: record.payload.clone(),
            creation_block_hash: block_hash.to_string(),
            creation_height: height,
            spend_block_hash: None,
            spend_height: None,
            spend_tx_id: None,
        }
    }

    pub fn is_spent(&self) -> bool {
        self.spend_block_hash.is_some()
    }

    /// Mark this row spent in `block`.
    pub fn spend(&mut self, block: &Block, tx_id: Option<String>) {
        self.spend_block_hash = Some(block.hash.clone());
        self.spend_height = Some(block.height);
        self.spend_tx_id = tx_id;
    }

    /// Revert to un-spent.
    pub fn clear_spend(&mut self) {
        self.spend_block_hash = None;
        self.spend_height = None;
        self.spend_tx_id = None;
    }
}

/// Counts reported by a committed `apply_batch`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub inserted: usize,
    pub updated: usize,
    pub spent: usize,
}

/// Counts reported by a committed `undo_block`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoSummary {
    pub deleted: usize,
    pub unspent: usize,
}

// ─── Tests ────────────────────────────────────────────────────────────────────
