//! Cardano bridge-request observations from Koios-format transactions.
//!
//! A transaction is a bridge request when its metadata label `"0"` carries
//! the target chain, fees, target address and the hashed sender address, and
//! one of its outputs pays the lock address. Observations are immutable once
//! seen: they are never spent, only removed when their block forks.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use bridgescan_core::extractor::Extractor;
use bridgescan_core::record::{RecordAction, RecordStore};
use bridgescan_core::types::{Block, ExtractedRecord};
use bridgescan_core::ScannerError;

use crate::hash::blake2b256_hex;

/// Source chain tag written into every observation.
pub const FROM_CHAIN: &str = "cardano";

/// Token id used when the lock output carries only ADA.
pub const NATIVE_TOKEN: &str = "lovelace";

/// Metadata label holding the bridge request.
const REQUEST_LABEL: &str = "0";

// ─── Koios shapes ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentAddr {
    pub bech32: String,
    #[serde(default)]
    pub cred: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KoiosAsset {
    pub policy_id: String,
    pub asset_name: String,
    pub quantity: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KoiosUtxo {
    pub payment_addr: PaymentAddr,
    pub value: String,
    #[serde(default)]
    pub asset_list: Vec<KoiosAsset>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KoiosTransaction {
    pub tx_hash: String,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub outputs: Vec<KoiosUtxo>,
}

/// The request carried under metadata label `"0"`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestMetadata {
    to: String,
    bridge_fee: String,
    network_fee: String,
    to_address: String,
    from_address_hash: String,
}

/// A stored bridge request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    pub from_chain: String,
    pub to_chain: String,
    pub from_address: String,
    pub to_address: String,
    pub amount: String,
    pub bridge_fee: String,
    pub network_fee: String,
    pub source_chain_token_id: String,
    pub source_tx_id: String,
    pub source_block_id: String,
    pub request_id: String,
}

// ─── Extractor ────────────────────────────────────────────────────────────────

/// Extracts bridge requests paying `lock_address`.
pub struct CardanoObservationExtractor {
    lock_address: String,
    action: RecordAction,
}

impl CardanoObservationExtractor {
    pub fn new(
        id: impl Into<String>,
        store: Arc<dyn RecordStore>,
        lock_address: impl Into<String>,
    ) -> Self {
        Self {
            lock_address: lock_address.into(),
            action: RecordAction::new(store, id),
        }
    }

    /// Build the observation for `tx`, if it is a well-formed bridge request.
    pub fn observe(&self, tx: &KoiosTransaction, block: &Block) -> Option<Observation> {
        let raw = tx.metadata.as_ref()?.get(REQUEST_LABEL)?;
        let request: RequestMetadata = match serde_json::from_value(raw.clone()) {
            Ok(request) => request,
            Err(e) => {
                warn!(
                    extractor = %self.action.extractor_id(),
                    tx = %tx.tx_hash,
                    error = %e,
                    "skipping transaction with malformed bridge metadata"
                );
                return None;
            }
        };

        let Some(lock) = tx
            .outputs
            .iter()
            .find(|o| o.payment_addr.bech32 == self.lock_address)
        else {
            debug!(tx = %tx.tx_hash, "bridge metadata without lock output");
            return None;
        };

        let Some(from_address) = tx
            .outputs
            .iter()
            .map(|o| &o.payment_addr.bech32)
            .find(|addr| blake2b256_hex(addr) == request.from_address_hash)
        else {
            debug!(tx = %tx.tx_hash, "no output matches the sender address hash");
            return None;
        };

        let (amount, token) = match lock.asset_list.first() {
            Some(asset) => (
                asset.quantity.clone(),
                format!("{}.{}", asset.policy_id, asset.asset_name),
            ),
            None => (lock.value.clone(), NATIVE_TOKEN.to_string()),
        };

        Some(Observation {
            from_chain: FROM_CHAIN.to_string(),
            to_chain: request.to,
            from_address: from_address.clone(),
            to_address: request.to_address,
            amount,
            bridge_fee: request.bridge_fee,
            network_fee: request.network_fee,
            source_chain_token_id: token,
            source_tx_id: tx.tx_hash.clone(),
            source_block_id: block.hash.clone(),
            request_id: blake2b256_hex(&tx.tx_hash),
        })
    }
}

#[async_trait]
impl Extractor<KoiosTransaction> for CardanoObservationExtractor {
    fn id(&self) -> &str {
        self.action.extractor_id()
    }

    async fn apply(
        &self,
        transactions: &[KoiosTransaction],
        block: &Block,
    ) -> Result<bool, ScannerError> {
        let mut observations = Vec::new();
        for tx in transactions {
            let Some(observation) = self.observe(tx, block) else {
                continue;
            };
            match serde_json::to_value(&observation) {
                Ok(payload) => {
                    observations.push(ExtractedRecord::new(observation.request_id, payload))
                }
                Err(e) => warn!(tx = %tx.tx_hash, error = %e, "skipping unserializable observation"),
            }
        }

        if !observations.is_empty() {
            debug!(
                extractor = %self.id(),
                height = block.height,
                observations = observations.len(),
                "cardano block extracted"
            );
        }
        Ok(self.action.store_block(&observations, &[], block).await)
    }

    async fn undo(&self, block_hash: &str) -> Result<(), ScannerError> {
        self.action.undo_block(block_hash).await
    }
}
