//! Watcher event triggers on Ergo.
//!
//! A trigger is an output locked to the trigger address that carries the
//! reward token (RWT). Its registers hold the watcher ids (`R4`) and the
//! bridge event it commits to (`R5`), both as serialized `Coll[Coll[Byte]]`
//! constants. A trigger is spent when a later transaction consumes the box.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use unsigned_varint::decode;

use bridgescan_core::extractor::Extractor;
use bridgescan_core::record::{RecordAction, RecordStore};
use bridgescan_core::types::{Block, ExtractedRecord, SpendInfo};
use bridgescan_core::ScannerError;

use crate::ergo::{ErgoBox, ErgoTransaction};
use crate::hash::blake2b256_hex;

/// Sigma type code of `Coll[Coll[Byte]]`.
const COLL_COLL_BYTE: u8 = 0x1a;

/// Number of entries in the `R5` event data.
const EVENT_FIELDS: usize = 12;

// ─── Trigger ──────────────────────────────────────────────────────────────────

/// A stored event trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTrigger {
    /// Transaction that created the trigger box.
    pub tx_id: String,
    /// blake2b-256 of the source transaction id.
    pub event_id: String,
    pub box_id: String,
    #[serde(rename = "WIDs")]
    pub wids: Vec<String>,
    pub from_chain: String,
    pub to_chain: String,
    pub from_address: String,
    pub to_address: String,
    pub amount: String,
    pub bridge_fee: String,
    pub network_fee: String,
    pub source_chain_token_id: String,
    pub target_chain_token_id: String,
    pub source_tx_id: String,
    pub source_block_id: String,
    pub source_chain_height: u64,
}

impl EventTrigger {
    /// Decode the trigger carried by `output` of transaction `tx_id`.
    pub fn from_box(tx_id: &str, output: &ErgoBox) -> Result<Self, ScannerError> {
        let wids = read_register(output, "R4")?
            .into_iter()
            .map(hex::encode)
            .collect();

        let data = read_register(output, "R5")?;
        if data.len() != EVENT_FIELDS {
            return Err(ScannerError::Parse(format!(
                "R5 holds {} entries, expected {EVENT_FIELDS}",
                data.len()
            )));
        }
        let fields = data
            .into_iter()
            .map(|bytes| {
                String::from_utf8(bytes)
                    .map_err(|e| ScannerError::Parse(format!("R5 entry is not UTF-8: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let fields: [String; EVENT_FIELDS] = fields
            .try_into()
            .map_err(|_| ScannerError::Parse("R5 entry count changed".into()))?;
        let [
            source_tx_id,
            from_chain,
            to_chain,
            from_address,
            to_address,
            amount,
            bridge_fee,
            network_fee,
            source_chain_token_id,
            target_chain_token_id,
            source_block_id,
            height,
        ] = fields;
        let source_chain_height = height
            .parse()
            .map_err(|e| ScannerError::Parse(format!("source chain height '{height}': {e}")))?;

        Ok(Self {
            tx_id: tx_id.to_string(),
            event_id: blake2b256_hex(&source_tx_id),
            box_id: output.box_id.clone(),
            wids,
            from_chain,
            to_chain,
            from_address,
            to_address,
            amount,
            bridge_fee,
            network_fee,
            source_chain_token_id,
            target_chain_token_id,
            source_tx_id,
            source_block_id,
            source_chain_height,
        })
    }
}

/// Hex of a register, either the node's plain string or the explorer's
/// `{ "serializedValue": .. }` object.
fn register_hex<'a>(output: &'a ErgoBox, register: &str) -> Option<&'a str> {
    let value = output.additional_registers.get(register)?;
    value
        .as_str()
        .or_else(|| value.get("serializedValue").and_then(|v| v.as_str()))
}

fn read_register(output: &ErgoBox, register: &str) -> Result<Vec<Vec<u8>>, ScannerError> {
    let raw = register_hex(output, register)
        .ok_or_else(|| ScannerError::Parse(format!("{register} is missing")))?;
    let bytes = hex::decode(raw)
        .map_err(|e| ScannerError::Parse(format!("{register} is not hex: {e}")))?;
    decode_coll_coll_byte(&bytes)
        .map_err(|reason| ScannerError::Parse(format!("{register}: {reason}")))
}

// ─── Sigma constant decoding ──────────────────────────────────────────────────

/// Decode a serialized `Coll[Coll[Byte]]` constant.
fn decode_coll_coll_byte(bytes: &[u8]) -> Result<Vec<Vec<u8>>, String> {
    let (&tag, rest) = bytes
        .split_first()
        .ok_or_else(|| "empty constant".to_string())?;
    if tag != COLL_COLL_BYTE {
        return Err(format!("type 0x{tag:02x} is not Coll[Coll[Byte]]"));
    }
    let (count, mut rest) =
        decode::u64(rest).map_err(|e| format!("collection size: {e}"))?;

    let mut items = Vec::new();
    for index in 0..count {
        let (len, tail) =
            decode::usize(rest).map_err(|e| format!("item {index} length: {e}"))?;
        if tail.len() < len {
            return Err(format!("item {index} needs {len} bytes, {} left", tail.len()));
        }
        let (item, tail) = tail.split_at(len);
        items.push(item.to_vec());
        rest = tail;
    }
    if !rest.is_empty() {
        return Err(format!("{} trailing bytes", rest.len()));
    }
    Ok(items)
}

// ─── Extractor ────────────────────────────────────────────────────────────────

/// Tracks event trigger boxes at one trigger address.
pub struct EventTriggerExtractor {
    address: String,
    rwt_token_id: String,
    action: RecordAction,
}

impl EventTriggerExtractor {
    pub fn new(
        id: impl Into<String>,
        store: Arc<dyn RecordStore>,
        address: impl Into<String>,
        rwt_token_id: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            rwt_token_id: rwt_token_id.into(),
            action: RecordAction::new(store, id),
        }
    }

    fn is_trigger(&self, output: &ErgoBox) -> bool {
        (output.lock() == self.address || output.ergo_tree == self.address)
            && output.has_token(&self.rwt_token_id)
    }

    /// Trigger records created by `tx`. A trigger box whose registers don't
    /// decode is skipped on its own.
    pub fn triggers_of(&self, tx: &ErgoTransaction) -> Vec<ExtractedRecord> {
        tx.outputs
            .iter()
            .filter(|output| self.is_trigger(output))
            .filter_map(|output| {
                let trigger = EventTrigger::from_box(&tx.id, output)
                    .map_err(|e| {
                        warn!(
                            extractor = %self.action.extractor_id(),
                            tx = %tx.id,
                            box_id = %output.box_id,
                            error = %e,
                            "skipping malformed event trigger"
                        )
                    })
                    .ok()?;
                info!(
                    extractor = %self.action.extractor_id(),
                    box_id = %trigger.box_id,
                    event_id = %trigger.event_id,
                    "event trigger found"
                );
                let payload = serde_json::to_value(&trigger)
                    .map_err(|e| warn!(box_id = %output.box_id, error = %e, "skipping unserializable trigger"))
                    .ok()?;
                Some(ExtractedRecord::new(trigger.box_id, payload))
            })
            .collect()
    }
}

#[async_trait]
impl Extractor<ErgoTransaction> for EventTriggerExtractor {
    fn id(&self) -> &str {
        self.action.extractor_id()
    }

    async fn apply(
        &self,
        transactions: &[ErgoTransaction],
        block: &Block,
    ) -> Result<bool, ScannerError> {
        let mut triggers = Vec::new();
        let mut spends = Vec::new();

        for tx in transactions {
            triggers.extend(self.triggers_of(tx));
            spends.extend(
                tx.inputs
                    .iter()
                    .map(|input| SpendInfo::new(input.box_id.clone(), Some(tx.id.clone()))),
            );
        }

        debug!(
            extractor = %self.id(),
            height = block.height,
            triggers = triggers.len(),
            "event trigger block extracted"
        );
        Ok(self.action.store_block(&triggers, &spends, block).await)
    }

    async fn undo(&self, block_hash: &str) -> Result<(), ScannerError> {
        self.action.undo_block(block_hash).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ergo::{ErgoAsset, ErgoInput};
    use bridgescan_storage::InMemoryStorage;
    use serde_json::json;
    use std::collections::BTreeMap;

    const TRIGGER_ADDRESS: &str = "LkY4RECaMvZiFwMrxpzB4uTr1ZqrKGFkZ5";
    const RWT: &str = "3c6cb596273a737c3e111c31d3ec868b84676b7bad82f9888ad574b44edef267";

    fn encode(items: &[&[u8]]) -> String {
        let mut out = vec![COLL_COLL_BYTE, items.len() as u8];
        for item in items {
            out.push(item.len() as u8);
            out.extend_from_slice(item);
        }
        hex::encode(out)
    }

    fn event_data(source_tx: &str) -> Vec<String> {
        [
            source_tx, "cardano", "ergo", "addr_sender", "9hTarget", "1500000", "10000",
            "2000", "lovelace", "erg", "0xcb1", "200",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    fn trigger_box(box_id: &str, data: &[String]) -> ErgoBox {
        let fields: Vec<&[u8]> = data.iter().map(|s| s.as_bytes()).collect();
        let wids: [&[u8]; 2] = [&[0xaa, 0x01], &[0xbb, 0x02]];
        ErgoBox {
            box_id: box_id.into(),
            value: 1_000_000,
            ergo_tree: "1012".into(),
            address: Some(TRIGGER_ADDRESS.into()),
            creation_height: 300,
            assets: vec![ErgoAsset {
                token_id: RWT.into(),
                amount: 2,
            }],
            additional_registers: BTreeMap::from([
                ("R4".to_string(), json!(encode(&wids))),
                ("R5".to_string(), json!(encode(&fields))),
            ]),
        }
    }

    fn tx(id: &str, inputs: &[&str], outputs: Vec<ErgoBox>) -> ErgoTransaction {
        ErgoTransaction {
            id: id.into(),
            inputs: inputs
                .iter()
                .map(|b| ErgoInput {
                    box_id: b.to_string(),
                })
                .collect(),
            outputs,
        }
    }

    fn setup() -> (Arc<InMemoryStorage>, EventTriggerExtractor) {
        let store = Arc::new(InMemoryStorage::new());
        let extractor =
            EventTriggerExtractor::new("triggers", store.clone(), TRIGGER_ADDRESS, RWT);
        (store, extractor)
    }

    #[test]
    fn decodes_trigger_registers() {
        let trigger = EventTrigger::from_box("tx1", &trigger_box("t1", &event_data("abcd"))).unwrap();
        assert_eq!(trigger.box_id, "t1");
        assert_eq!(trigger.tx_id, "tx1");
        assert_eq!(trigger.wids, vec!["aa01", "bb02"]);
        assert_eq!(trigger.from_chain, "cardano");
        assert_eq!(trigger.to_address, "9hTarget");
        assert_eq!(trigger.amount, "1500000");
        assert_eq!(trigger.target_chain_token_id, "erg");
        assert_eq!(trigger.source_chain_height, 200);
        assert_eq!(
            trigger.event_id,
            "9cc3912a042827e45983ed53df3c759f4574added1d07c6d0c7fe0bc3ecf9c42"
        );
    }

    #[test]
    fn explorer_register_objects_decode() {
        let mut output = trigger_box("t1", &event_data("abcd"));
        let r4 = output.additional_registers["R4"].clone();
        output
            .additional_registers
            .insert("R4".into(), json!({ "serializedValue": r4, "sigmaType": "Coll[Coll[SByte]]" }));
        let trigger = EventTrigger::from_box("tx1", &output).unwrap();
        assert_eq!(trigger.wids.len(), 2);
    }

    #[test]
    fn rejects_malformed_registers() {
        let mut short = event_data("abcd");
        short.pop();
        assert!(EventTrigger::from_box("tx1", &trigger_box("t1", &short)).is_err());

        let mut bad_height = event_data("abcd");
        bad_height[11] = "tall".into();
        assert!(EventTrigger::from_box("tx1", &trigger_box("t1", &bad_height)).is_err());

        let mut wrong_type = trigger_box("t1", &event_data("abcd"));
        wrong_type.additional_registers.insert("R4".into(), json!("0e0102"));
        assert!(EventTrigger::from_box("tx1", &wrong_type).is_err());

        let mut truncated = trigger_box("t1", &event_data("abcd"));
        truncated.additional_registers.insert("R4".into(), json!("1a0205aa"));
        assert!(EventTrigger::from_box("tx1", &truncated).is_err());
    }

    #[tokio::test]
    async fn stores_triggers_and_skips_malformed_or_foreign_boxes() {
        let (store, extractor) = setup();

        let mut broken = trigger_box("t-broken", &event_data("s2"));
        broken.additional_registers.remove("R5");
        let mut no_token = trigger_box("t-no-rwt", &event_data("s3"));
        no_token.assets.clear();

        let block = Block::new("0xe1", "0xe0", 300, 0);
        let txs = vec![tx(
            "tx1",
            &[],
            vec![trigger_box("t1", &event_data("s1")), broken, no_token],
        )];
        assert!(extractor.apply(&txs, &block).await.unwrap());

        let rows = store.records("triggers").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].record_id, "t1");
        assert_eq!(rows[0].payload["eventId"], blake2b256_hex("s1"));
        assert_eq!(rows[0].payload["WIDs"], json!(["aa01", "bb02"]));
        assert_eq!(rows[0].payload["sourceTxId"], "s1");
    }

    #[tokio::test]
    async fn consumed_trigger_is_spent_and_fork_restores_it() {
        let (store, extractor) = setup();
        let b1 = Block::new("0xe1", "0xe0", 300, 0);
        let b2 = Block::new("0xe2", "0xe1", 301, 0);

        extractor
            .apply(&[tx("tx1", &[], vec![trigger_box("t1", &event_data("s1"))])], &b1)
            .await
            .unwrap();
        extractor
            .apply(&[tx("payment", &["t1", "fee-box"], vec![])], &b2)
            .await
            .unwrap();

        let row = store.get("triggers", "t1").await.unwrap().unwrap();
        assert_eq!(row.spend_block_hash.as_deref(), Some("0xe2"));
        assert_eq!(row.spend_tx_id.as_deref(), Some("payment"));
        assert_eq!(store.count("triggers").await.unwrap(), 1);

        extractor.undo("0xe2").await.unwrap();
        assert!(!store.get("triggers", "t1").await.unwrap().unwrap().is_spent());

        extractor.undo("0xe1").await.unwrap();
        assert!(store.is_empty());
    }
}
