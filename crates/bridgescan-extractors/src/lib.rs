//! bridgescan-extractors — reference extractors built on the bridgescan record action.
//!
//! | extractor | transaction type | records |
//! |---|---|---|
//! | [`ErgoBoxExtractor`] | [`ErgoTransaction`] (node API) | boxes locked to tracked addresses |
//! | [`EventTriggerExtractor`] | [`ErgoTransaction`] (node API) | watcher event triggers, spent when consumed |
//! | [`CardanoObservationExtractor`] | [`KoiosTransaction`] (Koios API) | bridge request observations |
//! | [`TxIdExtractor`] | any [`TransactionId`] | ids of every transaction in applied blocks |

pub mod cardano;
pub mod ergo;
pub mod event_trigger;
pub mod hash;
pub mod tx_id;

pub use cardano::{CardanoObservationExtractor, KoiosTransaction, Observation};
pub use ergo::{ErgoBox, ErgoBoxExtractor, ErgoTransaction};
pub use event_trigger::{EventTrigger, EventTriggerExtractor};
pub use hash::blake2b256_hex;
pub use tx_id::{TransactionId, TxIdExtractor};
