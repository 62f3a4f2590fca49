//! bridgescan-core — fork-consistent block scanning for bridge extractors.
//!
//! # Architecture
//!
//! ```text
//! Block source ──forward/backward──► Scanner
//!                                      ├── BlockQueue   (height-ordered pending work, fork truncation)
//!                                      ├── BlockStore   (last applied block, blocks to undo on fork)
//!                                      └── Extractors   (chain-specific, one RecordAction each)
//!                                                └── RecordStore (memory / SQLite)
//! ```

pub mod block_store;
pub mod builder;
pub mod config;
pub mod error;
pub mod extractor;
pub mod queue;
pub mod record;
pub mod scanner;
pub mod types;

pub use block_store::{BlockStatus, BlockStore, MemoryBlockStore, StoredBlock};
pub use builder::ScannerBuilder;
pub use config::{LaneState, RetryExhaustion, ScannerConfig};
pub use error::ScannerError;
pub use extractor::Extractor;
pub use queue::{BlockQueue, QueueElement};
pub use record::{RecordAction, RecordStore, ID_CHUNK_SIZE, WARM_START_BLOCK};
pub use scanner::{Scanner, StepOutcome};
pub use types::{BatchSummary, Block, ExtractedRecord, SpendInfo, StoredRecord, UndoSummary};
