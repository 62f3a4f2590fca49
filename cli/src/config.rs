//! `bridgescan run` configuration file.
//!
//! ```yaml
//! database: ./bridgescan.db
//! chain: ergo
//! log:
//!   level: info
//!   components: { bridgescan-core: debug }
//! scanner:
//!   name: ergo-node
//!   retry_ceiling: 10
//!   on_retry_exhausted: halt
//! extractors:
//!   - kind: ergo_box
//!     id: bank-boxes
//!     addresses: [9hBankAddress]
//!     token_id: 8c0d1b2a
//!     seed: { height: 1000, boxes: ./bank-boxes.json }
//!   - kind: event_trigger
//!     id: triggers
//!     address: LkY4RECaMvZiFw
//!     rwt_token_id: 3c6cb596
//!   - kind: tx_id
//!     id: tx-ids
//! ```

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use bridgescan_core::ScannerConfig;

use crate::logging::LogConfig;

/// Which transaction format the scanner consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Chain {
    Ergo,
    Cardano,
}

/// One-time seed of an Ergo tracker from a JSON array of node-API boxes.
#[derive(Debug, Clone, Deserialize)]
pub struct SeedConfig {
    pub height: u64,
    pub boxes: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractorConfig {
    ErgoBox {
        id: String,
        addresses: Vec<String>,
        #[serde(default)]
        token_id: Option<String>,
        #[serde(default)]
        seed: Option<SeedConfig>,
    },
    EventTrigger {
        id: String,
        address: String,
        rwt_token_id: String,
    },
    CardanoObservation {
        id: String,
        lock_address: String,
    },
    /// Works on either chain.
    TxId { id: String },
}

impl ExtractorConfig {
    pub fn id(&self) -> &str {
        match self {
            Self::ErgoBox { id, .. }
            | Self::EventTrigger { id, .. }
            | Self::CardanoObservation { id, .. }
            | Self::TxId { id } => id,
        }
    }

    /// The chain this extractor is bound to, `None` if it takes any.
    pub fn chain(&self) -> Option<Chain> {
        match self {
            Self::ErgoBox { .. } | Self::EventTrigger { .. } => Some(Chain::Ergo),
            Self::CardanoObservation { .. } => Some(Chain::Cardano),
            Self::TxId { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    pub database: String,
    pub chain: Chain,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    pub extractors: Vec<ExtractorConfig>,
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = Self::parse(&raw).with_context(|| format!("in config {}", path.display()))?;
        Ok(config)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(raw).context("invalid YAML")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        self.scanner.validate()?;
        if self.extractors.is_empty() {
            bail!("at least one extractor must be configured");
        }
        for extractor in &self.extractors {
            if extractor.chain().is_some_and(|chain| chain != self.chain) {
                bail!(
                    "extractor '{}' does not consume {:?} transactions",
                    extractor.id(),
                    self.chain
                );
            }
        }
        Ok(())
    }
}
