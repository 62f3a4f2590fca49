//! Fluent builder API for creating scanners.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bridgescan_core::{MemoryBlockStore, RetryExhaustion, Scanner, ScannerBuilder};
//!
//! # fn example() -> Result<(), bridgescan_core::ScannerError> {
//! let scanner: Scanner<serde_json::Value> = ScannerBuilder::new()
//!     .name("ergo-node")
//!     .retry_ceiling(10)
//!     .retry_delay_ms(100)
//!     .on_retry_exhausted(RetryExhaustion::Halt)
//!     .build(Arc::new(MemoryBlockStore::new()))?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use crate::block_store::BlockStore;
use crate::config::{RetryExhaustion, ScannerConfig};
use crate::error::ScannerError;
use crate::scanner::Scanner;

/// Fluent builder for [`ScannerConfig`] and [`Scanner`].
#[derive(Default)]
pub struct ScannerBuilder {
    config: ScannerConfig,
}

impl ScannerBuilder {
    pub fn new() -> Self {
        Self {
            config: ScannerConfig::default(),
        }
    }

    /// Start from an existing config (e.g. one read from a file).
    pub fn from_config(config: ScannerConfig) -> Self {
        Self { config }
    }

    /// Set the scanner name (keys the block store).
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Set how many failed attempts a block gets.
    pub fn retry_ceiling(mut self, ceiling: u32) -> Self {
        self.config.retry_ceiling = ceiling;
        self
    }

    /// Set the delay before re-attempting a failed block.
    pub fn retry_delay_ms(mut self, ms: u64) -> Self {
        self.config.retry_delay_ms = ms;
        self
    }

    /// Set the delay between two successful steps.
    pub fn step_delay_ms(mut self, ms: u64) -> Self {
        self.config.step_delay_ms = ms;
        self
    }

    /// Set what happens once the retry ceiling is reached.
    pub fn on_retry_exhausted(mut self, policy: RetryExhaustion) -> Self {
        self.config.on_retry_exhausted = policy;
        self
    }

    /// Build the `ScannerConfig`.
    pub fn build_config(self) -> ScannerConfig {
        self.config
    }

    /// Validate the config and build a scanner backed by `blocks`.
    pub fn build<T: Send + Sync + 'static>(
        self,
        blocks: Arc<dyn BlockStore>,
    ) -> Result<Scanner<T>, ScannerError> {
        Scanner::new(self.config, blocks)
    }
}
