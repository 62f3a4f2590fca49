//! Error types for the scanning pipeline.

use thiserror::Error;

/// Errors that can occur while scanning, extracting, or persisting.
#[derive(Debug, Error)]
pub enum ScannerError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Block {height} does not extend the last applied block: expected parent {expected}, got {actual}")]
    Linkage {
        height: u64,
        expected: String,
        actual: String,
    },

    #[error("Extractor error in '{extractor}': {reason}")]
    Extractor { extractor: String, reason: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl ScannerError {
    /// Returns `true` for a parent-hash mismatch.
    pub fn is_linkage(&self) -> bool {
        matches!(self, Self::Linkage { .. })
    }
}

impl From<serde_json::Error> for ScannerError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linkage_is_detected() {
        let err = ScannerError::Linkage {
            height: 101,
            expected: "0xa".into(),
            actual: "0xb".into(),
        };
        assert!(err.is_linkage());
        assert!(err.to_string().contains("expected parent 0xa"));
        assert!(!ScannerError::Storage("locked".into()).is_linkage());
    }
}
