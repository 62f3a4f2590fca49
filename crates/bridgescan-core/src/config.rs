//! Scanner configuration and lane state types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ScannerError;

/// What the lane does once a block has failed `retry_ceiling` times.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryExhaustion {
    /// Stop the lane until [`Scanner::resume`](crate::scanner::Scanner::resume) is called.
    #[default]
    Halt,
    /// Go idle; the next enqueued event re-arms the lane and the stuck block
    /// gets one more attempt per event.
    RetryOnNextEvent,
}

/// Configuration for a scanner instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Unique scanner name (keys the block store).
    pub name: String,
    /// Failed attempts allowed for one queued element before the
    /// exhaustion policy applies.
    pub retry_ceiling: u32,
    /// Delay before re-attempting a failed element (milliseconds).
    pub retry_delay_ms: u64,
    /// Delay between two successful steps (milliseconds).
    pub step_delay_ms: u64,
    /// Policy once `retry_ceiling` is reached.
    pub on_retry_exhausted: RetryExhaustion,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            name: "default".into(),
            retry_ceiling: 10,
            retry_delay_ms: 100,
            step_delay_ms: 100,
            on_retry_exhausted: RetryExhaustion::Halt,
        }
    }
}

impl ScannerConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }

    /// Reject configurations the lane cannot run with.
    pub fn validate(&self) -> Result<(), ScannerError> {
        if self.name.trim().is_empty() {
            return Err(ScannerError::Config("scanner name must not be empty".into()));
        }
        if self.retry_ceiling == 0 {
            return Err(ScannerError::Config("retry_ceiling must be at least 1".into()));
        }
        Ok(())
    }
}

/// Runtime state of a scanner lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LaneState {
    /// Queue empty or waiting to be re-armed.
    Idle,
    /// Exactly one element is being applied or undone.
    Processing,
    /// Retry ceiling exhausted under [`RetryExhaustion::Halt`].
    Halted,
}

impl std::fmt::Display for LaneState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Processing => write!(f, "processing"),
            Self::Halted => write!(f, "halted"),
        }
    }
}
