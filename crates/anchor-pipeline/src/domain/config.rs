//! Batching configuration and validation

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Controls when an open buffer seals into a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchingConfig {
    /// A buffer with this many events seals immediately.
    pub max_batch_size: usize,
    /// Buffers below this size never seal on idle or age alone.
    pub min_batch_size: usize,
    /// Blocking-read timeout; an empty read plus this much quiet since the
    /// buffer's last insertion seals it.
    pub idle_timeout: Duration,
    /// A buffer whose first event is older than this seals at the next
    /// trigger check regardless of idle state.
    pub force_seal_after: Duration,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 1000,
            min_batch_size: 1,
            idle_timeout: Duration::from_secs(60),
            force_seal_after: Duration::from_secs(300),
        }
    }
}

impl BatchingConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.max_batch_size == 0 {
            return Err(PipelineError::Configuration(
                "max_batch_size cannot be 0".to_string(),
            ));
        }
        if self.min_batch_size == 0 {
            return Err(PipelineError::Configuration(
                "min_batch_size cannot be 0".to_string(),
            ));
        }
        if self.min_batch_size > self.max_batch_size {
            return Err(PipelineError::Configuration(format!(
                "min_batch_size {} exceeds max_batch_size {}",
                self.min_batch_size, self.max_batch_size
            )));
        }
        if self.idle_timeout.is_zero() {
            return Err(PipelineError::Configuration(
                "idle_timeout cannot be 0".to_string(),
            ));
        }
        if self.force_seal_after < self.idle_timeout {
            return Err(PipelineError::Configuration(
                "force_seal_after must be at least idle_timeout".to_string(),
            ));
        }
        Ok(())
    }
}
