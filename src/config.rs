//! Pipeline configuration.

use crate::cli::Args;
use crate::error::WindowError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Sizing and timing for a [`WindowPipeline`](crate::pipeline::WindowPipeline)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Length of one metrics window
    pub window_interval: Duration,
    /// Snapshots buffered between collectors and the consumer before the
    /// oldest are dropped
    pub queue_capacity: usize,
    /// Snapshots retained per iteration in the store
    pub history_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            window_interval: crate::defaults::WINDOW_INTERVAL,
            queue_capacity: crate::defaults::QUEUE_CAPACITY,
            history_capacity: crate::defaults::HISTORY_CAPACITY,
        }
    }
}

impl PipelineConfig {
    /// Check that every value is usable
    ///
    /// ## Returns
    ///
    /// `WindowError::InvalidConfig` naming the first zero interval or capacity.
    pub fn validate(&self) -> Result<(), WindowError> {
        if self.window_interval.is_zero() {
            return Err(WindowError::InvalidConfig(
                "window interval must be greater than zero".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(WindowError::InvalidConfig(
                "queue capacity must be greater than zero".to_string(),
            ));
        }
        if self.history_capacity == 0 {
            return Err(WindowError::InvalidConfig(
                "history capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl From<&Args> for PipelineConfig {
    fn from(args: &Args) -> Self {
        Self {
            window_interval: args.window_interval,
            queue_capacity: args.queue_capacity,
            history_capacity: args.history_capacity,
        }
    }
}
