//! Streaming manager configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the streaming manager.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Minimum time between scheduler ticks (milliseconds).
    pub update_interval_ms: u64,
    /// A resource unused for this long is allowed to degrade (milliseconds).
    pub resource_live_timeout_ms: u64,
    /// Cap on concurrently running streaming jobs per tick.
    pub max_resources_per_update: u32,
    /// Soft memory budget in megabytes. Over budget lowers target quality;
    /// it is never a hard allocation limit.
    pub target_memory_budget_mb: u32,
    /// Whether streaming is enabled at startup.
    pub enabled: bool,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: 33,
            resource_live_timeout_ms: 8000,
            max_resources_per_update: 8,
            target_memory_budget_mb: 512,
            enabled: true,
        }
    }
}

impl StreamingConfig {
    /// Minimum time between scheduler ticks.
    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    /// Soft budget in bytes.
    pub fn target_budget_bytes(&self) -> u64 {
        self.target_memory_budget_mb as u64 * 1024 * 1024
    }

    /// Live timeout expressed in scheduler ticks.
    ///
    /// Recency is measured in ticks rather than wall time so it stays
    /// consistent with the tick cadence.
    pub fn live_timeout_ticks(&self) -> u64 {
        (self.resource_live_timeout_ms / self.update_interval_ms.max(1)).max(1)
    }
}
