//! Host configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Runtime settings for one [`Host`](crate::host::Host).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Interval between ticks when the host drives itself with `run`.
    pub tick_interval_ms: u64,
    /// Time allowed for a link handshake before it is abandoned.
    pub handshake_timeout_ms: u64,
    /// Replicate scalar and array sync-context values, not only objects.
    pub replicate_non_objects: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 50,
            handshake_timeout_ms: 5000,
            replicate_non_objects: false,
        }
    }
}

impl HostConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}
