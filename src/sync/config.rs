use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// How long cancellation and purges wait for in-flight fetches to release
    pub cancel_grace_ms: u64,
    /// Re-enqueue items whose images partially failed on the catch-up pass
    pub retry_partial: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            cancel_grace_ms: 5000,
            retry_partial: true,
        }
    }
}

impl SyncConfig {
    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }
}
