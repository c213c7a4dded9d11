use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Settings for the shared key/value + pub/sub substrate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Deadline applied to every individual store operation.
    #[serde(default = "d_2000")]
    pub timeout_ms: u64,
    /// Namespace prepended to every key (`<prefix>:session:<id>`, …).
    #[serde(default = "d_prefix")]
    pub key_prefix: String,
    /// Pub/sub channel carrying broadcast events between coordinators.
    #[serde(default = "d_channel")]
    pub channel: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 2000,
            key_prefix: d_prefix(),
            channel: d_channel(),
        }
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn d_2000() -> u64 {
    2000
}
fn d_prefix() -> String {
    "leitl".into()
}
fn d_channel() -> String {
    "leitl:events".into()
}
