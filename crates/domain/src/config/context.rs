use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Remote document context sync
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Lifetime of a cached sync result.
    #[serde(default = "d_3600")]
    pub cache_ttl_secs: u64,
    /// Deadline for each remote call (listing or single file fetch).
    #[serde(default = "d_15000")]
    pub request_timeout_ms: u64,
    /// Maximum file fetches in flight for one sync.
    #[serde(default = "d_4")]
    pub max_concurrent_fetches: usize,
    /// Hard ceiling on `max_results`, whatever the caller asks for.
    #[serde(default = "d_50")]
    pub max_results_cap: usize,
    /// `max_results` used when the request omits it.
    #[serde(default = "d_10")]
    pub default_max_results: usize,
    /// Files larger than this are not downloaded; their content becomes a
    /// placeholder.
    #[serde(default = "d_max_bytes")]
    pub max_file_bytes: u64,
    #[serde(default = "d_user_agent")]
    pub user_agent: String,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 3600,
            request_timeout_ms: 15_000,
            max_concurrent_fetches: 4,
            max_results_cap: 50,
            default_max_results: 10,
            max_file_bytes: d_max_bytes(),
            user_agent: d_user_agent(),
        }
    }
}

impl ContextConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn d_3600() -> u64 {
    3600
}
fn d_15000() -> u64 {
    15_000
}
fn d_4() -> usize {
    4
}
fn d_50() -> usize {
    50
}
fn d_10() -> usize {
    10
}
fn d_max_bytes() -> u64 {
    2 * 1024 * 1024
}
fn d_user_agent() -> String {
    "leitl-contextsync/0.1".into()
}
