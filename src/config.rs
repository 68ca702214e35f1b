//! Engine tuning knobs, overridable through the environment.

use serde::{Deserialize, Serialize};

/// Engine configuration.
///
/// Every field has a sane default; deployments usually override only the
/// deep-page threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// OFFSET above which paged queries switch to the id-first strategy.
    pub deep_page_threshold: u64,
    /// Hard cap on the per-page row limit.
    pub max_page_limit: u64,
    /// Chunk size for IN-list batches when fetching nested relations.
    pub in_batch_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            deep_page_threshold: 10_000,
            max_page_limit: 1_000,
            in_batch_size: 500,
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with `NESTQL_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_u64("NESTQL_DEEP_PAGE_THRESHOLD") {
            config.deep_page_threshold = v;
        }
        if let Some(v) = env_u64("NESTQL_MAX_PAGE_LIMIT") {
            config.max_page_limit = v.max(1);
        }
        if let Some(v) = env_u64("NESTQL_IN_BATCH_SIZE") {
            config.in_batch_size = (v.max(1)) as usize;
        }
        config
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
