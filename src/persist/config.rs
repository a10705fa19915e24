use crate::core::{Result, serde_to_db_error};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry behaviour of [`Engine::save_with_retry`](super::Engine::save_with_retry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Backoff grows by this many milliseconds per failed attempt.
    pub backoff_step_ms: u64,
    /// Upper bound for a single backoff.
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_step_ms: 5,
            max_backoff_ms: 250,
        }
    }
}

impl RetryPolicy {
    /// Linear backoff after the `attempt`-th failure (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let millis = self
            .backoff_step_ms
            .saturating_mul(u64::from(attempt))
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Convergence passes allowed before an operation fails.
    pub max_passes: u32,
    /// Give records created with an empty identifier a random UUID instead
    /// of rejecting them.
    pub assign_missing_ids: bool,
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_passes: 100,
            assign_missing_ids: false,
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(document: &str) -> Result<Self> {
        serde_json::from_str(document).map_err(|err| serde_to_db_error("engine config", err))
    }
}
