//! Engine configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the agent runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Maximum node-processing tasks running concurrently per agent.
    /// `0` disables the cap.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Interval of the cyclic trigger task, in milliseconds.
    #[serde(default = "default_cyclic_interval_ms")]
    pub cyclic_interval_ms: u64,
    /// How long `stop()` waits for the message processing loop to exit.
    #[serde(default = "default_stop_join_timeout_secs")]
    pub stop_join_timeout_secs: u64,
}

fn default_max_concurrency() -> usize {
    32
}

fn default_cyclic_interval_ms() -> u64 {
    500
}

fn default_stop_join_timeout_secs() -> u64 {
    5
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            max_concurrency: default_max_concurrency(),
            cyclic_interval_ms: default_cyclic_interval_ms(),
            stop_join_timeout_secs: default_stop_join_timeout_secs(),
        }
    }
}
