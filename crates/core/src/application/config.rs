// Scheduler tuning knobs

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tuning for partitioning, submission and the periodic sweeps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Items per chunk
    pub max_chunk_size: u32,
    /// Outstanding messages allowed per sink and phase
    pub queue_capacity: u64,
    pub bulk_tick_ms: u64,
    pub job_queue_tick_ms: u64,
    pub rerun_tick_ms: u64,
    /// Delay before a failed rerun is retried
    pub rerun_backoff_ms: i64,
    /// Consecutive empty sweeps before TRANSITION_TO_DIRECT becomes DIRECT
    pub clean_sweeps_to_direct: u32,
    /// Concurrent bulk sweeps
    pub sweep_pool_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 10,
            queue_capacity: 1000,
            bulk_tick_ms: 1000,
            job_queue_tick_ms: 1000,
            rerun_tick_ms: 5000,
            rerun_backoff_ms: 60_000,
            clean_sweeps_to_direct: 3,
            sweep_pool_size: 4,
        }
    }
}

impl SchedulerConfig {
    pub fn bulk_tick(&self) -> Duration {
        Duration::from_millis(self.bulk_tick_ms)
    }

    pub fn job_queue_tick(&self) -> Duration {
        Duration::from_millis(self.job_queue_tick_ms)
    }

    pub fn rerun_tick(&self) -> Duration {
        Duration::from_millis(self.rerun_tick_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: SchedulerConfig =
            serde_json::from_str(r#"{"queue_capacity": 2}"#).unwrap();
        assert_eq!(config.queue_capacity, 2);
        assert_eq!(config.max_chunk_size, 10);
        assert_eq!(SchedulerConfig::default().queue_capacity, 1000);
    }
}
