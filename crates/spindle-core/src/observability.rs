use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Point-in-time scheduler statistics, computed under the registry lock.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    /// Tasks in flight (queued, running or waiting out a retry backoff).
    pub active: usize,
    /// Tasks in a terminal state that have not been evicted yet.
    pub completed: usize,
    /// Subset of `completed` that ended FAILED.
    pub failed: usize,
    pub queue_depth: usize,
    pub workers: usize,

    pub queued: usize,
    pub running: usize,
    pub retrying: usize,
    pub succeeded: usize,
    pub cancelled: usize,
    pub timed_out: usize,
}

/// Install a fmt subscriber. `RUST_LOG` wins over `default_level`.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_tracing(default_level: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_a_noop() {
        let _ = init_tracing("debug");
        assert!(!init_tracing("info"));
    }

    #[test]
    fn stats_serialize_flat() {
        let stats = SchedulerStats {
            active: 2,
            workers: 4,
            ..Default::default()
        };
        let v = serde_json::to_value(&stats).unwrap();
        assert_eq!(v["active"], 2);
        assert_eq!(v["workers"], 4);
        assert_eq!(v["queue_depth"], 0);
    }
}
