//! Scheduler configuration.
//!
//! Defaults are overlaid with JSON (`from_json`) or with `SPINDLE_*`
//! environment variables (`from_env`). Durations are plain milliseconds on
//! the wire.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;
use crate::queue::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Requested worker slots; capped by hardware parallelism.
    pub max_workers: usize,

    /// Longest a single queue pop waits before the dispatcher re-checks
    /// its stop signal.
    #[serde(with = "duration_ms")]
    pub poll_interval: Duration,

    #[serde(with = "duration_ms")]
    pub cleanup_interval: Duration,

    /// Completed tasks older than this are evicted.
    #[serde(with = "duration_ms")]
    pub retention: Duration,

    /// Backoff unit: retry n waits `retry_base_delay * 2^n`.
    #[serde(with = "duration_ms")]
    pub retry_base_delay: Duration,

    #[serde(with = "duration_ms")]
    pub retry_max_delay: Duration,

    /// Applied to tasks submitted without a timeout of their own.
    #[serde(with = "option_duration_ms")]
    pub default_timeout: Option<Duration>,

    #[serde(with = "duration_ms")]
    pub shutdown_timeout: Duration,

    /// Run unregistered task types through a no-op simulation instead of
    /// failing them.
    pub simulate_unregistered: bool,

    pub log_level: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            poll_interval: Duration::from_millis(500),
            cleanup_interval: Duration::from_secs(60 * 60),
            retention: Duration::from_secs(24 * 60 * 60),
            retry_base_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(300),
            default_timeout: None,
            shutdown_timeout: Duration::from_secs(30),
            simulate_unregistered: false,
            log_level: "info".to_string(),
        }
    }
}

impl SchedulerConfig {
    pub fn from_json(s: &str) -> Result<Self, SchedulerError> {
        let config: Self =
            serde_json::from_str(s).map_err(|e| SchedulerError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with `SPINDLE_*` environment variables.
    pub fn from_env() -> Result<Self, SchedulerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SchedulerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parse::<usize>(&lookup, "SPINDLE_MAX_WORKERS")? {
            config.max_workers = v;
        }
        if let Some(v) = parse::<u64>(&lookup, "SPINDLE_POLL_INTERVAL_MS")? {
            config.poll_interval = Duration::from_millis(v);
        }
        if let Some(v) = parse::<u64>(&lookup, "SPINDLE_CLEANUP_INTERVAL_SECS")? {
            config.cleanup_interval = Duration::from_secs(v);
        }
        if let Some(v) = parse::<u64>(&lookup, "SPINDLE_RETENTION_SECS")? {
            config.retention = Duration::from_secs(v);
        }
        if let Some(v) = parse::<u64>(&lookup, "SPINDLE_RETRY_BASE_DELAY_MS")? {
            config.retry_base_delay = Duration::from_millis(v);
        }
        if let Some(v) = parse::<u64>(&lookup, "SPINDLE_RETRY_MAX_DELAY_MS")? {
            config.retry_max_delay = Duration::from_millis(v);
        }
        if let Some(v) = parse::<u64>(&lookup, "SPINDLE_DEFAULT_TIMEOUT_SECS")? {
            config.default_timeout = (v > 0).then(|| Duration::from_secs(v));
        }
        if let Some(v) = parse::<u64>(&lookup, "SPINDLE_SHUTDOWN_TIMEOUT_SECS")? {
            config.shutdown_timeout = Duration::from_secs(v);
        }
        if let Some(v) = parse::<bool>(&lookup, "SPINDLE_SIMULATE_UNREGISTERED")? {
            config.simulate_unregistered = v;
        }
        if let Some(v) = lookup("SPINDLE_LOG_LEVEL") {
            config.log_level = v;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.max_workers == 0 {
            return Err(SchedulerError::InvalidConfig(
                "max_workers must be at least 1".into(),
            ));
        }
        for (name, value) in [
            ("poll_interval", self.poll_interval),
            ("cleanup_interval", self.cleanup_interval),
        ] {
            if value.is_zero() {
                return Err(SchedulerError::InvalidConfig(format!(
                    "{name} must be non-zero"
                )));
            }
        }
        if self.retry_max_delay < self.retry_base_delay {
            return Err(SchedulerError::InvalidConfig(
                "retry_max_delay must not be below retry_base_delay".into(),
            ));
        }
        Ok(())
    }

    /// `min(max_workers, available parallelism)`, at least 1.
    pub fn effective_workers(&self) -> usize {
        let hardware = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        self.max_workers.min(hardware).max(1)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_base_delay, self.retry_max_delay)
    }
}

fn parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, SchedulerError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| SchedulerError::InvalidConfig(format!("{key}={raw:?} is not valid"))),
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

mod option_duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(d).map(|ms| ms.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = SchedulerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.retention, Duration::from_secs(86_400));
        assert_eq!(config.cleanup_interval, Duration::from_secs(3_600));
        assert!(!config.simulate_unregistered);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = SchedulerConfig::from_json(r#"{ "max_workers": 2, "retention": 1000 }"#)
            .unwrap();
        assert_eq!(config.max_workers, 2);
        assert_eq!(config.retention, Duration::from_millis(1000));
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.default_timeout, None);
    }

    #[test]
    fn json_roundtrip_uses_milliseconds() {
        let config = SchedulerConfig {
            default_timeout: Some(Duration::from_secs(2)),
            ..Default::default()
        };
        let v = serde_json::to_value(&config).unwrap();
        assert_eq!(v["default_timeout"], 2000);
        assert_eq!(v["poll_interval"], 500);
    }

    #[test]
    fn env_overrides_defaults() {
        let config = SchedulerConfig::from_lookup(lookup_from(&[
            ("SPINDLE_MAX_WORKERS", "1"),
            ("SPINDLE_RETENTION_SECS", "60"),
            ("SPINDLE_DEFAULT_TIMEOUT_SECS", "5"),
            ("SPINDLE_SIMULATE_UNREGISTERED", "true"),
            ("SPINDLE_LOG_LEVEL", "debug"),
        ]))
        .unwrap();
        assert_eq!(config.max_workers, 1);
        assert_eq!(config.retention, Duration::from_secs(60));
        assert_eq!(config.default_timeout, Some(Duration::from_secs(5)));
        assert!(config.simulate_unregistered);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn malformed_env_value_is_reported() {
        let err = SchedulerConfig::from_lookup(lookup_from(&[("SPINDLE_MAX_WORKERS", "many")]))
            .unwrap_err();
        assert!(err.to_string().contains("SPINDLE_MAX_WORKERS"));
    }

    #[test]
    fn zero_workers_is_rejected() {
        let err = SchedulerConfig::from_json(r#"{ "max_workers": 0 }"#).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidConfig(_)));
    }

    #[test]
    fn effective_workers_never_exceeds_request() {
        let config = SchedulerConfig {
            max_workers: 1,
            ..Default::default()
        };
        assert_eq!(config.effective_workers(), 1);

        let config = SchedulerConfig {
            max_workers: 10_000,
            ..Default::default()
        };
        assert!(config.effective_workers() <= 10_000);
        assert!(config.effective_workers() >= 1);
    }
}
