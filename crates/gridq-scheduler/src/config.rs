//! Scheduler configuration.
//!
//! Loaded from a TOML file (every key optional) and then overridden from
//! `GRIDQ_*` environment variables:
//!
//! ```toml
//! [queue]
//! connect_retries = 5
//! retry_delay_secs = 5
//! prefetch = 1
//!
//! [worker]
//! max_conflict_retries = 8
//! requeue_delay_ms = 1000
//!
//! [rescan]
//! interval_secs = 30   # 0 disables the re-scan task
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use gridq_queue::RetryPolicy;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub queue: QueueSettings,
    pub worker: WorkerSettings,
    pub rescan: RescanSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Connection attempts before the worker gives up.
    pub connect_retries: u32,
    /// Fixed delay between connection attempts.
    pub retry_delay_secs: u64,
    /// Unacknowledged deliveries a consumer may hold.
    pub prefetch: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            connect_retries: 5,
            retry_delay_secs: 5,
            prefetch: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Times one trigger's decision is re-run after losing a race on the
    /// cluster row before the trigger is requeued.
    pub max_conflict_retries: u32,
    /// Pause before requeueing a trigger whose processing failed.
    pub requeue_delay_ms: u64,
    /// Deliveries of one failing trigger before it is dropped. The
    /// deployment stays queued for the re-scan or a manual re-trigger.
    pub max_deliveries: u32,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            max_conflict_retries: 8,
            requeue_delay_ms: 1000,
            max_deliveries: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RescanSettings {
    pub interval_secs: u64,
}

impl Default for RescanSettings {
    fn default() -> Self {
        Self { interval_secs: 30 }
    }
}

impl SchedulerConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `GRIDQ_*` overrides from the process environment.
    pub fn with_env_overrides(mut self) -> anyhow::Result<Self> {
        self.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(self)
    }

    /// Apply overrides from any key lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        override_from(&lookup, "GRIDQ_CONNECT_RETRIES", &mut self.queue.connect_retries)?;
        override_from(&lookup, "GRIDQ_RETRY_DELAY_SECS", &mut self.queue.retry_delay_secs)?;
        override_from(&lookup, "GRIDQ_QUEUE_PREFETCH", &mut self.queue.prefetch)?;
        override_from(
            &lookup,
            "GRIDQ_MAX_CONFLICT_RETRIES",
            &mut self.worker.max_conflict_retries,
        )?;
        override_from(&lookup, "GRIDQ_REQUEUE_DELAY_MS", &mut self.worker.requeue_delay_ms)?;
        override_from(&lookup, "GRIDQ_MAX_DELIVERIES", &mut self.worker.max_deliveries)?;
        override_from(&lookup, "GRIDQ_RESCAN_INTERVAL_SECS", &mut self.rescan.interval_secs)?;
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.queue.connect_retries,
            delay: Duration::from_secs(self.queue.retry_delay_secs),
        }
    }

    pub fn requeue_delay(&self) -> Duration {
        Duration::from_millis(self.worker.requeue_delay_ms)
    }

    /// `None` when the re-scan task is disabled.
    pub fn rescan_interval(&self) -> Option<Duration> {
        (self.rescan.interval_secs > 0).then(|| Duration::from_secs(self.rescan.interval_secs))
    }
}

fn override_from<F, T>(lookup: &F, key: &str, slot: &mut T) -> anyhow::Result<()>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Some(raw) = lookup(key) {
        *slot = raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {key}: {raw:?}"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.queue.prefetch, 1);
        assert_eq!(config.worker.max_conflict_retries, 8);
        assert_eq!(config.worker.max_deliveries, 5);
        assert_eq!(config.rescan_interval(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn parse_partial_toml() {
        let config = SchedulerConfig::from_toml_str(
            r#"
[queue]
connect_retries = 2

[rescan]
interval_secs = 0
"#,
        )
        .unwrap();
        assert_eq!(config.queue.connect_retries, 2);
        assert_eq!(config.queue.retry_delay_secs, 5);
        assert_eq!(config.rescan_interval(), None);
    }

    #[test]
    fn env_overrides_win() {
        let env: HashMap<&str, &str> = [
            ("GRIDQ_CONNECT_RETRIES", "9"),
            ("GRIDQ_RETRY_DELAY_SECS", " 1 "),
            ("GRIDQ_RESCAN_INTERVAL_SECS", "120"),
        ]
        .into_iter()
        .collect();

        let mut config = SchedulerConfig::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(
            config.retry_policy(),
            RetryPolicy {
                max_attempts: 9,
                delay: Duration::from_secs(1)
            }
        );
        assert_eq!(config.rescan_interval(), Some(Duration::from_secs(120)));
        assert_eq!(config.worker, WorkerSettings::default());
    }

    #[test]
    fn malformed_override_is_an_error() {
        let mut config = SchedulerConfig::default();
        let result = config.apply_overrides(|key| {
            (key == "GRIDQ_CONNECT_RETRIES").then(|| "many".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn from_file_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gridq.toml");
        std::fs::write(&path, "[worker]\nrequeue_delay_ms = 5\n").unwrap();

        let config = SchedulerConfig::from_file(&path).unwrap();
        assert_eq!(config.requeue_delay(), Duration::from_millis(5));
    }
}
