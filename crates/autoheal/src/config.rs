//! Pipeline configuration.
//!
//! Loaded from a JSON file (every field optional) and then overridden by CLI
//! flags. Each component takes its own slice of the config at construction.

use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{AutohealError, AutohealResult};
use crate::model::Severity;
use crate::scheduler::SchedulerPolicy;

/// SLA targets in hours, keyed by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaHours {
    #[serde(rename = "CRIT")]
    pub crit: u64,
    #[serde(rename = "WARN")]
    pub warn: u64,
    #[serde(rename = "INFO")]
    pub info: u64,
}

impl Default for SlaHours {
    fn default() -> Self {
        Self {
            crit: 1,
            warn: 24,
            info: 72,
        }
    }
}

impl SlaHours {
    /// Time allowed to reach `ACK` or `RESOLVED` for `severity`.
    #[must_use]
    pub fn for_severity(&self, severity: Severity) -> ChronoDuration {
        let hours = match severity {
            Severity::Crit => self.crit,
            Severity::Warn => self.warn,
            Severity::Info => self.info,
        };
        ChronoDuration::hours(i64::try_from(hours).unwrap_or(i64::MAX / 3600))
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutohealConfig {
    /// Window in which a command key runs at most once
    pub dedup_window_sec: u64,
    /// Dedup entries older than `window * factor` are purged
    pub dedup_purge_factor: u32,
    /// Consecutive recoveries that auto-resolve an alert
    pub auto_resolve_count: u32,
    pub sla_hours: SlaHours,
    /// Worker pool size
    pub max_concurrent: usize,
    pub scheduler_policy: SchedulerPolicy,
    /// Retries allowed after a retryable failure
    pub max_retries: u32,
    pub backoff_base_sec: f64,
    pub backoff_max_sec: f64,
    /// Waiting this long lowers a task's effective key by one step
    pub aging_interval_sec: f64,
    /// Dispatches per lane before round-robin rotates
    pub round_robin_quantum: u32,
    /// Maximum queued tasks
    pub queue_capacity: usize,
    /// JSONL file for execution records (in-memory when unset)
    pub execution_log: Option<PathBuf>,
    /// JSONL file for alert transitions (in-memory when unset)
    pub alert_history: Option<PathBuf>,
}

impl Default for AutohealConfig {
    fn default() -> Self {
        Self {
            dedup_window_sec: 60,
            dedup_purge_factor: 5,
            auto_resolve_count: 2,
            sla_hours: SlaHours::default(),
            max_concurrent: 4,
            scheduler_policy: SchedulerPolicy::Priority,
            max_retries: 3,
            backoff_base_sec: 2.0,
            backoff_max_sec: 300.0,
            aging_interval_sec: 30.0,
            round_robin_quantum: 1,
            queue_capacity: 1024,
            execution_log: None,
            alert_history: None,
        }
    }
}

impl AutohealConfig {
    /// Load and validate a JSON config file.
    pub fn load(path: &Path) -> AutohealResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| AutohealError::Storage {
            reason: format!("failed to read {}: {e}", path.display()),
        })?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> AutohealResult<()> {
        let invalid = |key: &str, reason: &str| {
            Err(AutohealError::InvalidConfig {
                key: key.to_string(),
                reason: reason.to_string(),
            })
        };

        if self.dedup_window_sec == 0 {
            return invalid("dedup_window_sec", "must be greater than zero");
        }
        if self.dedup_purge_factor == 0 {
            return invalid("dedup_purge_factor", "must be at least 1");
        }
        if self.auto_resolve_count == 0 {
            return invalid("auto_resolve_count", "must be at least 1");
        }
        if self.sla_hours.crit == 0 || self.sla_hours.warn == 0 || self.sla_hours.info == 0 {
            return invalid("sla_hours", "every severity needs a positive SLA");
        }
        if self.max_concurrent == 0 {
            return invalid("max_concurrent", "must be at least 1");
        }
        if self.queue_capacity == 0 {
            return invalid("queue_capacity", "must be at least 1");
        }
        if !(self.backoff_base_sec >= 0.0 && self.backoff_base_sec.is_finite()) {
            return invalid("backoff_base_sec", "must be a non-negative number");
        }
        if !(self.backoff_max_sec >= self.backoff_base_sec && self.backoff_max_sec.is_finite()) {
            return invalid("backoff_max_sec", "must be at least backoff_base_sec");
        }
        if !(self.aging_interval_sec > 0.0 && self.aging_interval_sec.is_finite()) {
            return invalid("aging_interval_sec", "must be greater than zero");
        }
        if self.round_robin_quantum == 0 {
            return invalid("round_robin_quantum", "must be at least 1");
        }
        Ok(())
    }

    /// Dedup window as a chrono duration.
    #[must_use]
    pub fn dedup_window(&self) -> ChronoDuration {
        ChronoDuration::seconds(i64::try_from(self.dedup_window_sec).unwrap_or(i64::MAX / 1000))
    }

    #[must_use]
    pub fn backoff_base(&self) -> Duration {
        Duration::from_secs_f64(self.backoff_base_sec)
    }

    #[must_use]
    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs_f64(self.backoff_max_sec)
    }

    #[must_use]
    pub fn aging_interval(&self) -> Duration {
        Duration::from_secs_f64(self.aging_interval_sec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AutohealConfig::default();
        assert_eq!(config.dedup_window_sec, 60);
        assert_eq!(config.auto_resolve_count, 2);
        assert_eq!(config.sla_hours.for_severity(Severity::Crit), ChronoDuration::hours(1));
        assert_eq!(config.sla_hours.for_severity(Severity::Warn), ChronoDuration::hours(24));
        assert_eq!(config.sla_hours.for_severity(Severity::Info), ChronoDuration::hours(72));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: AutohealConfig = serde_json::from_str(
            r#"{"max_concurrent": 8, "sla_hours": {"CRIT": 2, "WARN": 12, "INFO": 48},
                "scheduler_policy": {"kind": "fifo"}}"#,
        )
        .unwrap();
        assert_eq!(config.max_concurrent, 8);
        assert_eq!(config.sla_hours.crit, 2);
        assert_eq!(config.scheduler_policy, SchedulerPolicy::Fifo);
        assert_eq!(config.dedup_window_sec, 60);
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let config = AutohealConfig {
            max_concurrent: 0,
            ..AutohealConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(AutohealError::InvalidConfig { key, .. }) if key == "max_concurrent"
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"dedup_window_sec": 30, "max_retries": 1}}"#).unwrap();
        let config = AutohealConfig::load(file.path()).unwrap();
        assert_eq!(config.dedup_window_sec, 30);
        assert_eq!(config.max_retries, 1);
    }
}
