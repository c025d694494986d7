//! Remediation tasks handed to the scheduler.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::event::Severity;

/// A unit of work for the scheduler. Lower `priority` is more urgent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub priority: i64,
    pub task_id: String,
    /// Free-form task category; round-robin rotates over kinds
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
    pub timeout_sec: u64,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub max_retries: u32,
    /// Advisory placement request, e.g. `cpu:2` or `cpus:0-3`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity_hint: Option<String>,
    /// Declared run-time estimate for shortest-job-first
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimate_ms: Option<u64>,
    /// Completion deadline for earliest-deadline-first
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a task with a generated id.
    #[must_use]
    pub fn new(kind: impl Into<String>, priority: i64, timeout_sec: u64, payload: Value) -> Self {
        Self {
            priority,
            task_id: uuid::Uuid::new_v4().to_string(),
            kind: kind.into(),
            payload,
            timeout_sec,
            retry_count: 0,
            max_retries: 0,
            affinity_hint: None,
            estimate_ms: None,
            deadline: None,
        }
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn with_affinity(mut self, hint: impl Into<String>) -> Self {
        self.affinity_hint = Some(hint.into());
        self
    }

    #[must_use]
    pub fn with_estimate_ms(mut self, estimate_ms: u64) -> Self {
        self.estimate_ms = Some(estimate_ms);
        self
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Estimate used by shortest-job-first (falls back to the timeout).
    #[must_use]
    pub fn effective_estimate_ms(&self) -> u64 {
        self.estimate_ms
            .unwrap_or_else(|| self.timeout_sec.saturating_mul(1000))
    }

    /// Deadline used by earliest-deadline-first (falls back to submit + timeout).
    #[must_use]
    pub fn effective_deadline(&self, submitted_at: DateTime<Utc>) -> DateTime<Utc> {
        self.deadline.unwrap_or_else(|| {
            submitted_at + Duration::seconds(i64::try_from(self.timeout_sec).unwrap_or(i64::MAX / 1000))
        })
    }

    /// Whether another attempt is allowed after a retryable failure.
    #[must_use]
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

/// Base scheduling priority for a severity.
#[must_use]
pub fn priority_for(severity: Severity) -> i64 {
    match severity {
        Severity::Crit => 0,
        Severity::Warn => 10,
        Severity::Info => 20,
    }
}
