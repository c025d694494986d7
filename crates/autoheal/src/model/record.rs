//! Execution records: one per execution attempt, append-only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Final classification of one execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminalState {
    /// The action ran and (if declared) verification passed
    Success,
    /// Preflight found the desired state already in place
    NoopAlreadyRunning,
    /// The same command key ran inside the dedup window
    NoopDedup,
    /// Transient failure; retrying may help
    FailedRetryable,
    /// Permanent failure; retrying cannot help
    FailedNonRetryable,
}

impl TerminalState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::NoopAlreadyRunning => "NOOP_ALREADY_RUNNING",
            Self::NoopDedup => "NOOP_DEDUP",
            Self::FailedRetryable => "FAILED_RETRYABLE",
            Self::FailedNonRetryable => "FAILED_NON_RETRYABLE",
        }
    }

    /// Nothing needed to happen.
    #[must_use]
    pub fn is_noop(self) -> bool {
        matches!(self, Self::NoopAlreadyRunning | Self::NoopDedup)
    }

    #[must_use]
    pub fn is_failure(self) -> bool {
        matches!(self, Self::FailedRetryable | Self::FailedNonRetryable)
    }
}

impl fmt::Display for TerminalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Well-known reason codes attached to records.
pub mod reason {
    pub const EXECUTED: &str = "executed";
    pub const DEDUP_WINDOW: &str = "dedup_window";
    pub const ALREADY_RUNNING: &str = "already_running";
    pub const NOTIFY_ONLY: &str = "notify_only";
    pub const VERIFICATION_FAILED: &str = "verification_failed";
    pub const TIMEOUT: &str = "timeout";
    pub const INVALID_TASK: &str = "invalid_task";
    pub const TRANSIENT: &str = "transient";
}

/// Outcome of one execution attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Caller-supplied identity of the action
    pub command_key: String,
    pub terminal_state: TerminalState,
    pub reason_code: String,
    /// Diagnostic text captured from the action
    pub detail: String,
    pub latency_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionRecord {
    #[must_use]
    pub fn new(
        command_key: &str,
        terminal_state: TerminalState,
        reason_code: &str,
        detail: impl Into<String>,
        latency_ms: u64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            command_key: command_key.to_string(),
            terminal_state,
            reason_code: reason_code.to_string(),
            detail: detail.into(),
            latency_ms,
            timestamp,
        }
    }
}
