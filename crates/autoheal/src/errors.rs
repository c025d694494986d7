//! Error types for the autoheal crate.
//!
//! Execution outcomes are not errors: a failed remediation is a
//! [`TerminalState`](crate::model::TerminalState) on its record. The variants
//! below cover invalid input, illegal alert transitions, and storage faults.

use thiserror::Error;

/// Errors raised by the remediation pipeline
#[derive(Error, Debug, Clone)]
pub enum AutohealError {
    // Input validation
    #[error("Invalid event '{event_id}': {reason}")]
    InvalidEvent { event_id: String, reason: String },

    #[error("Invalid playbook '{playbook_id}': {reason}")]
    InvalidPlaybook { playbook_id: String, reason: String },

    #[error("Duplicate playbook id '{playbook_id}'")]
    DuplicatePlaybook { playbook_id: String },

    #[error("Playbook '{playbook_id}' not found")]
    PlaybookNotFound { playbook_id: String },

    #[error("Invalid severity: '{value}'")]
    InvalidSeverity { value: String },

    // Alert lifecycle
    #[error("Alert '{alert_id}' not found")]
    AlertNotFound { alert_id: String },

    #[error("Invalid status transition for alert '{alert_id}': {from} -> {to}")]
    InvalidTransition {
        alert_id: String,
        from: String,
        to: String,
    },

    // Scheduling
    #[error("Task '{task_id}' not found")]
    TaskNotFound { task_id: String },

    #[error("Scheduler queue is full ({capacity} tasks)")]
    QueueFull { capacity: usize },

    #[error("Scheduler is shut down")]
    SchedulerClosed,

    // Configuration
    #[error("Invalid configuration value for '{key}': {reason}")]
    InvalidConfig { key: String, reason: String },

    // Storage
    #[error("Storage error: {reason}")]
    Storage { reason: String },

    #[error("Failed to serialize record: {reason}")]
    Serialization { reason: String },
}

impl From<std::io::Error> for AutohealError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage {
            reason: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for AutohealError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            reason: err.to_string(),
        }
    }
}

/// Result type alias for autoheal operations
pub type AutohealResult<T> = Result<T, AutohealError>;
