//! Alert records and their transition history entries.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::event::Severity;

/// Lifecycle status of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertStatus {
    Open,
    Ack,
    Resolved,
}

impl AlertStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Ack => "ACK",
            Self::Resolved => "RESOLVED",
        }
    }

    /// Whether `self -> to` is a legal lifecycle transition.
    #[must_use]
    pub fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Open, Self::Ack)
                | (Self::Ack, Self::Open)
                | (Self::Ack, Self::Resolved)
                | (Self::Open, Self::Resolved)
        )
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deterministic alert key: `rule_id + scope + day_bucket`.
///
/// Repeats of the same rule on the same scope within one UTC calendar day
/// collapse onto the same key.
#[must_use]
pub fn fingerprint(rule_id: &str, scope: &str, at: DateTime<Utc>) -> String {
    format!("{rule_id}:{scope}:{}", at.format("%Y-%m-%d"))
}

/// A deduplicated, SLA-tracked alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub fingerprint: String,
    pub id: String,
    pub rule_id: String,
    pub scope: String,
    pub severity: Severity,
    pub message: String,
    pub status: AlertStatus,
    pub hit_count: u32,
    pub recovery_streak: u32,
    pub created_at: DateTime<Utc>,
    pub last_hit: DateTime<Utc>,
    pub acked_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub sla_deadline: DateTime<Utc>,
    pub sla_breached: bool,
}

impl Alert {
    /// Create a fresh `OPEN` alert with its first hit.
    #[must_use]
    pub fn open(
        rule_id: &str,
        scope: &str,
        severity: Severity,
        message: &str,
        now: DateTime<Utc>,
        sla: Duration,
    ) -> Self {
        Self {
            fingerprint: fingerprint(rule_id, scope, now),
            id: uuid::Uuid::new_v4().to_string(),
            rule_id: rule_id.to_string(),
            scope: scope.to_string(),
            severity,
            message: message.to_string(),
            status: AlertStatus::Open,
            hit_count: 1,
            recovery_streak: 0,
            created_at: now,
            last_hit: now,
            acked_at: None,
            resolved_at: None,
            sla_deadline: now + sla,
            sla_breached: false,
        }
    }

    /// Whether the alert is past its SLA deadline at `now`.
    #[must_use]
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        now > self.sla_deadline
    }
}

/// One entry of the immutable alert transition history.
///
/// `from` is `None` for the transition that creates an alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertTransition {
    pub fingerprint: String,
    pub alert_id: String,
    pub from: Option<AlertStatus>,
    pub to: AlertStatus,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}
