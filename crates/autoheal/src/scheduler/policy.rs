//! Ordering policies and retry backoff.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::AutohealError;

/// A single ordering key. Lower keys dequeue first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKey {
    /// Task priority value, ascending
    #[default]
    Priority,
    /// Submission order
    Fifo,
    /// Declared run-time estimate, ascending
    #[serde(rename = "sjf", alias = "shortest_job_first")]
    ShortestJobFirst,
    /// Deadline, earliest first
    #[serde(rename = "edf", alias = "earliest_deadline_first")]
    EarliestDeadlineFirst,
}

impl OrderKey {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Priority => "priority",
            Self::Fifo => "fifo",
            Self::ShortestJobFirst => "sjf",
            Self::EarliestDeadlineFirst => "edf",
        }
    }

    /// Whether waiting time lowers this key.
    ///
    /// FIFO and EDF keys already move toward the head as time passes.
    #[must_use]
    pub fn ages(self) -> bool {
        matches!(self, Self::Priority | Self::ShortestJobFirst)
    }
}

impl FromStr for OrderKey {
    type Err = AutohealError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "priority" => Ok(Self::Priority),
            "fifo" => Ok(Self::Fifo),
            "sjf" | "shortest_job_first" => Ok(Self::ShortestJobFirst),
            "edf" | "earliest_deadline_first" => Ok(Self::EarliestDeadlineFirst),
            other => Err(unknown_policy(other)),
        }
    }
}

/// Queue ordering policy of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchedulerPolicy {
    #[default]
    Priority,
    Fifo,
    #[serde(rename = "sjf", alias = "shortest_job_first")]
    ShortestJobFirst,
    /// Rotate over task kinds, `round_robin_quantum` dispatches per turn
    RoundRobin,
    #[serde(rename = "edf", alias = "earliest_deadline_first")]
    EarliestDeadlineFirst,
    /// Order by `primary`, break ties with `secondary`
    Hybrid { primary: OrderKey, secondary: OrderKey },
}

impl SchedulerPolicy {
    /// Ordering keys compared in turn. Empty for round-robin.
    #[must_use]
    pub fn keys(&self) -> Vec<OrderKey> {
        match self {
            Self::Priority => vec![OrderKey::Priority],
            Self::Fifo => vec![OrderKey::Fifo],
            Self::ShortestJobFirst => vec![OrderKey::ShortestJobFirst],
            Self::EarliestDeadlineFirst => vec![OrderKey::EarliestDeadlineFirst],
            Self::Hybrid { primary, secondary } => vec![*primary, *secondary],
            Self::RoundRobin => Vec::new(),
        }
    }

    #[must_use]
    pub fn is_round_robin(&self) -> bool {
        matches!(self, Self::RoundRobin)
    }
}

impl fmt::Display for SchedulerPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Priority => f.write_str("priority"),
            Self::Fifo => f.write_str("fifo"),
            Self::ShortestJobFirst => f.write_str("sjf"),
            Self::RoundRobin => f.write_str("round_robin"),
            Self::EarliestDeadlineFirst => f.write_str("edf"),
            Self::Hybrid { primary, secondary } => {
                write!(f, "hybrid:{}:{}", primary.as_str(), secondary.as_str())
            }
        }
    }
}

/// Parses `priority`, `fifo`, `sjf`, `round_robin`, `edf`, `hybrid` and
/// `hybrid:<primary>:<secondary>`. Bare `hybrid` is priority then FIFO.
impl FromStr for SchedulerPolicy {
    type Err = AutohealError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        let mut parts = lowered.split(':');
        let head = parts.next().unwrap_or_default();
        let policy = match head {
            "priority" => Self::Priority,
            "fifo" => Self::Fifo,
            "sjf" | "shortest_job_first" => Self::ShortestJobFirst,
            "round_robin" | "rr" => Self::RoundRobin,
            "edf" | "earliest_deadline_first" => Self::EarliestDeadlineFirst,
            "hybrid" => {
                let primary = parts.next().map_or(Ok(OrderKey::Priority), str::parse::<OrderKey>)?;
                let secondary = parts.next().map_or(Ok(OrderKey::Fifo), str::parse::<OrderKey>)?;
                Self::Hybrid { primary, secondary }
            }
            _ => return Err(unknown_policy(s)),
        };
        if parts.next().is_some() {
            return Err(unknown_policy(s));
        }
        Ok(policy)
    }
}

/// Compare two key vectors lexicographically.
#[must_use]
pub fn compare_keys(a: &[i128], b: &[i128]) -> Ordering {
    a.iter().cmp(b.iter())
}

/// Retry delay: `min(base * 2^retry_count, max)`.
#[must_use]
pub fn backoff_delay(base: Duration, max: Duration, retry_count: u32) -> Duration {
    let factor = 2f64.powi(i32::try_from(retry_count.min(62)).unwrap_or(62));
    Duration::try_from_secs_f64(base.as_secs_f64() * factor)
        .map_or(max, |delay| delay.min(max))
}

fn unknown_policy(value: &str) -> AutohealError {
    AutohealError::InvalidConfig {
        key: "scheduler_policy".to_string(),
        reason: format!("unknown policy '{value}'"),
    }
}
