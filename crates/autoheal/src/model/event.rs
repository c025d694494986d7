//! Anomaly events pushed in by external sensors.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::errors::{AutohealError, AutohealResult};

/// Dotted lowercase event type, e.g. `resource.cpu_spike`.
static EVENT_TYPE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9_]+(\.[a-z0-9_]+)+$").unwrap());

/// Payload keys consulted, in order, to derive an event's scope.
const SCOPE_KEYS: [&str; 3] = ["scope", "host", "target"];

/// Event severity.
///
/// Deserializes through [`FromStr`], so any casing and the `WARNING` /
/// `CRITICAL` aliases are accepted on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE", try_from = "String")]
pub enum Severity {
    Info,
    Warn,
    Crit,
}

impl Severity {
    /// Wire name (`INFO`, `WARN`, `CRIT`).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Crit => "CRIT",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = AutohealError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INFO" => Ok(Self::Info),
            "WARN" | "WARNING" => Ok(Self::Warn),
            "CRIT" | "CRITICAL" => Ok(Self::Crit),
            _ => Err(AutohealError::InvalidSeverity {
                value: s.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for Severity {
    type Error = AutohealError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

fn new_event_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// A raw anomaly event. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique event id
    #[serde(default = "new_event_id")]
    pub id: String,
    /// Dotted event type
    #[serde(rename = "type")]
    pub event_type: String,
    /// Severity reported by the sensor
    pub severity: Severity,
    /// Sensor-specific fields
    #[serde(default)]
    pub payload: Map<String, Value>,
    /// When the sensor observed the condition
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Whether the probe reported a healthy state
    #[serde(default)]
    pub ok: bool,
}

impl Event {
    /// Create an event stamped with the current time.
    ///
    /// Non-object payloads are stored under a single `value` key.
    #[must_use]
    pub fn new(event_type: impl Into<String>, severity: Severity, payload: Value) -> Self {
        let payload = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        Self {
            id: new_event_id(),
            event_type: event_type.into(),
            severity,
            payload,
            timestamp: Utc::now(),
            ok: false,
        }
    }

    /// Override the observation time.
    #[must_use]
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Mark the event as a healthy probe result.
    #[must_use]
    pub fn healthy(mut self) -> Self {
        self.ok = true;
        self
    }

    /// Check the event is well formed.
    pub fn validate(&self) -> AutohealResult<()> {
        if self.id.trim().is_empty() {
            return Err(AutohealError::InvalidEvent {
                event_id: self.id.clone(),
                reason: "id must not be empty".to_string(),
            });
        }
        if !EVENT_TYPE_PATTERN.is_match(&self.event_type) {
            return Err(AutohealError::InvalidEvent {
                event_id: self.id.clone(),
                reason: format!("type '{}' is not a dotted lowercase name", self.event_type),
            });
        }
        Ok(())
    }

    /// Deterministic `key=value` rendering of the payload (keys sorted).
    #[must_use]
    pub fn payload_text(&self) -> String {
        let mut keys: Vec<&String> = self.payload.keys().collect();
        keys.sort();
        keys.into_iter()
            .map(|key| {
                let value = match &self.payload[key] {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                format!("{key}={value}")
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Scope the event applies to (`scope`, `host` or `target` payload key).
    #[must_use]
    pub fn scope(&self) -> String {
        SCOPE_KEYS
            .iter()
            .find_map(|key| match self.payload.get(*key) {
                Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
                Some(Value::Number(n)) => Some(n.to_string()),
                _ => None,
            })
            .unwrap_or_else(|| "global".to_string())
    }
}
