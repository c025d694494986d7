//! Playbooks: trigger conditions paired with remediation actions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use super::event::Severity;
use crate::errors::{AutohealError, AutohealResult};

/// How a playbook's action is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    /// Run the command without asking
    Auto,
    /// Park the task until an operator confirms it
    Confirm,
    /// Raise an alert only, never run anything
    Notify,
}

impl ActionKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Confirm => "confirm",
            Self::Notify => "notify",
        }
    }

    /// Whether this kind runs a command.
    #[must_use]
    pub fn runs_command(self) -> bool {
        matches!(self, Self::Auto | Self::Confirm)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Risk level of a playbook's action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Risk {
    #[default]
    Low,
    Medium,
    High,
}

/// Conditions that select a playbook for an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    /// Exact event types that select this playbook
    #[serde(default)]
    pub event_types: BTreeSet<String>,
    /// Case-insensitive substrings of the payload text
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Severities accepted; empty accepts all
    #[serde(default)]
    pub severity_filter: BTreeSet<Severity>,
}

impl Trigger {
    /// Whether `severity` passes the filter.
    #[must_use]
    pub fn accepts(&self, severity: Severity) -> bool {
        self.severity_filter.is_empty() || self.severity_filter.contains(&severity)
    }
}

fn default_timeout_sec() -> u64 {
    60
}

/// The remediation a playbook performs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub kind: ActionKind,
    /// Shell command to run (ignored for `notify`)
    #[serde(default)]
    pub command: String,
    #[serde(default = "default_timeout_sec")]
    pub timeout_sec: u64,
    /// Command that must succeed after the action for it to count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify_command: Option<String>,
    /// Skip the action when a process matching this pattern is already running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preflight_process: Option<String>,
}

fn default_enabled() -> bool {
    true
}

/// A named remediation rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Playbook {
    pub id: String,
    pub name: String,
    pub trigger: Trigger,
    pub action: Action,
    #[serde(default)]
    pub cooldown_minutes: u64,
    #[serde(default)]
    pub risk: Risk,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub success_count: u64,
    #[serde(default)]
    pub fail_count: u64,
}

impl Playbook {
    /// Create an enabled `auto` playbook triggered by a single event type.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        event_type: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            trigger: Trigger {
                event_types: BTreeSet::from([event_type.into()]),
                ..Trigger::default()
            },
            action: Action {
                kind: ActionKind::Auto,
                command: command.into(),
                timeout_sec: default_timeout_sec(),
                verify_command: None,
                preflight_process: None,
            },
            cooldown_minutes: 0,
            risk: Risk::Low,
            enabled: true,
            success_count: 0,
            fail_count: 0,
        }
    }

    /// Check the playbook is usable.
    pub fn validate(&self) -> AutohealResult<()> {
        let invalid = |reason: &str| AutohealError::InvalidPlaybook {
            playbook_id: self.id.clone(),
            reason: reason.to_string(),
        };

        if self.id.trim().is_empty() {
            return Err(invalid("id must not be empty"));
        }
        // Ids lead alert fingerprints and command keys, which are ':'-joined
        if self.id.contains(':') {
            return Err(invalid("id must not contain ':'"));
        }
        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if self.trigger.event_types.is_empty() && self.trigger.keywords.is_empty() {
            return Err(invalid("trigger needs at least one event type or keyword"));
        }
        if self.trigger.keywords.iter().any(|k| k.trim().is_empty()) {
            return Err(invalid("keywords must not be blank"));
        }
        if self.action.kind.runs_command() && self.action.command.trim().is_empty() {
            return Err(invalid("auto/confirm actions need a command"));
        }
        if self.action.timeout_sec == 0 {
            return Err(invalid("timeout_sec must be at least 1"));
        }
        Ok(())
    }

    /// Fraction of terminal outcomes that succeeded, if any were recorded.
    #[must_use]
    pub fn success_rate(&self) -> Option<f64> {
        let total = self.success_count + self.fail_count;
        (total > 0).then(|| self.success_count as f64 / total as f64)
    }
}

/// Fields an external policy tuner may rewrite.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_minutes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<Risk>,
}

impl PolicyUpdate {
    /// Apply the update in place.
    pub fn apply(&self, playbook: &mut Playbook) {
        if let Some(cooldown) = self.cooldown_minutes {
            playbook.cooldown_minutes = cooldown;
        }
        if let Some(enabled) = self.enabled {
            playbook.enabled = enabled;
        }
        if let Some(risk) = self.risk {
            playbook.risk = risk;
        }
    }
}

/// Ordered collection of playbooks with unique ids.
///
/// Order matters: it is the tie-break when several playbooks match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlaybookSet {
    playbooks: Vec<Playbook>,
}

impl PlaybookSet {
    /// Build a set, validating each playbook and rejecting duplicate ids.
    pub fn new(playbooks: Vec<Playbook>) -> AutohealResult<Self> {
        let mut seen = BTreeSet::new();
        for playbook in &playbooks {
            playbook.validate()?;
            if !seen.insert(playbook.id.as_str()) {
                return Err(AutohealError::DuplicatePlaybook {
                    playbook_id: playbook.id.clone(),
                });
            }
        }
        Ok(Self { playbooks })
    }

    /// Load a JSON array of playbooks from disk.
    pub fn load(path: &Path) -> AutohealResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| AutohealError::Storage {
            reason: format!("failed to read {}: {e}", path.display()),
        })?;
        let playbooks: Vec<Playbook> = serde_json::from_str(&content)?;
        Self::new(playbooks)
    }

    #[must_use]
    pub fn iter(&self) -> std::slice::Iter<'_, Playbook> {
        self.playbooks.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.playbooks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.playbooks.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Playbook> {
        self.playbooks.iter().find(|p| p.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Playbook> {
        self.playbooks.iter_mut().find(|p| p.id == id)
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<Playbook> {
        self.playbooks
    }
}
