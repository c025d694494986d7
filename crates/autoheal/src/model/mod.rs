//! Core records: events, playbooks, alerts, tasks and execution records.

pub mod alert;
pub mod event;
pub mod playbook;
pub mod record;
pub mod task;

pub use alert::{fingerprint, Alert, AlertStatus, AlertTransition};
pub use event::{Event, Severity};
pub use playbook::{Action, ActionKind, Playbook, PlaybookSet, PolicyUpdate, Risk, Trigger};
pub use record::{reason, ExecutionRecord, TerminalState};
pub use task::{priority_for, Task};
