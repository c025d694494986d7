//! Automated detection-to-remediation pipeline.
//!
//! Anomaly events are matched against a playbook library, matched playbooks
//! become tasks on a bounded scheduler, and each task runs through an
//! idempotent executor. Outcomes feed playbook counters, an append-only
//! execution log, and a deduplicated, SLA-tracked alert lifecycle.
//!
//! ## Components
//!
//! - [`reactor::Reactor`] - rule-indexed matcher (event type, then keywords)
//! - [`executor::IdempotentExecutor`] - dedup window, preflight, run, classify, verify
//! - [`alerts::AlertLifecycle`] - `OPEN`/`ACK`/`RESOLVED` state machine with SLA flags
//! - [`scheduler::Scheduler`] - worker pool with pluggable ordering and retry backoff
//! - [`pipeline::Pipeline`] - wires the above and exposes the query surface
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use autoheal::{AutohealConfig, Event, Pipeline, Playbook, PlaybookSet, Severity};
//! use autoheal::clock::SystemClock;
//! use autoheal::executor::ShellRunner;
//!
//! let playbooks = PlaybookSet::new(vec![Playbook::new(
//!     "restart_worker",
//!     "process.worker_down",
//!     "systemctl restart worker",
//! )])?;
//! let pipeline = Pipeline::new(
//!     AutohealConfig::default(),
//!     playbooks,
//!     Arc::new(ShellRunner::new()),
//!     Arc::new(SystemClock),
//! )?;
//! pipeline
//!     .ingest(Event::new("process.worker_down", Severity::Crit, serde_json::json!({"host": "w-1"})))
//!     .await?;
//! pipeline.wait_idle().await;
//! ```

pub mod alerts;
pub mod clock;
pub mod config;
pub mod errors;
pub mod executor;
pub mod model;
pub mod pipeline;
pub mod reactor;
pub mod scheduler;
pub mod store;

pub use config::AutohealConfig;
pub use errors::{AutohealError, AutohealResult};
pub use model::{
    Alert, AlertStatus, AlertTransition, Event, ExecutionRecord, Playbook, PlaybookSet, Severity,
    Task, TerminalState,
};
pub use pipeline::{IngestOutcome, Pipeline, PipelineStats};
pub use scheduler::SchedulerPolicy;
