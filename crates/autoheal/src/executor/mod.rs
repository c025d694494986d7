//! Idempotent executor.
//!
//! One entry point, [`IdempotentExecutor::execute`], which sequences:
//! 1. Idempotency guard (dedup window per command key)
//! 2. Preflight check
//! 3. Run with deadline
//! 4. Classify failures
//! 5. Verify declared success
//! 6. Append exactly one [`ExecutionRecord`]

pub mod classify;
pub mod guard;
pub mod runner;

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::AutohealConfig;
use crate::model::{reason, Action, ActionKind, ExecutionRecord, TerminalState};
use crate::scheduler::affinity::CpuSet;
use crate::store::AppendLog;

pub use classify::{classify_failure, Classification};
pub use guard::{Admission, DedupGuard};
pub use runner::{ActionRunner, Preflight, ProcessRunning, RunOutput, ShellRunner};

/// Everything needed to run one action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionSpec {
    pub kind: ActionKind,
    pub command: String,
    pub timeout: Duration,
    pub verify_command: Option<String>,
    pub affinity: Option<CpuSet>,
}

impl ActionSpec {
    /// Build from a playbook action.
    #[must_use]
    pub fn from_action(action: &Action) -> Self {
        Self {
            kind: action.kind,
            command: action.command.clone(),
            timeout: Duration::from_secs(action.timeout_sec),
            verify_command: action.verify_command.clone(),
            affinity: None,
        }
    }

    /// Shorthand for an `auto` action.
    #[must_use]
    pub fn auto(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            kind: ActionKind::Auto,
            command: command.into(),
            timeout,
            verify_command: None,
            affinity: None,
        }
    }

    #[must_use]
    pub fn with_verify(mut self, verify_command: impl Into<String>) -> Self {
        self.verify_command = Some(verify_command.into());
        self
    }

    #[must_use]
    pub fn with_affinity(mut self, affinity: Option<CpuSet>) -> Self {
        self.affinity = affinity;
        self
    }
}

/// Runs actions at most once per command key per dedup window.
pub struct IdempotentExecutor {
    guard: DedupGuard,
    runner: Arc<dyn ActionRunner>,
    log: Arc<dyn AppendLog<ExecutionRecord>>,
    clock: Arc<dyn Clock>,
}

impl IdempotentExecutor {
    #[must_use]
    pub fn new(
        config: &AutohealConfig,
        runner: Arc<dyn ActionRunner>,
        log: Arc<dyn AppendLog<ExecutionRecord>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            guard: DedupGuard::new(config.dedup_window(), config.dedup_purge_factor),
            runner,
            log,
            clock,
        }
    }

    /// Execute `action` under `command_key` and record the outcome.
    ///
    /// Never fails: every path ends in exactly one terminal state.
    pub async fn execute(
        &self,
        command_key: &str,
        action: &ActionSpec,
        preflight: Option<&dyn Preflight>,
    ) -> ExecutionRecord {
        let started = Instant::now();
        let record = self.attempt(command_key, action, preflight, started).await;

        if let Err(e) = self.log.append(&record).await {
            warn!(
                "Failed to append execution record for {command_key} to {} log: {e}",
                self.log.storage_type()
            );
        }
        record
    }

    async fn attempt(
        &self,
        command_key: &str,
        action: &ActionSpec,
        preflight: Option<&dyn Preflight>,
        started: Instant,
    ) -> ExecutionRecord {
        let finish = |state: TerminalState, reason_code: &str, detail: String| {
            ExecutionRecord::new(
                command_key,
                state,
                reason_code,
                detail,
                started.elapsed().as_millis() as u64,
                self.clock.now(),
            )
        };

        match action.kind {
            ActionKind::Notify => {
                return finish(TerminalState::Success, reason::NOTIFY_ONLY, String::new());
            }
            ActionKind::Auto | ActionKind::Confirm => {}
        }

        // 1. Idempotency guard
        let stamped_at = match self.guard.try_acquire(command_key, self.clock.now()).await {
            Admission::Admitted { at } => at,
            Admission::Suppressed { last_run } => {
                debug!("Suppressed {command_key}: last ran at {last_run}");
                return finish(
                    TerminalState::NoopDedup,
                    reason::DEDUP_WINDOW,
                    format!("last executed at {}", last_run.to_rfc3339()),
                );
            }
        };

        // 2. Preflight
        if let Some(check) = preflight {
            if check.already_satisfied().await {
                debug!("Preflight satisfied for {command_key}: {}", check.describe());
                return finish(
                    TerminalState::NoopAlreadyRunning,
                    reason::ALREADY_RUNNING,
                    check.describe(),
                );
            }
        }

        // 3. Run
        let output = self
            .runner
            .run(&action.command, action.timeout, action.affinity.as_ref())
            .await;

        // 4. Classify
        if !output.success {
            let fallback = if output.timed_out {
                reason::TIMEOUT
            } else {
                reason::TRANSIENT
            };
            let verdict = classify::classify_with_fallback(&output.detail, fallback);
            if verdict.is_retryable() {
                // The attempt had no lasting effect; let a retry through the guard
                self.guard.release(command_key, stamped_at).await;
            }
            warn!(
                "Action {command_key} failed ({}, {}): {}",
                verdict.state, verdict.reason, output.detail
            );
            return finish(verdict.state, verdict.reason, output.detail);
        }

        // 5. Verify
        if let Some(verify) = &action.verify_command {
            let check = self
                .runner
                .run(verify, action.timeout, action.affinity.as_ref())
                .await;
            if !check.success {
                warn!("Verification failed for {command_key}: {}", check.detail);
                return finish(
                    TerminalState::FailedNonRetryable,
                    reason::VERIFICATION_FAILED,
                    check.detail,
                );
            }
        }

        info!("Action {command_key} succeeded");
        finish(TerminalState::Success, reason::EXECUTED, output.detail)
    }
}
