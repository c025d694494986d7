//! Pipeline orchestrator.
//!
//! Wires the stages together for one event at a time:
//!
//! ```text
//!   Event -> Reactor -> (cooldown) -> Task -> Scheduler -> IdempotentExecutor
//!                                                  |
//!                                  terminal outcome -> counters, AlertLifecycle
//! ```
//!
//! Every component is constructed once here and shared through `Arc`s; nothing
//! is global.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::alerts::{AlertCounts, AlertLifecycle};
use crate::clock::Clock;
use crate::config::AutohealConfig;
use crate::errors::{AutohealError, AutohealResult};
use crate::executor::{ActionRunner, ActionSpec, IdempotentExecutor, Preflight, ProcessRunning};
use crate::model::{
    priority_for, reason, Action, ActionKind, Alert, AlertTransition, Event, ExecutionRecord,
    Playbook, PlaybookSet, PolicyUpdate, Risk, Severity, Task, TerminalState,
};
use crate::reactor::Reactor;
use crate::scheduler::affinity::CpuSet;
use crate::scheduler::{Scheduler, SchedulerStats, TaskHandler};
use crate::store::{AppendLog, JsonlLog, MemoryLog};

/// Payload key an event may use to request CPU placement.
const AFFINITY_KEY: &str = "affinity";

/// What `ingest` did with an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    /// No playbook matched
    Ignored,
    Scheduled { task_id: String },
    /// `confirm` playbook parked until an operator decides
    AwaitingConfirmation { task_id: String },
    /// `notify` playbook opened or hit an alert
    Notified { alert_id: String },
    /// Same playbook already triggered for this scope within its cooldown
    CoolingDown,
    /// Healthy reading forwarded as a recovery signal
    Recovered,
}

/// Per-playbook counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybookStats {
    pub id: String,
    pub enabled: bool,
    pub success_count: u64,
    pub fail_count: u64,
    pub success_rate: Option<f64>,
}

/// Snapshot for reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineStats {
    pub events_ingested: u64,
    /// Execution attempts keyed by terminal state
    pub executions: BTreeMap<String, u64>,
    pub alerts: AlertCounts,
    pub scheduler: SchedulerStats,
    pub pending_confirmations: usize,
    pub playbooks: Vec<PlaybookStats>,
}

/// Everything a worker needs to run a task, frozen at match time so a
/// playbook reload does not change work already in flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TaskContext {
    playbook_id: String,
    scope: String,
    event_id: String,
    severity: Severity,
    message: String,
    risk: Risk,
    action: Action,
}

impl TaskContext {
    fn command_key(&self) -> String {
        format!("{}:{}", self.playbook_id, self.scope)
    }
}

/// Scheduler-facing side of the pipeline.
struct Remediator {
    reactor: Arc<Reactor>,
    executor: Arc<IdempotentExecutor>,
    alerts: Arc<AlertLifecycle>,
    execution_log: Arc<dyn AppendLog<ExecutionRecord>>,
    clock: Arc<dyn Clock>,
    executions: Mutex<BTreeMap<String, u64>>,
}

impl Remediator {
    async fn count(&self, state: TerminalState) {
        *self
            .executions
            .lock()
            .await
            .entry(state.as_str().to_string())
            .or_default() += 1;
    }

    async fn reject_malformed(&self, task: &Task, detail: String) -> ExecutionRecord {
        warn!("Task {} carries no usable context: {detail}", task.task_id);
        let record = ExecutionRecord::new(
            &task.task_id,
            TerminalState::FailedNonRetryable,
            reason::INVALID_TASK,
            detail,
            0,
            self.clock.now(),
        );
        if let Err(e) = self.execution_log.append(&record).await {
            warn!("Failed to append execution record: {e}");
        }
        record
    }
}

#[async_trait]
impl TaskHandler for Remediator {
    async fn handle(&self, task: &Task) -> ExecutionRecord {
        let ctx: TaskContext = match serde_json::from_value(task.payload.clone()) {
            Ok(ctx) => ctx,
            Err(e) => {
                let record = self.reject_malformed(task, e.to_string()).await;
                self.count(record.terminal_state).await;
                return record;
            }
        };

        let affinity = task.affinity_hint.as_deref().and_then(CpuSet::parse_hint);
        let mut spec = ActionSpec::from_action(&ctx.action).with_affinity(affinity);
        spec.timeout = Duration::from_secs(task.timeout_sec.max(1));
        let preflight = ctx.action.preflight_process.clone().map(ProcessRunning::new);

        let record = self
            .executor
            .execute(
                &ctx.command_key(),
                &spec,
                preflight.as_ref().map(|p| p as &dyn Preflight),
            )
            .await;
        self.count(record.terminal_state).await;
        record
    }

    async fn on_terminal(&self, task: &Task, record: &ExecutionRecord) {
        let Ok(ctx) = serde_json::from_value::<TaskContext>(task.payload.clone()) else {
            return;
        };

        // No-ops did not run anything and do not count for or against a playbook
        if !record.terminal_state.is_noop() {
            let success = !record.terminal_state.is_failure();
            if let Err(e) = self.reactor.record_outcome(&ctx.playbook_id, success).await {
                debug!("Outcome for {} not counted: {e}", ctx.playbook_id);
            }
        }

        if record.terminal_state.is_failure() {
            let message = format!(
                "remediation '{}' failed on {}: {} ({}) after {} attempt(s): {}",
                ctx.playbook_id,
                ctx.scope,
                record.terminal_state,
                record.reason_code,
                task.retry_count + 1,
                record.detail
            );
            self.alerts
                .open_alert(&ctx.playbook_id, ctx.severity, &message, &ctx.scope)
                .await;
        }
    }
}

/// The remediation pipeline and its query surface.
pub struct Pipeline {
    config: AutohealConfig,
    clock: Arc<dyn Clock>,
    reactor: Arc<Reactor>,
    alerts: Arc<AlertLifecycle>,
    remediator: Arc<Remediator>,
    scheduler: Scheduler,
    execution_log: Arc<dyn AppendLog<ExecutionRecord>>,
    /// (playbook, scope) -> end of cooldown
    cooldowns: Mutex<HashMap<(String, String), DateTime<Utc>>>,
    pending: Mutex<Vec<Task>>,
    ingested: AtomicU64,
}

impl Pipeline {
    /// Build a pipeline with logs chosen from the config: JSONL files when
    /// paths are set, in memory otherwise. Must be called inside a tokio runtime.
    pub fn new(
        config: AutohealConfig,
        playbooks: PlaybookSet,
        runner: Arc<dyn ActionRunner>,
        clock: Arc<dyn Clock>,
    ) -> AutohealResult<Self> {
        let execution_log: Arc<dyn AppendLog<ExecutionRecord>> = match &config.execution_log {
            Some(path) => Arc::new(JsonlLog::new(path)),
            None => Arc::new(MemoryLog::new()),
        };
        let alert_history: Arc<dyn AppendLog<AlertTransition>> = match &config.alert_history {
            Some(path) => Arc::new(JsonlLog::new(path)),
            None => Arc::new(MemoryLog::new()),
        };
        Self::with_logs(config, playbooks, runner, clock, execution_log, alert_history)
    }

    /// Build a pipeline over caller-provided logs.
    pub fn with_logs(
        config: AutohealConfig,
        playbooks: PlaybookSet,
        runner: Arc<dyn ActionRunner>,
        clock: Arc<dyn Clock>,
        execution_log: Arc<dyn AppendLog<ExecutionRecord>>,
        alert_history: Arc<dyn AppendLog<AlertTransition>>,
    ) -> AutohealResult<Self> {
        config.validate()?;

        let reactor = Arc::new(Reactor::new(playbooks));
        let alerts = Arc::new(AlertLifecycle::new(&config, alert_history, Arc::clone(&clock)));
        let executor = Arc::new(IdempotentExecutor::new(
            &config,
            runner,
            Arc::clone(&execution_log),
            Arc::clone(&clock),
        ));
        let remediator = Arc::new(Remediator {
            reactor: Arc::clone(&reactor),
            executor,
            alerts: Arc::clone(&alerts),
            execution_log: Arc::clone(&execution_log),
            clock: Arc::clone(&clock),
            executions: Mutex::new(BTreeMap::new()),
        });
        let handler: Arc<dyn TaskHandler> = remediator.clone();
        let scheduler = Scheduler::new(&config, handler, Arc::clone(&clock));

        info!(
            "Pipeline ready: dedup_window={}s max_concurrent={} policy={}",
            config.dedup_window_sec, config.max_concurrent, config.scheduler_policy
        );

        Ok(Self {
            config,
            clock,
            reactor,
            alerts,
            remediator,
            scheduler,
            execution_log,
            cooldowns: Mutex::new(HashMap::new()),
            pending: Mutex::new(Vec::new()),
            ingested: AtomicU64::new(0),
        })
    }

    #[must_use]
    pub fn config(&self) -> &AutohealConfig {
        &self.config
    }

    /// Route one event through matching, cooldown, and scheduling.
    pub async fn ingest(&self, event: Event) -> AutohealResult<IngestOutcome> {
        event.validate()?;
        self.ingested.fetch_add(1, Ordering::Relaxed);

        let Some(hit) = self.reactor.match_event(&event).await else {
            debug!("Event {} ({}) matched no playbook", event.id, event.event_type);
            return Ok(IngestOutcome::Ignored);
        };
        let playbook = hit.playbook;
        let scope = event.scope();

        if event.ok {
            let alert = self.alerts.record_recovery(&playbook.id, &scope).await;
            debug!(
                "Recovery for {} on {scope} (live alert: {})",
                playbook.id,
                alert.is_some()
            );
            return Ok(IngestOutcome::Recovered);
        }

        let message = format!("{} on {scope}: {}", event.event_type, event.payload_text());

        if playbook.action.kind == ActionKind::Notify {
            let alert = self
                .alerts
                .open_alert(&playbook.id, event.severity, &message, &scope)
                .await;
            return Ok(IngestOutcome::Notified { alert_id: alert.id });
        }

        if self.in_cooldown(&playbook, &scope).await {
            info!("Playbook {} cooling down for {scope}, recording hit only", playbook.id);
            self.alerts.bump_alert(&playbook.id, &message, &scope).await;
            return Ok(IngestOutcome::CoolingDown);
        }

        let task = self.build_task(&playbook, &event, scope, message)?;
        let task_id = task.task_id.clone();

        if playbook.action.kind == ActionKind::Confirm {
            info!(
                "Playbook {} needs confirmation, parked task {task_id} (risk {:?})",
                playbook.id, playbook.risk
            );
            self.pending.lock().await.push(task);
            return Ok(IngestOutcome::AwaitingConfirmation { task_id });
        }

        self.scheduler.submit(task).await?;
        Ok(IngestOutcome::Scheduled { task_id })
    }

    /// Check and stamp the cooldown for `(playbook, scope)`.
    ///
    /// Entries map to the end of their cooldown; expired ones are purged on
    /// every check.
    async fn in_cooldown(&self, playbook: &Playbook, scope: &str) -> bool {
        let now = self.clock.now();
        let mut cooldowns = self.cooldowns.lock().await;
        cooldowns.retain(|_, until| *until > now);

        let key = (playbook.id.clone(), scope.to_string());
        if cooldowns.contains_key(&key) {
            return true;
        }
        if playbook.cooldown_minutes > 0 {
            let minutes = playbook.cooldown_minutes.min(u64::from(u32::MAX));
            let cooldown =
                ChronoDuration::minutes(i64::try_from(minutes).unwrap_or(i64::from(u32::MAX)));
            cooldowns.insert(key, now + cooldown);
        }
        false
    }

    fn build_task(
        &self,
        playbook: &Playbook,
        event: &Event,
        scope: String,
        message: String,
    ) -> AutohealResult<Task> {
        let ctx = TaskContext {
            playbook_id: playbook.id.clone(),
            scope,
            event_id: event.id.clone(),
            severity: event.severity,
            message,
            risk: playbook.risk,
            action: playbook.action.clone(),
        };
        let mut task = Task::new(
            playbook.id.clone(),
            priority_for(event.severity),
            playbook.action.timeout_sec,
            serde_json::to_value(&ctx)?,
        )
        .with_max_retries(self.config.max_retries);
        if let Some(Value::String(hint)) = event.payload.get(AFFINITY_KEY) {
            task = task.with_affinity(hint.clone());
        }
        Ok(task)
    }

    /// Submit a task parked for confirmation.
    pub async fn confirm(&self, task_id: &str) -> AutohealResult<String> {
        let task = self.take_pending(task_id).await?;
        info!("Task {task_id} confirmed");
        self.scheduler.submit(task).await
    }

    /// Drop a task parked for confirmation.
    pub async fn reject(&self, task_id: &str) -> AutohealResult<Task> {
        let task = self.take_pending(task_id).await?;
        info!("Task {task_id} rejected");
        Ok(task)
    }

    pub async fn pending_confirmations(&self) -> Vec<Task> {
        self.pending.lock().await.clone()
    }

    async fn take_pending(&self, task_id: &str) -> AutohealResult<Task> {
        let mut pending = self.pending.lock().await;
        let pos = pending
            .iter()
            .position(|t| t.task_id == task_id)
            .ok_or_else(|| AutohealError::TaskNotFound {
                task_id: task_id.to_string(),
            })?;
        Ok(pending.remove(pos))
    }

    /// Replace the playbook set. Tasks already queued keep their snapshot.
    pub async fn reload_playbooks(&self, playbooks: PlaybookSet) {
        self.reactor.reload(playbooks).await;
    }

    pub async fn update_policy(
        &self,
        playbook_id: &str,
        update: &PolicyUpdate,
    ) -> AutohealResult<Playbook> {
        self.reactor.update_policy(playbook_id, update).await
    }

    pub async fn set_enabled(&self, playbook_id: &str, enabled: bool) -> AutohealResult<()> {
        self.reactor.set_enabled(playbook_id, enabled).await
    }

    pub async fn playbooks(&self) -> Vec<Playbook> {
        self.reactor.playbooks().await
    }

    pub async fn list_active_alerts(&self) -> Vec<Alert> {
        self.alerts.list_active().await
    }

    pub async fn get_alert(&self, alert_id: &str) -> Option<Alert> {
        self.alerts.get(alert_id).await
    }

    pub async fn ack_alert(&self, alert_id: &str) -> AutohealResult<Alert> {
        self.alerts.ack_alert(alert_id).await
    }

    pub async fn resolve_alert(&self, alert_id: &str, reason: &str) -> AutohealResult<Alert> {
        self.alerts.resolve_alert(alert_id, reason).await
    }

    pub async fn record_recovery(&self, rule_id: &str, scope: &str) -> Option<Alert> {
        self.alerts.record_recovery(rule_id, scope).await
    }

    /// Flag SLA breaches; returns the alerts newly flagged.
    pub async fn check_sla(&self) -> Vec<Alert> {
        self.alerts.check_sla().await
    }

    pub async fn execution_log_since(
        &self,
        since: DateTime<Utc>,
    ) -> AutohealResult<Vec<ExecutionRecord>> {
        self.execution_log.since(since).await
    }

    pub async fn alert_history_since(
        &self,
        since: DateTime<Utc>,
    ) -> AutohealResult<Vec<AlertTransition>> {
        self.alerts.history_since(since).await
    }

    pub async fn get_stats(&self) -> PipelineStats {
        let playbooks = self
            .reactor
            .playbooks()
            .await
            .into_iter()
            .map(|p| PlaybookStats {
                success_rate: p.success_rate(),
                id: p.id,
                enabled: p.enabled,
                success_count: p.success_count,
                fail_count: p.fail_count,
            })
            .collect();

        PipelineStats {
            events_ingested: self.ingested.load(Ordering::Relaxed),
            executions: self.remediator.executions.lock().await.clone(),
            alerts: self.alerts.counts().await,
            scheduler: self.scheduler.stats().await,
            pending_confirmations: self.pending.lock().await.len(),
            playbooks,
        }
    }

    /// Wait until no task is queued, running, or backing off.
    pub async fn wait_idle(&self) {
        self.scheduler.wait_idle().await;
    }

    /// Drain the scheduler and stop its workers.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::executor::RunOutput;
    use crate::model::AlertStatus;
    use chrono::TimeZone;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    /// Runner that counts calls and always succeeds.
    #[derive(Default)]
    struct CountingRunner {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ActionRunner for CountingRunner {
        async fn run(&self, _command: &str, _timeout: Duration, _affinity: Option<&CpuSet>) -> RunOutput {
            self.calls.fetch_add(1, Ordering::SeqCst);
            RunOutput::succeeded("ok")
        }
    }

    /// Runner whose every action is denied.
    struct DeniedRunner;

    #[async_trait]
    impl ActionRunner for DeniedRunner {
        async fn run(&self, _command: &str, _timeout: Duration, _affinity: Option<&CpuSet>) -> RunOutput {
            RunOutput::failed("Permission denied")
        }
    }

    fn setup_with(playbooks: Vec<Playbook>, runner: Arc<dyn ActionRunner>) -> (Pipeline, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 5, 10, 12, 0, 0).unwrap());
        let pipeline = Pipeline::new(
            AutohealConfig::default(),
            PlaybookSet::new(playbooks).unwrap(),
            runner,
            Arc::new(clock.clone()),
        )
        .unwrap();
        (pipeline, clock)
    }

    fn setup(playbooks: Vec<Playbook>) -> (Pipeline, Arc<CountingRunner>, ManualClock) {
        let runner = Arc::new(CountingRunner::default());
        let (pipeline, clock) = setup_with(playbooks, runner.clone());
        (pipeline, runner, clock)
    }

    fn worker_down(host: &str) -> Event {
        Event::new("process.worker_down", Severity::Crit, json!({"host": host}))
    }

    #[tokio::test]
    async fn test_unmatched_event_is_ignored() {
        let (pipeline, runner, _) = setup(vec![Playbook::new("restart", "process.worker_down", "true")]);
        let outcome = pipeline
            .ingest(Event::new("resource.disk_full", Severity::Warn, json!({})))
            .await
            .unwrap();
        assert_eq!(outcome, IngestOutcome::Ignored);
        pipeline.wait_idle().await;
        assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_event_rejected() {
        let (pipeline, _, _) = setup(vec![Playbook::new("restart", "process.worker_down", "true")]);
        let err = pipeline
            .ingest(Event::new("NotDotted", Severity::Warn, json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, AutohealError::InvalidEvent { .. }));
    }

    #[tokio::test]
    async fn test_matched_event_runs_and_counts_success() {
        let (pipeline, runner, _) = setup(vec![Playbook::new("restart", "process.worker_down", "true")]);
        let outcome = pipeline.ingest(worker_down("w-1")).await.unwrap();
        assert!(matches!(outcome, IngestOutcome::Scheduled { .. }));
        pipeline.wait_idle().await;

        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
        let stats = pipeline.get_stats().await;
        assert_eq!(stats.executions.get("SUCCESS"), Some(&1));
        assert_eq!(stats.playbooks[0].success_count, 1);
        assert!(pipeline.list_active_alerts().await.is_empty());

        let log = pipeline.execution_log_since(DateTime::<Utc>::MIN_UTC).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].command_key, "restart:w-1");
    }

    #[tokio::test]
    async fn test_cooldown_suppresses_scheduling() {
        let mut playbook = Playbook::new("restart", "process.worker_down", "true");
        playbook.cooldown_minutes = 10;
        let (pipeline, runner, clock) = setup(vec![playbook]);

        assert!(matches!(
            pipeline.ingest(worker_down("w-1")).await.unwrap(),
            IngestOutcome::Scheduled { .. }
        ));
        clock.advance(ChronoDuration::minutes(2));
        assert_eq!(
            pipeline.ingest(worker_down("w-1")).await.unwrap(),
            IngestOutcome::CoolingDown
        );
        // Other scopes are independent
        assert!(matches!(
            pipeline.ingest(worker_down("w-2")).await.unwrap(),
            IngestOutcome::Scheduled { .. }
        ));
        pipeline.wait_idle().await;

        assert_eq!(runner.calls.load(Ordering::SeqCst), 2);
        // The first remediation succeeded, so the repeat has no alert to count against
        assert!(pipeline.list_active_alerts().await.is_empty());

        clock.advance(ChronoDuration::minutes(9));
        assert!(matches!(
            pipeline.ingest(worker_down("w-1")).await.unwrap(),
            IngestOutcome::Scheduled { .. }
        ));
        pipeline.wait_idle().await;
    }

    #[tokio::test]
    async fn test_cooldown_hit_bumps_failure_alert() {
        let mut playbook = Playbook::new("restart", "process.worker_down", "true");
        playbook.cooldown_minutes = 10;
        let (pipeline, clock) = setup_with(vec![playbook], Arc::new(DeniedRunner));

        pipeline.ingest(worker_down("w-1")).await.unwrap();
        pipeline.wait_idle().await;
        let alerts = pipeline.list_active_alerts().await;
        assert_eq!(alerts.len(), 1);
        let deadline = alerts[0].sla_deadline;

        clock.advance(ChronoDuration::minutes(3));
        assert_eq!(
            pipeline.ingest(worker_down("w-1")).await.unwrap(),
            IngestOutcome::CoolingDown
        );
        let alerts = pipeline.list_active_alerts().await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].hit_count, 2);
        assert_eq!(alerts[0].sla_deadline, deadline);
    }

    #[tokio::test]
    async fn test_expired_cooldowns_are_purged() {
        let mut playbook = Playbook::new("restart", "process.worker_down", "true");
        playbook.cooldown_minutes = 5;
        let (pipeline, _, clock) = setup(vec![playbook]);

        for host in ["w-1", "w-2", "w-3"] {
            pipeline.ingest(worker_down(host)).await.unwrap();
        }
        assert_eq!(pipeline.cooldowns.lock().await.len(), 3);

        clock.advance(ChronoDuration::minutes(6));
        pipeline.ingest(worker_down("w-4")).await.unwrap();
        let cooldowns = pipeline.cooldowns.lock().await;
        assert_eq!(cooldowns.len(), 1);
        assert!(cooldowns.contains_key(&("restart".to_string(), "w-4".to_string())));
        drop(cooldowns);
        pipeline.wait_idle().await;
    }

    #[tokio::test]
    async fn test_notify_opens_alert_without_running() {
        let mut playbook = Playbook::new("disk_notice", "resource.disk_full", "");
        playbook.action.kind = ActionKind::Notify;
        let (pipeline, runner, _) = setup(vec![playbook]);

        let event = Event::new("resource.disk_full", Severity::Warn, json!({"host": "db-1"}));
        let IngestOutcome::Notified { alert_id } = pipeline.ingest(event).await.unwrap() else {
            panic!("expected a notification");
        };
        pipeline.wait_idle().await;

        assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
        let alert = pipeline.get_alert(&alert_id).await.unwrap();
        assert_eq!(alert.status, AlertStatus::Open);
        assert_eq!(alert.scope, "db-1");
    }

    #[tokio::test]
    async fn test_confirm_and_reject() {
        let mut playbook = Playbook::new("failover", "db.primary_down", "true");
        playbook.action.kind = ActionKind::Confirm;
        let (pipeline, runner, _) = setup(vec![playbook]);

        let event = || Event::new("db.primary_down", Severity::Crit, json!({"host": "db-1"}));
        let IngestOutcome::AwaitingConfirmation { task_id } = pipeline.ingest(event()).await.unwrap()
        else {
            panic!("expected a parked task");
        };
        assert_eq!(pipeline.pending_confirmations().await.len(), 1);
        pipeline.wait_idle().await;
        assert_eq!(runner.calls.load(Ordering::SeqCst), 0);

        pipeline.confirm(&task_id).await.unwrap();
        pipeline.wait_idle().await;
        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            pipeline.confirm(&task_id).await,
            Err(AutohealError::TaskNotFound { .. })
        ));

        let IngestOutcome::AwaitingConfirmation { task_id } = pipeline.ingest(event()).await.unwrap()
        else {
            panic!("expected a parked task");
        };
        pipeline.reject(&task_id).await.unwrap();
        assert!(pipeline.pending_confirmations().await.is_empty());
        assert_eq!(pipeline.get_stats().await.pending_confirmations, 0);
    }

    #[tokio::test]
    async fn test_healthy_event_is_recovery_signal() {
        let mut playbook = Playbook::new("disk_notice", "resource.disk_full", "");
        playbook.action.kind = ActionKind::Notify;
        let (pipeline, _, _) = setup(vec![playbook]);

        let event = || Event::new("resource.disk_full", Severity::Warn, json!({"host": "db-1"}));
        pipeline.ingest(event()).await.unwrap();
        assert_eq!(
            pipeline.ingest(event().healthy()).await.unwrap(),
            IngestOutcome::Recovered
        );
        assert_eq!(pipeline.list_active_alerts().await.len(), 1);
        pipeline.ingest(event().healthy()).await.unwrap();
        assert!(pipeline.list_active_alerts().await.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_playbook_stops_matching() {
        let (pipeline, _, _) = setup(vec![Playbook::new("restart", "process.worker_down", "true")]);
        pipeline.set_enabled("restart", false).await.unwrap();
        assert_eq!(
            pipeline.ingest(worker_down("w-1")).await.unwrap(),
            IngestOutcome::Ignored
        );
        assert!(matches!(
            pipeline.set_enabled("missing", true).await,
            Err(AutohealError::PlaybookNotFound { .. })
        ));
    }
}
