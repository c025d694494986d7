//! End-to-end pipeline behaviour with a scripted action runner.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use autoheal::clock::ManualClock;
use autoheal::executor::{ActionRunner, RunOutput};
use autoheal::model::ActionKind;
use autoheal::scheduler::affinity::CpuSet;
use autoheal::{
    AlertStatus, AutohealConfig, AutohealError, Event, IngestOutcome, Pipeline, Playbook,
    PlaybookSet, SchedulerPolicy, Severity, TerminalState,
};

/// Replays queued outputs, then succeeds. Tracks concurrency.
#[derive(Default)]
struct ScriptedRunner {
    script: Mutex<VecDeque<RunOutput>>,
    calls: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
    delay: Duration,
    commands: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    fn with_script(outputs: Vec<RunOutput>) -> Self {
        Self {
            script: Mutex::new(outputs.into()),
            ..Self::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ActionRunner for ScriptedRunner {
    async fn run(&self, command: &str, _timeout: Duration, _affinity: Option<&CpuSet>) -> RunOutput {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.commands.lock().unwrap().push(command.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| RunOutput::succeeded("ok"))
    }
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 5, 10, 9, 0, 0).unwrap()
}

fn config() -> AutohealConfig {
    AutohealConfig {
        backoff_base_sec: 0.01,
        backoff_max_sec: 0.05,
        ..AutohealConfig::default()
    }
}

fn build(
    config: AutohealConfig,
    playbooks: Vec<Playbook>,
    runner: &Arc<ScriptedRunner>,
) -> (Pipeline, ManualClock) {
    let clock = ManualClock::new(start());
    let runner: Arc<dyn ActionRunner> = runner.clone();
    let pipeline = Pipeline::new(
        config,
        PlaybookSet::new(playbooks).unwrap(),
        runner,
        Arc::new(clock.clone()),
    )
    .unwrap();
    (pipeline, clock)
}

fn restart_worker() -> Playbook {
    Playbook::new("restart_worker", "process.worker_down", "systemctl restart worker")
}

fn worker_down(host: &str) -> Event {
    Event::new("process.worker_down", Severity::Crit, json!({"host": host}))
}

#[tokio::test]
async fn test_dedup_window_allows_one_execution() {
    let runner = Arc::new(ScriptedRunner::default());
    let (pipeline, clock) = build(config(), vec![restart_worker()], &runner);

    pipeline.ingest(worker_down("w-1")).await.unwrap();
    pipeline.wait_idle().await;
    clock.advance(ChronoDuration::seconds(30));
    pipeline.ingest(worker_down("w-1")).await.unwrap();
    pipeline.wait_idle().await;

    assert_eq!(runner.calls(), 1);
    let log = pipeline.execution_log_since(start()).await.unwrap();
    let states: Vec<TerminalState> = log.iter().map(|r| r.terminal_state).collect();
    assert_eq!(states, vec![TerminalState::Success, TerminalState::NoopDedup]);

    clock.advance(ChronoDuration::seconds(31));
    pipeline.ingest(worker_down("w-1")).await.unwrap();
    pipeline.wait_idle().await;
    assert_eq!(runner.calls(), 2);

    // Dedup no-ops are not held against the playbook
    let stats = pipeline.get_stats().await;
    assert_eq!(stats.playbooks[0].success_count, 2);
    assert_eq!(stats.playbooks[0].fail_count, 0);
    assert_eq!(stats.executions.get("NOOP_DEDUP"), Some(&1));
}

#[tokio::test]
async fn test_transient_failure_retried_until_success() {
    let runner = Arc::new(ScriptedRunner::with_script(vec![
        RunOutput::failed("exit status 7: connection refused"),
        RunOutput::failed("exit status 7: connection refused"),
    ]));
    let (pipeline, _) = build(config(), vec![restart_worker()], &runner);

    pipeline.ingest(worker_down("w-1")).await.unwrap();
    pipeline.wait_idle().await;

    assert_eq!(runner.calls(), 3);
    let stats = pipeline.get_stats().await;
    assert_eq!(stats.scheduler.retried, 2);
    assert_eq!(stats.scheduler.completed, 1);
    assert_eq!(stats.executions.get("FAILED_RETRYABLE"), Some(&2));
    assert_eq!(stats.playbooks[0].success_count, 1);
    assert!(pipeline.list_active_alerts().await.is_empty());
}

#[tokio::test]
async fn test_non_retryable_failure_opens_alert() {
    let runner = Arc::new(ScriptedRunner::with_script(vec![RunOutput::failed(
        "exit status 1: Failed to restart worker.service: Access denied; Permission denied",
    )]));
    let (pipeline, _) = build(config(), vec![restart_worker()], &runner);

    pipeline.ingest(worker_down("w-1")).await.unwrap();
    pipeline.wait_idle().await;

    assert_eq!(runner.calls(), 1);
    let alerts = pipeline.list_active_alerts().await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].rule_id, "restart_worker");
    assert_eq!(alerts[0].scope, "w-1");
    assert_eq!(alerts[0].severity, Severity::Crit);
    assert!(alerts[0].message.contains("permission_denied"));

    let stats = pipeline.get_stats().await;
    assert_eq!(stats.scheduler.retried, 0);
    assert_eq!(stats.playbooks[0].fail_count, 1);
}

#[tokio::test]
async fn test_retries_exhausted_reports_one_alert_hit() {
    let failures = (0..4)
        .map(|_| RunOutput::failed("503 service unavailable"))
        .collect();
    let runner = Arc::new(ScriptedRunner::with_script(failures));
    let cfg = AutohealConfig {
        max_retries: 3,
        ..config()
    };
    let (pipeline, _) = build(cfg, vec![restart_worker()], &runner);

    pipeline.ingest(worker_down("w-1")).await.unwrap();
    pipeline.wait_idle().await;

    assert_eq!(runner.calls(), 4);
    let alerts = pipeline.list_active_alerts().await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].hit_count, 1);
    assert_eq!(pipeline.get_stats().await.scheduler.failed, 1);
}

#[tokio::test]
async fn test_alert_ack_and_auto_resolve_via_recovery_events() {
    let runner = Arc::new(ScriptedRunner::with_script(vec![RunOutput::failed(
        "bash: systemctl: command not found",
    )]));
    let (pipeline, _) = build(config(), vec![restart_worker()], &runner);

    pipeline.ingest(worker_down("w-1")).await.unwrap();
    pipeline.wait_idle().await;
    let alert = pipeline.list_active_alerts().await.remove(0);

    let acked = pipeline.ack_alert(&alert.id).await.unwrap();
    assert_eq!(acked.status, AlertStatus::Ack);

    let healthy = || worker_down("w-1").healthy();
    assert_eq!(pipeline.ingest(healthy()).await.unwrap(), IngestOutcome::Recovered);
    assert_eq!(pipeline.list_active_alerts().await.len(), 1);
    assert_eq!(pipeline.ingest(healthy()).await.unwrap(), IngestOutcome::Recovered);
    assert!(pipeline.list_active_alerts().await.is_empty());

    let resolved = pipeline.get_alert(&alert.id).await.unwrap();
    assert_eq!(resolved.status, AlertStatus::Resolved);
    assert!(matches!(
        pipeline.ack_alert(&alert.id).await,
        Err(AutohealError::InvalidTransition { .. })
    ));

    let history = pipeline.alert_history_since(start()).await.unwrap();
    let steps: Vec<(Option<AlertStatus>, AlertStatus)> =
        history.iter().map(|t| (t.from, t.to)).collect();
    assert_eq!(
        steps,
        vec![
            (None, AlertStatus::Open),
            (Some(AlertStatus::Open), AlertStatus::Ack),
            (Some(AlertStatus::Ack), AlertStatus::Resolved),
        ]
    );
}

#[tokio::test]
async fn test_sla_breach_surfaces_in_stats() {
    let mut notify = Playbook::new("disk_full", "resource.disk_full", "");
    notify.action.kind = ActionKind::Notify;
    let runner = Arc::new(ScriptedRunner::default());
    let (pipeline, clock) = build(config(), vec![notify], &runner);

    let event = Event::new("resource.disk_full", Severity::Crit, json!({"host": "db-1", "used": 97}));
    pipeline.ingest(event).await.unwrap();

    clock.advance(ChronoDuration::minutes(61));
    let breached = pipeline.check_sla().await;
    assert_eq!(breached.len(), 1);
    assert_eq!(breached[0].status, AlertStatus::Open);

    let stats = pipeline.get_stats().await;
    assert_eq!(stats.alerts.sla_breached, 1);
    assert_eq!(stats.alerts.open, 1);
    assert_eq!(runner.calls(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pipeline_respects_max_concurrent() {
    let runner = Arc::new(ScriptedRunner {
        delay: Duration::from_millis(20),
        ..ScriptedRunner::default()
    });
    let cfg = AutohealConfig {
        max_concurrent: 3,
        scheduler_policy: SchedulerPolicy::Fifo,
        ..config()
    };
    let (pipeline, _) = build(cfg, vec![restart_worker()], &runner);

    for i in 0..20 {
        pipeline.ingest(worker_down(&format!("w-{i}"))).await.unwrap();
    }
    pipeline.wait_idle().await;

    assert_eq!(runner.calls(), 20);
    assert!(runner.peak.load(Ordering::SeqCst) <= 3);
    assert!(pipeline.get_stats().await.scheduler.peak_running <= 3);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_keyword_match_runs_playbook_command() {
    let mut oom = Playbook::new("oom_restart", "unused.type", "systemctl restart api");
    oom.trigger.event_types.clear();
    oom.trigger.keywords = vec!["out of memory".to_string()];
    let runner = Arc::new(ScriptedRunner::default());
    let (pipeline, _) = build(config(), vec![oom], &runner);

    let event = Event::new(
        "log.kernel",
        Severity::Crit,
        json!({"host": "api-1", "msg": "Out of memory: Killed process 1234"}),
    );
    assert!(matches!(
        pipeline.ingest(event).await.unwrap(),
        IngestOutcome::Scheduled { .. }
    ));
    pipeline.wait_idle().await;
    assert_eq!(
        *runner.commands.lock().unwrap(),
        vec!["systemctl restart api".to_string()]
    );
}

#[tokio::test]
async fn test_jsonl_logs_persist_records() {
    let dir = tempfile::tempdir().unwrap();
    let exec_path = dir.path().join("executions.jsonl");
    let history_path = dir.path().join("alerts.jsonl");
    let cfg = AutohealConfig {
        execution_log: Some(exec_path.clone()),
        alert_history: Some(history_path.clone()),
        ..config()
    };
    let runner = Arc::new(ScriptedRunner::with_script(vec![RunOutput::failed(
        "ModuleNotFoundError: No module named 'psutil'",
    )]));
    let (pipeline, _) = build(cfg, vec![restart_worker()], &runner);

    pipeline.ingest(worker_down("w-1")).await.unwrap();
    pipeline.wait_idle().await;

    let exec_lines = std::fs::read_to_string(&exec_path).unwrap();
    assert_eq!(exec_lines.lines().count(), 1);
    assert!(exec_lines.contains("FAILED_NON_RETRYABLE"));
    assert!(exec_lines.contains("missing_resource"));

    let history = std::fs::read_to_string(&history_path).unwrap();
    assert_eq!(history.lines().count(), 1);

    let records = pipeline.execution_log_since(start()).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].command_key, "restart_worker:w-1");
}

#[tokio::test]
async fn test_reload_swaps_playbooks() {
    let runner = Arc::new(ScriptedRunner::default());
    let (pipeline, _) = build(config(), vec![restart_worker()], &runner);

    pipeline
        .reload_playbooks(
            PlaybookSet::new(vec![Playbook::new(
                "clean_tmp",
                "resource.disk_full",
                "rm -rf /tmp/cache",
            )])
            .unwrap(),
        )
        .await;

    assert_eq!(
        pipeline.ingest(worker_down("w-1")).await.unwrap(),
        IngestOutcome::Ignored
    );
    let disk = Event::new("resource.disk_full", Severity::Warn, json!({"host": "db-1"}));
    assert!(matches!(
        pipeline.ingest(disk).await.unwrap(),
        IngestOutcome::Scheduled { .. }
    ));
    pipeline.wait_idle().await;
    assert_eq!(runner.calls(), 1);
}
