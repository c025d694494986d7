//! Autoheal CLI
//!
//! Replays anomaly events through the remediation pipeline, validates
//! playbook files, and explains failure classification.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::Serialize;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use autoheal::clock::SystemClock;
use autoheal::executor::{classify_failure, ActionRunner, RunOutput, ShellRunner};
use autoheal::scheduler::affinity::CpuSet;
use autoheal::{
    AutohealConfig, Event, IngestOutcome, Pipeline, PipelineStats, PlaybookSet, SchedulerPolicy,
};

/// Detection-to-remediation pipeline
#[derive(Parser)]
#[command(name = "autoheal")]
#[command(about = "Matches anomaly events to playbooks and runs idempotent remediations")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (json or text)
    #[arg(long, default_value = "text", global = true)]
    format: OutputFormat,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Clone, Copy, Default, clap::ValueEnum)]
enum OutputFormat {
    Json,
    #[default]
    Text,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSONL event file through the pipeline
    Run {
        /// Playbook file (JSON array)
        #[arg(long, env = "AUTOHEAL_PLAYBOOKS")]
        playbooks: PathBuf,

        /// Event file, one JSON event per line
        #[arg(long)]
        events: PathBuf,

        /// Pipeline config file (JSON)
        #[arg(long, env = "AUTOHEAL_CONFIG")]
        config: Option<PathBuf>,

        /// Scheduler policy (priority, fifo, sjf, round_robin, edf, hybrid[:a:b])
        #[arg(long, env = "AUTOHEAL_POLICY")]
        policy: Option<SchedulerPolicy>,

        /// Worker pool size
        #[arg(long, env = "AUTOHEAL_MAX_CONCURRENT")]
        max_concurrent: Option<usize>,

        /// Dedup window in seconds
        #[arg(long)]
        dedup_window_sec: Option<u64>,

        /// Record actions without running them
        #[arg(long)]
        dry_run: bool,
    },
    /// Validate a playbook file
    Validate {
        /// Playbook file (JSON array)
        #[arg(long)]
        playbooks: PathBuf,
    },
    /// Show how a failure message would be classified
    Classify {
        /// Diagnostic text from a failed action
        text: String,
    },
}

/// Runner used by `--dry-run`: every action succeeds without side effects.
struct DryRunner;

#[async_trait]
impl ActionRunner for DryRunner {
    async fn run(&self, command: &str, _timeout: Duration, _affinity: Option<&CpuSet>) -> RunOutput {
        RunOutput::succeeded(format!("dry run: {command}"))
    }
}

#[derive(Serialize)]
struct EventLine<'a> {
    line: usize,
    event_id: &'a str,
    event_type: &'a str,
    #[serde(flatten)]
    outcome: &'a IngestOutcome,
}

fn init_tracing(verbose: bool, json: bool) {
    let default = if verbose { "autoheal=debug" } else { "autoheal=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    match cli.command {
        Commands::Run {
            playbooks,
            events,
            config,
            policy,
            max_concurrent,
            dedup_window_sec,
            dry_run,
        } => {
            let mut config = match config {
                Some(path) => AutohealConfig::load(&path)
                    .with_context(|| format!("Failed to load config {}", path.display()))?,
                None => AutohealConfig::default(),
            };
            if let Some(policy) = policy {
                config.scheduler_policy = policy;
            }
            if let Some(max_concurrent) = max_concurrent {
                config.max_concurrent = max_concurrent;
            }
            if let Some(window) = dedup_window_sec {
                config.dedup_window_sec = window;
            }
            config.validate().context("Invalid configuration")?;
            run(config, &playbooks, &events, dry_run, cli.format).await
        }
        Commands::Validate { playbooks } => validate(&playbooks, cli.format),
        Commands::Classify { text } => {
            let verdict = classify_failure(&text);
            match cli.format {
                OutputFormat::Json => println!(
                    "{}",
                    serde_json::json!({
                        "terminal_state": verdict.state,
                        "reason": verdict.reason,
                        "retryable": verdict.is_retryable(),
                    })
                ),
                OutputFormat::Text => {
                    let state = if verdict.is_retryable() {
                        verdict.state.to_string().yellow()
                    } else {
                        verdict.state.to_string().red()
                    };
                    println!("{state} ({})", verdict.reason);
                }
            }
            Ok(())
        }
    }
}

async fn run(
    config: AutohealConfig,
    playbooks: &Path,
    events: &Path,
    dry_run: bool,
    format: OutputFormat,
) -> Result<()> {
    let playbooks = PlaybookSet::load(playbooks)
        .with_context(|| format!("Failed to load playbooks {}", playbooks.display()))?;
    let runner: Arc<dyn ActionRunner> = if dry_run {
        Arc::new(DryRunner)
    } else {
        Arc::new(ShellRunner::new())
    };
    let pipeline = Pipeline::new(config, playbooks, runner, Arc::new(SystemClock))
        .context("Failed to build pipeline")?;

    let file = tokio::fs::File::open(events)
        .await
        .with_context(|| format!("Failed to open events file {}", events.display()))?;
    let mut lines = BufReader::new(file).lines();
    let mut line_no = 0;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        let event: Event = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(e) => {
                warn!("Skipping line {line_no}: not an event ({e})");
                continue;
            }
        };
        match pipeline.ingest(event.clone()).await {
            Ok(outcome) => print_outcome(line_no, &event, &outcome, format)?,
            Err(e) => warn!("Line {line_no}: event {} rejected: {e}", event.id),
        }
    }

    debug!("Replayed {line_no} lines, waiting for scheduler to drain");
    pipeline.wait_idle().await;

    let breached = pipeline.check_sla().await;
    for alert in &breached {
        warn!("SLA breached: {} ({})", alert.fingerprint, alert.severity);
    }

    let stats = pipeline.get_stats().await;
    pipeline.shutdown().await;
    print_stats(&stats, format)
}

fn print_outcome(
    line: usize,
    event: &Event,
    outcome: &IngestOutcome,
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string(&EventLine {
                line,
                event_id: &event.id,
                event_type: &event.event_type,
                outcome,
            })?;
            println!("{json}");
            std::io::stdout().flush()?;
        }
        OutputFormat::Text => {
            let summary = match outcome {
                IngestOutcome::Ignored => "ignored".dimmed(),
                IngestOutcome::Scheduled { task_id } => format!("scheduled {task_id}").green(),
                IngestOutcome::AwaitingConfirmation { task_id } => {
                    format!("awaiting confirmation {task_id}").yellow()
                }
                IngestOutcome::Notified { alert_id } => format!("alert {alert_id}").yellow(),
                IngestOutcome::CoolingDown => "cooling down".cyan(),
                IngestOutcome::Recovered => "recovery".green(),
            };
            println!("{line:>5} {} {summary}", event.event_type.bold());
        }
    }
    Ok(())
}

fn print_stats(stats: &PipelineStats, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(stats)?),
        OutputFormat::Text => {
            println!();
            println!("{}", "Pipeline summary".cyan().bold());
            println!("  events ingested: {}", stats.events_ingested);
            for (state, count) in &stats.executions {
                println!("  {state}: {count}");
            }
            println!(
                "  tasks: {} submitted, {} completed, {} failed, {} retries, peak {} running",
                stats.scheduler.submitted,
                stats.scheduler.completed,
                stats.scheduler.failed,
                stats.scheduler.retried,
                stats.scheduler.peak_running
            );
            println!(
                "  alerts: {} open, {} acked, {} resolved, {} SLA breached",
                stats.alerts.open, stats.alerts.acked, stats.alerts.resolved, stats.alerts.sla_breached
            );
            if stats.pending_confirmations > 0 {
                println!(
                    "  {} task(s) awaiting confirmation",
                    stats.pending_confirmations.to_string().yellow()
                );
            }
            for playbook in &stats.playbooks {
                let rate = playbook
                    .success_rate
                    .map_or_else(|| "-".to_string(), |r| format!("{:.0}%", r * 100.0));
                println!(
                    "  {} {} ok / {} failed ({rate})",
                    playbook.id.bold(),
                    playbook.success_count,
                    playbook.fail_count
                );
            }
        }
    }
    Ok(())
}

fn validate(path: &Path, format: OutputFormat) -> Result<()> {
    let playbooks = PlaybookSet::load(path)
        .with_context(|| format!("Invalid playbook file {}", path.display()))?;
    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({
                "valid": true,
                "playbooks": playbooks.iter().map(|p| &p.id).collect::<Vec<_>>(),
            })
        ),
        OutputFormat::Text => {
            println!(
                "{} {} playbook(s) in {}",
                "✓".green(),
                playbooks.len(),
                path.display()
            );
            for playbook in playbooks.iter() {
                println!(
                    "  {} [{}] {}",
                    playbook.id.bold(),
                    playbook.action.kind,
                    playbook.name
                );
            }
        }
    }
    Ok(())
}
