//! Action runners and preflight checks.
//!
//! The executor only talks to the [`ActionRunner`] and [`Preflight`] traits.
//! The default runner shells out with a hard deadline; on deadline the child
//! is killed and the attempt reported as timed out.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::scheduler::affinity::{self, CpuSet};

/// Diagnostic text kept per attempt.
const MAX_DETAIL_BYTES: usize = 4096;

/// What happened when an action ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutput {
    pub success: bool,
    pub timed_out: bool,
    /// Captured output or failure description
    pub detail: String,
}

impl RunOutput {
    #[must_use]
    pub fn succeeded(detail: impl Into<String>) -> Self {
        Self {
            success: true,
            timed_out: false,
            detail: detail.into(),
        }
    }

    #[must_use]
    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            timed_out: false,
            detail: detail.into(),
        }
    }

    #[must_use]
    pub fn timed_out(timeout: Duration) -> Self {
        Self {
            success: false,
            timed_out: true,
            detail: format!("timed out after {}s", timeout.as_secs_f64()),
        }
    }
}

/// Runs one command under a deadline.
#[async_trait]
pub trait ActionRunner: Send + Sync {
    async fn run(&self, command: &str, timeout: Duration, affinity: Option<&CpuSet>) -> RunOutput;
}

/// Checks whether the desired state already holds before acting.
#[async_trait]
pub trait Preflight: Send + Sync {
    /// `true` means nothing needs to run.
    async fn already_satisfied(&self) -> bool;

    fn describe(&self) -> String;
}

/// Runs commands through `sh -c`.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }
}

impl ShellRunner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different shell binary.
    #[must_use]
    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

#[async_trait]
impl ActionRunner for ShellRunner {
    async fn run(&self, command: &str, timeout: Duration, affinity: Option<&CpuSet>) -> RunOutput {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(set) = affinity {
            affinity::pin_on_exec(&mut cmd, set);
        }
        let child = cmd.spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to spawn '{}': {e}", self.shell);
                return RunOutput::failed(format!("failed to spawn {}: {e}", self.shell));
            }
        };

        // Dropping the future on deadline drops the child, which kills it
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                let mut detail = stderr.trim().to_string();
                if detail.is_empty() {
                    detail = stdout.trim().to_string();
                }
                if output.status.success() {
                    RunOutput::succeeded(truncate(&detail))
                } else {
                    let status = output
                        .status
                        .code()
                        .map_or_else(|| "killed by signal".to_string(), |c| format!("exit status {c}"));
                    RunOutput::failed(truncate(&format!("{status}: {detail}")))
                }
            }
            Ok(Err(e)) => RunOutput::failed(format!("failed to wait for command: {e}")),
            Err(_) => {
                debug!("Command exceeded {:?}, killed: {command}", timeout);
                RunOutput::timed_out(timeout)
            }
        }
    }
}

/// Preflight that is satisfied when a process matching `pattern` is alive.
#[derive(Debug, Clone)]
pub struct ProcessRunning {
    pattern: String,
}

impl ProcessRunning {
    #[must_use]
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
        }
    }
}

#[async_trait]
impl Preflight for ProcessRunning {
    async fn already_satisfied(&self) -> bool {
        // pgrep missing or erroring counts as "not running": the action proceeds
        match Command::new("pgrep")
            .args(["-f", &self.pattern])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
        {
            Ok(status) => status.success(),
            Err(e) => {
                debug!("pgrep unavailable ({e}), assuming '{}' is not running", self.pattern);
                false
            }
        }
    }

    fn describe(&self) -> String {
        format!("process matching '{}' is running", self.pattern)
    }
}

fn truncate(text: &str) -> String {
    if text.len() <= MAX_DETAIL_BYTES {
        return text.to_string();
    }
    let mut end = MAX_DETAIL_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated)", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shell_success_captures_output() {
        let out = ShellRunner::new()
            .run("echo healed", Duration::from_secs(5), None)
            .await;
        assert!(out.success);
        assert_eq!(out.detail, "healed");
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_shell_pins_action_to_hinted_cpu() {
        // First CPU this test process may use; usually 0
        let status = std::fs::read_to_string("/proc/self/status").unwrap();
        let first: String = status
            .lines()
            .find_map(|l| l.strip_prefix("Cpus_allowed_list:"))
            .unwrap()
            .trim()
            .chars()
            .take_while(char::is_ascii_digit)
            .collect();
        let set = CpuSet::parse_hint(&format!("cpu:{first}")).unwrap();
        let out = ShellRunner::new()
            .run(
                "grep Cpus_allowed_list /proc/self/status",
                Duration::from_secs(5),
                Some(&set),
            )
            .await;
        assert!(out.success, "{}", out.detail);
        let allowed = out.detail.split(':').nth(1).unwrap().trim();
        assert_eq!(allowed, first);
    }

    #[tokio::test]
    async fn test_shell_failure_reports_stderr() {
        let out = ShellRunner::new()
            .run("echo 'Permission denied' >&2; exit 3", Duration::from_secs(5), None)
            .await;
        assert!(!out.success);
        assert!(!out.timed_out);
        assert!(out.detail.starts_with("exit status 3"));
        assert!(out.detail.contains("Permission denied"));
    }

    #[tokio::test]
    async fn test_shell_timeout_kills() {
        let started = std::time::Instant::now();
        let out = ShellRunner::new()
            .run("sleep 5", Duration::from_millis(100), None)
            .await;
        assert!(out.timed_out);
        assert!(!out.success);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_missing_shell_fails_cleanly() {
        let out = ShellRunner::with_shell("/nonexistent/shell")
            .run("true", Duration::from_secs(1), None)
            .await;
        assert!(!out.success);
        assert!(out.detail.contains("failed to spawn"));
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        let long = "é".repeat(MAX_DETAIL_BYTES);
        let cut = truncate(&long);
        assert!(cut.ends_with("... (truncated)"));
        assert!(cut.len() <= MAX_DETAIL_BYTES + 16);
    }
}
