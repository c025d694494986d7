//! Failure classification.
//!
//! Diagnostic text is checked against an ordered list of non-retryable
//! patterns. The first hit decides the reason code; no hit means the failure
//! is treated as transient.

use regex::Regex;
use std::sync::LazyLock;

use crate::model::{reason, TerminalState};

/// Ordered non-retryable patterns with their reason codes.
static NON_RETRYABLE_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (
            Regex::new(r"(?i)permission\s*(error|denied)|operation not permitted|\bEACCES\b|\bEPERM\b|access is denied|must be root").unwrap(),
            "permission_denied",
        ),
        (
            Regex::new(r"(?i)no such file or directory|FileNotFoundError|ModuleNotFoundError|No module named|ImportError|cannot find module|\bENOENT\b|does not exist").unwrap(),
            "missing_resource",
        ),
        (
            Regex::new(r"(?i)SyntaxError|syntax error|IndentationError|unexpected token|parse error|unexpected EOF").unwrap(),
            "syntax_error",
        ),
        (
            Regex::new(r"(?im)command not found|: not found$|is not recognized as an internal or external command|executable file not found").unwrap(),
            "command_not_found",
        ),
        (
            Regex::new(r"(?i)environment variable \S+ (is )?not set|missing required env|failed to initiali[sz]e|sdk (init|initialization) (error|failed)|api key (is )?(missing|not set|invalid)|credentials? not found").unwrap(),
            "environment_init",
        ),
    ]
});

/// Verdict for one failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub state: TerminalState,
    pub reason: &'static str,
}

impl Classification {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.state == TerminalState::FailedRetryable
    }
}

/// Classify failure text; `fallback` is the reason used when nothing matches.
#[must_use]
pub fn classify_with_fallback(detail: &str, fallback: &'static str) -> Classification {
    for (pattern, reason) in NON_RETRYABLE_PATTERNS.iter() {
        if pattern.is_match(detail) {
            return Classification {
                state: TerminalState::FailedNonRetryable,
                reason,
            };
        }
    }
    Classification {
        state: TerminalState::FailedRetryable,
        reason: fallback,
    }
}

/// Classify failure text, treating unmatched failures as transient.
#[must_use]
pub fn classify_failure(detail: &str) -> Classification {
    classify_with_fallback(detail, reason::TRANSIENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_error_is_non_retryable() {
        let c = classify_failure("Traceback ...\nPermissionError: [Errno 13] Permission denied: '/var/run/x.pid'");
        assert_eq!(c.state, TerminalState::FailedNonRetryable);
        assert_eq!(c.reason, "permission_denied");
    }

    #[test]
    fn test_connection_timeout_is_retryable() {
        let c = classify_failure("curl: (28) connection timed out after 5000 ms");
        assert_eq!(c.state, TerminalState::FailedRetryable);
        assert_eq!(c.reason, "transient");
        assert!(c.is_retryable());
    }

    #[test]
    fn test_missing_module() {
        let c = classify_failure("ModuleNotFoundError: No module named 'psutil'");
        assert_eq!(c.reason, "missing_resource");
    }

    #[test]
    fn test_syntax_error() {
        let c = classify_failure("sh: 1: Syntax error: \"(\" unexpected");
        assert_eq!(c.reason, "syntax_error");
    }

    #[test]
    fn test_command_not_found() {
        assert_eq!(
            classify_failure("bash: systemctll: command not found").reason,
            "command_not_found"
        );
        assert_eq!(classify_failure("sh: 1: frobnicate: not found").reason, "command_not_found");
    }

    #[test]
    fn test_environment_init() {
        let c = classify_failure("error: environment variable OPENAI_API_KEY not set");
        assert_eq!(c.reason, "environment_init");
        let c = classify_failure("SDK initialization failed: bad region");
        assert_eq!(c.reason, "environment_init");
    }

    #[test]
    fn test_order_prefers_permission_over_missing() {
        let c = classify_failure("open /etc/shadow: permission denied (no such file or directory fallback)");
        assert_eq!(c.reason, "permission_denied");
    }

    #[test]
    fn test_fallback_reason() {
        let c = classify_with_fallback("timed out after 30s", reason::TIMEOUT);
        assert_eq!(c.state, TerminalState::FailedRetryable);
        assert_eq!(c.reason, "timeout");
    }
}
