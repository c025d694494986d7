//! Alert lifecycle state machine.
//!
//! Repeated detections collapse onto one alert per fingerprint
//! (`rule_id + scope + day`). Legal transitions:
//!
//! ```text
//!   OPEN -> ACK        ack_alert
//!   ACK  -> OPEN       recurrence
//!   OPEN -> RESOLVED   resolve_alert / N consecutive recoveries
//!   ACK  -> RESOLVED   resolve_alert / N consecutive recoveries
//! ```
//!
//! Resolved alerts leave the live set and move to the archive. Every
//! transition is appended to the history log.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::{AutohealConfig, SlaHours};
use crate::errors::{AutohealError, AutohealResult};
use crate::model::{fingerprint, Alert, AlertStatus, AlertTransition, Severity};
use crate::store::AppendLog;

/// Alert counts for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AlertCounts {
    pub open: usize,
    pub acked: usize,
    pub resolved: usize,
    pub sla_breached: usize,
}

#[derive(Debug, Default)]
struct AlertBook {
    /// fingerprint -> live alert
    live: HashMap<String, Alert>,
    archive: Vec<Alert>,
}

impl AlertBook {
    fn live_by_id(&mut self, id: &str) -> Option<&mut Alert> {
        self.live.values_mut().find(|a| a.id == id)
    }

    fn archived_by_id(&self, id: &str) -> Option<&Alert> {
        self.archive.iter().rev().find(|a| a.id == id)
    }

    /// Move a live alert to the archive as `RESOLVED`.
    fn archive(&mut self, fingerprint: &str, now: DateTime<Utc>) -> Option<(Alert, AlertStatus)> {
        let mut alert = self.live.remove(fingerprint)?;
        let from = alert.status;
        alert.status = AlertStatus::Resolved;
        alert.resolved_at = Some(now);
        self.archive.push(alert.clone());
        Some((alert, from))
    }
}

/// Owns the live alert set and archive behind one lock.
pub struct AlertLifecycle {
    book: Mutex<AlertBook>,
    history: Arc<dyn AppendLog<AlertTransition>>,
    clock: Arc<dyn Clock>,
    sla: SlaHours,
    auto_resolve_count: u32,
}

impl AlertLifecycle {
    #[must_use]
    pub fn new(
        config: &AutohealConfig,
        history: Arc<dyn AppendLog<AlertTransition>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            book: Mutex::new(AlertBook::default()),
            history,
            clock,
            sla: config.sla_hours,
            auto_resolve_count: config.auto_resolve_count.max(1),
        }
    }

    /// Record a detection for `rule_id` on `scope`.
    ///
    /// Creates an `OPEN` alert, bumps the hit count of an open one, or
    /// reopens an acknowledged one.
    pub async fn open_alert(
        &self,
        rule_id: &str,
        severity: Severity,
        message: &str,
        scope: &str,
    ) -> Alert {
        let now = self.clock.now();
        let key = fingerprint(rule_id, scope, now);

        let (alert, transition) = {
            let mut book = self.book.lock().await;
            match book.live.get_mut(&key) {
                Some(alert) => {
                    let reopened = count_hit(alert, message, now);
                    (alert.clone(), reopened)
                }
                None => {
                    let alert = Alert::open(
                        rule_id,
                        scope,
                        severity,
                        message,
                        now,
                        self.sla.for_severity(severity),
                    );
                    book.live.insert(key, alert.clone());
                    let created = step(&alert, None, AlertStatus::Open, "detected", now);
                    (alert, Some(created))
                }
            }
        };

        self.log_hit(&alert, transition).await;
        alert
    }

    /// Count a repeat detection against today's live alert for `rule_id` on
    /// `scope`, reopening it if acknowledged. Never creates an alert.
    pub async fn bump_alert(&self, rule_id: &str, message: &str, scope: &str) -> Option<Alert> {
        let now = self.clock.now();
        let key = fingerprint(rule_id, scope, now);
        let (alert, transition) = {
            let mut book = self.book.lock().await;
            let alert = book.live.get_mut(&key)?;
            let reopened = count_hit(alert, message, now);
            (alert.clone(), reopened)
        };
        self.log_hit(&alert, transition).await;
        Some(alert)
    }

    async fn log_hit(&self, alert: &Alert, transition: Option<AlertTransition>) {
        match &transition {
            Some(t) if t.from.is_none() => info!(
                "Opened alert {} ({}) severity={} sla_deadline={}",
                alert.id, alert.fingerprint, alert.severity, alert.sla_deadline
            ),
            Some(_) => info!("Alert {} reopened by recurrence", alert.fingerprint),
            None => debug!("Alert {} hit #{}", alert.fingerprint, alert.hit_count),
        }
        if let Some(t) = transition {
            self.append_history(&t).await;
        }
    }

    /// Acknowledge an `OPEN` alert.
    pub async fn ack_alert(&self, alert_id: &str) -> AutohealResult<Alert> {
        let now = self.clock.now();
        let (alert, transition) = {
            let mut book = self.book.lock().await;
            let from = match book.live_by_id(alert_id) {
                Some(alert) => alert.status,
                None => return Err(Self::missing_or_resolved(&book, alert_id, AlertStatus::Ack)),
            };
            if !from.can_transition_to(AlertStatus::Ack) {
                return Err(invalid(alert_id, from, AlertStatus::Ack));
            }
            let alert = book
                .live_by_id(alert_id)
                .ok_or_else(|| not_found(alert_id))?;
            alert.status = AlertStatus::Ack;
            alert.acked_at = Some(now);
            let t = step(alert, Some(from), AlertStatus::Ack, "acknowledged", now);
            (alert.clone(), t)
        };

        info!("Alert {} acknowledged", alert.fingerprint);
        self.append_history(&transition).await;
        Ok(alert)
    }

    /// Count a recovery signal for `rule_id` on `scope`.
    ///
    /// After `auto_resolve_count` consecutive recoveries the alert resolves
    /// and is archived. Returns the updated alert, or `None` if no live alert
    /// matches.
    pub async fn record_recovery(&self, rule_id: &str, scope: &str) -> Option<Alert> {
        let now = self.clock.now();
        let today = fingerprint(rule_id, scope, now);

        let (alert, transition) = {
            let mut book = self.book.lock().await;
            // Prefer today's bucket, else the most recently hit live alert
            let key = if book.live.contains_key(&today) {
                today
            } else {
                book.live
                    .values()
                    .filter(|a| a.rule_id == rule_id && a.scope == scope)
                    .max_by_key(|a| a.last_hit)
                    .map(|a| a.fingerprint.clone())?
            };

            let alert = book.live.get_mut(&key)?;
            alert.recovery_streak += 1;
            if alert.recovery_streak < self.auto_resolve_count {
                debug!(
                    "Alert {} recovery {}/{}",
                    key, alert.recovery_streak, self.auto_resolve_count
                );
                return Some(alert.clone());
            }

            let (resolved, from) = book.archive(&key, now)?;
            let t = step(&resolved, Some(from), AlertStatus::Resolved, "auto_recovered", now);
            (resolved, t)
        };

        info!(
            "Alert {} auto-resolved after {} consecutive recoveries",
            alert.fingerprint, alert.recovery_streak
        );
        self.append_history(&transition).await;
        Some(alert)
    }

    /// Resolve an `OPEN` or `ACK` alert explicitly.
    pub async fn resolve_alert(&self, alert_id: &str, reason: &str) -> AutohealResult<Alert> {
        let now = self.clock.now();
        let (alert, transition) = {
            let mut book = self.book.lock().await;
            let key = match book.live_by_id(alert_id) {
                Some(alert) => alert.fingerprint.clone(),
                None => {
                    return Err(Self::missing_or_resolved(&book, alert_id, AlertStatus::Resolved))
                }
            };
            let (resolved, from) = book.archive(&key, now).ok_or_else(|| not_found(alert_id))?;
            let t = step(&resolved, Some(from), AlertStatus::Resolved, reason, now);
            (resolved, t)
        };

        info!("Alert {} resolved: {reason}", alert.fingerprint);
        self.append_history(&transition).await;
        Ok(alert)
    }

    /// Flag live alerts past their SLA deadline. Status is never changed.
    ///
    /// An alert still acknowledged after an ack before its deadline met its
    /// SLA and is not flagged; a recurrence that reopened it loses that
    /// exemption. Returns the alerts newly flagged by this call.
    pub async fn check_sla(&self) -> Vec<Alert> {
        let now = self.clock.now();
        let mut book = self.book.lock().await;
        let mut breached = Vec::new();
        for alert in book.live.values_mut() {
            if alert.sla_breached || !alert.is_overdue(now) {
                continue;
            }
            let acked_in_time = alert.status == AlertStatus::Ack
                && alert.acked_at.is_some_and(|at| at <= alert.sla_deadline);
            if acked_in_time {
                continue;
            }
            alert.sla_breached = true;
            warn!(
                "SLA breached for alert {} ({}, deadline {})",
                alert.fingerprint, alert.severity, alert.sla_deadline
            );
            breached.push(alert.clone());
        }
        breached
    }

    /// Live alerts, oldest first.
    pub async fn list_active(&self) -> Vec<Alert> {
        let book = self.book.lock().await;
        let mut alerts: Vec<Alert> = book.live.values().cloned().collect();
        alerts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        alerts
    }

    /// Resolved alerts in resolution order.
    pub async fn archived(&self) -> Vec<Alert> {
        self.book.lock().await.archive.clone()
    }

    /// Look up an alert by id in the live set, then the archive.
    pub async fn get(&self, alert_id: &str) -> Option<Alert> {
        let mut book = self.book.lock().await;
        if let Some(alert) = book.live_by_id(alert_id) {
            return Some(alert.clone());
        }
        book.archived_by_id(alert_id).cloned()
    }

    pub async fn counts(&self) -> AlertCounts {
        let book = self.book.lock().await;
        let mut counts = AlertCounts {
            resolved: book.archive.len(),
            ..AlertCounts::default()
        };
        for alert in book.live.values() {
            match alert.status {
                AlertStatus::Open => counts.open += 1,
                AlertStatus::Ack => counts.acked += 1,
                AlertStatus::Resolved => counts.resolved += 1,
            }
        }
        counts.sla_breached = book
            .live
            .values()
            .chain(book.archive.iter())
            .filter(|a| a.sla_breached)
            .count();
        counts
    }

    /// Transition history since `since`.
    pub async fn history_since(&self, since: DateTime<Utc>) -> AutohealResult<Vec<AlertTransition>> {
        self.history.since(since).await
    }

    fn missing_or_resolved(book: &AlertBook, alert_id: &str, to: AlertStatus) -> AutohealError {
        match book.archived_by_id(alert_id) {
            Some(alert) => invalid(alert_id, alert.status, to),
            None => not_found(alert_id),
        }
    }

    async fn append_history(&self, transition: &AlertTransition) {
        if let Err(e) = self.history.append(transition).await {
            warn!(
                "Failed to append alert transition for {} to {} log: {e}",
                transition.fingerprint,
                self.history.storage_type()
            );
        }
    }
}

/// Apply a repeat detection. Returns the `ACK -> OPEN` transition if the
/// hit reopened the alert.
fn count_hit(alert: &mut Alert, message: &str, now: DateTime<Utc>) -> Option<AlertTransition> {
    alert.hit_count += 1;
    alert.recovery_streak = 0;
    alert.last_hit = now;
    alert.message = message.to_string();
    (alert.status == AlertStatus::Ack).then(|| {
        alert.status = AlertStatus::Open;
        step(alert, Some(AlertStatus::Ack), AlertStatus::Open, "recurrence", now)
    })
}

fn step(
    alert: &Alert,
    from: Option<AlertStatus>,
    to: AlertStatus,
    reason: &str,
    now: DateTime<Utc>,
) -> AlertTransition {
    AlertTransition {
        fingerprint: alert.fingerprint.clone(),
        alert_id: alert.id.clone(),
        from,
        to,
        reason: reason.to_string(),
        timestamp: now,
    }
}

fn invalid(alert_id: &str, from: AlertStatus, to: AlertStatus) -> AutohealError {
    AutohealError::InvalidTransition {
        alert_id: alert_id.to_string(),
        from: from.to_string(),
        to: to.to_string(),
    }
}

fn not_found(alert_id: &str) -> AutohealError {
    AutohealError::AlertNotFound {
        alert_id: alert_id.to_string(),
    }
}
