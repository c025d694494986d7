//! Policy-ordered task queue.
//!
//! Ordered policies keep one list and pick the entry with the lowest key
//! vector at pop time, so aging is applied against the current instant.
//! Ties fall back to submission sequence, which keeps dequeue order
//! deterministic. Round-robin keeps one FIFO lane per task kind.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

use super::policy::{compare_keys, OrderKey, SchedulerPolicy};
use crate::model::Task;

/// A task waiting for a worker.
#[derive(Debug, Clone)]
pub struct QueuedTask {
    pub task: Task,
    /// Monotonic submission sequence
    pub seq: u64,
    pub enqueued_at: Instant,
    pub submitted_at: DateTime<Utc>,
}

impl QueuedTask {
    fn aging_steps(&self, now: Instant, interval: Duration) -> i128 {
        let waited = now.saturating_duration_since(self.enqueued_at);
        if interval.is_zero() {
            return 0;
        }
        i128::try_from(waited.as_millis() / interval.as_millis().max(1)).unwrap_or(i128::MAX)
    }

    fn key(&self, key: OrderKey, now: Instant, aging_interval: Duration) -> i128 {
        let steps = if key.ages() {
            self.aging_steps(now, aging_interval)
        } else {
            0
        };
        match key {
            OrderKey::Priority => i128::from(self.task.priority).saturating_sub(steps),
            OrderKey::Fifo => i128::from(self.seq),
            OrderKey::ShortestJobFirst => {
                // One step is worth one aging interval of estimated run time
                let step_ms = i128::try_from(aging_interval.as_millis()).unwrap_or(i128::MAX);
                i128::from(self.task.effective_estimate_ms())
                    .saturating_sub(steps.saturating_mul(step_ms))
            }
            OrderKey::EarliestDeadlineFirst => {
                i128::from(self.task.effective_deadline(self.submitted_at).timestamp_millis())
            }
        }
    }

    fn keys(&self, keys: &[OrderKey], now: Instant, aging_interval: Duration) -> Vec<i128> {
        let mut out: Vec<i128> = keys.iter().map(|k| self.key(*k, now, aging_interval)).collect();
        out.push(i128::from(self.seq));
        out
    }
}

/// Queue of pending tasks ordered by a [`SchedulerPolicy`].
#[derive(Debug)]
pub struct TaskQueue {
    policy: SchedulerPolicy,
    keys: Vec<OrderKey>,
    aging_interval: Duration,
    quantum: u32,
    next_seq: u64,
    entries: Vec<QueuedTask>,
    /// Round-robin lanes in rotation order; every lane is non-empty
    lanes: VecDeque<(String, VecDeque<QueuedTask>)>,
    /// Dispatches served from the front lane in the current turn
    served: u32,
}

impl TaskQueue {
    #[must_use]
    pub fn new(policy: SchedulerPolicy, aging_interval: Duration, quantum: u32) -> Self {
        Self {
            policy,
            keys: policy.keys(),
            aging_interval,
            quantum: quantum.max(1),
            next_seq: 0,
            entries: Vec::new(),
            lanes: VecDeque::new(),
            served: 0,
        }
    }

    #[must_use]
    pub fn policy(&self) -> SchedulerPolicy {
        self.policy
    }

    #[must_use]
    pub fn len(&self) -> usize {
        if self.policy.is_round_robin() {
            self.lanes.iter().map(|(_, lane)| lane.len()).sum()
        } else {
            self.entries.len()
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enqueue `task`. Returns its sequence number.
    pub fn push(&mut self, task: Task, now: Instant, submitted_at: DateTime<Utc>) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        let entry = QueuedTask {
            task,
            seq,
            enqueued_at: now,
            submitted_at,
        };

        if self.policy.is_round_robin() {
            match self.lanes.iter_mut().find(|(kind, _)| *kind == entry.task.kind) {
                Some((_, lane)) => lane.push_back(entry),
                None => {
                    let kind = entry.task.kind.clone();
                    self.lanes.push_back((kind, VecDeque::from([entry])));
                }
            }
        } else {
            self.entries.push(entry);
        }
        seq
    }

    /// Remove and return the next task under the policy at instant `now`.
    pub fn pop(&mut self, now: Instant) -> Option<QueuedTask> {
        if self.policy.is_round_robin() {
            return self.pop_round_robin();
        }

        let mut best: Option<(usize, Vec<i128>)> = None;
        for (idx, entry) in self.entries.iter().enumerate() {
            let keys = entry.keys(&self.keys, now, self.aging_interval);
            let better = best
                .as_ref()
                .map_or(true, |(_, current)| compare_keys(&keys, current).is_lt());
            if better {
                best = Some((idx, keys));
            }
        }
        best.map(|(idx, _)| self.entries.remove(idx))
    }

    fn pop_round_robin(&mut self) -> Option<QueuedTask> {
        if self.served >= self.quantum {
            self.lanes.rotate_left(usize::from(self.lanes.len() > 1));
            self.served = 0;
        }
        let (_, lane) = self.lanes.front_mut()?;
        let entry = lane.pop_front();
        self.served += 1;
        if lane.is_empty() {
            self.lanes.pop_front();
            self.served = 0;
        }
        entry
    }
}
