//! Bounded, policy-ordered task scheduler.
//!
//! A fixed pool of `max_concurrent` workers pulls tasks from a shared
//! [`TaskQueue`]. Each task is handed to a [`TaskHandler`]; retryable
//! failures are re-enqueued after exponential backoff until `max_retries`,
//! every other outcome is reported once through [`TaskHandler::on_terminal`].

pub mod affinity;
pub mod policy;
pub mod queue;

pub use policy::{backoff_delay, OrderKey, SchedulerPolicy};
pub use queue::{QueuedTask, TaskQueue};

use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::AutohealConfig;
use crate::errors::{AutohealError, AutohealResult};
use crate::model::{ExecutionRecord, Task, TerminalState};

/// Work performed for each dequeued task.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Run one attempt of `task`.
    async fn handle(&self, task: &Task) -> ExecutionRecord;

    /// Called once per task with its final outcome.
    async fn on_terminal(&self, task: &Task, record: &ExecutionRecord);
}

/// Scheduler counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub submitted: u64,
    /// Tasks that ended in success or a no-op
    pub completed: u64,
    /// Tasks that ended in a terminal failure
    pub failed: u64,
    /// Retry attempts scheduled
    pub retried: u64,
    pub running: usize,
    pub queued: usize,
    pub in_backoff: usize,
    pub peak_running: usize,
}

#[derive(Debug)]
struct PoolState {
    queue: TaskQueue,
    running: usize,
    in_backoff: usize,
    peak_running: usize,
    closed: bool,
}

impl PoolState {
    fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.running == 0 && self.in_backoff == 0
    }
}

struct Shared {
    state: Mutex<PoolState>,
    /// Signalled when work is enqueued or the pool closes
    work: Notify,
    /// Signalled when the pool drains
    idle: Notify,
    handler: Arc<dyn TaskHandler>,
    clock: Arc<dyn Clock>,
    capacity: usize,
    backoff_base: Duration,
    backoff_max: Duration,
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
}

/// Fixed-size worker pool over a policy-ordered queue.
pub struct Scheduler {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    max_concurrent: usize,
}

impl Scheduler {
    /// Start `config.max_concurrent` workers. Must be called inside a tokio runtime.
    #[must_use]
    pub fn new(
        config: &AutohealConfig,
        handler: Arc<dyn TaskHandler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let max_concurrent = config.max_concurrent.max(1);
        let shared = Arc::new(Shared {
            state: Mutex::new(PoolState {
                queue: TaskQueue::new(
                    config.scheduler_policy,
                    config.aging_interval(),
                    config.round_robin_quantum,
                ),
                running: 0,
                in_backoff: 0,
                peak_running: 0,
                closed: false,
            }),
            work: Notify::new(),
            idle: Notify::new(),
            handler,
            clock,
            capacity: config.queue_capacity,
            backoff_base: config.backoff_base(),
            backoff_max: config.backoff_max(),
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            retried: AtomicU64::new(0),
        });

        let workers = (0..max_concurrent)
            .map(|id| tokio::spawn(worker_loop(id, Arc::clone(&shared))))
            .collect();

        info!(
            "Scheduler started: {max_concurrent} workers, policy={}",
            config.scheduler_policy
        );

        Self {
            shared,
            workers: Mutex::new(workers),
            max_concurrent,
        }
    }

    #[must_use]
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Enqueue a task. Returns its id.
    pub async fn submit(&self, task: Task) -> AutohealResult<String> {
        let task_id = task.task_id.clone();
        {
            let mut state = self.shared.state.lock().await;
            if state.closed {
                return Err(AutohealError::SchedulerClosed);
            }
            if state.queue.len() >= self.shared.capacity {
                warn!("Queue full ({}), rejecting task {task_id}", self.shared.capacity);
                return Err(AutohealError::QueueFull {
                    capacity: self.shared.capacity,
                });
            }
            debug!(
                "Queued task {task_id} kind={} priority={}",
                task.kind, task.priority
            );
            state.queue.push(task, Instant::now(), self.shared.clock.now());
        }
        self.shared.submitted.fetch_add(1, Ordering::Relaxed);
        self.shared.work.notify_one();
        Ok(task_id)
    }

    pub async fn stats(&self) -> SchedulerStats {
        let state = self.shared.state.lock().await;
        SchedulerStats {
            submitted: self.shared.submitted.load(Ordering::Relaxed),
            completed: self.shared.completed.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
            retried: self.shared.retried.load(Ordering::Relaxed),
            running: state.running,
            queued: state.queue.len(),
            in_backoff: state.in_backoff,
            peak_running: state.peak_running,
        }
    }

    /// Resolve once nothing is queued, running, or waiting out a backoff.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.shared.state.lock().await.is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Stop accepting tasks, drain the queue, and join the workers.
    pub async fn shutdown(&self) {
        self.shared.state.lock().await.closed = true;
        self.shared.work.notify_waiters();

        let workers = std::mem::take(&mut *self.workers.lock().await);
        for handle in workers {
            if let Err(e) = handle.await {
                warn!("Scheduler worker ended abnormally: {e}");
            }
        }
        info!("Scheduler shut down");
    }
}

async fn worker_loop(id: usize, shared: Arc<Shared>) {
    loop {
        let notified = shared.work.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let next = {
            let mut state = shared.state.lock().await;
            match state.queue.pop(Instant::now()) {
                Some(entry) => {
                    state.running += 1;
                    state.peak_running = state.peak_running.max(state.running);
                    Some(entry.task)
                }
                None if state.closed && state.is_idle() => {
                    debug!("Worker {id} exiting");
                    return;
                }
                None => None,
            }
        };

        match next {
            Some(task) => run_task(id, &shared, task).await,
            None => notified.await,
        }
    }
}

async fn run_task(worker: usize, shared: &Arc<Shared>, mut task: Task) {
    debug!(
        "Worker {worker} running task {} (attempt {})",
        task.task_id,
        task.retry_count + 1
    );
    let record = shared.handler.handle(&task).await;

    let retry = record.terminal_state == TerminalState::FailedRetryable && task.can_retry();
    if retry {
        let delay = backoff_delay(shared.backoff_base, shared.backoff_max, task.retry_count);
        task.retry_count += 1;
        shared.retried.fetch_add(1, Ordering::Relaxed);
        info!(
            "Task {} failed ({}), retry {}/{} in {:?}",
            task.task_id, record.reason_code, task.retry_count, task.max_retries, delay
        );
        shared.state.lock().await.in_backoff += 1;
        tokio::spawn(requeue_after(Arc::clone(shared), task, delay));
    } else {
        if record.terminal_state.is_failure() {
            shared.failed.fetch_add(1, Ordering::Relaxed);
            warn!(
                "Task {} terminally failed after {} attempt(s): {} ({})",
                task.task_id,
                task.retry_count + 1,
                record.terminal_state,
                record.reason_code
            );
        } else {
            shared.completed.fetch_add(1, Ordering::Relaxed);
        }
        shared.handler.on_terminal(&task, &record).await;
    }

    let mut state = shared.state.lock().await;
    state.running -= 1;
    finish_step(shared, &state);
}

async fn requeue_after(shared: Arc<Shared>, task: Task, delay: Duration) {
    tokio::time::sleep(delay).await;
    let mut state = shared.state.lock().await;
    state.in_backoff -= 1;
    let submitted_at = shared.clock.now();
    state.queue.push(task, Instant::now(), submitted_at);
    drop(state);
    shared.work.notify_one();
}

fn finish_step(shared: &Shared, state: &PoolState) {
    if state.is_idle() {
        shared.idle.notify_waiters();
        if state.closed {
            shared.work.notify_waiters();
        }
    }
}
