/*!
 * Queue Processor
 * Priority dispatch of tasks against healthy, budget-cleared providers
 *
 * Submission never blocks: tasks land in a priority heap and a background
 * dispatch loop drains it under a global concurrency semaphore. Each worker
 * routes to the best eligible provider, gates on the tenant's budget, applies
 * a per-attempt timeout, and retries transient failures with capped
 * exponential backoff. Cancellation is cooperative: queued tasks die before
 * dispatch, in-flight invocations are signalled and their late results
 * discarded.
 */

use super::entry::QueueEntry;
use super::types::{QueueStats, Task, TaskOutcome, TaskStatus};
use crate::budget::BudgetMonitor;
use crate::core::config::QueueConfig;
use crate::core::errors::{FailureReason, OrchestratorError, ProviderError};
use crate::core::types::{TaskId, TenantId};
use crate::events::{AlertBus, Category, Event, Payload, Severity};
use crate::providers::{ProviderHealthMonitor, TaskInvocation};
use dashmap::DashMap;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

/// How an attempt fell short, for retry classification
enum AttemptFailure {
    Timeout,
    Transient,
}

/// Priority task queue with bounded-parallel dispatch
pub struct QueueProcessor {
    config: QueueConfig,
    health: Arc<ProviderHealthMonitor>,
    budget: Arc<BudgetMonitor>,
    bus: Option<AlertBus>,

    heap: Mutex<BinaryHeap<QueueEntry>>,
    seq: AtomicU64,
    notify: Notify,
    semaphore: Arc<Semaphore>,

    statuses: DashMap<TaskId, TaskStatus>,
    outcomes: DashMap<TaskId, TaskOutcome>,
    tenant_tasks: DashMap<TenantId, Vec<TaskId>>,
    /// Cancel handles for in-flight workers
    running: DashMap<TaskId, oneshot::Sender<()>>,

    outcome_tx: mpsc::UnboundedSender<TaskOutcome>,
    outcome_rx: Mutex<Option<mpsc::UnboundedReceiver<TaskOutcome>>>,
    shutdown: Arc<Notify>,

    submitted: AtomicU64,
    dispatched: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
}

impl QueueProcessor {
    pub fn new(
        config: QueueConfig,
        health: Arc<ProviderHealthMonitor>,
        budget: Arc<BudgetMonitor>,
    ) -> Self {
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let max_concurrent = config.max_concurrent_tasks.max(1);
        info!(
            "Queue processor initialized: {} concurrent tasks, {:?} timeout",
            max_concurrent, config.task_timeout
        );
        Self {
            config,
            health,
            budget,
            bus: None,
            heap: Mutex::new(BinaryHeap::new()),
            seq: AtomicU64::new(0),
            notify: Notify::new(),
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            statuses: DashMap::new(),
            outcomes: DashMap::new(),
            tenant_tasks: DashMap::new(),
            running: DashMap::new(),
            outcome_tx,
            outcome_rx: Mutex::new(Some(outcome_rx)),
            shutdown: Arc::new(Notify::new()),
            submitted: AtomicU64::new(0),
            dispatched: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
        }
    }

    /// Attach an alert bus for task failure events
    #[must_use]
    pub fn with_alert_bus(mut self, bus: AlertBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Take the terminal-outcome channel; yields once, to the owner that
    /// drives lifecycle advancement
    pub fn take_outcome_receiver(&self) -> Option<mpsc::UnboundedReceiver<TaskOutcome>> {
        self.outcome_rx.lock().take()
    }

    /// Admit a task into the queue; returns immediately
    pub fn submit(&self, task: Task) -> TaskId {
        let task_id = task.id;
        let tenant = task.tenant_id;
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);

        self.statuses.insert(task_id, TaskStatus::Queued);
        self.tenant_tasks.entry(tenant).or_default().push(task_id);
        self.heap.lock().push(QueueEntry { task, seq });
        self.submitted.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_one();

        debug!("Task {} submitted for tenant {}", task_id, tenant);
        task_id
    }

    /// Spawn the background dispatch loop
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        let processor = self;
        let shutdown = Arc::clone(&processor.shutdown);
        tokio::spawn(async move {
            info!("Queue dispatch loop started");
            loop {
                let entry = tokio::select! {
                    entry = processor.next_ready() => entry,
                    _ = shutdown.notified() => break,
                };
                let permit = tokio::select! {
                    permit = Arc::clone(&processor.semaphore).acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                    _ = shutdown.notified() => break,
                };
                let worker = Arc::clone(&processor);
                tokio::spawn(async move {
                    worker.run_task(entry.task, permit).await;
                });
            }
            info!("Queue dispatch loop stopped");
        })
    }

    /// Stop the dispatch loop; in-flight workers drain on their own
    pub fn stop(&self) {
        self.shutdown.notify_waiters();
    }

    /// Cancel all queued and running tasks for a tenant
    ///
    /// Queued tasks terminate before dispatch; running workers are asked to
    /// stop cooperatively. Returns the number of tasks acted on.
    pub fn cancel_tenant(&self, tenant: TenantId) -> usize {
        let ids = self
            .tenant_tasks
            .get(&tenant)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();

        let mut touched = 0;
        for task_id in ids {
            // Flip queued tasks to cancelled without holding the guard
            // across the outcome emission
            let was_queued = match self.statuses.get_mut(&task_id) {
                Some(mut status) if *status == TaskStatus::Queued => {
                    *status = TaskStatus::Cancelled;
                    true
                }
                _ => false,
            };
            if was_queued {
                self.finish(TaskOutcome {
                    task_id,
                    tenant_id: tenant,
                    status: TaskStatus::Cancelled,
                    attempts: 0,
                    provider: None,
                    failure: None,
                    cost_cents: 0,
                    payload: None,
                });
                touched += 1;
                continue;
            }
            if let Some((_, cancel_tx)) = self.running.remove(&task_id) {
                let _ = cancel_tx.send(());
                touched += 1;
            }
        }
        if touched > 0 {
            info!("Cancelled {} tasks for tenant {}", touched, tenant);
        }
        touched
    }

    pub fn status(&self, task_id: TaskId) -> Option<TaskStatus> {
        self.statuses.get(&task_id).map(|entry| *entry.value())
    }

    pub fn outcome(&self, task_id: TaskId) -> Option<TaskOutcome> {
        self.outcomes.get(&task_id).map(|entry| entry.value().clone())
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            queued_now: self
                .statuses
                .iter()
                .filter(|entry| *entry.value() == TaskStatus::Queued)
                .count(),
            running_now: self.running.len(),
        }
    }

    /// Pop the highest-priority ready task, waiting when the queue is empty
    ///
    /// Entries cancelled while queued are skipped here rather than removed
    /// from the heap at cancel time.
    async fn next_ready(&self) -> QueueEntry {
        loop {
            let popped = self.heap.lock().pop();
            match popped {
                Some(entry) => {
                    let eligible = self
                        .statuses
                        .get(&entry.task.id)
                        .map_or(false, |status| *status.value() == TaskStatus::Queued);
                    if eligible {
                        return entry;
                    }
                    debug!("Skipping cancelled task {}", entry.task.id);
                }
                None => self.notify.notified().await,
            }
        }
    }

    /// Execute one task to a terminal state
    async fn run_task(&self, task: Task, _permit: OwnedSemaphorePermit) {
        let task_id = task.id;

        // Register the cancel handle before going Running so cancel_tenant
        // can always reach an admitted worker
        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        self.running.insert(task_id, cancel_tx);

        let admitted = match self.statuses.get_mut(&task_id) {
            Some(mut status) if *status == TaskStatus::Queued => {
                *status = TaskStatus::Running;
                true
            }
            _ => false,
        };
        if !admitted {
            // Cancelled between pop and dispatch
            self.running.remove(&task_id);
            return;
        }
        self.dispatched.fetch_add(1, Ordering::Relaxed);

        let outcome = self.execute_with_retries(&task, &mut cancel_rx).await;
        self.running.remove(&task_id);
        self.finish(outcome);
    }

    async fn execute_with_retries(
        &self,
        task: &Task,
        cancel_rx: &mut oneshot::Receiver<()>,
    ) -> TaskOutcome {
        let invocation = TaskInvocation {
            task_id: task.id,
            tenant_id: task.tenant_id,
            kind: task.kind.clone(),
            payload: task.payload.clone(),
        };

        // Route: exclude critical providers, weight by health and headroom
        let headroom = self.budget.headroom(task.tenant_id);
        let provider_id = match self.health.select(&invocation, headroom) {
            Ok(id) => id,
            Err(_) => {
                warn!("No eligible provider for task {}", task.id);
                return self.failure_outcome(task, None, 0, FailureReason::ProviderUnavailable);
            }
        };
        let Some(adapter) = self.health.adapter(&provider_id) else {
            return self.failure_outcome(task, None, 0, FailureReason::ProviderUnavailable);
        };

        // Budget gate: a denial is terminal for the task, nothing recorded
        let estimate = adapter.estimate_cost(&invocation);
        match self.budget.proceed(task.tenant_id, estimate) {
            Err(OrchestratorError::BudgetExceeded { .. }) => {
                return self.failure_outcome(
                    task,
                    Some(provider_id),
                    0,
                    FailureReason::BudgetExceeded,
                );
            }
            // Tenants without a registered ledger spend freely
            _ => {}
        }

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let failure = tokio::select! {
                _ = &mut *cancel_rx => {
                    debug!("Task {} cancelled in flight", task.id);
                    return self.cancelled_outcome(task, Some(provider_id), attempt);
                }
                result = tokio::time::timeout(self.config.task_timeout, adapter.execute(invocation.clone())) => {
                    match result {
                        Ok(Ok(success)) => {
                            if let Err(e) = self.budget.record(task.tenant_id, success.cost_cents) {
                                warn!("Cost recording failed for tenant {}: {}", task.tenant_id, e);
                            }
                            self.health.on_task_result(&provider_id, true, success.latency);
                            return TaskOutcome {
                                task_id: task.id,
                                tenant_id: task.tenant_id,
                                status: TaskStatus::Succeeded,
                                attempts: attempt,
                                provider: Some(provider_id),
                                failure: None,
                                cost_cents: success.cost_cents,
                                payload: Some(success.payload),
                            };
                        }
                        Ok(Err(ProviderError::Fatal(msg))) => {
                            warn!("Task {} fatal provider error: {}", task.id, msg);
                            self.health.on_task_result(&provider_id, false, Duration::ZERO);
                            return self.failure_outcome(
                                task,
                                Some(provider_id),
                                attempt,
                                FailureReason::ProviderError,
                            );
                        }
                        Ok(Err(ProviderError::Transient(msg))) => {
                            debug!("Task {} transient error on attempt {}: {}", task.id, attempt, msg);
                            self.health.on_task_result(&provider_id, false, Duration::ZERO);
                            AttemptFailure::Transient
                        }
                        Err(_) => {
                            debug!("Task {} timed out on attempt {}", task.id, attempt);
                            self.health.on_task_result(&provider_id, false, self.config.task_timeout);
                            AttemptFailure::Timeout
                        }
                    }
                }
            };

            if attempt >= task.max_retries.max(1) {
                let reason = match failure {
                    AttemptFailure::Timeout => FailureReason::TaskTimeout,
                    AttemptFailure::Transient => FailureReason::ProviderError,
                };
                warn!(
                    "Task {} failed after {} attempts: {}",
                    task.id, attempt, reason
                );
                return self.failure_outcome(task, Some(provider_id), attempt, reason);
            }

            // base * 2^(attempt-1), capped; cancellation also interrupts the wait
            let delay = self
                .config
                .retry_base
                .saturating_mul(1u32 << (attempt - 1).min(16))
                .min(self.config.retry_cap);
            tokio::select! {
                _ = &mut *cancel_rx => {
                    return self.cancelled_outcome(task, Some(provider_id), attempt);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn failure_outcome(
        &self,
        task: &Task,
        provider: Option<String>,
        attempts: u32,
        reason: FailureReason,
    ) -> TaskOutcome {
        TaskOutcome {
            task_id: task.id,
            tenant_id: task.tenant_id,
            status: TaskStatus::Failed,
            attempts,
            provider,
            failure: Some(reason),
            cost_cents: 0,
            payload: None,
        }
    }

    fn cancelled_outcome(&self, task: &Task, provider: Option<String>, attempts: u32) -> TaskOutcome {
        TaskOutcome {
            task_id: task.id,
            tenant_id: task.tenant_id,
            status: TaskStatus::Cancelled,
            attempts,
            provider,
            failure: None,
            cost_cents: 0,
            payload: None,
        }
    }

    /// Record a terminal outcome and report it to the submitter
    fn finish(&self, outcome: TaskOutcome) {
        match outcome.status {
            TaskStatus::Succeeded => self.succeeded.fetch_add(1, Ordering::Relaxed),
            TaskStatus::Failed => self.failed.fetch_add(1, Ordering::Relaxed),
            TaskStatus::Cancelled => self.cancelled.fetch_add(1, Ordering::Relaxed),
            _ => 0,
        };

        self.statuses.insert(outcome.task_id, outcome.status);
        if let Some(mut tasks) = self.tenant_tasks.get_mut(&outcome.tenant_id) {
            tasks.retain(|id| *id != outcome.task_id);
        }

        if outcome.status == TaskStatus::Failed {
            if let Some(ref bus) = self.bus {
                bus.publish(
                    Event::new(
                        Severity::Error,
                        Category::Queue,
                        Payload::TaskFailed {
                            task: outcome.task_id,
                            reason: outcome
                                .failure
                                .map(|r| r.to_string())
                                .unwrap_or_else(|| "unknown".into()),
                            attempts: outcome.attempts,
                        },
                    )
                    .with_tenant(outcome.tenant_id),
                );
            }
        }

        self.outcomes.insert(outcome.task_id, outcome.clone());
        let _ = self.outcome_tx.send(outcome);
    }
}
