/*!
 * Queue Processor Tests
 * Dispatch ordering, retry backoff, budget gating, and cancellation
 */

use async_trait::async_trait;
use foundry_kernel::budget::{BudgetLimits, BudgetMonitor};
use foundry_kernel::core::config::{BudgetConfig, HealthConfig, QueueConfig};
use foundry_kernel::core::errors::{FailureReason, ProviderError};
use foundry_kernel::core::types::{CostCents, TaskId, TenantId};
use foundry_kernel::providers::{
    InvocationResult, ProbeReport, ProviderAdapter, ProviderHealthMonitor, TaskInvocation,
};
use foundry_kernel::queue::{QueueProcessor, Task, TaskStatus};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Adapter that records the order tasks arrive in
struct RecordingAdapter {
    id: String,
    order: Mutex<Vec<TaskId>>,
    delay: Duration,
}

impl RecordingAdapter {
    fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            order: Mutex::new(Vec::new()),
            delay: Duration::from_millis(5),
        })
    }
}

#[async_trait]
impl ProviderAdapter for RecordingAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(&self, invocation: TaskInvocation) -> Result<InvocationResult, ProviderError> {
        self.order.lock().push(invocation.task_id);
        tokio::time::sleep(self.delay).await;
        Ok(InvocationResult {
            cost_cents: 5,
            latency: Duration::from_millis(5),
            payload: serde_json::json!({}),
        })
    }

    async fn health_probe(&self) -> Result<ProbeReport, ProviderError> {
        Ok(ProbeReport {
            latency: Duration::from_millis(1),
        })
    }

    fn estimate_cost(&self, _invocation: &TaskInvocation) -> CostCents {
        5
    }
}

/// Adapter that fails transiently, stamping attempt times for backoff checks
struct TimedFlaky {
    id: String,
    attempts: Mutex<Vec<Instant>>,
    failures: u32,
}

#[async_trait]
impl ProviderAdapter for TimedFlaky {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(&self, _invocation: TaskInvocation) -> Result<InvocationResult, ProviderError> {
        let mut attempts = self.attempts.lock();
        attempts.push(Instant::now());
        if attempts.len() <= self.failures as usize {
            return Err(ProviderError::Transient("not yet".into()));
        }
        Ok(InvocationResult {
            cost_cents: 1,
            latency: Duration::from_millis(1),
            payload: serde_json::json!({}),
        })
    }

    async fn health_probe(&self) -> Result<ProbeReport, ProviderError> {
        Ok(ProbeReport {
            latency: Duration::from_millis(1),
        })
    }

    fn estimate_cost(&self, _invocation: &TaskInvocation) -> CostCents {
        1
    }
}

fn setup(
    adapter: Arc<dyn ProviderAdapter>,
    max_concurrent: usize,
) -> (Arc<QueueProcessor>, Arc<BudgetMonitor>) {
    let health = Arc::new(ProviderHealthMonitor::new(HealthConfig::default()));
    health.register(adapter);
    let budget = Arc::new(BudgetMonitor::new(BudgetConfig::default()));
    let processor = Arc::new(QueueProcessor::new(
        QueueConfig {
            max_concurrent_tasks: max_concurrent,
            task_timeout: Duration::from_millis(500),
            retry_base: Duration::from_millis(40),
            retry_cap: Duration::from_millis(200),
            default_max_retries: 3,
        },
        health,
        Arc::clone(&budget),
    ));
    (processor, budget)
}

async fn wait_terminal(processor: &QueueProcessor, id: TaskId) -> TaskStatus {
    for _ in 0..300 {
        if let Some(status) = processor.status(id) {
            if status.is_terminal() {
                return status;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {} never terminal", id);
}

#[tokio::test]
async fn test_priority_dispatch_order() {
    let adapter = RecordingAdapter::new("rec");
    let (processor, _) = setup(adapter.clone(), 1);
    let tenant = TenantId::new_v4();

    // A(priority 1) and B(priority 5) submitted B-first, before dispatch
    let b = processor.submit(Task::new(tenant, 5, "build", serde_json::json!({}), 1));
    let a = processor.submit(Task::new(tenant, 1, "build", serde_json::json!({}), 1));
    Arc::clone(&processor).start();

    wait_terminal(&processor, a).await;
    wait_terminal(&processor, b).await;

    let order = adapter.order.lock().clone();
    assert_eq!(order, vec![a, b], "A must dispatch strictly before B");
}

#[tokio::test]
async fn test_fifo_among_equal_priority() {
    let adapter = RecordingAdapter::new("rec");
    let (processor, _) = setup(adapter.clone(), 1);
    let tenant = TenantId::new_v4();

    let ids: Vec<TaskId> = (0..5)
        .map(|_| processor.submit(Task::new(tenant, 5, "build", serde_json::json!({}), 1)))
        .collect();
    Arc::clone(&processor).start();

    for id in &ids {
        wait_terminal(&processor, *id).await;
    }
    assert_eq!(*adapter.order.lock(), ids);
}

#[tokio::test]
async fn test_backoff_delays_grow() {
    let adapter = Arc::new(TimedFlaky {
        id: "flaky".into(),
        attempts: Mutex::new(Vec::new()),
        failures: 2,
    });
    let (processor, _) = setup(adapter.clone(), 1);
    let tenant = TenantId::new_v4();
    Arc::clone(&processor).start();

    let id = processor.submit(Task::new(tenant, 5, "build", serde_json::json!({}), 3));
    let status = wait_terminal(&processor, id).await;
    assert_eq!(status, TaskStatus::Succeeded);

    let attempts = adapter.attempts.lock().clone();
    assert_eq!(attempts.len(), 3);
    // Retry gaps follow base * 2^n: second gap roughly doubles the first
    let gap1 = attempts[1] - attempts[0];
    let gap2 = attempts[2] - attempts[1];
    assert!(gap1 >= Duration::from_millis(35), "first backoff too short: {:?}", gap1);
    assert!(gap2 >= gap1 + Duration::from_millis(25), "second backoff did not grow: {:?} vs {:?}", gap2, gap1);
}

#[tokio::test]
async fn test_concurrency_ceiling_respected() {
    struct Gauge {
        id: String,
        current: Mutex<i32>,
        peak: Mutex<i32>,
    }

    #[async_trait]
    impl ProviderAdapter for Gauge {
        fn id(&self) -> &str {
            &self.id
        }

        async fn execute(
            &self,
            _invocation: TaskInvocation,
        ) -> Result<InvocationResult, ProviderError> {
            {
                let mut current = self.current.lock();
                *current += 1;
                let mut peak = self.peak.lock();
                *peak = (*peak).max(*current);
            }
            tokio::time::sleep(Duration::from_millis(30)).await;
            *self.current.lock() -= 1;
            Ok(InvocationResult {
                cost_cents: 1,
                latency: Duration::from_millis(1),
                payload: serde_json::json!({}),
            })
        }

        async fn health_probe(&self) -> Result<ProbeReport, ProviderError> {
            Ok(ProbeReport {
                latency: Duration::from_millis(1),
            })
        }

        fn estimate_cost(&self, _invocation: &TaskInvocation) -> CostCents {
            1
        }
    }

    let adapter = Arc::new(Gauge {
        id: "gauge".into(),
        current: Mutex::new(0),
        peak: Mutex::new(0),
    });
    let (processor, _) = setup(adapter.clone(), 3);
    let tenant = TenantId::new_v4();
    Arc::clone(&processor).start();

    let ids: Vec<TaskId> = (0..10)
        .map(|_| processor.submit(Task::new(tenant, 5, "build", serde_json::json!({}), 1)))
        .collect();
    for id in ids {
        wait_terminal(&processor, id).await;
    }
    assert!(*adapter.peak.lock() <= 3, "semaphore ceiling breached");
}

#[tokio::test]
async fn test_budget_denial_is_terminal_and_unretried() {
    let adapter = RecordingAdapter::new("rec");
    let (processor, budget) = setup(adapter.clone(), 2);
    let tenant = TenantId::new_v4();
    budget.register_tenant(
        tenant,
        BudgetLimits {
            daily: Some(1000),
            ..BudgetLimits::unlimited()
        },
    );
    // 996 of 1000 cents spent; the adapter's 5-cent estimate must be denied
    budget.record(tenant, 996).unwrap();
    Arc::clone(&processor).start();

    let id = processor.submit(Task::new(tenant, 5, "build", serde_json::json!({}), 3));
    let status = wait_terminal(&processor, id).await;

    assert_eq!(status, TaskStatus::Failed);
    let outcome = processor.outcome(id).unwrap();
    assert_eq!(outcome.failure, Some(FailureReason::BudgetExceeded));
    // Denied before dispatch: the adapter never saw it, nothing recorded
    assert!(adapter.order.lock().is_empty());
    assert_eq!(budget.status(tenant).unwrap().spent_daily, 996);
}

#[tokio::test]
async fn test_cancel_tenant_sweeps_queued_and_running() {
    let adapter = Arc::new(RecordingAdapter {
        id: "slow".into(),
        order: Mutex::new(Vec::new()),
        delay: Duration::from_millis(200),
    });
    let (processor, _) = setup(adapter.clone(), 1);
    let victim = TenantId::new_v4();
    let bystander = TenantId::new_v4();
    Arc::clone(&processor).start();

    let running = processor.submit(Task::new(victim, 1, "build", serde_json::json!({}), 1));
    let queued = processor.submit(Task::new(victim, 5, "build", serde_json::json!({}), 1));
    let other = processor.submit(Task::new(bystander, 5, "build", serde_json::json!({}), 1));

    // Let the first task go in flight
    tokio::time::sleep(Duration::from_millis(50)).await;
    processor.cancel_tenant(victim);

    assert_eq!(wait_terminal(&processor, running).await, TaskStatus::Cancelled);
    assert_eq!(wait_terminal(&processor, queued).await, TaskStatus::Cancelled);
    // Other tenants are untouched
    assert_eq!(wait_terminal(&processor, other).await, TaskStatus::Succeeded);
}
