/*!
 * Startup Lifecycle Manager
 * Drives the per-tenant state machine from admission to terminal release
 *
 * Single writer for StartupInstance records: tenants are created here,
 * advanced here as task outcomes arrive, and finalized here. Terminal
 * transitions release resources exactly once (the pool's idempotent release
 * tolerates duplicate terminal paths).
 */

use super::phases::PhaseExecutor;
use super::types::{StartupConfig, StartupInstance, StartupState};
use crate::budget::BudgetMonitor;
use crate::core::errors::{FailureReason, OrchestratorError};
use crate::core::types::{OrchestratorResult, TenantId};
use crate::events::{AlertBus, Category, Event, Payload, Severity};
use crate::queue::{QueueProcessor, Task, TaskOutcome, TaskStatus};
use crate::resources::ResourcePool;
use crate::store::StateStore;
use dashmap::DashMap;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Top-level coordinator over pool, queue, health, and budget
pub struct StartupLifecycleManager {
    max_concurrent_startups: usize,
    pool: Arc<ResourcePool>,
    queue: Arc<QueueProcessor>,
    budget: Arc<BudgetMonitor>,
    phase_executor: Arc<dyn PhaseExecutor>,
    store: Option<Arc<StateStore>>,
    bus: Option<AlertBus>,
    instances: DashMap<TenantId, StartupInstance>,
    /// In-flight create reservations, counted against the admission ceiling
    reservations: Mutex<usize>,
    outcome_rx: Mutex<Option<mpsc::UnboundedReceiver<TaskOutcome>>>,
}

/// Builder for StartupLifecycleManager
pub struct StartupLifecycleManagerBuilder {
    max_concurrent_startups: usize,
    pool: Arc<ResourcePool>,
    queue: Arc<QueueProcessor>,
    budget: Arc<BudgetMonitor>,
    phase_executor: Arc<dyn PhaseExecutor>,
    store: Option<Arc<StateStore>>,
    bus: Option<AlertBus>,
}

impl StartupLifecycleManagerBuilder {
    /// Cap concurrent live startups
    #[must_use]
    pub fn with_max_startups(mut self, limit: usize) -> Self {
        self.max_concurrent_startups = limit;
        self
    }

    /// Persist tenant records through this store
    #[must_use]
    pub fn with_store(mut self, store: Arc<StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Publish lifecycle transitions on this bus
    #[must_use]
    pub fn with_alert_bus(mut self, bus: AlertBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn build(self) -> StartupLifecycleManager {
        let outcome_rx = self.queue.take_outcome_receiver();
        let mut features = Vec::new();
        if self.store.is_some() {
            features.push("persistence");
        }
        if self.bus.is_some() {
            features.push("alerts");
        }
        info!(
            "Lifecycle manager initialized: max {} startups [{}]",
            self.max_concurrent_startups,
            features.join(", ")
        );
        StartupLifecycleManager {
            max_concurrent_startups: self.max_concurrent_startups,
            pool: self.pool,
            queue: self.queue,
            budget: self.budget,
            phase_executor: self.phase_executor,
            store: self.store,
            bus: self.bus,
            instances: DashMap::new(),
            reservations: Mutex::new(0),
            outcome_rx: Mutex::new(outcome_rx),
        }
    }
}

impl StartupLifecycleManager {
    pub fn builder(
        pool: Arc<ResourcePool>,
        queue: Arc<QueueProcessor>,
        budget: Arc<BudgetMonitor>,
        phase_executor: Arc<dyn PhaseExecutor>,
    ) -> StartupLifecycleManagerBuilder {
        StartupLifecycleManagerBuilder {
            max_concurrent_startups: crate::core::limits::DEFAULT_MAX_CONCURRENT_STARTUPS,
            pool,
            queue,
            budget,
            phase_executor,
            store: None,
            bus: None,
        }
    }

    /// Spawn the completion loop consuming queue outcomes
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        let manager = self;
        let receiver = manager.outcome_rx.lock().take();
        tokio::spawn(async move {
            let Some(mut rx) = receiver else {
                warn!("Completion loop already started; ignoring");
                return;
            };
            info!("Lifecycle completion loop started");
            while let Some(outcome) = rx.recv().await {
                let tenant = outcome.tenant_id;
                if let Err(e) = manager.advance(tenant, outcome).await {
                    warn!("Advance failed for tenant {}: {}", tenant, e);
                }
            }
            info!("Lifecycle completion loop stopped");
        })
    }

    /// Create a tenant: validate, admit, allocate, register, enqueue phase 0
    ///
    /// Fails before any side effect on invalid config; fails at the admission
    /// check with no resources touched; on allocation failure no tenant is
    /// ever registered.
    pub async fn create_startup(&self, config: StartupConfig) -> OrchestratorResult<TenantId> {
        config.validate()?;

        // Reserve an admission slot; count-check and reservation are atomic
        {
            let mut reservations = self.reservations.lock();
            let live = self.live_count() + *reservations;
            if live >= self.max_concurrent_startups {
                return Err(OrchestratorError::ConcurrencyLimit {
                    current: live,
                    limit: self.max_concurrent_startups,
                });
            }
            *reservations += 1;
        }

        let tenant = TenantId::new_v4();
        let allocation = match self.pool.allocate(tenant, &config.requirements).await {
            Ok(allocation) => allocation,
            Err(e) => {
                *self.reservations.lock() -= 1;
                return Err(e);
            }
        };

        self.budget.register_tenant(tenant, config.budget);
        let instance = StartupInstance::new(tenant, config, allocation);
        self.persist(&instance);
        info!("Startup {} registered ({})", tenant, instance.config.name);
        self.instances.insert(tenant, instance);
        *self.reservations.lock() -= 1;

        // First phase; a payload-build failure terminates the startup with
        // resources already reclaimed
        if let Err(e) = self.enqueue_phase(tenant, 0).await {
            self.finalize(tenant, StartupState::Failed, Some(FailureReason::ConfigInvalid))?;
            return Err(e);
        }
        Ok(tenant)
    }

    /// Advance a tenant's state machine from a task outcome
    ///
    /// Phase k+1 is enqueued only after phase k reports success, so phases
    /// never run out of order or concurrently for one tenant. Failures are
    /// not retried here: retry policy lives in the queue.
    pub async fn advance(&self, tenant: TenantId, outcome: TaskOutcome) -> OrchestratorResult<()> {
        let (status, current_phase, phase_count) = {
            let Some(instance) = self.instances.get(&tenant) else {
                // Direct queue users are not lifecycle tenants
                debug!("Outcome for unmanaged tenant {} ignored", tenant);
                return Ok(());
            };
            (
                instance.status,
                instance.current_phase,
                instance.phase_count(),
            )
        };

        if status.is_terminal() {
            // Late result from a cancelled or failed startup: discard
            debug!("Stale outcome for terminal tenant {} discarded", tenant);
            return Ok(());
        }

        match outcome.status {
            TaskStatus::Succeeded => {
                let next = current_phase + 1;
                if next < phase_count {
                    self.enqueue_phase(tenant, next).await?;
                } else {
                    info!("Startup {} completed all {} phases", tenant, phase_count);
                    self.finalize(tenant, StartupState::Completed, None)?;
                }
            }
            TaskStatus::Failed => {
                let reason = outcome.failure.unwrap_or(FailureReason::ProviderError);
                warn!("Startup {} failed in phase {}: {}", tenant, current_phase, reason);
                self.finalize(tenant, StartupState::Failed, Some(reason))?;
            }
            TaskStatus::Cancelled => {
                // cancel() already finalized the instance
                debug!("Cancelled task outcome for tenant {} ignored", tenant);
            }
            TaskStatus::Queued | TaskStatus::Running => {}
        }
        Ok(())
    }

    /// Cancel a non-terminal startup and reclaim its resources synchronously
    pub fn cancel(&self, tenant: TenantId) -> OrchestratorResult<()> {
        {
            let instance = self
                .instances
                .get(&tenant)
                .ok_or(OrchestratorError::TenantNotFound(tenant))?;
            if instance.status.is_terminal() {
                return Err(OrchestratorError::InvalidStateTransition {
                    from: instance.status.to_string(),
                    to: "cancelled".into(),
                });
            }
        }

        let cancelled_tasks = self.queue.cancel_tenant(tenant);
        debug!(
            "Cancel of tenant {} touched {} tasks",
            tenant, cancelled_tasks
        );
        // Release happens inside finalize, before cancel() returns
        self.finalize(tenant, StartupState::Cancelled, None)?;
        Ok(())
    }

    /// Read-only projection of one tenant
    pub fn get_status(&self, tenant: TenantId) -> OrchestratorResult<StartupInstance> {
        self.instances
            .get(&tenant)
            .map(|entry| entry.value().clone())
            .ok_or(OrchestratorError::TenantNotFound(tenant))
    }

    /// Snapshots of all known tenants
    pub fn list_startups(&self) -> Vec<StartupInstance> {
        self.instances.iter().map(|e| e.value().clone()).collect()
    }

    /// Tenants currently holding resources
    pub fn live_count(&self) -> usize {
        self.instances
            .iter()
            .filter(|entry| !entry.value().status.is_terminal())
            .count()
    }

    /// Load persisted records: terminal ones into memory for status queries,
    /// interrupted ones returned to the caller for explicit handling
    ///
    /// Allocations do not survive a restart; an interrupted record's stale
    /// state stays on disk for audit until the operator decides.
    pub fn restore(&self) -> OrchestratorResult<Vec<StartupInstance>> {
        let Some(ref store) = self.store else {
            return Ok(Vec::new());
        };
        let mut interrupted = Vec::new();
        for instance in store.load_all()? {
            if instance.status.is_terminal() {
                self.instances.insert(instance.id, instance);
            } else {
                warn!(
                    "Interrupted startup {} found in {} state",
                    instance.id, instance.status
                );
                interrupted.push(instance);
            }
        }
        Ok(interrupted)
    }

    /// Build and submit the task for one phase
    async fn enqueue_phase(&self, tenant: TenantId, phase_index: usize) -> OrchestratorResult<()> {
        let config = {
            let instance = self
                .instances
                .get(&tenant)
                .ok_or(OrchestratorError::TenantNotFound(tenant))?;
            instance.config.clone()
        };

        let payload = self
            .phase_executor
            .build_payload(tenant, phase_index, &config)
            .await?;

        // State may have moved while the payload was building (cancel races
        // the executor); only submit into a live instance
        let snapshot = {
            let mut instance = self
                .instances
                .get_mut(&tenant)
                .ok_or(OrchestratorError::TenantNotFound(tenant))?;
            if instance.status.is_terminal() {
                debug!(
                    "Skipping phase {} enqueue for terminal tenant {}",
                    phase_index, tenant
                );
                return Ok(());
            }
            let kind = config
                .phases
                .get(phase_index)
                .map(|phase| phase.kind.clone())
                .ok_or_else(|| {
                    OrchestratorError::ConfigInvalid(format!("phase {} out of range", phase_index))
                })?;
            let task = Task::new(
                tenant,
                config.task_priority,
                kind,
                payload,
                config.max_retries,
            );
            let task_id = self.queue.submit(task);
            debug!(
                "Enqueued phase {} task {} for tenant {}",
                phase_index, task_id, tenant
            );

            let from = instance.status;
            instance.current_phase = phase_index;
            instance.status = StartupState::Running { phase: phase_index };
            instance.updated_at = OffsetDateTime::now_utc();
            self.publish_transition(tenant, from, instance.status);
            instance.clone()
        };
        self.persist(&snapshot);
        Ok(())
    }

    /// Terminal transition: release resources exactly once and persist
    fn finalize(
        &self,
        tenant: TenantId,
        state: StartupState,
        failure: Option<FailureReason>,
    ) -> OrchestratorResult<()> {
        let snapshot = {
            let mut instance = self
                .instances
                .get_mut(&tenant)
                .ok_or(OrchestratorError::TenantNotFound(tenant))?;
            if instance.status.is_terminal() {
                // Duplicate terminal path (e.g. cancel racing completion)
                return Ok(());
            }
            let from = instance.status;
            instance.status = state;
            instance.failure = failure;
            instance.allocation = None;
            instance.updated_at = OffsetDateTime::now_utc();
            self.publish_transition(tenant, from, state);
            instance.clone()
        };

        self.pool.release(tenant);
        self.persist(&snapshot);
        Ok(())
    }

    fn publish_transition(&self, tenant: TenantId, from: StartupState, to: StartupState) {
        if let Some(ref bus) = self.bus {
            bus.publish(
                Event::new(
                    Severity::Info,
                    Category::Lifecycle,
                    Payload::StartupStateChanged {
                        from: from.to_string(),
                        to: to.to_string(),
                    },
                )
                .with_tenant(tenant),
            );
        }
    }

    fn persist(&self, instance: &StartupInstance) {
        if let Some(ref store) = self.store {
            if let Err(e) = store.save(instance) {
                // State loss is survivable; accounting lives in memory
                warn!("Persist failed for tenant {}: {}", instance.id, e);
            }
        }
    }
}
