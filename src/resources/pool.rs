/*!
 * Resource Pool
 * Atomic allocate/release of ports, capacity quotas, and tenant workspaces
 *
 * Ports live in a sorted free-list; memory/cpu/storage are running totals
 * checked against capacity before any state changes. All mutation happens
 * under a single mutex with no I/O inside the critical section; workspace
 * directory creation and removal run after the reservation commits.
 */

use super::types::{ResourceAllocation, ResourceRequirements};
use crate::core::config::PoolConfig;
use crate::core::errors::OrchestratorError;
use crate::core::types::{CapacitySnapshot, TenantId};
use crate::events::{AlertBus, Category, Event, Payload, Severity};
use ahash::HashMap;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use time::OffsetDateTime;

/// Mutable pool state, guarded by a single mutex
struct PoolState {
    free_ports: BTreeSet<u16>,
    used_memory_mb: u64,
    used_cpu_cores: u32,
    used_storage_gb: u64,
    allocations: HashMap<TenantId, ResourceAllocation>,
}

/// Shared pool of ports, capacity quotas, and workspace directories
pub struct ResourcePool {
    config: PoolConfig,
    state: Mutex<PoolState>,
    bus: Option<AlertBus>,
}

impl ResourcePool {
    pub fn new(config: PoolConfig) -> Self {
        let free_ports: BTreeSet<u16> = config.port_range.clone().collect();
        info!(
            "Resource pool initialized: {} ports, {} MB, {} cores, {} GB",
            free_ports.len(),
            config.memory_mb,
            config.cpu_cores,
            config.storage_gb
        );
        Self {
            config,
            state: Mutex::new(PoolState {
                free_ports,
                used_memory_mb: 0,
                used_cpu_cores: 0,
                used_storage_gb: 0,
                allocations: HashMap::default(),
            }),
            bus: None,
        }
    }

    /// Attach an alert bus for exhaustion/release events
    #[must_use]
    pub fn with_alert_bus(mut self, bus: AlertBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Non-mutating probe: can the pool satisfy `requirements` right now
    pub fn check_availability(&self, requirements: &ResourceRequirements) -> bool {
        let state = self.state.lock();
        self.shortfall(&state, requirements).is_none()
    }

    /// Allocate resources for a tenant, retrying within a short bounded window
    ///
    /// Fails with `ResourceExhausted` once the window is spent. Never
    /// over-allocates; a tenant holding a live allocation cannot allocate
    /// again.
    pub async fn allocate(
        &self,
        tenant_id: TenantId,
        requirements: &ResourceRequirements,
    ) -> Result<ResourceAllocation, OrchestratorError> {
        let mut last_err = None;
        for attempt in 0..self.config.alloc_retry_attempts.max(1) {
            if attempt > 0 {
                tokio::time::sleep(self.config.alloc_retry_delay).await;
            }
            match self.try_allocate(tenant_id, requirements) {
                Ok(allocation) => {
                    // Directory creation stays outside the lock; roll the
                    // reservation back if the filesystem refuses.
                    if let Err(e) = std::fs::create_dir_all(&allocation.workspace_dir) {
                        warn!(
                            "Workspace creation failed for tenant {}: {}",
                            tenant_id, e
                        );
                        self.release(tenant_id);
                        return Err(OrchestratorError::Storage(e.to_string()));
                    }
                    if let Some(ref bus) = self.bus {
                        bus.publish(
                            Event::new(
                                Severity::Info,
                                Category::Resource,
                                Payload::ResourcesAllocated {
                                    ports: allocation.ports.iter().copied().collect(),
                                    memory_mb: allocation.memory_mb,
                                },
                            )
                            .with_tenant(tenant_id),
                        );
                    }
                    return Ok(allocation);
                }
                Err(e @ OrchestratorError::ResourceExhausted { .. }) => {
                    debug!(
                        "Allocation attempt {} for tenant {} failed: {}",
                        attempt + 1,
                        tenant_id,
                        e
                    );
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        let err = last_err.unwrap_or(OrchestratorError::ResourceExhausted {
            resource: "pool".into(),
            requested: 0,
            available: 0,
        });
        if let (Some(bus), OrchestratorError::ResourceExhausted { resource, requested, available }) =
            (&self.bus, &err)
        {
            bus.publish(
                Event::new(
                    Severity::Warn,
                    Category::Resource,
                    Payload::ResourceExhausted {
                        resource: resource.clone(),
                        requested: *requested,
                        available: *available,
                    },
                )
                .with_tenant(tenant_id),
            );
        }
        Err(err)
    }

    /// Single atomic allocation attempt
    fn try_allocate(
        &self,
        tenant_id: TenantId,
        requirements: &ResourceRequirements,
    ) -> Result<ResourceAllocation, OrchestratorError> {
        let mut state = self.state.lock();

        if state.allocations.contains_key(&tenant_id) {
            return Err(OrchestratorError::InvalidStateTransition {
                from: "allocated".into(),
                to: "allocated".into(),
            });
        }

        if let Some((resource, requested, available)) = self.shortfall(&state, requirements) {
            return Err(OrchestratorError::ResourceExhausted {
                resource,
                requested,
                available,
            });
        }

        // All dimensions satisfiable; commit. Lowest ports first keeps
        // allocation deterministic.
        let ports: BTreeSet<u16> = state
            .free_ports
            .iter()
            .take(requirements.ports)
            .copied()
            .collect();
        for port in &ports {
            state.free_ports.remove(port);
        }
        state.used_memory_mb += requirements.memory_mb;
        state.used_cpu_cores += requirements.cpu_cores;
        state.used_storage_gb += requirements.storage_gb;

        let namespace = format!("tenant-{}", &tenant_id.simple().to_string()[..12]);
        let workspace_dir: PathBuf = self.config.workspace_root.join(&namespace);

        let allocation = ResourceAllocation {
            tenant_id,
            ports,
            memory_mb: requirements.memory_mb,
            cpu_cores: requirements.cpu_cores,
            storage_gb: requirements.storage_gb,
            namespace,
            workspace_dir,
            allocated_at: OffsetDateTime::now_utc(),
            expires_at: None,
        };
        state.allocations.insert(tenant_id, allocation.clone());

        info!(
            "Allocated tenant {}: ports {:?}, {} MB, {} cores, {} GB",
            tenant_id, allocation.ports, allocation.memory_mb, allocation.cpu_cores, allocation.storage_gb
        );
        Ok(allocation)
    }

    /// Release a tenant's allocation
    ///
    /// Idempotent: unknown or already-released tenants are a no-op so
    /// crash-retry paths can call this repeatedly. Returns the released
    /// allocation when one existed.
    pub fn release(&self, tenant_id: TenantId) -> Option<ResourceAllocation> {
        let released = {
            let mut state = self.state.lock();
            match state.allocations.remove(&tenant_id) {
                Some(allocation) => {
                    for port in &allocation.ports {
                        state.free_ports.insert(*port);
                    }
                    state.used_memory_mb -= allocation.memory_mb;
                    state.used_cpu_cores -= allocation.cpu_cores;
                    state.used_storage_gb -= allocation.storage_gb;
                    Some(allocation)
                }
                None => None,
            }
        };

        if let Some(ref allocation) = released {
            // Workspace removal outside the lock; failure leaves a stray
            // directory but never corrupts accounting.
            if let Err(e) = std::fs::remove_dir_all(&allocation.workspace_dir) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(
                        "Workspace removal failed for tenant {}: {}",
                        tenant_id, e
                    );
                }
            }
            info!(
                "Released tenant {}: {} ports, {} MB returned",
                tenant_id,
                allocation.ports.len(),
                allocation.memory_mb
            );
            if let Some(ref bus) = self.bus {
                bus.publish(
                    Event::new(
                        Severity::Info,
                        Category::Resource,
                        Payload::ResourcesReleased {
                            ports: allocation.ports.iter().copied().collect(),
                            memory_mb: allocation.memory_mb,
                        },
                    )
                    .with_tenant(tenant_id),
                );
            }
        } else {
            debug!("Release for unknown tenant {} ignored", tenant_id);
        }
        released
    }

    /// Set a lease deadline on a live allocation
    pub fn set_expiry(&self, tenant_id: TenantId, expires_at: OffsetDateTime) -> bool {
        let mut state = self.state.lock();
        match state.allocations.get_mut(&tenant_id) {
            Some(allocation) => {
                allocation.expires_at = Some(expires_at);
                true
            }
            None => false,
        }
    }

    /// Reclaim allocations whose lease has lapsed; returns reclaimed tenants
    pub fn reap_expired(&self, now: OffsetDateTime) -> Vec<TenantId> {
        let expired: Vec<TenantId> = {
            let state = self.state.lock();
            state
                .allocations
                .values()
                .filter(|a| a.is_expired(now))
                .map(|a| a.tenant_id)
                .collect()
        };
        for tenant in &expired {
            warn!("Reaping expired allocation for tenant {}", tenant);
            self.release(*tenant);
        }
        expired
    }

    /// Look up a tenant's live allocation
    pub fn get(&self, tenant_id: TenantId) -> Option<ResourceAllocation> {
        self.state.lock().allocations.get(&tenant_id).cloned()
    }

    /// Number of live allocations
    pub fn live_count(&self) -> usize {
        self.state.lock().allocations.len()
    }

    /// Free-capacity snapshot
    pub fn snapshot(&self) -> CapacitySnapshot {
        let state = self.state.lock();
        CapacitySnapshot {
            free_ports: state.free_ports.len(),
            free_memory_mb: self.config.memory_mb - state.used_memory_mb,
            free_cpu_cores: self.config.cpu_cores - state.used_cpu_cores,
            free_storage_gb: self.config.storage_gb - state.used_storage_gb,
            live_allocations: state.allocations.len(),
        }
    }

    /// First dimension that cannot be satisfied, if any
    fn shortfall(
        &self,
        state: &PoolState,
        requirements: &ResourceRequirements,
    ) -> Option<(String, u64, u64)> {
        if state.free_ports.len() < requirements.ports {
            return Some((
                "ports".into(),
                requirements.ports as u64,
                state.free_ports.len() as u64,
            ));
        }
        let free_memory = self.config.memory_mb - state.used_memory_mb;
        if free_memory < requirements.memory_mb {
            return Some(("memory_mb".into(), requirements.memory_mb, free_memory));
        }
        let free_cores = self.config.cpu_cores - state.used_cpu_cores;
        if u64::from(free_cores) < u64::from(requirements.cpu_cores) {
            return Some((
                "cpu_cores".into(),
                u64::from(requirements.cpu_cores),
                u64::from(free_cores),
            ));
        }
        let free_storage = self.config.storage_gb - state.used_storage_gb;
        if free_storage < requirements.storage_gb {
            return Some(("storage_gb".into(), requirements.storage_gb, free_storage));
        }
        None
    }
}

/// Shared handle used across the lifecycle and queue layers
pub type SharedResourcePool = Arc<ResourcePool>;

#[cfg(test)]
mod tests {
    use super::*;

    fn test_pool(ports: std::ops::Range<u16>, memory_mb: u64) -> ResourcePool {
        let dir = tempfile::tempdir().unwrap();
        ResourcePool::new(PoolConfig {
            port_range: ports,
            memory_mb,
            cpu_cores: 16,
            storage_gb: 100,
            workspace_root: dir.into_path(),
            alloc_retry_attempts: 1,
            alloc_retry_delay: std::time::Duration::from_millis(1),
        })
    }

    #[tokio::test]
    async fn test_allocate_and_release_restores_capacity() {
        let pool = test_pool(40000..40010, 4096);
        let initial = pool.snapshot();

        let tenant = TenantId::new_v4();
        let req = ResourceRequirements::new(3, 512, 2, 10);
        let allocation = pool.allocate(tenant, &req).await.unwrap();
        assert_eq!(allocation.ports.len(), 3);
        assert!(allocation.workspace_dir.exists());

        let during = pool.snapshot();
        assert_eq!(during.free_ports, initial.free_ports - 3);
        assert_eq!(during.free_memory_mb, initial.free_memory_mb - 512);

        pool.release(tenant);
        let after = pool.snapshot();
        assert_eq!(after.free_ports, initial.free_ports);
        assert_eq!(after.free_memory_mb, initial.free_memory_mb);
        assert_eq!(after.live_allocations, 0);
        assert!(!allocation.workspace_dir.exists());
    }

    #[tokio::test]
    async fn test_port_disjointness() {
        let pool = test_pool(40000..40010, 4096);
        let req = ResourceRequirements::new(3, 100, 1, 1);

        let t1 = TenantId::new_v4();
        let t2 = TenantId::new_v4();
        let a1 = pool.allocate(t1, &req).await.unwrap();
        let a2 = pool.allocate(t2, &req).await.unwrap();

        assert!(a1.ports.is_disjoint(&a2.ports));
        assert_eq!(pool.snapshot().free_ports, 4);

        pool.release(t1);
        assert_eq!(pool.snapshot().free_ports, 7);
    }

    #[tokio::test]
    async fn test_exhaustion_fails_fast() {
        let pool = test_pool(40000..40002, 4096);
        let t1 = TenantId::new_v4();
        pool.allocate(t1, &ResourceRequirements::new(2, 100, 1, 1))
            .await
            .unwrap();

        let err = pool
            .allocate(TenantId::new_v4(), &ResourceRequirements::new(1, 100, 1, 1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::ResourceExhausted { .. }
        ));
    }

    #[tokio::test]
    async fn test_memory_never_over_allocated() {
        let pool = test_pool(40000..40020, 1000);
        pool.allocate(TenantId::new_v4(), &ResourceRequirements::new(1, 800, 1, 1))
            .await
            .unwrap();

        let err = pool
            .allocate(TenantId::new_v4(), &ResourceRequirements::new(1, 300, 1, 1))
            .await
            .unwrap_err();
        match err {
            OrchestratorError::ResourceExhausted { resource, available, .. } => {
                assert_eq!(resource, "memory_mb");
                assert_eq!(available, 200);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let pool = test_pool(40000..40005, 4096);
        let tenant = TenantId::new_v4();
        pool.allocate(tenant, &ResourceRequirements::new(2, 100, 1, 1))
            .await
            .unwrap();

        assert!(pool.release(tenant).is_some());
        assert!(pool.release(tenant).is_none());
        assert!(pool.release(TenantId::new_v4()).is_none());
        assert_eq!(pool.snapshot().free_ports, 5);
    }

    #[tokio::test]
    async fn test_double_allocate_rejected() {
        let pool = test_pool(40000..40010, 4096);
        let tenant = TenantId::new_v4();
        let req = ResourceRequirements::new(1, 100, 1, 1);
        pool.allocate(tenant, &req).await.unwrap();

        let err = pool.allocate(tenant, &req).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::InvalidStateTransition { .. }
        ));
    }

    #[tokio::test]
    async fn test_reap_expired() {
        let pool = test_pool(40000..40010, 4096);
        let tenant = TenantId::new_v4();
        pool.allocate(tenant, &ResourceRequirements::new(1, 100, 1, 1))
            .await
            .unwrap();

        let now = OffsetDateTime::now_utc();
        pool.set_expiry(tenant, now - time::Duration::seconds(1));

        let reaped = pool.reap_expired(now);
        assert_eq!(reaped, vec![tenant]);
        assert_eq!(pool.live_count(), 0);
    }
}
