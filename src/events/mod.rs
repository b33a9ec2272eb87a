/*!
 * Event System
 * Strongly-typed orchestration events distributed over a broadcast channel
 *
 * Health and budget transitions are published here instead of invoking
 * subscriber callbacks inline, so a failing observer can never stall or
 * crash a monitor loop.
 */

pub mod tracer;

pub use tracer::init_tracing;

use crate::core::types::{CostCents, ProviderId, TaskId, TenantId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Event severity for filtering and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Severity {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
    Critical = 4,
}

/// Event category for organization and querying
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Category {
    Lifecycle,
    Resource,
    Queue,
    Provider,
    Budget,
}

/// Unified event type - all orchestration alerts flow through this
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub severity: Severity,
    pub category: Category,
    pub tenant: Option<TenantId>,
    pub payload: Payload,
}

/// Event payload - strongly typed variants for each transition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    // Lifecycle events
    StartupStateChanged {
        from: String,
        to: String,
    },

    // Resource events
    ResourcesAllocated {
        ports: Vec<u16>,
        memory_mb: u64,
    },
    ResourcesReleased {
        ports: Vec<u16>,
        memory_mb: u64,
    },
    ResourceExhausted {
        resource: String,
        requested: u64,
        available: u64,
    },

    // Queue events
    TaskFailed {
        task: TaskId,
        reason: String,
        attempts: u32,
    },

    // Provider events
    HealthChanged {
        provider: ProviderId,
        from: String,
        to: String,
    },

    // Budget events
    BudgetThreshold {
        tier: String,
        spent_cents: CostCents,
        limit_cents: CostCents,
        fraction: f64,
    },
    BudgetLimitReached {
        tier: String,
        limit_cents: CostCents,
    },
}

impl Event {
    #[inline]
    pub fn new(severity: Severity, category: Category, payload: Payload) -> Self {
        Self {
            severity,
            category,
            tenant: None,
            payload,
        }
    }

    #[inline]
    pub fn with_tenant(mut self, tenant: TenantId) -> Self {
        self.tenant = Some(tenant);
        self
    }
}

/// Broadcast capacity; a subscriber that lags past this loses oldest events
/// rather than applying backpressure to the publishing monitor
const BUS_CAPACITY: usize = 1024;

/// Alert bus - multi-observer event distribution
///
/// Publishing never blocks and never fails: with zero subscribers the event
/// is simply dropped, and slow subscribers observe `Lagged` on their side.
#[derive(Clone)]
pub struct AlertBus {
    tx: Arc<broadcast::Sender<Event>>,
}

impl AlertBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx: Arc::new(tx) }
    }

    /// Publish an event to all current subscribers
    #[inline]
    pub fn publish(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to all subsequent events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Spawn a consumer loop around a callback, isolating it from publishers
    ///
    /// Callback panics abort only the consumer task; lagged windows are
    /// skipped. This is the compatibility shim for sinks that want the old
    /// register-a-callback shape.
    pub fn on_event<F>(&self, mut f: F) -> tokio::task::JoinHandle<()>
    where
        F: FnMut(Event) + Send + 'static,
    {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => f(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!("Alert subscriber lagged, skipped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

impl Default for AlertBus {
    fn default() -> Self {
        Self::new()
    }
}
