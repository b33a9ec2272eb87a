/*!
 * Budget Monitor
 * Admission gating and spend recording across per-tenant ledgers
 *
 * Each tenant's ledger sits behind its own lock so recording spend for
 * different tenants never contends. Alerts go out on the event bus; every
 * charge is appended to the audit journal.
 */

use super::ledger::{BudgetLedger, BudgetLimits, BudgetSnapshot, ChargeAlert};
use crate::core::config::BudgetConfig;
use crate::core::errors::OrchestratorError;
use crate::core::types::{CostCents, TenantId};
use crate::events::{AlertBus, Category, Event, Payload, Severity};
use crate::store::journal::{BudgetJournal, JournalEntry};
use dashmap::DashMap;
use log::{info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use time::OffsetDateTime;

/// Tracks spend per tenant and enforces tier limits as backpressure
pub struct BudgetMonitor {
    config: BudgetConfig,
    ledgers: DashMap<TenantId, Arc<Mutex<BudgetLedger>>>,
    bus: Option<AlertBus>,
    journal: Option<Arc<BudgetJournal>>,
}

impl BudgetMonitor {
    pub fn new(config: BudgetConfig) -> Self {
        Self {
            config,
            ledgers: DashMap::new(),
            bus: None,
            journal: None,
        }
    }

    /// Attach an alert bus for threshold/limit events
    #[must_use]
    pub fn with_alert_bus(mut self, bus: AlertBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Attach the append-only audit journal
    #[must_use]
    pub fn with_journal(mut self, journal: Arc<BudgetJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Register a tenant with its limits; replaces any prior ledger
    pub fn register_tenant(&self, tenant: TenantId, limits: BudgetLimits) {
        info!("Budget registered for tenant {}: {:?}", tenant, limits);
        self.ledgers.insert(
            tenant,
            Arc::new(Mutex::new(BudgetLedger::new(limits, OffsetDateTime::now_utc()))),
        );
    }

    /// Drop a tenant's ledger (terminal cleanup); journal rows remain
    pub fn remove_tenant(&self, tenant: TenantId) -> bool {
        self.ledgers.remove(&tenant).is_some()
    }

    /// Operator override: replace a tenant's limits in place
    pub fn set_limits(&self, tenant: TenantId, limits: BudgetLimits) -> Result<(), OrchestratorError> {
        let ledger = self.ledger(tenant)?;
        ledger.lock().set_limits(limits);
        info!("Budget limits overridden for tenant {}", tenant);
        Ok(())
    }

    /// Gate a task before dispatch: deny if any tier would be exceeded
    pub fn proceed(&self, tenant: TenantId, estimated: CostCents) -> Result<(), OrchestratorError> {
        self.proceed_at(tenant, estimated, OffsetDateTime::now_utc())
    }

    pub fn proceed_at(
        &self,
        tenant: TenantId,
        estimated: CostCents,
        now: OffsetDateTime,
    ) -> Result<(), OrchestratorError> {
        let ledger = self.ledger(tenant)?;
        let denied = ledger.lock().would_exceed(estimated, now);
        match denied {
            Some(tier) => {
                warn!(
                    "Budget denied tenant {}: estimated {} cents exceeds {} tier",
                    tenant, estimated, tier
                );
                Err(OrchestratorError::BudgetExceeded {
                    tenant,
                    tier: tier.to_string(),
                })
            }
            None => Ok(()),
        }
    }

    /// Record actual cost after a completed invocation
    pub fn record(&self, tenant: TenantId, actual: CostCents) -> Result<(), OrchestratorError> {
        self.record_at(tenant, actual, OffsetDateTime::now_utc())
    }

    pub fn record_at(
        &self,
        tenant: TenantId,
        actual: CostCents,
        now: OffsetDateTime,
    ) -> Result<(), OrchestratorError> {
        let ledger = self.ledger(tenant)?;
        let (charges, alerts) = ledger.lock().charge(actual, self.config.alert_fraction, now);

        if let Some(ref journal) = self.journal {
            for charge in &charges {
                let entry = JournalEntry {
                    timestamp: now,
                    tier: charge.tier.to_string(),
                    delta_cents: charge.delta,
                    resulting_total_cents: charge.resulting_total,
                };
                if let Err(e) = journal.append(tenant, &entry) {
                    // Audit failure must not corrupt the ledger; it is
                    // already charged. Surface loudly and move on.
                    warn!("Budget journal append failed for {}: {}", tenant, e);
                }
            }
        }

        for alert in alerts {
            self.publish_alert(tenant, alert);
        }
        Ok(())
    }

    /// Read-only limits/spent/percent view for external reporting
    pub fn status(&self, tenant: TenantId) -> Result<BudgetSnapshot, OrchestratorError> {
        self.status_at(tenant, OffsetDateTime::now_utc())
    }

    pub fn status_at(
        &self,
        tenant: TenantId,
        now: OffsetDateTime,
    ) -> Result<BudgetSnapshot, OrchestratorError> {
        let ledger = self.ledger(tenant)?;
        let snapshot = ledger.lock().snapshot(now);
        Ok(snapshot)
    }

    /// Tightest remaining headroom across limited tiers, for provider routing
    pub fn headroom(&self, tenant: TenantId) -> Option<CostCents> {
        self.status(tenant).ok().and_then(|s| s.headroom())
    }

    fn ledger(&self, tenant: TenantId) -> Result<Arc<Mutex<BudgetLedger>>, OrchestratorError> {
        self.ledgers
            .get(&tenant)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(OrchestratorError::TenantNotFound(tenant))
    }

    fn publish_alert(&self, tenant: TenantId, alert: ChargeAlert) {
        let Some(ref bus) = self.bus else { return };
        let event = match alert {
            ChargeAlert::Threshold { tier, spent, limit } => Event::new(
                Severity::Warn,
                Category::Budget,
                Payload::BudgetThreshold {
                    tier: tier.to_string(),
                    spent_cents: spent,
                    limit_cents: limit,
                    fraction: spent as f64 / limit as f64,
                },
            ),
            ChargeAlert::LimitReached { tier, limit } => Event::new(
                Severity::Error,
                Category::Budget,
                Payload::BudgetLimitReached {
                    tier: tier.to_string(),
                    limit_cents: limit,
                },
            ),
        };
        bus.publish(event.with_tenant(tenant));
    }
}
