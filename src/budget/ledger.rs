/*!
 * Budget Ledger
 * Per-tenant spend tracking across nested calendar tiers
 *
 * Daily/weekly/monthly counters reset lazily when an operation first
 * observes a new calendar window; the total tier is monotonic for the
 * tenant's lifetime.
 */

use crate::core::types::CostCents;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Budget tier ceilings, tracked independently
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetTier {
    Daily,
    Weekly,
    Monthly,
    Total,
}

impl BudgetTier {
    pub const ALL: [BudgetTier; 4] = [
        BudgetTier::Daily,
        BudgetTier::Weekly,
        BudgetTier::Monthly,
        BudgetTier::Total,
    ];
}

impl std::fmt::Display for BudgetTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BudgetTier::Daily => "daily",
            BudgetTier::Weekly => "weekly",
            BudgetTier::Monthly => "monthly",
            BudgetTier::Total => "total",
        };
        f.write_str(s)
    }
}

/// Calendar window identity for tier reset detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum WindowKey {
    Day { year: i32, ordinal: u16 },
    Week { year: i32, week: u8 },
    Month { year: i32, month: u8 },
    Lifetime,
}

impl WindowKey {
    fn for_tier(tier: BudgetTier, now: OffsetDateTime) -> Self {
        match tier {
            BudgetTier::Daily => WindowKey::Day {
                year: now.year(),
                ordinal: now.date().ordinal(),
            },
            BudgetTier::Weekly => {
                // ISO week-based year differs from the calendar year at
                // year boundaries; both must come from the same calendar
                let (year, week, _) = now.date().to_iso_week_date();
                WindowKey::Week { year, week }
            }
            BudgetTier::Monthly => WindowKey::Month {
                year: now.year(),
                month: u8::from(now.month()),
            },
            BudgetTier::Total => WindowKey::Lifetime,
        }
    }
}

/// Spending ceilings per tier; an unset tier is unlimited
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BudgetLimits {
    pub daily: Option<CostCents>,
    pub weekly: Option<CostCents>,
    pub monthly: Option<CostCents>,
    pub total: Option<CostCents>,
}

impl BudgetLimits {
    #[inline]
    #[must_use]
    pub const fn unlimited() -> Self {
        Self {
            daily: None,
            weekly: None,
            monthly: None,
            total: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn limit(&self, tier: BudgetTier) -> Option<CostCents> {
        match tier {
            BudgetTier::Daily => self.daily,
            BudgetTier::Weekly => self.weekly,
            BudgetTier::Monthly => self.monthly,
            BudgetTier::Total => self.total,
        }
    }
}

/// One tier's running counter within its current window
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TierWindow {
    spent: CostCents,
    window: WindowKey,
    /// One threshold alert per window
    threshold_alerted: bool,
    /// One limit-reached alert per window
    limit_alerted: bool,
}

/// Alert edges crossed by a charge, reported to the monitor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeAlert {
    Threshold {
        tier: BudgetTier,
        spent: CostCents,
        limit: CostCents,
    },
    LimitReached {
        tier: BudgetTier,
        limit: CostCents,
    },
}

/// Journal row data for one tier affected by a charge
#[derive(Debug, Clone)]
pub struct TierCharge {
    pub tier: BudgetTier,
    pub delta: CostCents,
    pub resulting_total: CostCents,
}

/// Read-only budget view for external reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BudgetSnapshot {
    pub limits: BudgetLimits,
    pub spent_daily: CostCents,
    pub spent_weekly: CostCents,
    pub spent_monthly: CostCents,
    pub spent_total: CostCents,
}

impl BudgetSnapshot {
    /// Fraction of the tier limit consumed, if the tier is limited
    pub fn percent(&self, tier: BudgetTier) -> Option<f64> {
        let spent = match tier {
            BudgetTier::Daily => self.spent_daily,
            BudgetTier::Weekly => self.spent_weekly,
            BudgetTier::Monthly => self.spent_monthly,
            BudgetTier::Total => self.spent_total,
        };
        self.limits
            .limit(tier)
            .map(|limit| spent as f64 / limit as f64 * 100.0)
    }

    /// Smallest remaining headroom across limited tiers
    pub fn headroom(&self) -> Option<CostCents> {
        BudgetTier::ALL
            .iter()
            .filter_map(|tier| {
                self.limits.limit(*tier).map(|limit| {
                    let spent = match tier {
                        BudgetTier::Daily => self.spent_daily,
                        BudgetTier::Weekly => self.spent_weekly,
                        BudgetTier::Monthly => self.spent_monthly,
                        BudgetTier::Total => self.spent_total,
                    };
                    limit.saturating_sub(spent)
                })
            })
            .min()
    }
}

/// One tenant's ledger across all tiers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetLedger {
    limits: BudgetLimits,
    daily: TierWindow,
    weekly: TierWindow,
    monthly: TierWindow,
    total: TierWindow,
}

impl BudgetLedger {
    pub fn new(limits: BudgetLimits, now: OffsetDateTime) -> Self {
        let fresh = |tier| TierWindow {
            spent: 0,
            window: WindowKey::for_tier(tier, now),
            threshold_alerted: false,
            limit_alerted: false,
        };
        Self {
            limits,
            daily: fresh(BudgetTier::Daily),
            weekly: fresh(BudgetTier::Weekly),
            monthly: fresh(BudgetTier::Monthly),
            total: fresh(BudgetTier::Total),
        }
    }

    pub fn limits(&self) -> BudgetLimits {
        self.limits
    }

    /// Operator override: replace limits in place
    pub fn set_limits(&mut self, limits: BudgetLimits) {
        self.limits = limits;
    }

    fn tier_mut(&mut self, tier: BudgetTier) -> &mut TierWindow {
        match tier {
            BudgetTier::Daily => &mut self.daily,
            BudgetTier::Weekly => &mut self.weekly,
            BudgetTier::Monthly => &mut self.monthly,
            BudgetTier::Total => &mut self.total,
        }
    }

    fn tier_ref(&self, tier: BudgetTier) -> &TierWindow {
        match tier {
            BudgetTier::Daily => &self.daily,
            BudgetTier::Weekly => &self.weekly,
            BudgetTier::Monthly => &self.monthly,
            BudgetTier::Total => &self.total,
        }
    }

    /// Reset any tier whose calendar window has moved on
    pub fn roll_windows(&mut self, now: OffsetDateTime) {
        for tier in BudgetTier::ALL {
            let key = WindowKey::for_tier(tier, now);
            let window = self.tier_mut(tier);
            if window.window != key {
                window.window = key;
                window.spent = 0;
                window.threshold_alerted = false;
                window.limit_alerted = false;
            }
        }
    }

    /// First tier an estimated charge would push past its limit
    pub fn would_exceed(&mut self, estimated: CostCents, now: OffsetDateTime) -> Option<BudgetTier> {
        self.roll_windows(now);
        BudgetTier::ALL.into_iter().find(|tier| {
            self.limits
                .limit(*tier)
                .map_or(false, |limit| self.tier_ref(*tier).spent + estimated > limit)
        })
    }

    /// Apply an actual charge to every tier
    ///
    /// Actuals are never rejected (admission already happened through
    /// `would_exceed`), which bounds overshoot at one in-flight task.
    pub fn charge(
        &mut self,
        actual: CostCents,
        alert_fraction: f64,
        now: OffsetDateTime,
    ) -> (Vec<TierCharge>, Vec<ChargeAlert>) {
        self.roll_windows(now);
        let mut charges = Vec::with_capacity(4);
        let mut alerts = Vec::new();

        for tier in BudgetTier::ALL {
            let limit = self.limits.limit(tier);
            let window = self.tier_mut(tier);
            window.spent += actual;
            charges.push(TierCharge {
                tier,
                delta: actual,
                resulting_total: window.spent,
            });

            if let Some(limit) = limit {
                let threshold = (limit as f64 * alert_fraction) as CostCents;
                if window.spent >= limit && !window.limit_alerted {
                    window.limit_alerted = true;
                    window.threshold_alerted = true;
                    alerts.push(ChargeAlert::LimitReached { tier, limit });
                } else if window.spent >= threshold && !window.threshold_alerted {
                    window.threshold_alerted = true;
                    alerts.push(ChargeAlert::Threshold {
                        tier,
                        spent: window.spent,
                        limit,
                    });
                }
            }
        }

        (charges, alerts)
    }

    pub fn snapshot(&mut self, now: OffsetDateTime) -> BudgetSnapshot {
        self.roll_windows(now);
        BudgetSnapshot {
            limits: self.limits,
            spent_daily: self.daily.spent,
            spent_weekly: self.weekly.spent,
            spent_monthly: self.monthly.spent,
            spent_total: self.total.spent,
        }
    }
}
