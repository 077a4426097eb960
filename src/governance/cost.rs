//! Monthly spend governance.
//!
//! Every billable generator call is checked against the caller's monthly
//! budget before dispatch and recorded in the append-only ledger afterwards.
//! Spend is always derived from the ledger, never kept as a running counter.

use crate::error::PipelineError;
use crate::models::CostLedgerEntry;
use crate::store::Store;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Tolerance for float rounding when comparing spend to a limit.
const SPEND_EPSILON: f64 = 1e-9;

/// Result of a budget check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetCheck {
    pub allowed: bool,
    pub current_spend: f64,
    pub limit: f64,
}

/// Monthly caps per identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Budgets {
    pub default_monthly_usd: f64,
    pub overrides: HashMap<String, f64>,
}

impl Budgets {
    pub fn limit_for(&self, identity: &str) -> f64 {
        self.overrides
            .get(identity)
            .copied()
            .unwrap_or(self.default_monthly_usd)
    }
}

/// First instant of the current month and of the next one (UTC).
pub fn month_bounds(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let (next_year, next_month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };

    let midnight = |y: i32, m: u32| {
        NaiveDate::from_ymd_opt(y, m, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|n| n.and_utc())
    };

    match (midnight(now.year(), now.month()), midnight(next_year, next_month)) {
        (Some(start), Some(end)) => (start, end),
        _ => (now, now),
    }
}

type PendingHolds = Arc<Mutex<HashMap<String, f64>>>;

/// Spend held for a call that has been admitted but not yet recorded.
///
/// Dropping the reservation releases the hold.
#[derive(Debug)]
pub struct Reservation {
    identity: String,
    amount_usd: f64,
    holds: PendingHolds,
    released: bool,
}

impl Reservation {
    pub fn amount_usd(&self) -> f64 {
        self.amount_usd
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let mut holds = self.holds.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(held) = holds.get_mut(&self.identity) {
            *held -= self.amount_usd;
            if *held <= SPEND_EPSILON {
                holds.remove(&self.identity);
            }
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.release();
    }
}

/// Budget enforcement over the ledger in a [`Store`].
pub struct CostGovernor {
    store: Arc<dyn Store>,
    budgets: Budgets,
    holds: PendingHolds,
    gate: tokio::sync::Mutex<()>,
}

impl CostGovernor {
    pub fn new(store: Arc<dyn Store>, budgets: Budgets) -> Self {
        Self {
            store,
            budgets,
            holds: Arc::new(Mutex::new(HashMap::new())),
            gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Would `projected_usd` more spend stay within this month's budget?
    pub async fn check_allowed(
        &self,
        identity: &str,
        projected_usd: f64,
    ) -> Result<BudgetCheck, PipelineError> {
        self.check_at(identity, projected_usd, Utc::now()).await
    }

    async fn check_at(
        &self,
        identity: &str,
        projected_usd: f64,
        now: DateTime<Utc>,
    ) -> Result<BudgetCheck, PipelineError> {
        let (start, end) = month_bounds(now);
        let recorded = self.store.sum_ledger(identity, start, end).await?;
        let held = self
            .holds
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(identity)
            .copied()
            .unwrap_or(0.0);

        let current_spend = recorded + held;
        let limit = self.budgets.limit_for(identity);
        let allowed = current_spend + projected_usd.max(0.0) <= limit + SPEND_EPSILON;

        debug!(
            "Budget check for {}: spent ${:.4} + ${:.4} vs ${:.2} -> {}",
            identity, current_spend, projected_usd, limit, allowed
        );

        Ok(BudgetCheck {
            allowed,
            current_spend,
            limit,
        })
    }

    /// Check and hold `projected_usd` atomically.
    ///
    /// Concurrent reservations for one identity are serialized, so calls of
    /// the same run cannot jointly overrun the budget.
    pub async fn reserve(
        &self,
        identity: &str,
        projected_usd: f64,
    ) -> Result<Reservation, PipelineError> {
        let _gate = self.gate.lock().await;
        let check = self.check_allowed(identity, projected_usd).await?;

        if !check.allowed {
            return Err(PipelineError::BudgetExceeded {
                identity: identity.to_string(),
                current_spend: check.current_spend,
                projected: projected_usd,
                limit: check.limit,
            });
        }

        let amount = projected_usd.max(0.0);
        *self
            .holds
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(identity.to_string())
            .or_insert(0.0) += amount;

        Ok(Reservation {
            identity: identity.to_string(),
            amount_usd: amount,
            holds: Arc::clone(&self.holds),
            released: false,
        })
    }

    /// Append a ledger entry. The core does not de-duplicate; callers that
    /// retry should set an idempotency key.
    pub async fn record(&self, entry: CostLedgerEntry) -> Result<(), PipelineError> {
        debug!(
            "Recording ${:.4} for {} (entity {:?})",
            entry.amount_usd, entry.identity, entry.related_entity_id
        );
        self.store.append_ledger_entry(entry).await
    }

    /// Record the entry for a reserved call and release its hold.
    pub async fn settle(
        &self,
        mut reservation: Reservation,
        entry: CostLedgerEntry,
    ) -> Result<(), PipelineError> {
        let result = self.record(entry).await;
        if let Err(ref e) = result {
            warn!("Ledger write failed, releasing hold anyway: {}", e);
        }
        reservation.release();
        result
    }

    /// Cumulative spend attributed to one entity, recomputed from the ledger.
    pub async fn entity_cost(&self, entity_id: &str) -> Result<f64, PipelineError> {
        Ok(self
            .store
            .ledger_for_entity(entity_id)
            .await?
            .iter()
            .map(|e| e.amount_usd)
            .sum())
    }
}
