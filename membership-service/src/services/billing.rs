//! Automatic monthly renewal engine.
//!
//! The engine wakes on a fixed-delay timer, takes the latest membership
//! snapshot from the store subscription and charges every active membership
//! whose cycle is due. Each charge is applied by the store as one atomic unit
//! keyed by (membership, cycle due date), so re-running a pass, or running
//! several service instances against the same database, never bills a cycle
//! twice.
//!
//! Manual payments do not move `last_membership_payment`; a member who pays
//! ahead is still charged at the original due date.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinSet;
use tokio::time::{interval_at, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::models::{
    BillingRun, BillingRunStatus, BillingRunType, CycleError, DueStatus, Membership, PlanPrices,
    RenewalCharge,
};
use crate::services::metrics::{
    record_billing_run, record_error, record_renewal_amount, record_renewal_outcome,
};
use crate::services::store::{
    GymStore, MembershipSnapshot, MembershipStore, RenewalStore, SettingsStore, StoreError,
};

/// Source of the billing date.
pub trait Clock: Send + Sync {
    /// Today's calendar date, without time of day.
    fn today(&self) -> NaiveDate;
}

/// Local wall-clock date of the host.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        chrono::Local::now().date_naive()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    today: StdMutex<NaiveDate>,
}

impl ManualClock {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            today: StdMutex::new(today),
        }
    }

    pub fn set(&self, today: NaiveDate) {
        *self.today.lock().unwrap_or_else(|e| e.into_inner()) = today;
    }
}

impl Clock for ManualClock {
    fn today(&self) -> NaiveDate {
        *self.today.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Result of evaluating one membership in a run.
#[derive(Debug, Clone, PartialEq)]
pub enum RenewalOutcome {
    Charged {
        amount: Decimal,
        cycle_due: NaiveDate,
    },
    NotDue {
        next_due: NaiveDate,
    },
    Inactive,
    /// Plan has no price (zero or unknown code).
    Unpriced,
    InvalidDate(CycleError),
    /// Another run or instance already settled this cycle.
    AlreadyCharged {
        cycle_due: NaiveDate,
    },
    /// The membership was deleted after the snapshot was taken.
    Vanished,
    /// Transient failure; state untouched, retried on the next run.
    Failed(String),
}

impl RenewalOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RenewalOutcome::Charged { .. } => "charged",
            RenewalOutcome::NotDue { .. } => "not_due",
            RenewalOutcome::Inactive => "inactive",
            RenewalOutcome::Unpriced => "unpriced",
            RenewalOutcome::InvalidDate(_) => "invalid_date",
            RenewalOutcome::AlreadyCharged { .. } => "already_charged",
            RenewalOutcome::Vanished => "vanished",
            RenewalOutcome::Failed(_) => "failed",
        }
    }
}

/// Pure decision for one membership: either a final outcome or a charge to
/// apply.
#[derive(Debug, Clone, PartialEq)]
pub enum Assessment {
    Settled(RenewalOutcome),
    Charge(RenewalCharge),
}

/// Decide what to do with `membership` on `today` under `prices`.
pub fn assess(membership: &Membership, prices: &PlanPrices, today: NaiveDate) -> Assessment {
    if !membership.is_active() {
        return Assessment::Settled(RenewalOutcome::Inactive);
    }

    let next_due = match DueStatus::evaluate(membership, today) {
        Ok(DueStatus::NotDue { next_due }) => {
            return Assessment::Settled(RenewalOutcome::NotDue { next_due });
        }
        Ok(DueStatus::Due { next_due, .. }) => next_due,
        Err(e) => return Assessment::Settled(RenewalOutcome::InvalidDate(e)),
    };

    let amount = prices.resolve(&membership.plan);
    if amount <= Decimal::ZERO {
        return Assessment::Settled(RenewalOutcome::Unpriced);
    }

    Assessment::Charge(RenewalCharge {
        entry_id: Uuid::new_v4(),
        membership_id: membership.membership_id,
        membership_name: membership.name.clone(),
        amount,
        charged_on: today,
        cycle_due: next_due,
    })
}

pub struct BillingEngine {
    store: Arc<dyn GymStore>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    run_lock: Mutex<()>,
    last_run: RwLock<Option<BillingRun>>,
}

impl BillingEngine {
    pub fn new(store: Arc<dyn GymStore>, clock: Arc<dyn Clock>, interval: Duration) -> Self {
        Self {
            store,
            clock,
            interval,
            run_lock: Mutex::new(()),
            last_run: RwLock::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub async fn last_run(&self) -> Option<BillingRun> {
        self.last_run.read().await.clone()
    }

    /// Run one pass over the store's current membership snapshot.
    pub async fn run_now(&self, run_type: BillingRunType) -> BillingRun {
        let snapshot = self.store.subscribe_memberships().borrow().clone();
        self.run_once(snapshot, run_type).await
    }

    /// Evaluate every membership in `snapshot` and apply due renewals.
    ///
    /// Runs are serialised within the process. A failure for one membership is
    /// recorded in the returned report and never aborts the others.
    pub async fn run_once(
        &self,
        snapshot: MembershipSnapshot,
        run_type: BillingRunType,
    ) -> BillingRun {
        let _guard = self.run_lock.lock().await;
        let started = Instant::now();
        let today = self.clock.today();
        let mut run = BillingRun::started(run_type, today);

        // Prices are read on every run so edits apply without a restart.
        let prices = match self.store.get_settings().await {
            Ok(settings) => settings.plan_prices,
            Err(e) => {
                warn!(error = %e, "Billing run skipped: settings unavailable");
                record_error("settings_unavailable");
                run.status = BillingRunStatus::Failed;
                run.error_message = Some(e.to_string());
                return self.finish(run, started).await;
            }
        };

        let mut charges = JoinSet::new();
        for membership in snapshot.iter() {
            run.memberships_evaluated += 1;
            match assess(membership, &prices, today) {
                Assessment::Settled(outcome) => {
                    if let RenewalOutcome::InvalidDate(e) = &outcome {
                        warn!(
                            membership_id = %membership.membership_id,
                            join_date = %membership.join_date,
                            last_membership_payment = ?membership.last_membership_payment,
                            error = %e,
                            "Membership has an unreadable billing date; treated as not due"
                        );
                    } else if outcome == RenewalOutcome::Unpriced {
                        debug!(
                            membership_id = %membership.membership_id,
                            plan = %membership.plan,
                            "Renewal due but plan has no price"
                        );
                    }
                    tally(&mut run, &outcome);
                }
                Assessment::Charge(charge) => {
                    let store = Arc::clone(&self.store);
                    charges.spawn(async move { apply_charge(store.as_ref(), charge).await });
                }
            }
        }

        while let Some(joined) = charges.join_next().await {
            match joined {
                Ok(outcome) => tally(&mut run, &outcome),
                Err(e) => {
                    error!(error = %e, "Renewal task aborted");
                    tally(&mut run, &RenewalOutcome::Failed(e.to_string()));
                }
            }
        }

        if run.failed > 0 {
            run.status = BillingRunStatus::Partial;
        }
        self.finish(run, started).await
    }

    async fn finish(&self, mut run: BillingRun, started: Instant) -> BillingRun {
        run.completed_utc = chrono::Utc::now();
        record_billing_run(
            run.run_type.as_str(),
            run.status.as_str(),
            started.elapsed().as_secs_f64(),
        );

        if run.renewals_charged > 0 || run.failed > 0 || run.status == BillingRunStatus::Failed {
            info!(
                run_id = %run.run_id,
                run_type = run.run_type.as_str(),
                status = run.status.as_str(),
                billing_date = %run.billing_date,
                evaluated = run.memberships_evaluated,
                charged = run.renewals_charged,
                failed = run.failed,
                amount = %run.amount_charged,
                "Billing run finished"
            );
        } else {
            debug!(
                run_id = %run.run_id,
                evaluated = run.memberships_evaluated,
                "Billing run finished with nothing due"
            );
        }

        *self.last_run.write().await = Some(run.clone());
        run
    }

    /// Drive scheduled runs until `shutdown` fires.
    ///
    /// The timer idles while the membership list is empty. A run in progress
    /// when shutdown is requested completes its writes first.
    pub async fn run(
        self: Arc<Self>,
        mut memberships: watch::Receiver<MembershipSnapshot>,
        shutdown: CancellationToken,
    ) {
        let mut ticker = interval_at(tokio::time::Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = self.interval.as_secs_f64(), "Billing engine started");

        loop {
            let idle = memberships.borrow().is_empty();
            if idle {
                debug!("No memberships mirrored; billing engine idle");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    changed = memberships.changed() => {
                        if changed.is_err() {
                            warn!("Membership subscription closed; stopping billing engine");
                            break;
                        }
                        ticker.reset();
                        continue;
                    }
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let snapshot = memberships.borrow_and_update().clone();
            self.run_once(snapshot, BillingRunType::Scheduled).await;
        }

        info!("Billing engine stopped");
    }
}

async fn apply_charge(store: &dyn GymStore, charge: RenewalCharge) -> RenewalOutcome {
    match store.record_renewal(&charge).await {
        Ok((entry, membership)) => {
            info!(
                membership_id = %membership.membership_id,
                entry_id = %entry.entry_id,
                amount = %charge.amount,
                cycle_due = %charge.cycle_due,
                balance = %membership.balance,
                "Membership renewed"
            );
            RenewalOutcome::Charged {
                amount: charge.amount,
                cycle_due: charge.cycle_due,
            }
        }
        Err(StoreError::DuplicateCharge { cycle_due, .. }) => {
            info!(
                membership_id = %charge.membership_id,
                cycle_due = %cycle_due,
                "Cycle already charged elsewhere"
            );
            RenewalOutcome::AlreadyCharged { cycle_due }
        }
        Err(StoreError::NotFound { .. }) => {
            info!(
                membership_id = %charge.membership_id,
                "Membership removed before renewal; dropped"
            );
            RenewalOutcome::Vanished
        }
        Err(e) => {
            warn!(
                membership_id = %charge.membership_id,
                cycle_due = %charge.cycle_due,
                transient = e.is_transient(),
                error = %e,
                "Renewal failed; will retry next run"
            );
            record_error("renewal_failed");
            RenewalOutcome::Failed(e.to_string())
        }
    }
}

fn tally(run: &mut BillingRun, outcome: &RenewalOutcome) {
    record_renewal_outcome(outcome.label());
    match outcome {
        RenewalOutcome::Charged { amount, .. } => {
            run.renewals_charged += 1;
            run.amount_charged += *amount;
            record_renewal_amount(*amount);
        }
        RenewalOutcome::NotDue { .. } => run.not_due += 1,
        RenewalOutcome::Inactive => run.skipped_inactive += 1,
        RenewalOutcome::Unpriced => run.skipped_unpriced += 1,
        RenewalOutcome::InvalidDate(_) => run.invalid_dates += 1,
        RenewalOutcome::AlreadyCharged { .. } => run.already_charged += 1,
        RenewalOutcome::Vanished => run.vanished += 1,
        RenewalOutcome::Failed(_) => run.failed += 1,
    }
}
