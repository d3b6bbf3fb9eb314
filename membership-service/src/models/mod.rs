//! Domain models for membership-service.

mod billing_run;
mod check_in;
mod cycle;
mod ledger;
mod membership;
mod plan;

pub use billing_run::{BillingRun, BillingRunStatus, BillingRunType, RenewalCharge};
pub use check_in::CheckIn;
pub use cycle::{cycle_anchor, next_due_date, parse_stored_date, CycleError, DueStatus};
pub use ledger::{
    EntryDirection, LedgerEntry, LedgerEntryPatch, NewLedgerEntry, DEFAULT_ACTOR,
    FEE_CATEGORY, INITIAL_PAYMENT_DESCRIPTION, MANUAL_PAYMENT_DESCRIPTION, RENEWAL_ACTOR,
    RENEWAL_DESCRIPTION,
};
pub use membership::{CreateMembership, Membership, MembershipPatch, MembershipStatus};
pub use plan::{GymSettings, Plan, PlanPrices};
