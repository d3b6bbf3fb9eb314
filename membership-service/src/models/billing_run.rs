//! Billing run model.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What triggered a billing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingRunType {
    Scheduled,
    Manual,
}

impl BillingRunType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingRunType::Scheduled => "scheduled",
            BillingRunType::Manual => "manual",
        }
    }
}

/// Billing run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingRunStatus {
    Completed,
    /// Some renewals failed and will be retried on the next run.
    Partial,
    /// The run could not start, e.g. settings were unreadable.
    Failed,
}

impl BillingRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingRunStatus::Completed => "completed",
            BillingRunStatus::Partial => "partial",
            BillingRunStatus::Failed => "failed",
        }
    }
}

/// Summary of one pass over the membership snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingRun {
    pub run_id: Uuid,
    pub run_type: BillingRunType,
    pub status: BillingRunStatus,
    pub billing_date: NaiveDate,
    pub started_utc: DateTime<Utc>,
    pub completed_utc: DateTime<Utc>,
    pub memberships_evaluated: u32,
    pub renewals_charged: u32,
    pub not_due: u32,
    pub skipped_inactive: u32,
    pub skipped_unpriced: u32,
    pub invalid_dates: u32,
    pub already_charged: u32,
    pub vanished: u32,
    pub failed: u32,
    pub amount_charged: Decimal,
    pub error_message: Option<String>,
}

impl BillingRun {
    pub fn started(run_type: BillingRunType, billing_date: NaiveDate) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            run_type,
            status: BillingRunStatus::Completed,
            billing_date,
            started_utc: now,
            completed_utc: now,
            memberships_evaluated: 0,
            renewals_charged: 0,
            not_due: 0,
            skipped_inactive: 0,
            skipped_unpriced: 0,
            invalid_dates: 0,
            already_charged: 0,
            vanished: 0,
            failed: 0,
            amount_charged: Decimal::ZERO,
            error_message: None,
        }
    }
}

/// One renewal to apply: a fee ledger entry plus the matching balance and
/// anchor update, keyed by (membership, cycle due date).
#[derive(Debug, Clone, PartialEq)]
pub struct RenewalCharge {
    pub entry_id: Uuid,
    pub membership_id: Uuid,
    pub membership_name: String,
    pub amount: Decimal,
    /// Date the charge is booked on.
    pub charged_on: NaiveDate,
    /// Due date being settled; becomes the new `last_membership_payment`.
    pub cycle_due: NaiveDate,
}
