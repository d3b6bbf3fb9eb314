//! Request and response bodies for the HTTP API.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::{
    DueStatus, EntryDirection, GymSettings, LedgerEntry, LedgerEntryPatch, Membership,
    MembershipPatch, MembershipStatus, PlanPrices,
};
use crate::services::accounts::{Enrolment, PaymentReceipt};

fn default_status() -> MembershipStatus {
    MembershipStatus::Active
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateMembershipRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(max = 64))]
    pub phone: Option<String>,
    #[serde(default = "default_status")]
    pub status: MembershipStatus,
    #[validate(length(min = 1, max = 64))]
    pub plan: String,
    /// `YYYY-MM-DD`.
    #[validate(length(equal = 10))]
    pub join_date: String,
    #[serde(default)]
    pub initial_payment: Decimal,
}

impl From<CreateMembershipRequest> for Enrolment {
    fn from(req: CreateMembershipRequest) -> Self {
        Enrolment {
            name: req.name,
            email: req.email,
            phone: req.phone,
            status: req.status,
            plan: req.plan,
            join_date: req.join_date,
            initial_payment: req.initial_payment,
        }
    }
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateMembershipRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(max = 64))]
    pub phone: Option<String>,
    pub status: Option<MembershipStatus>,
    #[validate(length(min = 1, max = 64))]
    pub plan: Option<String>,
    pub balance: Option<Decimal>,
    #[validate(length(equal = 10))]
    pub join_date: Option<String>,
    #[validate(length(equal = 10))]
    pub last_membership_payment: Option<String>,
}

impl From<UpdateMembershipRequest> for MembershipPatch {
    fn from(req: UpdateMembershipRequest) -> Self {
        MembershipPatch {
            name: req.name,
            email: req.email,
            phone: req.phone,
            status: req.status,
            plan: req.plan,
            balance: req.balance,
            join_date: req.join_date,
            last_membership_payment: req.last_membership_payment,
        }
    }
}

/// Membership with its next renewal date, when the stored dates are readable.
#[derive(Debug, Serialize, Deserialize)]
pub struct MembershipResponse {
    #[serde(flatten)]
    pub membership: Membership,
    pub next_due: Option<NaiveDate>,
}

impl MembershipResponse {
    pub fn new(membership: Membership, today: NaiveDate) -> Self {
        let next_due = DueStatus::evaluate(&membership, today)
            .ok()
            .map(|status| status.next_due());
        Self {
            membership,
            next_due,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct PaymentRequest {
    pub amount: Decimal,
    #[validate(length(max = 255))]
    pub description: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaymentResponse {
    pub membership: Membership,
    pub entry: LedgerEntry,
}

impl From<PaymentReceipt> for PaymentResponse {
    fn from(receipt: PaymentReceipt) -> Self {
        Self {
            membership: receipt.membership,
            entry: receipt.entry,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateLedgerEntryRequest {
    pub amount: Decimal,
    pub direction: EntryDirection,
    #[validate(length(min = 1, max = 500))]
    pub description: String,
    /// Defaults to today.
    pub entry_date: Option<NaiveDate>,
    #[validate(length(min = 1, max = 64))]
    pub category: String,
    pub membership_id: Option<Uuid>,
    pub membership_name: Option<String>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateLedgerEntryRequest {
    pub amount: Option<Decimal>,
    pub direction: Option<EntryDirection>,
    #[validate(length(min = 1, max = 500))]
    pub description: Option<String>,
    pub entry_date: Option<NaiveDate>,
    #[validate(length(min = 1, max = 64))]
    pub category: Option<String>,
}

impl From<UpdateLedgerEntryRequest> for LedgerEntryPatch {
    fn from(req: UpdateLedgerEntryRequest) -> Self {
        LedgerEntryPatch {
            amount: req.amount,
            direction: req.direction,
            description: req.description,
            entry_date: req.entry_date,
            category: req.category,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateSettingsRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[serde(default)]
    pub plan_prices: PlanPrices,
}

impl From<UpdateSettingsRequest> for GymSettings {
    fn from(req: UpdateSettingsRequest) -> Self {
        GymSettings {
            name: req.name,
            plan_prices: req.plan_prices,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CheckInRequest {
    pub membership_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct ListCheckInsQuery {
    pub limit: Option<usize>,
}
