//! Membership model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Membership status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipStatus {
    Active,
    Inactive,
    Pending,
}

impl MembershipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipStatus::Active => "active",
            MembershipStatus::Inactive => "inactive",
            MembershipStatus::Pending => "pending",
        }
    }

    /// Unrecognised stored values read as `Inactive` so they are never billed.
    pub fn from_string(s: &str) -> Self {
        match s {
            "active" => MembershipStatus::Active,
            "pending" => MembershipStatus::Pending,
            _ => MembershipStatus::Inactive,
        }
    }
}

/// One paying client.
///
/// `join_date` and `last_membership_payment` are kept as the raw `YYYY-MM-DD`
/// strings found in storage; see [`crate::models::parse_stored_date`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Membership {
    pub membership_id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub status: MembershipStatus,
    pub plan: String,
    pub balance: Decimal,
    pub join_date: String,
    pub last_membership_payment: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Membership {
    pub fn is_active(&self) -> bool {
        self.status == MembershipStatus::Active
    }
}

/// Input for creating a membership.
#[derive(Debug, Clone)]
pub struct CreateMembership {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub status: MembershipStatus,
    pub plan: String,
    pub balance: Decimal,
    pub join_date: String,
    pub last_membership_payment: Option<String>,
}

/// Partial update; only `Some` fields are written.
#[derive(Debug, Clone, Default)]
pub struct MembershipPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub status: Option<MembershipStatus>,
    pub plan: Option<String>,
    pub balance: Option<Decimal>,
    pub join_date: Option<String>,
    pub last_membership_payment: Option<String>,
}

impl MembershipPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.email.is_none()
            && self.phone.is_none()
            && self.status.is_none()
            && self.plan.is_none()
            && self.balance.is_none()
            && self.join_date.is_none()
            && self.last_membership_payment.is_none()
    }

    /// Merge the named fields into `membership`.
    pub fn apply_to(&self, membership: &mut Membership) {
        if let Some(name) = &self.name {
            membership.name = name.clone();
        }
        if let Some(email) = &self.email {
            membership.email = Some(email.clone());
        }
        if let Some(phone) = &self.phone {
            membership.phone = Some(phone.clone());
        }
        if let Some(status) = self.status {
            membership.status = status;
        }
        if let Some(plan) = &self.plan {
            membership.plan = plan.clone();
        }
        if let Some(balance) = self.balance {
            membership.balance = balance;
        }
        if let Some(join_date) = &self.join_date {
            membership.join_date = join_date.clone();
        }
        if let Some(last) = &self.last_membership_payment {
            membership.last_membership_payment = Some(last.clone());
        }
    }
}
