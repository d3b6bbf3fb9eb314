//! Ledger entry model.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Category every membership fee is booked under.
pub const FEE_CATEGORY: &str = "Cuota";
/// Description of entries written by the renewal engine.
pub const RENEWAL_DESCRIPTION: &str = "Renovación Cuota Automática";
/// Actor label of entries written by the renewal engine.
pub const RENEWAL_ACTOR: &str = "Sistema Automático";
/// Actor label used when a request carries no `x-actor` header.
pub const DEFAULT_ACTOR: &str = "Sistema";
pub const INITIAL_PAYMENT_DESCRIPTION: &str = "Pago Inicial - Alta";
pub const MANUAL_PAYMENT_DESCRIPTION: &str = "Pago Mensualidad";

const INCOME_CATEGORIES: &[&str] = &["Cuota", "Mensualidad", "Productos", "Servicios", "Otros"];
const EXPENSE_CATEGORIES: &[&str] = &[
    "Alquiler",
    "Servicios",
    "Mantenimiento",
    "Salarios",
    "Equipo",
    "Impuestos",
    "Otros",
];

/// Direction of money flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryDirection {
    Income,
    Expense,
}

impl EntryDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryDirection::Income => "income",
            EntryDirection::Expense => "expense",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "expense" => EntryDirection::Expense,
            _ => EntryDirection::Income,
        }
    }

    pub fn categories(&self) -> &'static [&'static str] {
        match self {
            EntryDirection::Income => INCOME_CATEGORIES,
            EntryDirection::Expense => EXPENSE_CATEGORIES,
        }
    }

    pub fn accepts_category(&self, category: &str) -> bool {
        self.categories().contains(&category)
    }
}

/// An immutable financial fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: Uuid,
    pub amount: Decimal,
    pub direction: EntryDirection,
    pub description: String,
    pub entry_date: NaiveDate,
    pub category: String,
    pub membership_id: Option<Uuid>,
    pub membership_name: Option<String>,
    pub created_by: Option<String>,
    /// Cycle due date settled by an automatic renewal; unique per membership.
    pub cycle_due: Option<NaiveDate>,
    pub created_utc: DateTime<Utc>,
}

/// Input for inserting a ledger entry. The caller generates `entry_id`, which
/// makes retried inserts idempotent.
#[derive(Debug, Clone)]
pub struct NewLedgerEntry {
    pub entry_id: Uuid,
    pub amount: Decimal,
    pub direction: EntryDirection,
    pub description: String,
    pub entry_date: NaiveDate,
    pub category: String,
    pub membership_id: Option<Uuid>,
    pub membership_name: Option<String>,
    pub created_by: Option<String>,
}

impl NewLedgerEntry {
    /// Income entry booked under the membership fee category.
    pub fn fee_income(
        membership_id: Uuid,
        membership_name: &str,
        amount: Decimal,
        description: &str,
        entry_date: NaiveDate,
        actor: &str,
    ) -> Self {
        Self {
            entry_id: Uuid::new_v4(),
            amount,
            direction: EntryDirection::Income,
            description: description.to_string(),
            entry_date,
            category: FEE_CATEGORY.to_string(),
            membership_id: Some(membership_id),
            membership_name: Some(membership_name.to_string()),
            created_by: Some(actor.to_string()),
        }
    }

    pub fn into_entry(self, cycle_due: Option<NaiveDate>) -> LedgerEntry {
        LedgerEntry {
            entry_id: self.entry_id,
            amount: self.amount,
            direction: self.direction,
            description: self.description,
            entry_date: self.entry_date,
            category: self.category,
            membership_id: self.membership_id,
            membership_name: self.membership_name,
            created_by: self.created_by,
            cycle_due,
            created_utc: Utc::now(),
        }
    }
}

/// Administrative edit of a ledger entry.
#[derive(Debug, Clone, Default)]
pub struct LedgerEntryPatch {
    pub amount: Option<Decimal>,
    pub direction: Option<EntryDirection>,
    pub description: Option<String>,
    pub entry_date: Option<NaiveDate>,
    pub category: Option<String>,
}

impl LedgerEntryPatch {
    pub fn apply_to(&self, entry: &mut LedgerEntry) {
        if let Some(amount) = self.amount {
            entry.amount = amount;
        }
        if let Some(direction) = self.direction {
            entry.direction = direction;
        }
        if let Some(description) = &self.description {
            entry.description = description.clone();
        }
        if let Some(entry_date) = self.entry_date {
            entry.entry_date = entry_date;
        }
        if let Some(category) = &self.category {
            entry.category = category.clone();
        }
    }
}
