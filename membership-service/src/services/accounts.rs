//! Administrative operations on memberships and the ledger.

use std::sync::Arc;

use anyhow::anyhow;
use rust_decimal::Decimal;
use service_core::error::AppError;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::models::{
    parse_stored_date, CreateMembership, EntryDirection, LedgerEntry, LedgerEntryPatch, Membership,
    MembershipStatus, NewLedgerEntry, INITIAL_PAYMENT_DESCRIPTION, MANUAL_PAYMENT_DESCRIPTION,
};
use crate::services::billing::Clock;
use crate::services::store::{GymStore, LedgerStore, MembershipStore, SettingsStore};

/// New client as submitted by the front desk.
#[derive(Debug, Clone)]
pub struct Enrolment {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub status: MembershipStatus,
    pub plan: String,
    /// `YYYY-MM-DD`.
    pub join_date: String,
    /// Amount paid at the desk on sign-up.
    pub initial_payment: Decimal,
}

/// Result of a manual payment.
#[derive(Debug, Clone)]
pub struct PaymentReceipt {
    pub membership: Membership,
    pub entry: LedgerEntry,
}

#[derive(Clone)]
pub struct AccountService {
    store: Arc<dyn GymStore>,
    clock: Arc<dyn Clock>,
}

impl AccountService {
    pub fn new(store: Arc<dyn GymStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Create a membership and charge its first month.
    ///
    /// The opening balance is `initial_payment - plan price`, and the first
    /// cycle is anchored at the join date. A positive initial payment is booked
    /// as a fee entry.
    #[instrument(skip(self, enrolment, actor), fields(name = %enrolment.name, plan = %enrolment.plan))]
    pub async fn enroll(&self, enrolment: Enrolment, actor: &str) -> Result<Membership, AppError> {
        parse_stored_date("join_date", &enrolment.join_date)
            .map_err(|e| AppError::BadRequest(anyhow!(e)))?;
        if enrolment.initial_payment < Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow!(
                "initial payment cannot be negative"
            )));
        }

        let settings = self.store.get_settings().await?;
        let price = settings.plan_prices.resolve(&enrolment.plan);

        let membership = self
            .store
            .insert_membership(&CreateMembership {
                name: enrolment.name,
                email: enrolment.email,
                phone: enrolment.phone,
                status: enrolment.status,
                plan: enrolment.plan,
                balance: enrolment.initial_payment - price,
                last_membership_payment: Some(enrolment.join_date.clone()),
                join_date: enrolment.join_date,
            })
            .await?;

        if enrolment.initial_payment > Decimal::ZERO {
            self.store
                .insert_ledger_entry(&NewLedgerEntry::fee_income(
                    membership.membership_id,
                    &membership.name,
                    enrolment.initial_payment,
                    INITIAL_PAYMENT_DESCRIPTION,
                    self.clock.today(),
                    actor,
                ))
                .await?;
        }

        info!(
            membership_id = %membership.membership_id,
            balance = %membership.balance,
            "Membership enrolled"
        );
        Ok(membership)
    }

    /// Credit a payment to a membership's balance.
    ///
    /// The renewal anchor is left alone, so paying early does not postpone the
    /// next automatic charge.
    #[instrument(skip(self, description, actor), fields(membership_id = %membership_id, amount = %amount))]
    pub async fn register_payment(
        &self,
        membership_id: Uuid,
        amount: Decimal,
        description: Option<String>,
        actor: &str,
    ) -> Result<PaymentReceipt, AppError> {
        if amount <= Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow!(
                "payment amount must be positive"
            )));
        }

        // Credit first: a missing membership stops the payment before anything
        // is booked.
        let membership = self.store.adjust_balance(membership_id, amount).await?;

        let description = description
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| MANUAL_PAYMENT_DESCRIPTION.to_string());
        let booked = self
            .store
            .insert_ledger_entry(&NewLedgerEntry::fee_income(
                membership.membership_id,
                &membership.name,
                amount,
                &description,
                self.clock.today(),
                actor,
            ))
            .await;
        let entry = match booked {
            Ok(entry) => entry,
            Err(e) => {
                warn!(
                    membership_id = %membership_id,
                    error = %e,
                    "Payment entry failed; reverting credit"
                );
                if let Err(revert) = self.store.adjust_balance(membership_id, -amount).await {
                    error!(
                        membership_id = %membership_id,
                        error = %revert,
                        "Failed to revert payment credit"
                    );
                }
                return Err(e.into());
            }
        };

        info!(
            membership_id = %membership_id,
            entry_id = %entry.entry_id,
            balance = %membership.balance,
            "Payment registered"
        );
        Ok(PaymentReceipt { membership, entry })
    }

    /// Book an ad-hoc income or expense.
    #[instrument(skip(self, entry), fields(direction = entry.direction.as_str(), category = %entry.category))]
    pub async fn record_entry(&self, entry: NewLedgerEntry) -> Result<LedgerEntry, AppError> {
        validate_entry(entry.amount, entry.direction, &entry.category)?;
        let stored = self.store.insert_ledger_entry(&entry).await?;
        info!(entry_id = %stored.entry_id, amount = %stored.amount, "Ledger entry recorded");
        Ok(stored)
    }

    /// Edit a ledger entry. The category must still fit the resulting direction.
    #[instrument(skip(self, patch), fields(entry_id = %entry_id))]
    pub async fn edit_entry(
        &self,
        entry_id: Uuid,
        patch: LedgerEntryPatch,
    ) -> Result<LedgerEntry, AppError> {
        if patch.direction.is_some() || patch.category.is_some() || patch.amount.is_some() {
            let current = self
                .store
                .list_ledger()
                .await?
                .into_iter()
                .find(|e| e.entry_id == entry_id)
                .ok_or_else(|| {
                    AppError::NotFound(anyhow!("Ledger entry not found: {}", entry_id))
                })?;
            let mut merged = current;
            patch.apply_to(&mut merged);
            validate_entry(merged.amount, merged.direction, &merged.category)?;
        }

        Ok(self.store.update_ledger_entry(entry_id, &patch).await?)
    }
}

fn validate_entry(
    amount: Decimal,
    direction: EntryDirection,
    category: &str,
) -> Result<(), AppError> {
    if amount <= Decimal::ZERO {
        return Err(AppError::BadRequest(anyhow!("amount must be positive")));
    }
    if !direction.accepts_category(category) {
        return Err(AppError::BadRequest(anyhow!(
            "category '{}' is not valid for {} entries",
            category,
            direction.as_str()
        )));
    }
    Ok(())
}
