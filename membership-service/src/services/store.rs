//! Persistence contract shared by the Postgres and in-memory stores.
//!
//! Every collection the billing engine touches exposes a live subscription: a
//! `watch` channel that always holds the full current collection and is
//! replaced on every change.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use service_core::error::AppError;
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

use crate::models::{
    CheckIn, CreateMembership, GymSettings, LedgerEntry, LedgerEntryPatch, Membership,
    MembershipPatch, NewLedgerEntry, RenewalCharge,
};

pub type MembershipSnapshot = Arc<Vec<Membership>>;
pub type LedgerSnapshot = Arc<Vec<LedgerEntry>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("membership {membership_id} already charged for cycle due {cycle_due}")]
    DuplicateCharge {
        membership_id: Uuid,
        cycle_due: NaiveDate,
    },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("store error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        StoreError::NotFound { entity, id }
    }

    /// Failures that may clear up on their own and are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Backend(_))
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => AppError::NotFound(anyhow::Error::new(err)),
            StoreError::DuplicateCharge { .. } | StoreError::Conflict(_) => {
                AppError::Conflict(anyhow::Error::new(err))
            }
            StoreError::Unavailable(_) => AppError::ServiceUnavailable,
            StoreError::Corrupt(_) | StoreError::Backend(_) => {
                AppError::DatabaseError(anyhow::Error::new(err))
            }
        }
    }
}

#[async_trait]
pub trait MembershipStore: Send + Sync {
    /// Live view of all memberships ordered by name.
    fn subscribe_memberships(&self) -> watch::Receiver<MembershipSnapshot>;

    async fn list_memberships(&self) -> Result<Vec<Membership>, StoreError>;

    async fn get_membership(&self, membership_id: Uuid) -> Result<Option<Membership>, StoreError>;

    async fn insert_membership(&self, input: &CreateMembership) -> Result<Membership, StoreError>;

    /// Partial merge: only the fields named in `patch` are overwritten.
    async fn update_membership(
        &self,
        membership_id: Uuid,
        patch: &MembershipPatch,
    ) -> Result<Membership, StoreError>;

    /// `balance = balance + delta`, applied by the store so concurrent writers
    /// do not overwrite each other.
    async fn adjust_balance(
        &self,
        membership_id: Uuid,
        delta: Decimal,
    ) -> Result<Membership, StoreError>;

    async fn delete_membership(&self, membership_id: Uuid) -> Result<(), StoreError>;
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Live view of the ledger ordered by entry date, newest first.
    fn subscribe_ledger(&self) -> watch::Receiver<LedgerSnapshot>;

    async fn list_ledger(&self) -> Result<Vec<LedgerEntry>, StoreError>;

    /// Insert keyed by `entry.entry_id`; re-inserting the same id is a no-op that
    /// returns the stored entry.
    async fn insert_ledger_entry(&self, entry: &NewLedgerEntry) -> Result<LedgerEntry, StoreError>;

    async fn update_ledger_entry(
        &self,
        entry_id: Uuid,
        patch: &LedgerEntryPatch,
    ) -> Result<LedgerEntry, StoreError>;

    async fn delete_ledger_entry(&self, entry_id: Uuid) -> Result<(), StoreError>;
}

#[async_trait]
pub trait RenewalStore: Send + Sync {
    /// Atomically book the fee entry, subtract the amount from the balance and
    /// move `last_membership_payment` to the settled due date.
    ///
    /// Fails with [`StoreError::DuplicateCharge`] when the membership already has
    /// an entry for the same cycle due date. No entry is booked and the balance
    /// is untouched, but an anchor earlier than the cycle due date is moved up
    /// to it so the following cycle stays billable.
    async fn record_renewal(
        &self,
        charge: &RenewalCharge,
    ) -> Result<(LedgerEntry, Membership), StoreError>;
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Current settings; defaults (all prices zero) when never saved.
    async fn get_settings(&self) -> Result<GymSettings, StoreError>;

    async fn put_settings(&self, settings: &GymSettings) -> Result<GymSettings, StoreError>;
}

#[async_trait]
pub trait CheckInStore: Send + Sync {
    async fn check_in(&self, membership: &Membership) -> Result<CheckIn, StoreError>;

    async fn check_out(&self, check_in_id: Uuid) -> Result<CheckIn, StoreError>;

    /// Most recent first.
    async fn list_check_ins(&self, limit: usize) -> Result<Vec<CheckIn>, StoreError>;
}

/// Everything the service needs from persistence.
#[async_trait]
pub trait GymStore:
    MembershipStore + LedgerStore + RenewalStore + SettingsStore + CheckInStore
{
    async fn health_check(&self) -> Result<(), StoreError>;
}
