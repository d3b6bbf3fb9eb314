//! In-process store with the same semantics as the Postgres store.
//!
//! Used by the test suite and for local runs with `STORE_BACKEND=memory`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::{watch, Mutex};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::models::{
    CheckIn, CreateMembership, EntryDirection, GymSettings, LedgerEntry, LedgerEntryPatch,
    Membership, MembershipPatch, NewLedgerEntry, RenewalCharge, FEE_CATEGORY, RENEWAL_ACTOR,
    RENEWAL_DESCRIPTION,
};
use crate::services::store::{
    CheckInStore, GymStore, LedgerSnapshot, LedgerStore, MembershipSnapshot, MembershipStore,
    RenewalStore, SettingsStore, StoreError,
};

#[derive(Default)]
struct State {
    memberships: HashMap<Uuid, Membership>,
    ledger: HashMap<Uuid, LedgerEntry>,
    settings: Option<GymSettings>,
    check_ins: Vec<CheckIn>,
}

impl State {
    fn membership_snapshot(&self) -> MembershipSnapshot {
        let mut memberships: Vec<Membership> = self.memberships.values().cloned().collect();
        memberships.sort_by(|a, b| {
            a.name
                .cmp(&b.name)
                .then_with(|| a.membership_id.cmp(&b.membership_id))
        });
        Arc::new(memberships)
    }

    fn ledger_snapshot(&self) -> LedgerSnapshot {
        let mut entries: Vec<LedgerEntry> = self.ledger.values().cloned().collect();
        entries.sort_by(|a, b| {
            b.entry_date
                .cmp(&a.entry_date)
                .then_with(|| b.created_utc.cmp(&a.created_utc))
        });
        Arc::new(entries)
    }

    fn cycle_settled(&self, charge: &RenewalCharge) -> bool {
        self.ledger.values().any(|entry| {
            entry.membership_id == Some(charge.membership_id)
                && entry.cycle_due == Some(charge.cycle_due)
        })
    }
}

struct Inner {
    state: Mutex<State>,
    memberships_tx: watch::Sender<MembershipSnapshot>,
    ledger_tx: watch::Sender<LedgerSnapshot>,
}

/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (memberships_tx, _) = watch::channel(Arc::new(Vec::new()));
        let (ledger_tx, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                memberships_tx,
                ledger_tx,
            }),
        }
    }

    fn publish_memberships(&self, state: &State) {
        self.inner
            .memberships_tx
            .send_replace(state.membership_snapshot());
    }

    fn publish_ledger(&self, state: &State) {
        self.inner.ledger_tx.send_replace(state.ledger_snapshot());
    }
}

#[async_trait]
impl MembershipStore for MemoryStore {
    fn subscribe_memberships(&self) -> watch::Receiver<MembershipSnapshot> {
        self.inner.memberships_tx.subscribe()
    }

    async fn list_memberships(&self) -> Result<Vec<Membership>, StoreError> {
        let state = self.inner.state.lock().await;
        Ok(state.membership_snapshot().as_ref().clone())
    }

    async fn get_membership(&self, membership_id: Uuid) -> Result<Option<Membership>, StoreError> {
        let state = self.inner.state.lock().await;
        Ok(state.memberships.get(&membership_id).cloned())
    }

    #[instrument(skip(self, input), fields(name = %input.name))]
    async fn insert_membership(&self, input: &CreateMembership) -> Result<Membership, StoreError> {
        let now = Utc::now();
        let membership = Membership {
            membership_id: Uuid::new_v4(),
            name: input.name.clone(),
            email: input.email.clone(),
            phone: input.phone.clone(),
            status: input.status,
            plan: input.plan.clone(),
            balance: input.balance,
            join_date: input.join_date.clone(),
            last_membership_payment: input.last_membership_payment.clone(),
            created_utc: now,
            updated_utc: now,
        };

        let mut state = self.inner.state.lock().await;
        state
            .memberships
            .insert(membership.membership_id, membership.clone());
        self.publish_memberships(&state);
        debug!(membership_id = %membership.membership_id, "Membership inserted");

        Ok(membership)
    }

    async fn update_membership(
        &self,
        membership_id: Uuid,
        patch: &MembershipPatch,
    ) -> Result<Membership, StoreError> {
        let mut state = self.inner.state.lock().await;
        let membership = state
            .memberships
            .get_mut(&membership_id)
            .ok_or_else(|| StoreError::not_found("membership", membership_id))?;
        patch.apply_to(membership);
        membership.updated_utc = Utc::now();
        let updated = membership.clone();
        self.publish_memberships(&state);

        Ok(updated)
    }

    async fn adjust_balance(
        &self,
        membership_id: Uuid,
        delta: Decimal,
    ) -> Result<Membership, StoreError> {
        let mut state = self.inner.state.lock().await;
        let membership = state
            .memberships
            .get_mut(&membership_id)
            .ok_or_else(|| StoreError::not_found("membership", membership_id))?;
        membership.balance += delta;
        membership.updated_utc = Utc::now();
        let updated = membership.clone();
        self.publish_memberships(&state);

        Ok(updated)
    }

    async fn delete_membership(&self, membership_id: Uuid) -> Result<(), StoreError> {
        let mut state = self.inner.state.lock().await;
        state
            .memberships
            .remove(&membership_id)
            .ok_or_else(|| StoreError::not_found("membership", membership_id))?;
        self.publish_memberships(&state);
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    fn subscribe_ledger(&self) -> watch::Receiver<LedgerSnapshot> {
        self.inner.ledger_tx.subscribe()
    }

    async fn list_ledger(&self) -> Result<Vec<LedgerEntry>, StoreError> {
        let state = self.inner.state.lock().await;
        Ok(state.ledger_snapshot().as_ref().clone())
    }

    async fn insert_ledger_entry(&self, entry: &NewLedgerEntry) -> Result<LedgerEntry, StoreError> {
        let mut state = self.inner.state.lock().await;
        if let Some(existing) = state.ledger.get(&entry.entry_id) {
            return Ok(existing.clone());
        }
        let stored = entry.clone().into_entry(None);
        state.ledger.insert(stored.entry_id, stored.clone());
        self.publish_ledger(&state);
        Ok(stored)
    }

    async fn update_ledger_entry(
        &self,
        entry_id: Uuid,
        patch: &LedgerEntryPatch,
    ) -> Result<LedgerEntry, StoreError> {
        let mut state = self.inner.state.lock().await;
        let entry = state
            .ledger
            .get_mut(&entry_id)
            .ok_or_else(|| StoreError::not_found("ledger entry", entry_id))?;
        patch.apply_to(entry);
        let updated = entry.clone();
        self.publish_ledger(&state);
        Ok(updated)
    }

    async fn delete_ledger_entry(&self, entry_id: Uuid) -> Result<(), StoreError> {
        let mut state = self.inner.state.lock().await;
        state
            .ledger
            .remove(&entry_id)
            .ok_or_else(|| StoreError::not_found("ledger entry", entry_id))?;
        self.publish_ledger(&state);
        Ok(())
    }
}

#[async_trait]
impl RenewalStore for MemoryStore {
    #[instrument(skip(self, charge), fields(membership_id = %charge.membership_id, cycle_due = %charge.cycle_due))]
    async fn record_renewal(
        &self,
        charge: &RenewalCharge,
    ) -> Result<(LedgerEntry, Membership), StoreError> {
        let mut state = self.inner.state.lock().await;

        if !state.memberships.contains_key(&charge.membership_id) {
            return Err(StoreError::not_found("membership", charge.membership_id));
        }
        if state.cycle_settled(charge) {
            // Settled elsewhere: catch the anchor up so the next cycle can bill.
            let cycle_due = charge.cycle_due.to_string();
            if let Some(membership) = state.memberships.get_mut(&charge.membership_id) {
                let behind = membership
                    .last_membership_payment
                    .as_deref()
                    .map_or(true, |last| last < cycle_due.as_str());
                if behind {
                    debug!(
                        membership_id = %charge.membership_id,
                        cycle_due = %cycle_due,
                        "Anchor moved to settled cycle"
                    );
                    membership.last_membership_payment = Some(cycle_due);
                    membership.updated_utc = Utc::now();
                    self.publish_memberships(&state);
                }
            }
            return Err(StoreError::DuplicateCharge {
                membership_id: charge.membership_id,
                cycle_due: charge.cycle_due,
            });
        }

        let entry = NewLedgerEntry {
            entry_id: charge.entry_id,
            amount: charge.amount,
            direction: EntryDirection::Income,
            description: RENEWAL_DESCRIPTION.to_string(),
            entry_date: charge.charged_on,
            category: FEE_CATEGORY.to_string(),
            membership_id: Some(charge.membership_id),
            membership_name: Some(charge.membership_name.clone()),
            created_by: Some(RENEWAL_ACTOR.to_string()),
        }
        .into_entry(Some(charge.cycle_due));
        state.ledger.insert(entry.entry_id, entry.clone());

        let membership = state
            .memberships
            .get_mut(&charge.membership_id)
            .ok_or_else(|| StoreError::not_found("membership", charge.membership_id))?;
        membership.balance -= charge.amount;
        membership.last_membership_payment = Some(charge.cycle_due.to_string());
        membership.updated_utc = Utc::now();
        let membership = membership.clone();

        self.publish_ledger(&state);
        self.publish_memberships(&state);

        Ok((entry, membership))
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn get_settings(&self) -> Result<GymSettings, StoreError> {
        let state = self.inner.state.lock().await;
        Ok(state.settings.clone().unwrap_or_default())
    }

    async fn put_settings(&self, settings: &GymSettings) -> Result<GymSettings, StoreError> {
        let mut state = self.inner.state.lock().await;
        state.settings = Some(settings.clone());
        Ok(settings.clone())
    }
}

#[async_trait]
impl CheckInStore for MemoryStore {
    async fn check_in(&self, membership: &Membership) -> Result<CheckIn, StoreError> {
        let check_in = CheckIn {
            check_in_id: Uuid::new_v4(),
            membership_id: membership.membership_id,
            membership_name: membership.name.clone(),
            checked_in_utc: Utc::now(),
            checked_out_utc: None,
        };
        let mut state = self.inner.state.lock().await;
        state.check_ins.push(check_in.clone());
        Ok(check_in)
    }

    async fn check_out(&self, check_in_id: Uuid) -> Result<CheckIn, StoreError> {
        let mut state = self.inner.state.lock().await;
        let check_in = state
            .check_ins
            .iter_mut()
            .find(|c| c.check_in_id == check_in_id)
            .ok_or_else(|| StoreError::not_found("check-in", check_in_id))?;
        if check_in.checked_out_utc.is_some() {
            return Err(StoreError::Conflict(format!(
                "check-in {} already closed",
                check_in_id
            )));
        }
        check_in.checked_out_utc = Some(Utc::now());
        Ok(check_in.clone())
    }

    async fn list_check_ins(&self, limit: usize) -> Result<Vec<CheckIn>, StoreError> {
        let state = self.inner.state.lock().await;
        Ok(state.check_ins.iter().rev().take(limit).cloned().collect())
    }
}

#[async_trait]
impl GymStore for MemoryStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
