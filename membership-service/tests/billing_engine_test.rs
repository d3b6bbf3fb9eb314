//! Automatic renewal tests, driven directly through the engine.

mod common;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common::{date, seed_membership, seed_settings, test_prices, TestApp};
use membership_service::models::{
    BillingRunStatus, BillingRunType, CheckIn, CreateMembership, GymSettings, LedgerEntry,
    LedgerEntryPatch, Membership, MembershipPatch, MembershipStatus, NewLedgerEntry,
    RenewalCharge, RENEWAL_ACTOR, RENEWAL_DESCRIPTION,
};
use membership_service::services::{
    BillingEngine, CheckInStore, GymStore, LedgerSnapshot, LedgerStore, ManualClock,
    MembershipSnapshot, MembershipStore, MemoryStore, RenewalStore, SettingsStore, StoreError,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn engine(store: &MemoryStore, today: &str) -> (BillingEngine, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(date(today)));
    let engine = BillingEngine::new(
        Arc::new(store.clone()),
        clock.clone(),
        Duration::from_secs(10),
    );
    (engine, clock)
}

async fn reload(store: &MemoryStore, membership: &Membership) -> Membership {
    store
        .get_membership(membership.membership_id)
        .await
        .unwrap()
        .expect("membership should exist")
}

#[tokio::test]
async fn due_membership_is_charged_exactly_once() {
    let store = MemoryStore::new();
    seed_settings(&store).await;
    let ana = seed_membership(&store, "Ana", "full", "2024-01-15", dec!(-50)).await;
    let (engine, _) = engine(&store, "2024-02-15");

    let run = engine.run_now(BillingRunType::Manual).await;
    assert_eq!(run.renewals_charged, 1);
    assert_eq!(run.amount_charged, dec!(50));
    assert_eq!(run.status, BillingRunStatus::Completed);

    let ana = reload(&store, &ana).await;
    assert_eq!(ana.balance, dec!(-100));
    assert_eq!(ana.last_membership_payment.as_deref(), Some("2024-02-15"));

    let ledger = store.list_ledger().await.unwrap();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].amount, dec!(50));
    assert_eq!(ledger[0].category, "Cuota");
    assert_eq!(ledger[0].description, RENEWAL_DESCRIPTION);
    assert_eq!(ledger[0].created_by.as_deref(), Some(RENEWAL_ACTOR));
    assert_eq!(ledger[0].entry_date, date("2024-02-15"));
    assert_eq!(ledger[0].membership_name.as_deref(), Some("Ana"));

    // Immediate re-run on the same day charges nothing more.
    let rerun = engine.run_now(BillingRunType::Manual).await;
    assert_eq!(rerun.renewals_charged, 0);
    assert_eq!(rerun.not_due, 1);
    assert_eq!(reload(&store, &ana).await.balance, dec!(-100));
    assert_eq!(store.list_ledger().await.unwrap().len(), 1);
}

#[tokio::test]
async fn nothing_is_charged_before_the_due_date() {
    let store = MemoryStore::new();
    seed_settings(&store).await;
    let ana = seed_membership(&store, "Ana", "full", "2024-01-15", dec!(-50)).await;
    let (engine, _) = engine(&store, "2024-02-14");

    let run = engine.run_now(BillingRunType::Manual).await;
    assert_eq!(run.renewals_charged, 0);
    assert_eq!(run.not_due, 1);
    assert_eq!(reload(&store, &ana).await.balance, dec!(-50));
    assert!(store.list_ledger().await.unwrap().is_empty());
}

#[tokio::test]
async fn unpriced_and_unknown_plans_are_never_charged() {
    let store = MemoryStore::new();
    seed_settings(&store).await;
    let trial = seed_membership(&store, "Trial", "trial", "2023-06-01", Decimal::ZERO).await;
    let crossfit = seed_membership(&store, "Cross", "crossfit", "2023-06-01", Decimal::ZERO).await;
    let (engine, _) = engine(&store, "2024-02-15");

    let run = engine.run_now(BillingRunType::Manual).await;
    assert_eq!(run.skipped_unpriced, 2);
    assert_eq!(run.renewals_charged, 0);

    assert_eq!(reload(&store, &trial).await.balance, Decimal::ZERO);
    assert_eq!(reload(&store, &trial).await.last_membership_payment, None);
    assert_eq!(reload(&store, &crossfit).await.balance, Decimal::ZERO);
    assert!(store.list_ledger().await.unwrap().is_empty());
}

#[tokio::test]
async fn inactive_and_pending_memberships_are_never_charged() {
    let store = MemoryStore::new();
    seed_settings(&store).await;
    for (name, status) in [
        ("Ines", MembershipStatus::Inactive),
        ("Pablo", MembershipStatus::Pending),
    ] {
        store
            .insert_membership(&CreateMembership {
                name: name.to_string(),
                email: None,
                phone: None,
                status,
                plan: "full".to_string(),
                balance: Decimal::ZERO,
                join_date: "2023-01-15".to_string(),
                last_membership_payment: None,
            })
            .await
            .unwrap();
    }
    let (engine, _) = engine(&store, "2024-02-15");

    let run = engine.run_now(BillingRunType::Manual).await;
    assert_eq!(run.skipped_inactive, 2);
    assert!(store.list_ledger().await.unwrap().is_empty());
}

#[tokio::test]
async fn month_end_anchor_rolls_to_last_day_of_february() {
    let store = MemoryStore::new();
    seed_settings(&store).await;
    let ana = seed_membership(&store, "Ana", "basic", "2024-01-31", Decimal::ZERO).await;
    let (engine, clock) = engine(&store, "2024-02-28");

    let run = engine.run_now(BillingRunType::Manual).await;
    assert_eq!(run.renewals_charged, 0);

    clock.set(date("2024-02-29"));
    let run = engine.run_now(BillingRunType::Manual).await;
    assert_eq!(run.renewals_charged, 1);

    let ana = reload(&store, &ana).await;
    assert_eq!(ana.last_membership_payment.as_deref(), Some("2024-02-29"));
    assert_eq!(ana.balance, dec!(-30));
}

#[tokio::test]
async fn late_run_settles_one_cycle_per_pass() {
    let store = MemoryStore::new();
    seed_settings(&store).await;
    let ana = seed_membership(&store, "Ana", "full", "2024-01-15", Decimal::ZERO).await;
    let (engine, _) = engine(&store, "2024-04-20");

    // Three cycles behind: each pass settles the oldest outstanding one.
    for expected in ["2024-02-15", "2024-03-15", "2024-04-15"] {
        let run = engine.run_now(BillingRunType::Manual).await;
        assert_eq!(run.renewals_charged, 1);
        assert_eq!(
            reload(&store, &ana).await.last_membership_payment.as_deref(),
            Some(expected)
        );
    }

    let run = engine.run_now(BillingRunType::Manual).await;
    assert_eq!(run.renewals_charged, 0);
    assert_eq!(reload(&store, &ana).await.balance, dec!(-150));

    let ledger = store.list_ledger().await.unwrap();
    assert!(ledger
        .iter()
        .all(|entry| entry.entry_date == date("2024-04-20")));
}

#[tokio::test]
async fn malformed_dates_do_not_block_other_memberships() {
    let store = MemoryStore::new();
    seed_settings(&store).await;
    let broken = seed_membership(&store, "Broken", "full", "15/01/2024", Decimal::ZERO).await;
    let ana = seed_membership(&store, "Ana", "full", "2024-01-15", Decimal::ZERO).await;
    let (engine, _) = engine(&store, "2024-02-15");

    let run = engine.run_now(BillingRunType::Manual).await;
    assert_eq!(run.invalid_dates, 1);
    assert_eq!(run.renewals_charged, 1);
    assert_eq!(reload(&store, &broken).await.balance, Decimal::ZERO);
    assert_eq!(reload(&store, &ana).await.balance, dec!(-50));
}

#[tokio::test]
async fn price_changes_apply_on_the_next_run() {
    let store = MemoryStore::new();
    seed_settings(&store).await;
    let ana = seed_membership(&store, "Ana", "full", "2024-01-15", Decimal::ZERO).await;
    let (engine, _) = engine(&store, "2024-02-15");

    store
        .put_settings(&GymSettings {
            name: "Test Gym".to_string(),
            plan_prices: membership_service::models::PlanPrices {
                full: dec!(65.50),
                ..test_prices()
            },
        })
        .await
        .unwrap();

    let run = engine.run_now(BillingRunType::Manual).await;
    assert_eq!(run.amount_charged, dec!(65.50));
    assert_eq!(reload(&store, &ana).await.balance, dec!(-65.50));
}

#[tokio::test]
async fn membership_deleted_after_snapshot_is_dropped() {
    let store = MemoryStore::new();
    seed_settings(&store).await;
    let gone = seed_membership(&store, "Gone", "full", "2024-01-15", Decimal::ZERO).await;
    let ana = seed_membership(&store, "Ana", "full", "2024-01-15", Decimal::ZERO).await;
    let (engine, _) = engine(&store, "2024-02-15");

    let snapshot = store.subscribe_memberships().borrow().clone();
    store.delete_membership(gone.membership_id).await.unwrap();

    let run = engine.run_once(snapshot, BillingRunType::Scheduled).await;
    assert_eq!(run.vanished, 1);
    assert_eq!(run.renewals_charged, 1);
    assert_eq!(run.status, BillingRunStatus::Completed);
    assert_eq!(reload(&store, &ana).await.balance, dec!(-50));

    let ledger = store.list_ledger().await.unwrap();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].membership_id, Some(ana.membership_id));
}

#[tokio::test]
async fn stale_snapshot_cannot_charge_a_cycle_twice() {
    let store = MemoryStore::new();
    seed_settings(&store).await;
    let ana = seed_membership(&store, "Ana", "full", "2024-01-15", Decimal::ZERO).await;
    let (engine, _) = engine(&store, "2024-02-15");

    // Two instances working from the same pre-renewal snapshot.
    let snapshot = store.subscribe_memberships().borrow().clone();
    let first = engine.run_once(snapshot.clone(), BillingRunType::Scheduled).await;
    let second = engine.run_once(snapshot, BillingRunType::Scheduled).await;

    assert_eq!(first.renewals_charged, 1);
    assert_eq!(second.renewals_charged, 0);
    assert_eq!(second.already_charged, 1);
    assert_eq!(reload(&store, &ana).await.balance, dec!(-50));
    assert_eq!(store.list_ledger().await.unwrap().len(), 1);
}

#[tokio::test]
async fn rewound_anchor_resumes_billing_after_the_settled_cycle() {
    let store = MemoryStore::new();
    seed_settings(&store).await;
    let ana = seed_membership(&store, "Ana", "full", "2024-01-15", Decimal::ZERO).await;
    let (engine, clock) = engine(&store, "2024-02-15");

    assert_eq!(engine.run_now(BillingRunType::Manual).await.renewals_charged, 1);

    // An administrative edit puts the anchor back on the billed cycle.
    store
        .update_membership(
            ana.membership_id,
            &MembershipPatch {
                last_membership_payment: Some("2024-01-15".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    clock.set(date("2024-05-20"));
    let first = engine.run_now(BillingRunType::Manual).await;
    assert_eq!(first.renewals_charged, 0);
    assert_eq!(first.already_charged, 1);
    assert_eq!(
        reload(&store, &ana).await.last_membership_payment.as_deref(),
        Some("2024-02-15")
    );

    let mut charged = 0;
    for _ in 0..5 {
        charged += engine.run_now(BillingRunType::Manual).await.renewals_charged;
    }
    assert_eq!(charged, 3);

    let ana = reload(&store, &ana).await;
    assert_eq!(ana.last_membership_payment.as_deref(), Some("2024-05-15"));
    assert_eq!(ana.balance, dec!(-200));

    let dues: HashSet<_> = store
        .list_ledger()
        .await
        .unwrap()
        .iter()
        .filter_map(|e| e.cycle_due)
        .collect();
    assert_eq!(
        dues,
        HashSet::from([
            date("2024-02-15"),
            date("2024-03-15"),
            date("2024-04-15"),
            date("2024-05-15"),
        ])
    );
}

/// Store that fails renewals for selected memberships.
#[derive(Clone)]
struct FlakyStore {
    inner: MemoryStore,
    failing: Arc<Mutex<HashSet<Uuid>>>,
    settings_down: Arc<Mutex<bool>>,
}

impl FlakyStore {
    fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            failing: Arc::new(Mutex::new(HashSet::new())),
            settings_down: Arc::new(Mutex::new(false)),
        }
    }

    fn fail_renewals_for(&self, membership_id: Uuid) {
        self.failing.lock().unwrap().insert(membership_id);
    }

    fn heal(&self) {
        self.failing.lock().unwrap().clear();
        *self.settings_down.lock().unwrap() = false;
    }
}

#[async_trait]
impl MembershipStore for FlakyStore {
    fn subscribe_memberships(&self) -> watch::Receiver<MembershipSnapshot> {
        self.inner.subscribe_memberships()
    }

    async fn list_memberships(&self) -> Result<Vec<Membership>, StoreError> {
        self.inner.list_memberships().await
    }

    async fn get_membership(&self, membership_id: Uuid) -> Result<Option<Membership>, StoreError> {
        self.inner.get_membership(membership_id).await
    }

    async fn insert_membership(&self, input: &CreateMembership) -> Result<Membership, StoreError> {
        self.inner.insert_membership(input).await
    }

    async fn update_membership(
        &self,
        membership_id: Uuid,
        patch: &MembershipPatch,
    ) -> Result<Membership, StoreError> {
        self.inner.update_membership(membership_id, patch).await
    }

    async fn adjust_balance(
        &self,
        membership_id: Uuid,
        delta: Decimal,
    ) -> Result<Membership, StoreError> {
        self.inner.adjust_balance(membership_id, delta).await
    }

    async fn delete_membership(&self, membership_id: Uuid) -> Result<(), StoreError> {
        self.inner.delete_membership(membership_id).await
    }
}

#[async_trait]
impl LedgerStore for FlakyStore {
    fn subscribe_ledger(&self) -> watch::Receiver<LedgerSnapshot> {
        self.inner.subscribe_ledger()
    }

    async fn list_ledger(&self) -> Result<Vec<LedgerEntry>, StoreError> {
        self.inner.list_ledger().await
    }

    async fn insert_ledger_entry(&self, entry: &NewLedgerEntry) -> Result<LedgerEntry, StoreError> {
        self.inner.insert_ledger_entry(entry).await
    }

    async fn update_ledger_entry(
        &self,
        entry_id: Uuid,
        patch: &LedgerEntryPatch,
    ) -> Result<LedgerEntry, StoreError> {
        self.inner.update_ledger_entry(entry_id, patch).await
    }

    async fn delete_ledger_entry(&self, entry_id: Uuid) -> Result<(), StoreError> {
        self.inner.delete_ledger_entry(entry_id).await
    }
}

#[async_trait]
impl RenewalStore for FlakyStore {
    async fn record_renewal(
        &self,
        charge: &RenewalCharge,
    ) -> Result<(LedgerEntry, Membership), StoreError> {
        if self.failing.lock().unwrap().contains(&charge.membership_id) {
            return Err(StoreError::Unavailable("connection reset".to_string()));
        }
        self.inner.record_renewal(charge).await
    }
}

#[async_trait]
impl SettingsStore for FlakyStore {
    async fn get_settings(&self) -> Result<GymSettings, StoreError> {
        if *self.settings_down.lock().unwrap() {
            return Err(StoreError::Unavailable("settings unreachable".to_string()));
        }
        self.inner.get_settings().await
    }

    async fn put_settings(&self, settings: &GymSettings) -> Result<GymSettings, StoreError> {
        self.inner.put_settings(settings).await
    }
}

#[async_trait]
impl CheckInStore for FlakyStore {
    async fn check_in(&self, membership: &Membership) -> Result<CheckIn, StoreError> {
        self.inner.check_in(membership).await
    }

    async fn check_out(&self, check_in_id: Uuid) -> Result<CheckIn, StoreError> {
        self.inner.check_out(check_in_id).await
    }

    async fn list_check_ins(&self, limit: usize) -> Result<Vec<CheckIn>, StoreError> {
        self.inner.list_check_ins(limit).await
    }
}

#[async_trait]
impl GymStore for FlakyStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[tokio::test]
async fn transient_failure_is_isolated_and_retried() {
    let memory = MemoryStore::new();
    seed_settings(&memory).await;
    let ana = seed_membership(&memory, "Ana", "full", "2024-01-15", Decimal::ZERO).await;
    let luis = seed_membership(&memory, "Luis", "full", "2024-01-15", Decimal::ZERO).await;

    let flaky = FlakyStore::new(memory.clone());
    flaky.fail_renewals_for(ana.membership_id);

    let clock = Arc::new(ManualClock::new(date("2024-02-15")));
    let engine = BillingEngine::new(Arc::new(flaky.clone()), clock, Duration::from_secs(10));

    let run = engine.run_now(BillingRunType::Scheduled).await;
    assert_eq!(run.failed, 1);
    assert_eq!(run.renewals_charged, 1);
    assert_eq!(run.status, BillingRunStatus::Partial);
    assert_eq!(reload(&memory, &ana).await.balance, Decimal::ZERO);
    assert_eq!(reload(&memory, &luis).await.balance, dec!(-50));

    flaky.heal();
    let run = engine.run_now(BillingRunType::Scheduled).await;
    assert_eq!(run.renewals_charged, 1);
    assert_eq!(run.failed, 0);

    let ana = reload(&memory, &ana).await;
    assert_eq!(ana.balance, dec!(-50));
    assert_eq!(ana.last_membership_payment.as_deref(), Some("2024-02-15"));
}

#[tokio::test]
async fn unreadable_settings_fail_the_run_without_charging() {
    let memory = MemoryStore::new();
    seed_settings(&memory).await;
    let ana = seed_membership(&memory, "Ana", "full", "2024-01-15", Decimal::ZERO).await;

    let flaky = FlakyStore::new(memory.clone());
    *flaky.settings_down.lock().unwrap() = true;

    let clock = Arc::new(ManualClock::new(date("2024-02-15")));
    let engine = BillingEngine::new(Arc::new(flaky), clock, Duration::from_secs(10));

    let run = engine.run_now(BillingRunType::Scheduled).await;
    assert_eq!(run.status, BillingRunStatus::Failed);
    assert!(run.error_message.is_some());
    assert_eq!(reload(&memory, &ana).await.balance, Decimal::ZERO);
    assert_eq!(engine.last_run().await.map(|r| r.run_id), Some(run.run_id));
}

#[tokio::test]
async fn scheduled_loop_charges_on_tick_and_stops_on_cancel() {
    let store = MemoryStore::new();
    seed_settings(&store).await;
    let ana = seed_membership(&store, "Ana", "full", "2024-01-15", Decimal::ZERO).await;

    let clock = Arc::new(ManualClock::new(date("2024-02-15")));
    let engine = Arc::new(BillingEngine::new(
        Arc::new(store.clone()),
        clock,
        Duration::from_millis(50),
    ));
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(
        Arc::clone(&engine).run(store.subscribe_memberships(), shutdown.clone()),
    );

    let mut charged = false;
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(25)).await;
        if reload(&store, &ana).await.balance == dec!(-50) {
            charged = true;
            break;
        }
    }
    assert!(charged, "scheduled run should charge the due membership");

    // Further ticks on the same day leave the balance alone.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(reload(&store, &ana).await.balance, dec!(-50));
    assert_eq!(store.list_ledger().await.unwrap().len(), 1);

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("engine should stop after cancellation")
        .expect("engine task should not panic");
}

#[tokio::test]
async fn idle_loop_wakes_when_first_membership_arrives() {
    let store = MemoryStore::new();
    seed_settings(&store).await;

    let clock = Arc::new(ManualClock::new(date("2024-02-15")));
    let engine = Arc::new(BillingEngine::new(
        Arc::new(store.clone()),
        clock,
        Duration::from_millis(50),
    ));
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(
        Arc::clone(&engine).run(store.subscribe_memberships(), shutdown.clone()),
    );

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(engine.last_run().await.is_none(), "no runs while empty");

    let ana = seed_membership(&store, "Ana", "full", "2024-01-15", Decimal::ZERO).await;

    let mut charged = false;
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(25)).await;
        if reload(&store, &ana).await.balance == dec!(-50) {
            charged = true;
            break;
        }
    }
    assert!(charged);

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn manual_run_over_http_reports_the_pass() {
    let app = TestApp::spawn_with(date("2024-02-15"), None).await;
    seed_membership(&app.store, "Ana", "full", "2024-01-15", dec!(-50)).await;

    let response = app
        .client
        .get(app.url("/billing/last-run"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    let run = app.run_billing().await;
    assert_eq!(run["renewals_charged"], 1);
    assert_eq!(run["run_type"], "manual");
    assert_eq!(run["status"], "completed");

    let last: serde_json::Value = app
        .client
        .get(app.url("/billing/last-run"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(last["run_id"], run["run_id"]);

    let second = app.run_billing().await;
    assert_eq!(second["renewals_charged"], 0);

    let members = app.store.list_memberships().await.unwrap();
    assert_eq!(members[0].balance, dec!(-100));
}

#[tokio::test]
async fn http_app_runs_the_timer_when_enabled() {
    let app = TestApp::spawn_with(date("2024-02-15"), Some(Duration::from_millis(50))).await;
    let ana = seed_membership(&app.store, "Ana", "full", "2024-01-15", Decimal::ZERO).await;

    let mut charged = false;
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(25)).await;
        if reload(&app.store, &ana).await.balance == dec!(-50) {
            charged = true;
            break;
        }
    }
    assert!(charged);
}
