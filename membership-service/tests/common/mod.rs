//! Test helper module for membership-service integration tests.
//!
//! Spawns the HTTP app on a random port against an in-memory store and a
//! manually driven clock. Postgres-backed store tests get a fresh schema each
//! from `postgres_store`.

#![allow(dead_code)]

use chrono::NaiveDate;
use membership_service::config::{DatabaseConfig, MembershipConfig};
use membership_service::models::{
    CreateMembership, GymSettings, Membership, MembershipStatus, PlanPrices,
};
use membership_service::services::{
    init_metrics, Database, ManualClock, MembershipStore, MemoryStore, SettingsStore,
};
use membership_service::startup::Application;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

// Counter for unique schema names
static SCHEMA_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Database URL for store tests; `None` skips them.
pub fn get_test_database_url() -> Option<String> {
    std::env::var("TEST_DATABASE_URL").ok()
}

/// Generate a unique schema name for test isolation.
fn unique_schema_name() -> String {
    let counter = SCHEMA_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("test_membership_{}_{}", std::process::id(), counter)
}

/// Connection settings pointing at a freshly created, migrated schema.
pub struct PostgresSchema {
    pub config: DatabaseConfig,
    pub schema_name: String,
}

impl PostgresSchema {
    /// Open another store on the same schema, as a second service instance would.
    pub async fn connect(&self) -> Database {
        Database::new(&self.config)
            .await
            .expect("Failed to create test database")
    }
}

/// Create an isolated schema, run migrations in it and return a store on it.
///
/// Returns `None` when `TEST_DATABASE_URL` is not set.
pub async fn postgres_store() -> Option<(Database, PostgresSchema)> {
    let base_url = get_test_database_url()?;
    init_metrics();
    let schema_name = unique_schema_name();

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(2)
        .connect(&base_url)
        .await
        .expect("Failed to connect to test database");

    sqlx::query(&format!("DROP SCHEMA IF EXISTS {} CASCADE", schema_name))
        .execute(&pool)
        .await
        .ok();
    sqlx::query(&format!("CREATE SCHEMA {}", schema_name))
        .execute(&pool)
        .await
        .expect("Failed to create test schema");
    pool.close().await;

    // Use ? or & depending on whether URL already has query parameters
    let separator = if base_url.contains('?') { "&" } else { "?" };
    let schema = PostgresSchema {
        config: DatabaseConfig {
            url: format!(
                "{}{}options=-c search_path%3D{}",
                base_url, separator, schema_name
            ),
            max_connections: 5,
            min_connections: 1,
        },
        schema_name,
    };

    let db = schema.connect().await;
    db.run_migrations().await.expect("Failed to run migrations");
    Some((db, schema))
}

/// Prices used throughout the suite: only "full" and "basic" are billable.
pub fn test_prices() -> PlanPrices {
    PlanPrices {
        basic: Decimal::new(30, 0),
        intermediate: Decimal::ZERO,
        full: Decimal::new(50, 0),
        crossfit: Decimal::ZERO,
    }
}

pub async fn seed_settings(store: &MemoryStore) {
    store
        .put_settings(&GymSettings {
            name: "Test Gym".to_string(),
            plan_prices: test_prices(),
        })
        .await
        .expect("Failed to seed settings");
}

pub async fn seed_membership(
    store: &MemoryStore,
    name: &str,
    plan: &str,
    join_date: &str,
    balance: Decimal,
) -> Membership {
    store
        .insert_membership(&CreateMembership {
            name: name.to_string(),
            email: None,
            phone: None,
            status: MembershipStatus::Active,
            plan: plan.to_string(),
            balance,
            join_date: join_date.to_string(),
            last_membership_payment: None,
        })
        .await
        .expect("Failed to seed membership")
}

/// Test application wrapper for integration tests.
pub struct TestApp {
    pub http_address: String,
    pub http_port: u16,
    pub store: MemoryStore,
    pub clock: Arc<ManualClock>,
    pub client: reqwest::Client,
    shutdown: CancellationToken,
}

impl TestApp {
    /// Spawn with the automatic timer off; runs are triggered over HTTP.
    pub async fn spawn() -> Self {
        Self::spawn_with(date("2024-01-15"), None).await
    }

    /// Spawn on `today`; when `interval` is set the billing timer runs too.
    pub async fn spawn_with(today: NaiveDate, interval: Option<std::time::Duration>) -> Self {
        init_metrics();

        let store = MemoryStore::new();
        seed_settings(&store).await;
        let clock = Arc::new(ManualClock::new(today));

        let mut config = MembershipConfig::for_memory_store(0);
        match interval {
            Some(interval) => config.billing.interval = interval,
            None => config.billing.enabled = false,
        }

        let app = Application::build_with_store(config, Arc::new(store.clone()), clock.clone())
            .await
            .expect("Failed to build test application");

        let http_port = app.http_port();
        let http_address = format!("http://127.0.0.1:{}", http_port);
        let shutdown = app.shutdown_token();

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for HTTP server to be ready by polling health endpoint
        let client = reqwest::Client::new();
        let health_url = format!("{}/health", http_address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        TestApp {
            http_address,
            http_port,
            store,
            clock,
            client,
            shutdown,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.http_address, path)
    }

    pub async fn run_billing(&self) -> serde_json::Value {
        self.client
            .post(self.url("/billing/run"))
            .send()
            .await
            .expect("Failed to execute request")
            .json()
            .await
            .expect("Failed to parse JSON")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
