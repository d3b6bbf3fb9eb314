//! PostgreSQL store.
//!
//! Every instance keeps in-process mirrors of the memberships and ledger
//! tables. Mirrors are refreshed after each local write and whenever another
//! instance writes (`LISTEN memberships_changed` / `ledger_changed`, fired by
//! statement triggers).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgListener, PgPool, PgPoolOptions};
use sqlx::FromRow;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::models::{
    CheckIn, CreateMembership, EntryDirection, GymSettings, LedgerEntry, LedgerEntryPatch,
    Membership, MembershipPatch, MembershipStatus, NewLedgerEntry, PlanPrices, RenewalCharge,
    FEE_CATEGORY, RENEWAL_ACTOR, RENEWAL_DESCRIPTION,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::{
    CheckInStore, GymStore, LedgerSnapshot, LedgerStore, MembershipSnapshot, MembershipStore,
    RenewalStore, SettingsStore, StoreError,
};

const MEMBERSHIP_COLUMNS: &str = "membership_id, name, email, phone, status, plan, balance, join_date, last_membership_payment, created_utc, updated_utc";
const LEDGER_COLUMNS: &str = "entry_id, amount, direction, description, entry_date, category, membership_id, membership_name, created_by, cycle_due, created_utc";
const CHECK_IN_COLUMNS: &str =
    "check_in_id, membership_id, membership_name, checked_in_utc, checked_out_utc";

const MEMBERSHIPS_CHANNEL: &str = "memberships_changed";
const LEDGER_CHANNEL: &str = "ledger_changed";

#[derive(Debug, FromRow)]
struct MembershipRow {
    membership_id: Uuid,
    name: String,
    email: Option<String>,
    phone: Option<String>,
    status: String,
    plan: String,
    balance: Decimal,
    join_date: String,
    last_membership_payment: Option<String>,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
}

impl From<MembershipRow> for Membership {
    fn from(row: MembershipRow) -> Self {
        Membership {
            membership_id: row.membership_id,
            name: row.name,
            email: row.email,
            phone: row.phone,
            status: MembershipStatus::from_string(&row.status),
            plan: row.plan,
            balance: row.balance,
            join_date: row.join_date,
            last_membership_payment: row.last_membership_payment,
            created_utc: row.created_utc,
            updated_utc: row.updated_utc,
        }
    }
}

#[derive(Debug, FromRow)]
struct LedgerRow {
    entry_id: Uuid,
    amount: Decimal,
    direction: String,
    description: String,
    entry_date: NaiveDate,
    category: String,
    membership_id: Option<Uuid>,
    membership_name: Option<String>,
    created_by: Option<String>,
    cycle_due: Option<NaiveDate>,
    created_utc: DateTime<Utc>,
}

impl From<LedgerRow> for LedgerEntry {
    fn from(row: LedgerRow) -> Self {
        LedgerEntry {
            entry_id: row.entry_id,
            amount: row.amount,
            direction: EntryDirection::from_string(&row.direction),
            description: row.description,
            entry_date: row.entry_date,
            category: row.category,
            membership_id: row.membership_id,
            membership_name: row.membership_name,
            created_by: row.created_by,
            cycle_due: row.cycle_due,
            created_utc: row.created_utc,
        }
    }
}

#[derive(Debug, FromRow)]
struct SettingsRow {
    name: String,
    price_basic: Decimal,
    price_intermediate: Decimal,
    price_full: Decimal,
    price_crossfit: Decimal,
}

impl From<SettingsRow> for GymSettings {
    fn from(row: SettingsRow) -> Self {
        GymSettings {
            name: row.name,
            plan_prices: PlanPrices {
                basic: row.price_basic,
                intermediate: row.price_intermediate,
                full: row.price_full,
                crossfit: row.price_crossfit,
            },
        }
    }
}

#[derive(Debug, FromRow)]
struct CheckInRow {
    check_in_id: Uuid,
    membership_id: Uuid,
    membership_name: String,
    checked_in_utc: DateTime<Utc>,
    checked_out_utc: Option<DateTime<Utc>>,
}

impl From<CheckInRow> for CheckIn {
    fn from(row: CheckInRow) -> Self {
        CheckIn {
            check_in_id: row.check_in_id,
            membership_id: row.membership_id,
            membership_name: row.membership_name,
            checked_in_utc: row.checked_in_utc,
            checked_out_utc: row.checked_out_utc,
        }
    }
}

/// Classify a sqlx failure. Connection-level problems are `Unavailable` so
/// callers retry them on the next cycle.
fn map_sqlx(context: &str, err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(format!("{context}: {err}"))
        }
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
            StoreError::Conflict(format!("{context}: {err}"))
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Corrupt(format!("{context}: {err}"))
        }
        _ => StoreError::Backend(format!("{context}: {err}")),
    }
}

struct Mirrors {
    memberships_tx: watch::Sender<MembershipSnapshot>,
    ledger_tx: watch::Sender<LedgerSnapshot>,
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
    mirrors: Arc<Mirrors>,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(config), fields(service = "membership-service"))]
    pub async fn new(config: &DatabaseConfig) -> Result<Self, AppError> {
        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(&config.url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        let (memberships_tx, _) = watch::channel(Arc::new(Vec::new()));
        let (ledger_tx, _) = watch::channel(Arc::new(Vec::new()));

        Ok(Self {
            pool,
            mirrors: Arc::new(Mirrors {
                memberships_tx,
                ledger_tx,
            }),
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Load both mirrors from the database.
    pub async fn refresh_all(&self) -> Result<(), StoreError> {
        self.refresh_memberships().await?;
        self.refresh_ledger().await
    }

    async fn refresh_memberships(&self) -> Result<(), StoreError> {
        let memberships = self.list_memberships().await?;
        self.mirrors
            .memberships_tx
            .send_replace(Arc::new(memberships));
        Ok(())
    }

    async fn refresh_ledger(&self) -> Result<(), StoreError> {
        let entries = self.list_ledger().await?;
        self.mirrors.ledger_tx.send_replace(Arc::new(entries));
        Ok(())
    }

    /// Refresh after a local write. The write itself already succeeded, so a
    /// failed refresh is only logged; the listener will catch up.
    async fn after_membership_write(&self) {
        if let Err(e) = self.refresh_memberships().await {
            warn!(error = %e, "Failed to refresh membership mirror");
        }
    }

    /// Move an anchor that sits before an already settled cycle up to that
    /// cycle's due date. Balance and ledger are left alone.
    async fn catch_up_anchor(&self, charge: &RenewalCharge) -> Result<(), StoreError> {
        let moved = sqlx::query(
            r#"
            UPDATE memberships SET
                last_membership_payment = $2,
                updated_utc = NOW()
            WHERE membership_id = $1
              AND (last_membership_payment IS NULL
                   OR TRIM(last_membership_payment) = ''
                   OR last_membership_payment < $2)
            "#,
        )
        .bind(charge.membership_id)
        .bind(charge.cycle_due.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx("Failed to move renewal anchor", e))?
        .rows_affected();

        if moved > 0 {
            debug!(
                membership_id = %charge.membership_id,
                cycle_due = %charge.cycle_due,
                "Anchor moved to settled cycle"
            );
            self.after_membership_write().await;
        }
        Ok(())
    }

    async fn after_ledger_write(&self) {
        if let Err(e) = self.refresh_ledger().await {
            warn!(error = %e, "Failed to refresh ledger mirror");
        }
    }

    /// Follow change notifications from every instance until `shutdown`.
    pub fn spawn_change_listener(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let db = self.clone();
        tokio::spawn(async move {
            let mut listener = loop {
                match db.connect_listener().await {
                    Ok(listener) => break listener,
                    Err(e) => {
                        warn!(error = %e, "Change listener could not connect; retrying");
                        tokio::select! {
                            _ = shutdown.cancelled() => return,
                            _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                        }
                    }
                }
            };
            info!("Listening for membership and ledger changes");

            loop {
                let notification = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    n = listener.recv() => n,
                };

                let refreshed = match notification {
                    Ok(n) if n.channel() == MEMBERSHIPS_CHANNEL => db.refresh_memberships().await,
                    Ok(n) if n.channel() == LEDGER_CHANNEL => db.refresh_ledger().await,
                    Ok(n) => {
                        debug!(channel = n.channel(), "Ignoring notification");
                        Ok(())
                    }
                    Err(e) => {
                        // The listener reconnects on the next recv; notifications
                        // sent meanwhile are lost, so reload everything.
                        warn!(error = %e, "Change listener connection lost");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        db.refresh_all().await
                    }
                };

                if let Err(e) = refreshed {
                    warn!(error = %e, "Failed to refresh mirrors after notification");
                }
            }

            info!("Change listener stopped");
        })
    }

    async fn connect_listener(&self) -> Result<PgListener, sqlx::Error> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener
            .listen_all([MEMBERSHIPS_CHANNEL, LEDGER_CHANNEL])
            .await?;
        Ok(listener)
    }
}

#[async_trait]
impl MembershipStore for Database {
    fn subscribe_memberships(&self) -> watch::Receiver<MembershipSnapshot> {
        self.mirrors.memberships_tx.subscribe()
    }

    #[instrument(skip(self))]
    async fn list_memberships(&self) -> Result<Vec<Membership>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_memberships"])
            .start_timer();

        let rows = sqlx::query_as::<_, MembershipRow>(&format!(
            "SELECT {MEMBERSHIP_COLUMNS} FROM memberships ORDER BY name, membership_id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx("Failed to list memberships", e))?;

        timer.observe_duration();
        Ok(rows.into_iter().map(Membership::from).collect())
    }

    #[instrument(skip(self), fields(membership_id = %membership_id))]
    async fn get_membership(&self, membership_id: Uuid) -> Result<Option<Membership>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_membership"])
            .start_timer();

        let row = sqlx::query_as::<_, MembershipRow>(&format!(
            "SELECT {MEMBERSHIP_COLUMNS} FROM memberships WHERE membership_id = $1"
        ))
        .bind(membership_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx("Failed to get membership", e))?;

        timer.observe_duration();
        Ok(row.map(Membership::from))
    }

    #[instrument(skip(self, input), fields(name = %input.name))]
    async fn insert_membership(&self, input: &CreateMembership) -> Result<Membership, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_membership"])
            .start_timer();

        let row = sqlx::query_as::<_, MembershipRow>(&format!(
            r#"
            INSERT INTO memberships (membership_id, name, email, phone, status, plan, balance, join_date, last_membership_payment)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {MEMBERSHIP_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&input.name)
        .bind(&input.email)
        .bind(&input.phone)
        .bind(input.status.as_str())
        .bind(&input.plan)
        .bind(input.balance)
        .bind(&input.join_date)
        .bind(&input.last_membership_payment)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx("Failed to insert membership", e))?;

        timer.observe_duration();
        let membership = Membership::from(row);
        info!(membership_id = %membership.membership_id, "Membership created");

        self.after_membership_write().await;
        Ok(membership)
    }

    #[instrument(skip(self, patch), fields(membership_id = %membership_id))]
    async fn update_membership(
        &self,
        membership_id: Uuid,
        patch: &MembershipPatch,
    ) -> Result<Membership, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_membership"])
            .start_timer();

        let row = sqlx::query_as::<_, MembershipRow>(&format!(
            r#"
            UPDATE memberships SET
                name = COALESCE($2, name),
                email = COALESCE($3, email),
                phone = COALESCE($4, phone),
                status = COALESCE($5, status),
                plan = COALESCE($6, plan),
                balance = COALESCE($7, balance),
                join_date = COALESCE($8, join_date),
                last_membership_payment = COALESCE($9, last_membership_payment),
                updated_utc = NOW()
            WHERE membership_id = $1
            RETURNING {MEMBERSHIP_COLUMNS}
            "#
        ))
        .bind(membership_id)
        .bind(&patch.name)
        .bind(&patch.email)
        .bind(&patch.phone)
        .bind(patch.status.map(|s| s.as_str()))
        .bind(&patch.plan)
        .bind(patch.balance)
        .bind(&patch.join_date)
        .bind(&patch.last_membership_payment)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx("Failed to update membership", e))?
        .ok_or_else(|| StoreError::not_found("membership", membership_id))?;

        timer.observe_duration();
        self.after_membership_write().await;
        Ok(Membership::from(row))
    }

    #[instrument(skip(self), fields(membership_id = %membership_id, delta = %delta))]
    async fn adjust_balance(
        &self,
        membership_id: Uuid,
        delta: Decimal,
    ) -> Result<Membership, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["adjust_balance"])
            .start_timer();

        let row = sqlx::query_as::<_, MembershipRow>(&format!(
            r#"
            UPDATE memberships SET balance = balance + $2, updated_utc = NOW()
            WHERE membership_id = $1
            RETURNING {MEMBERSHIP_COLUMNS}
            "#
        ))
        .bind(membership_id)
        .bind(delta)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx("Failed to adjust balance", e))?
        .ok_or_else(|| StoreError::not_found("membership", membership_id))?;

        timer.observe_duration();
        self.after_membership_write().await;
        Ok(Membership::from(row))
    }

    #[instrument(skip(self), fields(membership_id = %membership_id))]
    async fn delete_membership(&self, membership_id: Uuid) -> Result<(), StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_membership"])
            .start_timer();

        let result = sqlx::query("DELETE FROM memberships WHERE membership_id = $1")
            .bind(membership_id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx("Failed to delete membership", e))?;

        timer.observe_duration();
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("membership", membership_id));
        }

        info!(membership_id = %membership_id, "Membership deleted");
        self.after_membership_write().await;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for Database {
    fn subscribe_ledger(&self) -> watch::Receiver<LedgerSnapshot> {
        self.mirrors.ledger_tx.subscribe()
    }

    #[instrument(skip(self))]
    async fn list_ledger(&self) -> Result<Vec<LedgerEntry>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_ledger"])
            .start_timer();

        let rows = sqlx::query_as::<_, LedgerRow>(&format!(
            "SELECT {LEDGER_COLUMNS} FROM ledger_entries ORDER BY entry_date DESC, created_utc DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx("Failed to list ledger", e))?;

        timer.observe_duration();
        Ok(rows.into_iter().map(LedgerEntry::from).collect())
    }

    #[instrument(skip(self, entry), fields(entry_id = %entry.entry_id))]
    async fn insert_ledger_entry(&self, entry: &NewLedgerEntry) -> Result<LedgerEntry, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_ledger_entry"])
            .start_timer();

        let inserted = sqlx::query_as::<_, LedgerRow>(&format!(
            r#"
            INSERT INTO ledger_entries (entry_id, amount, direction, description, entry_date, category, membership_id, membership_name, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (entry_id) DO NOTHING
            RETURNING {LEDGER_COLUMNS}
            "#
        ))
        .bind(entry.entry_id)
        .bind(entry.amount)
        .bind(entry.direction.as_str())
        .bind(&entry.description)
        .bind(entry.entry_date)
        .bind(&entry.category)
        .bind(entry.membership_id)
        .bind(&entry.membership_name)
        .bind(&entry.created_by)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx("Failed to insert ledger entry", e))?;

        let row = match inserted {
            Some(row) => row,
            None => {
                debug!(entry_id = %entry.entry_id, "Ledger entry already stored");
                sqlx::query_as::<_, LedgerRow>(&format!(
                    "SELECT {LEDGER_COLUMNS} FROM ledger_entries WHERE entry_id = $1"
                ))
                .bind(entry.entry_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| map_sqlx("Failed to read back ledger entry", e))?
            }
        };

        timer.observe_duration();
        self.after_ledger_write().await;
        Ok(LedgerEntry::from(row))
    }

    #[instrument(skip(self, patch), fields(entry_id = %entry_id))]
    async fn update_ledger_entry(
        &self,
        entry_id: Uuid,
        patch: &LedgerEntryPatch,
    ) -> Result<LedgerEntry, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_ledger_entry"])
            .start_timer();

        let row = sqlx::query_as::<_, LedgerRow>(&format!(
            r#"
            UPDATE ledger_entries SET
                amount = COALESCE($2, amount),
                direction = COALESCE($3, direction),
                description = COALESCE($4, description),
                entry_date = COALESCE($5, entry_date),
                category = COALESCE($6, category)
            WHERE entry_id = $1
            RETURNING {LEDGER_COLUMNS}
            "#
        ))
        .bind(entry_id)
        .bind(patch.amount)
        .bind(patch.direction.map(|d| d.as_str()))
        .bind(&patch.description)
        .bind(patch.entry_date)
        .bind(&patch.category)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx("Failed to update ledger entry", e))?
        .ok_or_else(|| StoreError::not_found("ledger entry", entry_id))?;

        timer.observe_duration();
        self.after_ledger_write().await;
        Ok(LedgerEntry::from(row))
    }

    #[instrument(skip(self), fields(entry_id = %entry_id))]
    async fn delete_ledger_entry(&self, entry_id: Uuid) -> Result<(), StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_ledger_entry"])
            .start_timer();

        let result = sqlx::query("DELETE FROM ledger_entries WHERE entry_id = $1")
            .bind(entry_id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx("Failed to delete ledger entry", e))?;

        timer.observe_duration();
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("ledger entry", entry_id));
        }

        self.after_ledger_write().await;
        Ok(())
    }
}

#[async_trait]
impl RenewalStore for Database {
    /// One transaction: the balance update locks the membership row, so a
    /// concurrent renewal of the same cycle waits and then hits the
    /// `(membership_id, cycle_due)` unique index.
    #[instrument(skip(self, charge), fields(membership_id = %charge.membership_id, cycle_due = %charge.cycle_due))]
    async fn record_renewal(
        &self,
        charge: &RenewalCharge,
    ) -> Result<(LedgerEntry, Membership), StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_renewal"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx("Failed to begin renewal", e))?;

        let membership = sqlx::query_as::<_, MembershipRow>(&format!(
            r#"
            UPDATE memberships SET
                balance = balance - $2,
                last_membership_payment = $3,
                updated_utc = NOW()
            WHERE membership_id = $1
            RETURNING {MEMBERSHIP_COLUMNS}
            "#
        ))
        .bind(charge.membership_id)
        .bind(charge.amount)
        .bind(charge.cycle_due.to_string())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx("Failed to apply renewal to membership", e))?
        .ok_or_else(|| StoreError::not_found("membership", charge.membership_id))?;

        let entry = sqlx::query_as::<_, LedgerRow>(&format!(
            r#"
            INSERT INTO ledger_entries (entry_id, amount, direction, description, entry_date, category, membership_id, membership_name, created_by, cycle_due)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (membership_id, cycle_due) WHERE cycle_due IS NOT NULL DO NOTHING
            RETURNING {LEDGER_COLUMNS}
            "#
        ))
        .bind(charge.entry_id)
        .bind(charge.amount)
        .bind(EntryDirection::Income.as_str())
        .bind(RENEWAL_DESCRIPTION)
        .bind(charge.charged_on)
        .bind(FEE_CATEGORY)
        .bind(charge.membership_id)
        .bind(&charge.membership_name)
        .bind(RENEWAL_ACTOR)
        .bind(charge.cycle_due)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx("Failed to book renewal entry", e))?;

        let Some(entry) = entry else {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx("Failed to roll back duplicate renewal", e))?;
            self.catch_up_anchor(charge).await?;
            timer.observe_duration();
            return Err(StoreError::DuplicateCharge {
                membership_id: charge.membership_id,
                cycle_due: charge.cycle_due,
            });
        };

        tx.commit()
            .await
            .map_err(|e| map_sqlx("Failed to commit renewal", e))?;

        timer.observe_duration();
        self.after_membership_write().await;
        self.after_ledger_write().await;

        Ok((LedgerEntry::from(entry), Membership::from(membership)))
    }
}

#[async_trait]
impl SettingsStore for Database {
    #[instrument(skip(self))]
    async fn get_settings(&self) -> Result<GymSettings, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_settings"])
            .start_timer();

        let row = sqlx::query_as::<_, SettingsRow>(
            r#"
            SELECT name, price_basic, price_intermediate, price_full, price_crossfit
            FROM gym_settings
            WHERE settings_id = 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx("Failed to get settings", e))?;

        timer.observe_duration();
        Ok(row.map(GymSettings::from).unwrap_or_default())
    }

    #[instrument(skip(self, settings))]
    async fn put_settings(&self, settings: &GymSettings) -> Result<GymSettings, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["put_settings"])
            .start_timer();

        let prices = &settings.plan_prices;
        let row = sqlx::query_as::<_, SettingsRow>(
            r#"
            INSERT INTO gym_settings (settings_id, name, price_basic, price_intermediate, price_full, price_crossfit)
            VALUES (1, $1, $2, $3, $4, $5)
            ON CONFLICT (settings_id) DO UPDATE SET
                name = EXCLUDED.name,
                price_basic = EXCLUDED.price_basic,
                price_intermediate = EXCLUDED.price_intermediate,
                price_full = EXCLUDED.price_full,
                price_crossfit = EXCLUDED.price_crossfit,
                updated_utc = NOW()
            RETURNING name, price_basic, price_intermediate, price_full, price_crossfit
            "#,
        )
        .bind(&settings.name)
        .bind(prices.basic)
        .bind(prices.intermediate)
        .bind(prices.full)
        .bind(prices.crossfit)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx("Failed to save settings", e))?;

        timer.observe_duration();
        info!("Gym settings saved");
        Ok(GymSettings::from(row))
    }
}

#[async_trait]
impl CheckInStore for Database {
    #[instrument(skip(self, membership), fields(membership_id = %membership.membership_id))]
    async fn check_in(&self, membership: &Membership) -> Result<CheckIn, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["check_in"])
            .start_timer();

        let row = sqlx::query_as::<_, CheckInRow>(&format!(
            r#"
            INSERT INTO check_ins (check_in_id, membership_id, membership_name)
            VALUES ($1, $2, $3)
            RETURNING {CHECK_IN_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(membership.membership_id)
        .bind(&membership.name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx("Failed to record check-in", e))?;

        timer.observe_duration();
        Ok(CheckIn::from(row))
    }

    #[instrument(skip(self), fields(check_in_id = %check_in_id))]
    async fn check_out(&self, check_in_id: Uuid) -> Result<CheckIn, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["check_out"])
            .start_timer();

        let closed = sqlx::query_as::<_, CheckInRow>(&format!(
            r#"
            UPDATE check_ins SET checked_out_utc = NOW()
            WHERE check_in_id = $1 AND checked_out_utc IS NULL
            RETURNING {CHECK_IN_COLUMNS}
            "#
        ))
        .bind(check_in_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx("Failed to record check-out", e))?;

        timer.observe_duration();
        if let Some(row) = closed {
            return Ok(CheckIn::from(row));
        }

        let exists: Option<(Uuid,)> =
            sqlx::query_as("SELECT check_in_id FROM check_ins WHERE check_in_id = $1")
                .bind(check_in_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| map_sqlx("Failed to get check-in", e))?;

        match exists {
            Some(_) => Err(StoreError::Conflict(format!(
                "check-in {} already closed",
                check_in_id
            ))),
            None => Err(StoreError::not_found("check-in", check_in_id)),
        }
    }

    #[instrument(skip(self))]
    async fn list_check_ins(&self, limit: usize) -> Result<Vec<CheckIn>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_check_ins"])
            .start_timer();

        let rows = sqlx::query_as::<_, CheckInRow>(&format!(
            "SELECT {CHECK_IN_COLUMNS} FROM check_ins ORDER BY checked_in_utc DESC LIMIT $1"
        ))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx("Failed to list check-ins", e))?;

        timer.observe_duration();
        Ok(rows.into_iter().map(CheckIn::from).collect())
    }
}

#[async_trait]
impl GymStore for Database {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx("Health check failed", e))?;

        timer.observe_duration();
        Ok(())
    }
}
