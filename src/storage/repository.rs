use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteExecutor, SqlitePool};

use crate::domain::{
    EntryStatus, EntryType, LedgerEntry, ProductId, UserId, UserProduct, WithdrawalId,
    WithdrawalRequest,
};

use super::{UnitOfWork, MIGRATION_001_INITIAL};

/// Connection settings for the ledger store.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub max_connections: u32,
    /// How long a statement waits for another writer's lock before failing
    pub busy_timeout: Duration,
    /// How long an operation waits for a free pooled connection
    pub acquire_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            max_connections: 8,
            busy_timeout: Duration::from_secs(5),
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

/// Repository for subscriptions, withdrawal requests and ledger entries.
///
/// Plain reads run directly on the pool. Anything that must be atomic goes
/// through a [`UnitOfWork`] obtained from [`Repository::begin`].
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the SQLite database file at `path`.
    /// The file is created only when `create_if_missing` is set.
    pub async fn connect(
        path: &str,
        options: &StoreOptions,
        create_if_missing: bool,
    ) -> Result<Self> {
        let connect_options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))
            .context("Invalid database path")?
            .create_if_missing(create_if_missing)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(options.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections)
            .acquire_timeout(options.acquire_timeout)
            .connect_with(connect_options)
            .await
            .context("Failed to connect to database")?;

        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;

        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(path: &str, options: &StoreOptions) -> Result<Self> {
        let repo = Self::connect(path, options, true).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    /// Open an atomic scope. Dropping it without commit rolls everything back.
    pub async fn begin(&self) -> Result<UnitOfWork> {
        let tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;
        Ok(UnitOfWork::new(tx))
    }

    // ========================
    // Subscription operations
    // ========================

    /// Save a new subscription and assign its id.
    /// Returns false, writing nothing, when the user already holds the product.
    pub async fn save_user_product(&self, subscription: &mut UserProduct) -> Result<bool> {
        let row = sqlx::query(
            r#"
            INSERT INTO user_products (user_id, product_id, invested_cents, start_date, maturity_date, term_months, annual_rate, currency)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (user_id, product_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(subscription.user_id)
        .bind(subscription.product_id)
        .bind(subscription.invested_cents)
        .bind(timestamp(&subscription.start_date))
        .bind(subscription.maturity_date.as_ref().map(timestamp))
        .bind(i64::from(subscription.term_months))
        .bind(subscription.annual_rate)
        .bind(&subscription.currency)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to save subscription")?;

        let Some(row) = row else {
            return Ok(false);
        };
        subscription.id = row.get("id");
        Ok(true)
    }

    /// Get the subscription of a user to a product.
    pub async fn get_user_product(
        &self,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<Option<UserProduct>> {
        fetch_user_product(&self.pool, user_id, product_id).await
    }

    /// List every subscription, ordered by id.
    pub async fn list_user_products(&self) -> Result<Vec<UserProduct>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, product_id, invested_cents, start_date, maturity_date, term_months, annual_rate, currency
            FROM user_products
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list subscriptions")?;

        rows.iter().map(row_to_user_product).collect()
    }

    // ========================
    // Withdrawal request operations
    // ========================

    /// Get a withdrawal request by id, regardless of owner.
    pub async fn get_withdrawal_request(
        &self,
        id: WithdrawalId,
    ) -> Result<Option<WithdrawalRequest>> {
        fetch_withdrawal_request(&self.pool, id).await
    }

    /// List the withdrawal requests of a user, newest first.
    pub async fn list_withdrawal_requests(&self, user_id: UserId) -> Result<Vec<WithdrawalRequest>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, product_id, amount_cents, status, requested_at, processed_at, notes
            FROM withdrawal_requests
            WHERE user_id = ?
            ORDER BY id DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list withdrawal requests")?;

        rows.iter().map(row_to_withdrawal_request).collect()
    }

    /// List every withdrawal request, ordered by id.
    pub async fn list_all_withdrawal_requests(&self) -> Result<Vec<WithdrawalRequest>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, product_id, amount_cents, status, requested_at, processed_at, notes
            FROM withdrawal_requests
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list withdrawal requests")?;

        rows.iter().map(row_to_withdrawal_request).collect()
    }

    // ========================
    // Ledger entry operations
    // ========================

    /// List every entry of a given type, ordered by id.
    pub async fn list_entries_by_type(&self, entry_type: EntryType) -> Result<Vec<LedgerEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, product_id, entry_type, description, reference, status, amount_cents, occurred_at
            FROM transactions
            WHERE entry_type = ?
            ORDER BY id
            "#,
        )
        .bind(entry_type.as_str())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list entries by type")?;

        rows.iter().map(row_to_entry).collect()
    }
}

// ========================
// Shared queries and row mapping
// ========================

/// Storage format for timestamps: RFC 3339, UTC, fixed precision so text order is time order.
pub(super) fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str, what: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("Invalid {} timestamp", what))?
        .with_timezone(&Utc))
}

pub(super) async fn fetch_user_product<'e, E: SqliteExecutor<'e>>(
    executor: E,
    user_id: UserId,
    product_id: ProductId,
) -> Result<Option<UserProduct>> {
    let row = sqlx::query(
        r#"
        SELECT id, user_id, product_id, invested_cents, start_date, maturity_date, term_months, annual_rate, currency
        FROM user_products
        WHERE user_id = ? AND product_id = ?
        "#,
    )
    .bind(user_id)
    .bind(product_id)
    .fetch_optional(executor)
    .await
    .context("Failed to fetch subscription")?;

    row.as_ref().map(row_to_user_product).transpose()
}

pub(super) async fn fetch_withdrawal_request<'e, E: SqliteExecutor<'e>>(
    executor: E,
    id: WithdrawalId,
) -> Result<Option<WithdrawalRequest>> {
    let row = sqlx::query(
        r#"
        SELECT id, user_id, product_id, amount_cents, status, requested_at, processed_at, notes
        FROM withdrawal_requests
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(executor)
    .await
    .context("Failed to fetch withdrawal request")?;

    row.as_ref().map(row_to_withdrawal_request).transpose()
}

fn row_to_user_product(row: &SqliteRow) -> Result<UserProduct> {
    let start_date_str: String = row.get("start_date");
    let maturity_date_str: Option<String> = row.get("maturity_date");
    let term_months: i64 = row.get("term_months");

    Ok(UserProduct {
        id: row.get("id"),
        user_id: row.get("user_id"),
        product_id: row.get("product_id"),
        invested_cents: row.get("invested_cents"),
        start_date: parse_timestamp(&start_date_str, "start_date")?,
        maturity_date: maturity_date_str
            .map(|s| parse_timestamp(&s, "maturity_date"))
            .transpose()?,
        term_months: u32::try_from(term_months).context("Invalid term_months")?,
        annual_rate: row.get("annual_rate"),
        currency: row.get("currency"),
    })
}

pub(super) fn row_to_withdrawal_request(row: &SqliteRow) -> Result<WithdrawalRequest> {
    let status_str: String = row.get("status");
    let requested_at_str: String = row.get("requested_at");
    let processed_at_str: Option<String> = row.get("processed_at");

    Ok(WithdrawalRequest {
        id: row.get("id"),
        user_id: row.get("user_id"),
        product_id: row.get("product_id"),
        amount_cents: row.get("amount_cents"),
        status: EntryStatus::from_str(&status_str)
            .ok_or_else(|| anyhow::anyhow!("Invalid withdrawal status: {}", status_str))?,
        requested_at: parse_timestamp(&requested_at_str, "requested_at")?,
        processed_at: processed_at_str
            .map(|s| parse_timestamp(&s, "processed_at"))
            .transpose()?,
        notes: row.get("notes"),
    })
}

pub(super) fn row_to_entry(row: &SqliteRow) -> Result<LedgerEntry> {
    let entry_type_str: String = row.get("entry_type");
    let status_str: String = row.get("status");
    let occurred_at_str: String = row.get("occurred_at");

    Ok(LedgerEntry {
        id: row.get("id"),
        user_id: row.get("user_id"),
        product_id: row.get("product_id"),
        entry_type: EntryType::from_str(&entry_type_str)
            .ok_or_else(|| anyhow::anyhow!("Invalid entry type: {}", entry_type_str))?,
        description: row.get("description"),
        reference: row.get("reference"),
        status: EntryStatus::from_str(&status_str)
            .ok_or_else(|| anyhow::anyhow!("Invalid entry status: {}", status_str))?,
        amount_cents: row.get("amount_cents"),
        occurred_at: parse_timestamp(&occurred_at_str, "occurred_at")?,
    })
}
