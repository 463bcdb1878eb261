use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, Sqlite, Transaction};

use crate::domain::{
    Cents, EntryStatus, EntryType, LedgerEntry, ProductId, UserId, UserProduct, WithdrawalId,
    WithdrawalRequest,
};

use super::repository::{
    fetch_user_product, fetch_withdrawal_request, row_to_entry, row_to_withdrawal_request,
    timestamp,
};

/// An atomic, isolated scope over the ledger store.
///
/// Reads and writes issued through the same unit either all commit or all
/// disappear. Dropping the unit without calling [`UnitOfWork::commit`] rolls
/// it back and returns the connection to the pool.
///
/// SQLite has no `SELECT ... FOR UPDATE`; the `lock_*` methods issue a no-op
/// `UPDATE` on the target row instead. Run as the first statement of the
/// unit, it takes the write lock before anything is read, so two units that
/// lock the same row serialize and the second one reads what the first
/// committed. A blocked unit waits at most the configured busy timeout.
pub struct UnitOfWork {
    tx: Transaction<'static, Sqlite>,
}

impl UnitOfWork {
    pub(super) fn new(tx: Transaction<'static, Sqlite>) -> Self {
        Self { tx }
    }

    /// Commit every write of this unit.
    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await.context("Failed to commit transaction")
    }

    /// Discard every write of this unit.
    pub async fn rollback(self) -> Result<()> {
        self.tx
            .rollback()
            .await
            .context("Failed to roll back transaction")
    }

    // ========================
    // Locks
    // ========================

    /// Lock the subscription row used by the admission check.
    /// Returns false when the user has no subscription to the product.
    pub async fn lock_user_product(&mut self, user_id: UserId, product_id: ProductId) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE user_products SET invested_cents = invested_cents WHERE user_id = ? AND product_id = ?",
        )
        .bind(user_id)
        .bind(product_id)
        .execute(&mut *self.tx)
        .await
        .context("Failed to lock subscription")?;

        Ok(result.rows_affected() > 0)
    }

    /// Lock a withdrawal request row. With `owner` set, rows of other users are not matched.
    /// Returns false when no such request exists.
    pub async fn lock_withdrawal_request(
        &mut self,
        id: WithdrawalId,
        owner: Option<UserId>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE withdrawal_requests
            SET status = status
            WHERE id = ? AND (? IS NULL OR user_id = ?)
            "#,
        )
        .bind(id)
        .bind(owner)
        .bind(owner)
        .execute(&mut *self.tx)
        .await
        .context("Failed to lock withdrawal request")?;

        Ok(result.rows_affected() > 0)
    }

    // ========================
    // Reads
    // ========================

    pub async fn get_user_product(
        &mut self,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<Option<UserProduct>> {
        fetch_user_product(&mut *self.tx, user_id, product_id).await
    }

    /// Sum of the absolute amounts of a user's entries in one product with the given type and status.
    pub async fn sum_ledger_amounts(
        &mut self,
        user_id: UserId,
        product_id: ProductId,
        entry_type: EntryType,
        status: EntryStatus,
    ) -> Result<Cents> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(ABS(amount_cents)), 0) as total
            FROM transactions
            WHERE user_id = ? AND product_id = ? AND entry_type = ? AND status = ?
            "#,
        )
        .bind(user_id)
        .bind(product_id)
        .bind(entry_type.as_str())
        .bind(status.as_str())
        .fetch_one(&mut *self.tx)
        .await
        .context("Failed to sum ledger amounts")?;

        Ok(row.get("total"))
    }

    pub async fn get_withdrawal_request(
        &mut self,
        id: WithdrawalId,
    ) -> Result<Option<WithdrawalRequest>> {
        fetch_withdrawal_request(&mut *self.tx, id).await
    }

    /// List the most recent entries of a user.
    pub async fn list_entries(&mut self, user_id: UserId, limit: usize) -> Result<Vec<LedgerEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, product_id, entry_type, description, reference, status, amount_cents, occurred_at
            FROM transactions
            WHERE user_id = ?
            ORDER BY occurred_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&mut *self.tx)
        .await
        .context("Failed to list entries")?;

        rows.iter().map(row_to_entry).collect()
    }

    /// Sum of all entry amounts of a user (the ledger balance).
    pub async fn ledger_balance(&mut self, user_id: UserId) -> Result<Cents> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(amount_cents), 0) as balance
            FROM transactions
            WHERE user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_one(&mut *self.tx)
        .await
        .context("Failed to compute ledger balance")?;

        Ok(row.get("balance"))
    }

    /// Sum of the signed amounts of a user's entries with a given type and status.
    pub async fn sum_user_amounts(
        &mut self,
        user_id: UserId,
        entry_type: EntryType,
        status: EntryStatus,
    ) -> Result<Cents> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(amount_cents), 0) as total
            FROM transactions
            WHERE user_id = ? AND entry_type = ? AND status = ?
            "#,
        )
        .bind(user_id)
        .bind(entry_type.as_str())
        .bind(status.as_str())
        .fetch_one(&mut *self.tx)
        .await
        .context("Failed to sum entries")?;

        Ok(row.get("total"))
    }

    // ========================
    // Writes
    // ========================

    /// Insert an in-progress withdrawal request; the store assigns its durable id.
    pub async fn insert_withdrawal_request(
        &mut self,
        user_id: UserId,
        product_id: ProductId,
        amount_cents: Cents,
        requested_at: DateTime<Utc>,
    ) -> Result<WithdrawalRequest> {
        let row = sqlx::query(
            r#"
            INSERT INTO withdrawal_requests (user_id, product_id, amount_cents, status, requested_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id, user_id, product_id, amount_cents, status, requested_at, processed_at, notes
            "#,
        )
        .bind(user_id)
        .bind(product_id)
        .bind(amount_cents)
        .bind(EntryStatus::InProgress.as_str())
        .bind(timestamp(&requested_at))
        .fetch_one(&mut *self.tx)
        .await
        .context("Failed to insert withdrawal request")?;

        row_to_withdrawal_request(&row)
    }

    /// Insert a ledger entry and assign its durable id.
    pub async fn insert_entry(&mut self, entry: &mut LedgerEntry) -> Result<()> {
        let row = sqlx::query(
            r#"
            INSERT INTO transactions (user_id, product_id, entry_type, description, reference, status, amount_cents, occurred_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(entry.user_id)
        .bind(entry.product_id)
        .bind(entry.entry_type.as_str())
        .bind(&entry.description)
        .bind(&entry.reference)
        .bind(entry.status.as_str())
        .bind(entry.amount_cents)
        .bind(timestamp(&entry.occurred_at))
        .fetch_one(&mut *self.tx)
        .await
        .context("Failed to insert ledger entry")?;

        entry.id = row.get("id");
        Ok(())
    }

    /// Move a request to a new status, stamping `processed_at`.
    /// `note` is only written when the request has no notes yet.
    pub async fn update_withdrawal_request_status(
        &mut self,
        id: WithdrawalId,
        status: EntryStatus,
        processed_at: DateTime<Utc>,
        note: Option<&str>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE withdrawal_requests
            SET status = ?, processed_at = ?, notes = COALESCE(notes, ?)
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(timestamp(&processed_at))
        .bind(note)
        .bind(id)
        .execute(&mut *self.tx)
        .await
        .context("Failed to update withdrawal request status")?;

        Ok(result.rows_affected())
    }

    /// Move the withdrawal entry paired with `reference` to a new status.
    pub async fn update_entry_status_by_reference(
        &mut self,
        user_id: UserId,
        reference: &str,
        status: EntryStatus,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE transactions
            SET status = ?
            WHERE user_id = ? AND reference = ? AND entry_type = 'withdrawal'
            "#,
        )
        .bind(status.as_str())
        .bind(user_id)
        .bind(reference)
        .execute(&mut *self.tx)
        .await
        .context("Failed to update ledger entry status")?;

        Ok(result.rows_affected())
    }
}
