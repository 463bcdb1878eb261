use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::{
    build_integrity_report, format_reference, Availability, AvailabilityError, Cents,
    EntryStatus, EntryType, IntegrityReport, LedgerEntry, ProductId, Settlement, UserId,
    UserProduct, WithdrawalId, WithdrawalRequest, CANCELLATION_NOTE,
};
use crate::storage::{Repository, StoreOptions, UnitOfWork};

use super::{AppError, LogNotifier, Notifier, WithdrawalCreated};

/// Default number of entries in a statement.
pub const DEFAULT_STATEMENT_LIMIT: usize = 100;

/// Time limits applied by the service.
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    /// Upper bound for a whole atomic scope, lock waits included
    pub scope_timeout: Duration,
    /// Upper bound for a single notification attempt
    pub notify_timeout: Duration,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            scope_timeout: Duration::from_secs(10),
            notify_timeout: Duration::from_secs(2),
        }
    }
}

/// Application service for the withdrawal ledger.
/// This is the primary interface for any client (CLI, API, back office, etc.).
///
/// The service holds no mutable state of its own; clones share the same pool
/// and every operation acquires its own connection.
#[derive(Clone)]
pub struct LedgerService {
    repo: Repository,
    notifier: Arc<dyn Notifier>,
    options: ServiceOptions,
}

/// Result of an admitted withdrawal request
#[derive(Debug, Clone, Serialize)]
pub struct WithdrawalReceipt {
    pub withdrawal_id: WithdrawalId,
    pub reference: String,
    pub status: EntryStatus,
    pub invested: Cents,
    /// Includes the request just created
    pub pending_withdrawals: Cents,
    pub applied_withdrawals: Cents,
    pub available_before: Cents,
    pub available_after: Cents,
}

/// Result of cancelling a withdrawal request
#[derive(Debug, Clone, Serialize)]
pub struct CancellationReceipt {
    pub withdrawal_id: WithdrawalId,
    pub reference: String,
    pub status: EntryStatus,
}

/// Ledger summary of a user
#[derive(Debug, Clone, Serialize)]
pub struct Statement {
    pub user_id: UserId,
    /// Sum of every entry amount
    pub balance: Cents,
    /// Sum of applied yield entries
    pub total_yield: Cents,
    /// Most recent entries first
    pub entries: Vec<LedgerEntry>,
}

/// Fields of a subscription registered by the back office
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub user_id: UserId,
    pub product_id: ProductId,
    pub invested_cents: Cents,
    pub start_date: DateTime<Utc>,
    pub term_months: u32,
    pub annual_rate: f64,
    pub currency: String,
}

impl LedgerService {
    /// Create a new ledger service with the given repository.
    pub fn new(repo: Repository) -> Self {
        Self {
            repo,
            notifier: Arc::new(LogNotifier),
            options: ServiceOptions::default(),
        }
    }

    /// Initialize a new database at the given path.
    pub async fn init(database_path: &str) -> Result<Self, AppError> {
        Self::init_with_options(database_path, &StoreOptions::default()).await
    }

    pub async fn init_with_options(
        database_path: &str,
        options: &StoreOptions,
    ) -> Result<Self, AppError> {
        let repo = Repository::init(database_path, options).await?;
        Ok(Self::new(repo))
    }

    /// Connect to an existing database.
    pub async fn connect(database_path: &str) -> Result<Self, AppError> {
        Self::connect_with_options(database_path, &StoreOptions::default()).await
    }

    pub async fn connect_with_options(
        database_path: &str,
        options: &StoreOptions,
    ) -> Result<Self, AppError> {
        let repo = Repository::connect(database_path, options, false).await?;
        Ok(Self::new(repo))
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_options(mut self, options: ServiceOptions) -> Self {
        self.options = options;
        self
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    // ========================
    // Balance calculator
    // ========================

    /// Compute invested, pending, applied and available amounts for a product.
    /// Read-only; all figures come from one consistent snapshot.
    pub async fn compute_availability(
        &self,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<Availability, AppError> {
        validate_id("user_id", user_id)?;
        validate_id("product_id", product_id)?;

        self.bounded("compute_availability", async {
            let mut uow = self.repo.begin().await?;
            let result = read_availability(&mut uow, user_id, product_id).await;
            uow.rollback().await?;
            result
        })
        .await
        .inspect_err(|e| log_failure("compute_availability", Some(user_id), e))
    }

    // ========================
    // Withdrawal workflow
    // ========================

    /// Request a withdrawal of `amount_cents` from an invested product.
    ///
    /// The availability check, the request and its negative ledger entry are
    /// one atomic scope holding the subscription lock, so concurrent requests
    /// on the same product cannot spend the same balance twice.
    pub async fn request_withdrawal(
        &self,
        user_id: UserId,
        product_id: ProductId,
        amount_cents: Cents,
    ) -> Result<WithdrawalReceipt, AppError> {
        validate_amount(amount_cents)?;
        validate_id("user_id", user_id)?;
        validate_id("product_id", product_id)?;

        let receipt = self
            .atomic(
                "request_withdrawal",
                self.admit_withdrawal(user_id, product_id, amount_cents),
            )
            .await
            .inspect_err(|e| log_failure("request_withdrawal", Some(user_id), e))?;

        tracing::info!(
            user_id,
            product_id,
            withdrawal_id = receipt.withdrawal_id,
            reference = %receipt.reference,
            amount_cents,
            available_after = receipt.available_after,
            "Withdrawal requested"
        );

        self.notify_created(WithdrawalCreated {
            event_id: Uuid::new_v4(),
            user_id,
            product_id,
            amount_cents,
            withdrawal_id: receipt.withdrawal_id,
            reference: receipt.reference.clone(),
            occurred_at: Utc::now(),
        })
        .await;

        Ok(receipt)
    }

    async fn admit_withdrawal(
        &self,
        user_id: UserId,
        product_id: ProductId,
        amount_cents: Cents,
    ) -> Result<(UnitOfWork, WithdrawalReceipt), AppError> {
        let mut uow = self.repo.begin().await?;

        if !uow.lock_user_product(user_id, product_id).await? {
            return abort(
                uow,
                AppError::ProductNotAssigned {
                    user_id,
                    product_id,
                },
            )
            .await;
        }

        let before = match read_availability(&mut uow, user_id, product_id).await {
            Ok(availability) => availability,
            Err(e) => return abort(uow, e).await,
        };

        if !before.admits(amount_cents) {
            return abort(
                uow,
                AppError::InsufficientAvailable {
                    requested: amount_cents,
                    availability: before,
                },
            )
            .await;
        }

        let now = Utc::now();
        let request = uow
            .insert_withdrawal_request(user_id, product_id, amount_cents, now)
            .await?;
        let reference = format_reference(request.id);
        let mut entry =
            LedgerEntry::withdrawal(user_id, product_id, amount_cents, reference.clone(), now);
        uow.insert_entry(&mut entry).await?;

        let after = before.after_withdrawal(amount_cents);
        let receipt = WithdrawalReceipt {
            withdrawal_id: request.id,
            reference,
            status: request.status,
            invested: after.invested,
            pending_withdrawals: after.pending_withdrawals,
            applied_withdrawals: after.applied_withdrawals,
            available_before: before.available,
            available_after: after.available,
        };
        Ok((uow, receipt))
    }

    /// Cancel an in-progress withdrawal on behalf of its owner.
    ///
    /// Both the request and its ledger entry become `Rejected`. No reversing
    /// entry is written: rejected withdrawals simply stop counting against
    /// the available amount.
    pub async fn cancel_withdrawal(
        &self,
        user_id: UserId,
        withdrawal_id: WithdrawalId,
    ) -> Result<CancellationReceipt, AppError> {
        validate_id("user_id", user_id)?;
        validate_id("withdrawal_id", withdrawal_id)?;

        let receipt = self
            .atomic("cancel_withdrawal", async {
                let mut uow = self.repo.begin().await?;
                let request =
                    match lock_open_request(&mut uow, withdrawal_id, Some(user_id)).await {
                        Ok(request) => request,
                        Err(e) => return abort(uow, e).await,
                    };

                let reference = request.reference();
                uow.update_withdrawal_request_status(
                    withdrawal_id,
                    EntryStatus::Rejected,
                    Utc::now(),
                    Some(CANCELLATION_NOTE),
                )
                .await?;
                let updated = uow
                    .update_entry_status_by_reference(user_id, &reference, EntryStatus::Rejected)
                    .await?;
                if updated == 0 {
                    tracing::warn!(
                        withdrawal_id,
                        reference = %reference,
                        "No ledger entry paired with cancelled withdrawal"
                    );
                }

                let receipt = CancellationReceipt {
                    withdrawal_id,
                    reference,
                    status: EntryStatus::Rejected,
                };
                Ok((uow, receipt))
            })
            .await
            .inspect_err(|e| log_failure("cancel_withdrawal", Some(user_id), e))?;

        tracing::info!(
            user_id,
            withdrawal_id,
            reference = %receipt.reference,
            "Withdrawal cancelled"
        );

        Ok(receipt)
    }

    /// Settle an in-progress withdrawal as applied (paid out) or rejected.
    pub async fn settle_withdrawal(
        &self,
        withdrawal_id: WithdrawalId,
        outcome: Settlement,
        notes: Option<String>,
    ) -> Result<WithdrawalRequest, AppError> {
        validate_id("withdrawal_id", withdrawal_id)?;

        let settled = self
            .atomic("settle_withdrawal", async {
                let mut uow = self.repo.begin().await?;
                let request = match lock_open_request(&mut uow, withdrawal_id, None).await {
                    Ok(request) => request,
                    Err(e) => return abort(uow, e).await,
                };

                let status = outcome.status();
                uow.update_withdrawal_request_status(
                    withdrawal_id,
                    status,
                    Utc::now(),
                    notes.as_deref(),
                )
                .await?;
                uow.update_entry_status_by_reference(request.user_id, &request.reference(), status)
                    .await?;

                let settled = uow
                    .get_withdrawal_request(withdrawal_id)
                    .await?
                    .ok_or(AppError::NotFound(withdrawal_id))?;
                Ok((uow, settled))
            })
            .await
            .inspect_err(|e| log_failure("settle_withdrawal", None, e))?;

        tracing::info!(
            user_id = settled.user_id,
            withdrawal_id,
            status = settled.status.as_str(),
            "Withdrawal settled"
        );

        Ok(settled)
    }

    /// Get a withdrawal request owned by `user_id`.
    pub async fn get_withdrawal(
        &self,
        user_id: UserId,
        withdrawal_id: WithdrawalId,
    ) -> Result<WithdrawalRequest, AppError> {
        validate_id("user_id", user_id)?;
        validate_id("withdrawal_id", withdrawal_id)?;

        self.repo
            .get_withdrawal_request(withdrawal_id)
            .await?
            .filter(|r| r.user_id == user_id)
            .ok_or(AppError::NotFound(withdrawal_id))
    }

    /// List the withdrawal requests of a user, newest first.
    pub async fn list_withdrawals(&self, user_id: UserId) -> Result<Vec<WithdrawalRequest>, AppError> {
        validate_id("user_id", user_id)?;
        Ok(self.repo.list_withdrawal_requests(user_id).await?)
    }

    // ========================
    // Subscriptions
    // ========================

    /// Register a subscription so its invested amount can be withdrawn against.
    pub async fn register_subscription(
        &self,
        subscription: NewSubscription,
    ) -> Result<UserProduct, AppError> {
        validate_id("user_id", subscription.user_id)?;
        validate_id("product_id", subscription.product_id)?;
        validate_amount(subscription.invested_cents)?;

        let mut user_product = UserProduct::new(
            subscription.user_id,
            subscription.product_id,
            subscription.invested_cents,
            subscription.start_date,
            subscription.term_months,
            subscription.annual_rate,
            subscription.currency,
        );
        if !self.repo.save_user_product(&mut user_product).await? {
            return Err(AppError::SubscriptionExists {
                user_id: user_product.user_id,
                product_id: user_product.product_id,
            });
        }

        tracing::info!(
            user_id = user_product.user_id,
            product_id = user_product.product_id,
            invested_cents = user_product.invested_cents,
            "Subscription registered"
        );
        Ok(user_product)
    }

    // ========================
    // Reads and integrity
    // ========================

    /// Ledger summary of a user: balance, applied yield and latest entries.
    pub async fn statement(&self, user_id: UserId, limit: usize) -> Result<Statement, AppError> {
        validate_id("user_id", user_id)?;

        self.bounded("statement", async {
            let mut uow = self.repo.begin().await?;
            let balance = uow.ledger_balance(user_id).await?;
            let total_yield = uow
                .sum_user_amounts(user_id, EntryType::Yield, EntryStatus::Applied)
                .await?;
            let entries = uow.list_entries(user_id, limit).await?;
            uow.rollback().await?;

            Ok(Statement {
                user_id,
                balance,
                total_yield,
                entries,
            })
        })
        .await
        .inspect_err(|e| log_failure("statement", Some(user_id), e))
    }

    /// Check the invariants linking subscriptions, requests and ledger entries.
    pub async fn check_integrity(&self) -> Result<IntegrityReport, AppError> {
        let subscriptions = self.repo.list_user_products().await?;
        let requests = self.repo.list_all_withdrawal_requests().await?;
        let entries = self.repo.list_entries_by_type(EntryType::Withdrawal).await?;

        Ok(build_integrity_report(&subscriptions, &requests, &entries))
    }

    // ========================
    // Helpers
    // ========================

    /// Run a mutating scope under the configured time limit, then commit it.
    ///
    /// Only the work up to the commit is timed. A scope that times out is
    /// dropped with its uncommitted unit, so a `Timeout` never leaves writes
    /// behind; once the commit is issued the result is the commit's own.
    async fn atomic<T>(
        &self,
        operation: &'static str,
        scope: impl Future<Output = Result<(UnitOfWork, T), AppError>>,
    ) -> Result<T, AppError> {
        let (uow, value) = self.bounded(operation, scope).await?;
        uow.commit().await?;
        Ok(value)
    }

    /// Run `work` under the configured time limit.
    async fn bounded<T>(
        &self,
        operation: &'static str,
        work: impl Future<Output = Result<T, AppError>>,
    ) -> Result<T, AppError> {
        match tokio::time::timeout(self.options.scope_timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout {
                operation,
                limit: self.options.scope_timeout,
            }),
        }
    }

    async fn notify_created(&self, event: WithdrawalCreated) {
        let delivery = self.notifier.withdrawal_created(&event);
        match tokio::time::timeout(self.options.notify_timeout, delivery).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(
                withdrawal_id = event.withdrawal_id,
                reference = %event.reference,
                error = %e,
                "Withdrawal notification failed"
            ),
            Err(_) => tracing::warn!(
                withdrawal_id = event.withdrawal_id,
                reference = %event.reference,
                "Withdrawal notification timed out"
            ),
        }
    }
}

/// Read the subscription and both withdrawal aggregates inside `uow`.
async fn read_availability(
    uow: &mut UnitOfWork,
    user_id: UserId,
    product_id: ProductId,
) -> Result<Availability, AppError> {
    let subscription = uow.get_user_product(user_id, product_id).await?;
    let pending = uow
        .sum_ledger_amounts(
            user_id,
            product_id,
            EntryType::Withdrawal,
            EntryStatus::InProgress,
        )
        .await?;
    let applied = uow
        .sum_ledger_amounts(user_id, product_id, EntryType::Withdrawal, EntryStatus::Applied)
        .await?;

    Availability::for_subscription(subscription.as_ref(), pending, applied).map_err(|e| match e {
        AvailabilityError::NotSubscribed => AppError::ProductNotAssigned {
            user_id,
            product_id,
        },
        AvailabilityError::NoInvestment => AppError::NoInvestmentRegistered {
            user_id,
            product_id,
        },
    })
}

/// Lock a withdrawal request and make sure it can still change status.
async fn lock_open_request(
    uow: &mut UnitOfWork,
    withdrawal_id: WithdrawalId,
    owner: Option<UserId>,
) -> Result<WithdrawalRequest, AppError> {
    if !uow.lock_withdrawal_request(withdrawal_id, owner).await? {
        return Err(AppError::NotFound(withdrawal_id));
    }

    let request = uow
        .get_withdrawal_request(withdrawal_id)
        .await?
        .ok_or(AppError::NotFound(withdrawal_id))?;

    if !request.is_cancellable() {
        return Err(AppError::InvalidState {
            withdrawal_id,
            status: request.status,
        });
    }

    Ok(request)
}

/// Roll back explicitly before reporting a business-rule rejection.
async fn abort<T>(uow: UnitOfWork, err: AppError) -> Result<T, AppError> {
    uow.rollback().await?;
    Err(err)
}

fn validate_amount(amount_cents: Cents) -> Result<(), AppError> {
    if amount_cents <= 0 {
        return Err(AppError::InvalidAmount(
            "Amount must be positive".to_string(),
        ));
    }
    Ok(())
}

fn validate_id(field: &'static str, value: i64) -> Result<(), AppError> {
    if value <= 0 {
        return Err(AppError::InvalidIdentifier { field, value });
    }
    Ok(())
}

fn log_failure(operation: &'static str, user_id: Option<UserId>, err: &AppError) {
    match err {
        AppError::Internal(source) => tracing::error!(
            operation,
            user_id = ?user_id,
            error = %format!("{:#}", source),
            "Operation failed"
        ),
        AppError::Timeout { limit, .. } => {
            tracing::error!(operation, user_id = ?user_id, limit = ?limit, "Operation timed out")
        }
        rejection => {
            tracing::warn!(operation, user_id = ?user_id, reason = %rejection, "Operation rejected")
        }
    }
}
