// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use anyhow::Result;
use azell::application::{LedgerService, NewSubscription};
use azell::domain::{Cents, EntryType, LedgerEntry, ProductId, UserId};
use chrono::Utc;
use tempfile::TempDir;

/// Helper to create a test service with a temporary database
pub async fn test_service() -> Result<(LedgerService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let service = LedgerService::init(db_path.to_str().unwrap()).await?;
    Ok((service, temp_dir))
}

/// Register a 12 month subscription with the given invested amount
pub async fn subscribe(
    service: &LedgerService,
    user_id: UserId,
    product_id: ProductId,
    invested_cents: Cents,
) -> Result<()> {
    service
        .register_subscription(NewSubscription {
            user_id,
            product_id,
            invested_cents,
            start_date: Utc::now(),
            term_months: 12,
            annual_rate: 8.5,
            currency: "USD".to_string(),
        })
        .await?;
    Ok(())
}

/// Write an applied ledger entry that is not a withdrawal (yield, adjustments)
pub async fn record_entry(
    service: &LedgerService,
    user_id: UserId,
    product_id: ProductId,
    entry_type: EntryType,
    amount_cents: Cents,
    reference: &str,
) -> Result<()> {
    let mut uow = service.repository().begin().await?;
    let mut entry = LedgerEntry::new(
        user_id,
        product_id,
        entry_type,
        amount_cents,
        reference,
        Utc::now(),
    );
    uow.insert_entry(&mut entry).await?;
    uow.commit().await?;
    Ok(())
}
