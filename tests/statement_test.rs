mod common;

use anyhow::Result;
use azell::application::{AppError, NewSubscription};
use azell::domain::{EntryStatus, EntryType, IntegrityIssue, Settlement};
use azell::io::Exporter;
use chrono::Utc;
use common::{record_entry, subscribe, test_service};

#[tokio::test]
async fn test_statement_balance_and_yield() -> Result<()> {
    let (service, _temp) = test_service().await?;
    subscribe(&service, 1, 10, 100000).await?;
    record_entry(&service, 1, 10, EntryType::Yield, 850, "YLD-2024-01").await?;
    record_entry(&service, 1, 10, EntryType::Yield, 910, "YLD-2024-02").await?;

    let applied = service.request_withdrawal(1, 10, 20000).await?;
    service
        .settle_withdrawal(applied.withdrawal_id, Settlement::Applied, None)
        .await?;
    service.request_withdrawal(1, 10, 5000).await?;

    let statement = service.statement(1, 100).await?;
    assert_eq!(statement.total_yield, 1760);
    assert_eq!(statement.balance, 1760 - 20000 - 5000);
    assert_eq!(statement.entries.len(), 4);

    // Newest first
    assert_eq!(statement.entries[0].reference, "WDR-000002");
    assert_eq!(statement.entries[0].status, EntryStatus::InProgress);

    let limited = service.statement(1, 2).await?;
    assert_eq!(limited.entries.len(), 2);
    assert_eq!(limited.balance, statement.balance);

    // Other users see nothing
    let other = service.statement(2, 100).await?;
    assert_eq!(other.balance, 0);
    assert!(other.entries.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_yield_does_not_change_availability() -> Result<()> {
    let (service, _temp) = test_service().await?;
    subscribe(&service, 1, 10, 100000).await?;
    record_entry(&service, 1, 10, EntryType::Yield, 5000, "YLD-2024-01").await?;

    let availability = service.compute_availability(1, 10).await?;
    assert_eq!(availability.available, 100000);

    Ok(())
}

#[tokio::test]
async fn test_register_subscription() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let subscription = NewSubscription {
        user_id: 1,
        product_id: 10,
        invested_cents: 250000,
        start_date: Utc::now(),
        term_months: 24,
        annual_rate: 7.25,
        currency: "EUR".to_string(),
    };

    let created = service.register_subscription(subscription.clone()).await?;
    assert!(created.id > 0);
    assert!(created.maturity_date.is_some());

    let stored = service.repository().get_user_product(1, 10).await?.unwrap();
    assert_eq!(stored.invested_cents, 250000);
    assert_eq!(stored.term_months, 24);
    assert_eq!(stored.currency, "EUR");

    let err = service
        .register_subscription(subscription.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::SubscriptionExists { .. }));
    assert_eq!(err.status_code(), 409);

    let err = service
        .register_subscription(NewSubscription {
            product_id: 11,
            invested_cents: 0,
            ..subscription
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidAmount(_)));

    Ok(())
}

#[tokio::test]
async fn test_integrity_report_flags_orphan_entries() -> Result<()> {
    let (service, _temp) = test_service().await?;
    subscribe(&service, 1, 10, 100000).await?;
    service.request_withdrawal(1, 10, 1000).await?;

    let report = service.check_integrity().await?;
    assert!(report.is_healthy());
    assert_eq!(report.subscription_count, 1);
    assert_eq!(report.withdrawal_count, 1);
    assert_eq!(report.entry_count, 1);

    record_entry(&service, 1, 10, EntryType::Withdrawal, -700, "WDR-000099").await?;

    let report = service.check_integrity().await?;
    assert!(!report.is_healthy());
    assert!(report
        .issues
        .iter()
        .any(|issue| matches!(issue, IntegrityIssue::OrphanEntry { .. })));

    Ok(())
}

#[tokio::test]
async fn test_export_entries_csv() -> Result<()> {
    let (service, _temp) = test_service().await?;
    subscribe(&service, 1, 10, 100000).await?;
    record_entry(&service, 1, 10, EntryType::Yield, 850, "YLD-2024-01").await?;
    service.request_withdrawal(1, 10, 40000).await?;

    let mut output = Vec::new();
    let count = Exporter::new(&service)
        .export_entries_csv(1, &mut output)
        .await?;
    assert_eq!(count, 2);

    let csv = String::from_utf8(output)?;
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("id,occurred_at,product_id,type,reference,status,amount"));
    assert!(csv.contains("withdrawal,WDR-000001,in_progress,-400.00"));
    assert!(csv.contains("yield,YLD-2024-01,applied,8.50"));

    Ok(())
}

#[tokio::test]
async fn test_export_withdrawals_csv_and_json() -> Result<()> {
    let (service, _temp) = test_service().await?;
    subscribe(&service, 1, 10, 100000).await?;
    let receipt = service.request_withdrawal(1, 10, 40000).await?;
    service.cancel_withdrawal(1, receipt.withdrawal_id).await?;

    let exporter = Exporter::new(&service);

    let mut output = Vec::new();
    assert_eq!(exporter.export_withdrawals_csv(1, &mut output).await?, 1);
    let csv = String::from_utf8(output)?;
    assert!(csv.contains("WDR-000001,10,400.00,rejected"));
    assert!(csv.contains("Cancelled by user"));

    let mut output = Vec::new();
    let snapshot = exporter.export_json(1, &mut output).await?;
    assert_eq!(snapshot.withdrawals.len(), 1);

    let json: serde_json::Value = serde_json::from_slice(&output)?;
    assert_eq!(json["user_id"], 1);
    assert_eq!(json["entries"].as_array().unwrap().len(), 1);
    assert_eq!(json["withdrawals"][0]["amount_cents"], 40000);

    Ok(())
}
