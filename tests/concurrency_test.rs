mod common;

use std::time::Duration;

use anyhow::Result;
use azell::application::{AppError, ErrorKind, LedgerService, NewSubscription, ServiceOptions};
use chrono::Utc;
use common::{subscribe, test_service};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_cannot_overspend() -> Result<()> {
    let (service, _temp) = test_service().await?;
    subscribe(&service, 1, 10, 100000).await?;

    // Each alone fits, both together do not
    let amount = 100000 / 2 + 1;
    let first = tokio::spawn({
        let service = service.clone();
        async move { service.request_withdrawal(1, 10, amount).await }
    });
    let second = tokio::spawn({
        let service = service.clone();
        async move { service.request_withdrawal(1, 10, amount).await }
    });

    let results = [first.await?, second.await?];
    let admitted = results.iter().filter(|r| r.is_ok()).count();
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(AppError::InsufficientAvailable { .. })))
        .count();
    assert_eq!(admitted, 1);
    assert_eq!(rejected, 1);

    let availability = service.compute_availability(1, 10).await?;
    assert_eq!(availability.pending_withdrawals, amount);
    assert!(availability.is_consistent());
    assert!(service.check_integrity().await?.is_healthy());

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_concurrent_requests_respect_invariant() -> Result<()> {
    let (service, _temp) = test_service().await?;
    subscribe(&service, 1, 10, 100000).await?;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service.request_withdrawal(1, 10, 30000).await
        }));
    }

    let mut admitted = 0;
    for handle in handles {
        match handle.await? {
            Ok(_) => admitted += 1,
            Err(AppError::InsufficientAvailable { .. }) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!(admitted, 3);
    let availability = service.compute_availability(1, 10).await?;
    assert_eq!(availability.pending_withdrawals, 90000);
    assert_eq!(availability.available, 10000);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blocked_scope_times_out_and_is_retryable() -> Result<()> {
    let (service, _temp) = test_service().await?;
    subscribe(&service, 1, 10, 100000).await?;
    let service = service.with_options(ServiceOptions {
        scope_timeout: Duration::from_millis(200),
        notify_timeout: Duration::from_millis(200),
    });

    // Hold the subscription lock from another transaction
    let mut holder = service.repository().begin().await?;
    assert!(holder.lock_user_product(1, 10).await?);

    let err = service.request_withdrawal(1, 10, 1000).await.unwrap_err();
    assert!(matches!(
        err,
        AppError::Timeout {
            operation: "request_withdrawal",
            ..
        }
    ));
    assert!(err.is_retryable());
    assert_eq!(err.kind(), ErrorKind::Internal);
    assert_eq!(err.status_code(), 503);

    holder.rollback().await?;

    let service = service.with_options(ServiceOptions::default());
    let receipt = service.request_withdrawal(1, 10, 1000).await?;
    assert_eq!(receipt.available_after, 99000);
    assert_eq!(service.list_withdrawals(1).await?.len(), 1);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_timed_out_request_leaves_nothing_behind() -> Result<()> {
    let (service, _temp) = test_service().await?;
    subscribe(&service, 1, 10, 100000).await?;

    let mut admitted = 0;
    let mut timed_out = 0;
    for micros in (50..=4000).step_by(50) {
        let service = service.clone().with_options(ServiceOptions {
            scope_timeout: Duration::from_micros(micros),
            notify_timeout: Duration::from_millis(200),
        });

        match service.request_withdrawal(1, 10, 1).await {
            Ok(_) => admitted += 1,
            Err(AppError::Timeout { .. }) => timed_out += 1,
            Err(other) => panic!("unexpected error: {other:?}"),
        }

        // Every stored request was reported as admitted
        assert_eq!(service.list_withdrawals(1).await?.len(), admitted);
    }

    assert_eq!(admitted + timed_out, 80);
    let availability = service.compute_availability(1, 10).await?;
    assert_eq!(availability.pending_withdrawals, admitted as i64);
    assert!(service.check_integrity().await?.is_healthy());

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_registration_reports_existing_subscription() -> Result<()> {
    let (service, _temp) = test_service().await?;

    for product_id in 1..=10 {
        let register = move |service: LedgerService| async move {
            service
                .register_subscription(NewSubscription {
                    user_id: 1,
                    product_id,
                    invested_cents: 100000,
                    start_date: Utc::now(),
                    term_months: 12,
                    annual_rate: 5.0,
                    currency: "USD".to_string(),
                })
                .await
        };
        let first = tokio::spawn(register(service.clone()));
        let second = tokio::spawn(register(service.clone()));

        let results = [first.await?, second.await?];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(AppError::SubscriptionExists { .. })))
                .count(),
            1
        );
    }

    assert_eq!(service.repository().list_user_products().await?.len(), 10);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_statement_is_a_consistent_snapshot() -> Result<()> {
    let (service, _temp) = test_service().await?;
    subscribe(&service, 1, 10, 100000).await?;

    let writer = tokio::spawn({
        let service = service.clone();
        async move {
            for _ in 0..40 {
                service.request_withdrawal(1, 10, 100).await?;
            }
            Ok::<_, AppError>(())
        }
    });

    for _ in 0..40 {
        let statement = service.statement(1, usize::MAX).await?;
        let listed: i64 = statement.entries.iter().map(|e| e.amount_cents).sum();
        assert_eq!(statement.balance, listed);
    }

    writer.await??;
    assert_eq!(service.statement(1, usize::MAX).await?.balance, -4000);

    Ok(())
}
