mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use async_trait::async_trait;
use azell::application::{
    ChannelNotifier, Notifier, ServiceOptions, WithdrawalCreated,
};
use common::{subscribe, test_service};

struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn withdrawal_created(&self, _event: &WithdrawalCreated) -> Result<()> {
        bail!("mail server unavailable")
    }
}

struct StalledNotifier;

#[async_trait]
impl Notifier for StalledNotifier {
    async fn withdrawal_created(&self, _event: &WithdrawalCreated) -> Result<()> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(())
    }
}

#[tokio::test]
async fn test_committed_withdrawal_is_published() -> Result<()> {
    let (service, _temp) = test_service().await?;
    subscribe(&service, 7, 3, 50000).await?;
    let (notifier, mut events) = ChannelNotifier::new(8);
    let service = service.with_notifier(Arc::new(notifier));

    let receipt = service.request_withdrawal(7, 3, 12500).await?;

    let event = events.recv().await.unwrap();
    assert_eq!(event.user_id, 7);
    assert_eq!(event.product_id, 3);
    assert_eq!(event.amount_cents, 12500);
    assert_eq!(event.withdrawal_id, receipt.withdrawal_id);
    assert_eq!(event.reference, receipt.reference);

    Ok(())
}

#[tokio::test]
async fn test_rejected_request_publishes_nothing() -> Result<()> {
    let (service, _temp) = test_service().await?;
    subscribe(&service, 7, 3, 50000).await?;
    let (notifier, mut events) = ChannelNotifier::new(8);
    let service = service.with_notifier(Arc::new(notifier));

    assert!(service.request_withdrawal(7, 3, 50001).await.is_err());
    assert!(events.try_recv().is_err());

    Ok(())
}

#[tokio::test]
async fn test_notification_failure_keeps_withdrawal() -> Result<()> {
    let (service, _temp) = test_service().await?;
    subscribe(&service, 1, 10, 100000).await?;
    let service = service.with_notifier(Arc::new(FailingNotifier));

    let receipt = service.request_withdrawal(1, 10, 40000).await?;

    let request = service.get_withdrawal(1, receipt.withdrawal_id).await?;
    assert_eq!(request.amount_cents, 40000);
    assert_eq!(service.compute_availability(1, 10).await?.available, 60000);

    Ok(())
}

#[tokio::test]
async fn test_closed_consumer_keeps_withdrawal() -> Result<()> {
    let (service, _temp) = test_service().await?;
    subscribe(&service, 1, 10, 100000).await?;
    let (notifier, events) = ChannelNotifier::new(1);
    drop(events);
    let service = service.with_notifier(Arc::new(notifier));

    service.request_withdrawal(1, 10, 40000).await?;
    assert_eq!(service.list_withdrawals(1).await?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_stalled_notifier_is_bounded() -> Result<()> {
    let (service, _temp) = test_service().await?;
    subscribe(&service, 1, 10, 100000).await?;
    let service = service
        .with_notifier(Arc::new(StalledNotifier))
        .with_options(ServiceOptions {
            scope_timeout: Duration::from_secs(10),
            notify_timeout: Duration::from_millis(100),
        });

    let started = Instant::now();
    service.request_withdrawal(1, 10, 40000).await?;

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(service.list_withdrawals(1).await?.len(), 1);

    Ok(())
}
