use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::domain::{Cents, ProductId, UserId, WithdrawalId};

/// Emitted once a withdrawal request has been committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithdrawalCreated {
    /// Unique per event, lets consumers drop duplicates
    pub event_id: Uuid,
    pub user_id: UserId,
    pub product_id: ProductId,
    pub amount_cents: Cents,
    pub withdrawal_id: WithdrawalId,
    pub reference: String,
    pub occurred_at: DateTime<Utc>,
}

/// Outbound notification of withdrawal events (e-mail, webhooks, ...).
///
/// Delivery is best-effort: the service logs failures and never lets them
/// affect a committed withdrawal.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn withdrawal_created(&self, event: &WithdrawalCreated) -> Result<()>;
}

/// Writes events to the log. Used when no other notifier is configured.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn withdrawal_created(&self, event: &WithdrawalCreated) -> Result<()> {
        tracing::info!(
            event_id = %event.event_id,
            user_id = event.user_id,
            product_id = event.product_id,
            withdrawal_id = event.withdrawal_id,
            reference = %event.reference,
            amount_cents = event.amount_cents,
            "Withdrawal created"
        );
        Ok(())
    }
}

/// Hands events to a consumer task over a bounded channel without waiting.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: mpsc::Sender<WithdrawalCreated>,
}

impl ChannelNotifier {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<WithdrawalCreated>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn withdrawal_created(&self, event: &WithdrawalCreated) -> Result<()> {
        self.sender.try_send(event.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => anyhow!("notification queue is full"),
            mpsc::error::TrySendError::Closed(_) => anyhow!("notification consumer has stopped"),
        })
    }
}
