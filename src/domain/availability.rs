use serde::{Deserialize, Serialize};

use super::{Cents, EntryStatus, EntryType, LedgerEntry, ProductId, UserId, UserProduct};

/// Withdrawable position of a user in a single product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    pub invested: Cents,
    /// Absolute sum of in-progress withdrawals
    pub pending_withdrawals: Cents,
    /// Absolute sum of applied withdrawals
    pub applied_withdrawals: Cents,
    pub available: Cents,
}

impl Availability {
    pub fn new(invested: Cents, pending_withdrawals: Cents, applied_withdrawals: Cents) -> Self {
        Self {
            invested,
            pending_withdrawals,
            applied_withdrawals,
            available: invested - pending_withdrawals - applied_withdrawals,
        }
    }

    /// Build from the subscription and the two ledger aggregates.
    pub fn for_subscription(
        subscription: Option<&UserProduct>,
        pending_withdrawals: Cents,
        applied_withdrawals: Cents,
    ) -> Result<Self, AvailabilityError> {
        let subscription = subscription.ok_or(AvailabilityError::NotSubscribed)?;
        if !subscription.has_investment() {
            return Err(AvailabilityError::NoInvestment);
        }
        Ok(Self::new(
            subscription.invested_cents,
            pending_withdrawals,
            applied_withdrawals,
        ))
    }

    /// Exactly the available amount is admissible; one cent more is not.
    pub fn admits(&self, amount: Cents) -> bool {
        amount <= self.available
    }

    /// Position once a new in-progress withdrawal of `amount` is recorded.
    pub fn after_withdrawal(&self, amount: Cents) -> Self {
        Self::new(
            self.invested,
            self.pending_withdrawals + amount,
            self.applied_withdrawals,
        )
    }

    /// `applied + pending <= invested`
    pub fn is_consistent(&self) -> bool {
        self.available >= 0
    }
}

/// Compute availability from a subscription and an in-memory slice of entries.
/// Entries for other users, other products or other types are ignored, and
/// rejected withdrawals count for nothing.
pub fn compute_availability(
    user_id: UserId,
    product_id: ProductId,
    subscription: Option<&UserProduct>,
    entries: &[LedgerEntry],
) -> Result<Availability, AvailabilityError> {
    let withdrawals = entries.iter().filter(|e| {
        e.user_id == user_id && e.product_id == product_id && e.entry_type == EntryType::Withdrawal
    });

    let (pending, applied) = withdrawals.fold((0, 0), |(pending, applied), e| match e.status {
        EntryStatus::InProgress => (pending + e.amount_cents.abs(), applied),
        EntryStatus::Applied => (pending, applied + e.amount_cents.abs()),
        EntryStatus::Rejected => (pending, applied),
    });

    Availability::for_subscription(subscription, pending, applied)
}

/// Balance of a user = sum of all entry amounts (sign encodes direction).
pub fn compute_balance(user_id: UserId, entries: &[LedgerEntry]) -> Cents {
    entries
        .iter()
        .filter(|e| e.user_id == user_id)
        .map(|e| e.amount_cents)
        .sum()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvailabilityError {
    /// No subscription row for the (user, product) pair
    NotSubscribed,
    /// Subscription exists but its invested amount is not positive
    NoInvestment,
}

impl std::fmt::Display for AvailabilityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AvailabilityError::NotSubscribed => write!(f, "product is not assigned to the user"),
            AvailabilityError::NoInvestment => write!(f, "product has no registered investment"),
        }
    }
}

impl std::error::Error for AvailabilityError {}
