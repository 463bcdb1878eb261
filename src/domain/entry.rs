use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Cents, ProductId, UserId};

pub type EntryId = i64;

/// Kind of monetary movement recorded in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    /// Money leaving an invested product (always negative)
    Withdrawal,
    /// Interest credited by the product
    Yield,
    /// Anything else: deposits, adjustments
    Other,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Withdrawal => "withdrawal",
            EntryType::Yield => "yield",
            EntryType::Other => "other",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "withdrawal" => Some(EntryType::Withdrawal),
            "yield" => Some(EntryType::Yield),
            "other" => Some(EntryType::Other),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Lifecycle status shared by ledger entries and withdrawal requests.
/// `InProgress` moves to `Applied` or `Rejected` exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    InProgress,
    Applied,
    Rejected,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::InProgress => "in_progress",
            EntryStatus::Applied => "applied",
            EntryStatus::Rejected => "rejected",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "in_progress" => Some(EntryStatus::InProgress),
            "applied" => Some(EntryStatus::Applied),
            "rejected" => Some(EntryStatus::Rejected),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            EntryStatus::InProgress => "In progress",
            EntryStatus::Applied => "Applied",
            EntryStatus::Rejected => "Rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, EntryStatus::InProgress)
    }
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.label())
    }
}

/// A signed monetary record for a user and product.
/// The sign encodes direction: withdrawals are negative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Durable sequence assigned by the store (0 until saved)
    pub id: EntryId,
    pub user_id: UserId,
    pub product_id: ProductId,
    pub entry_type: EntryType,
    pub description: Option<String>,
    /// Correlation id shared with the originating request
    pub reference: String,
    pub status: EntryStatus,
    pub amount_cents: Cents,
    pub occurred_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// The negative entry paired with a withdrawal request.
    pub fn withdrawal(
        user_id: UserId,
        product_id: ProductId,
        amount_cents: Cents,
        reference: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            user_id,
            product_id,
            entry_type: EntryType::Withdrawal,
            description: Some("Withdrawal request".to_string()),
            reference: reference.into(),
            status: EntryStatus::InProgress,
            amount_cents: -amount_cents.abs(),
            occurred_at,
        }
    }

    pub fn new(
        user_id: UserId,
        product_id: ProductId,
        entry_type: EntryType,
        amount_cents: Cents,
        reference: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            user_id,
            product_id,
            entry_type,
            description: None,
            reference: reference.into(),
            status: EntryStatus::Applied,
            amount_cents,
            occurred_at,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_status(mut self, status: EntryStatus) -> Self {
        self.status = status;
        self
    }
}
