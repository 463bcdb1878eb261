use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{format_reference, Cents, EntryStatus, ProductId, UserId};

pub type WithdrawalId = i64;

/// Note stamped on a request the owner cancelled.
pub const CANCELLATION_NOTE: &str = "Cancelled by user";

/// A customer's request to take money out of an invested product.
/// Always created together with its paired withdrawal ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    pub id: WithdrawalId,
    pub user_id: UserId,
    pub product_id: ProductId,
    /// Requested amount (always positive)
    pub amount_cents: Cents,
    pub status: EntryStatus,
    pub requested_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

impl WithdrawalRequest {
    pub fn reference(&self) -> String {
        format_reference(self.id)
    }

    pub fn is_cancellable(&self) -> bool {
        self.status == EntryStatus::InProgress
    }
}

/// Terminal outcome applied to an in-progress request by back-office settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Settlement {
    Applied,
    Rejected,
}

impl Settlement {
    pub fn status(&self) -> EntryStatus {
        match self {
            Settlement::Applied => EntryStatus::Applied,
            Settlement::Rejected => EntryStatus::Rejected,
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "applied" => Some(Settlement::Applied),
            "rejected" => Some(Settlement::Rejected),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(status: EntryStatus) -> WithdrawalRequest {
        WithdrawalRequest {
            id: 5,
            user_id: 1,
            product_id: 2,
            amount_cents: 10000,
            status,
            requested_at: Utc::now(),
            processed_at: None,
            notes: None,
        }
    }

    #[test]
    fn test_reference_derives_from_id() {
        assert_eq!(request(EntryStatus::InProgress).reference(), "WDR-000005");
    }

    #[test]
    fn test_only_in_progress_requests_are_cancellable() {
        assert!(request(EntryStatus::InProgress).is_cancellable());
        assert!(!request(EntryStatus::Applied).is_cancellable());
        assert!(!request(EntryStatus::Rejected).is_cancellable());
    }

    #[test]
    fn test_settlement_maps_to_terminal_status() {
        assert_eq!(Settlement::Applied.status(), EntryStatus::Applied);
        assert_eq!(Settlement::Rejected.status(), EntryStatus::Rejected);
        assert_eq!(Settlement::from_str("APPLIED"), Some(Settlement::Applied));
        assert_eq!(Settlement::from_str("in_progress"), None);
    }
}
