use std::time::Duration;

use thiserror::Error;

use crate::domain::{
    format_cents, Availability, Cents, EntryStatus, ParseCentsError, ProductId, UserId,
    WithdrawalId,
};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid {field}: {value} (must be a positive integer)")]
    InvalidIdentifier { field: &'static str, value: i64 },

    #[error("Product {product_id} is not assigned to user {user_id}")]
    ProductNotAssigned {
        user_id: UserId,
        product_id: ProductId,
    },

    #[error("Product {product_id} has no registered investment for user {user_id}")]
    NoInvestmentRegistered {
        user_id: UserId,
        product_id: ProductId,
    },

    #[error(
        "Amount {} exceeds the amount available for withdrawal: {}",
        money(.requested),
        describe(.availability)
    )]
    InsufficientAvailable {
        requested: Cents,
        availability: Availability,
    },

    #[error("Withdrawal request not found: {0}")]
    NotFound(WithdrawalId),

    #[error("Only in-progress requests can change status; withdrawal {withdrawal_id} is {status}")]
    InvalidState {
        withdrawal_id: WithdrawalId,
        status: EntryStatus,
    },

    #[error("User {user_id} is already subscribed to product {product_id}")]
    SubscriptionExists {
        user_id: UserId,
        product_id: ProductId,
    },

    #[error("{operation} timed out after {limit:?}")]
    Timeout {
        operation: &'static str,
        limit: Duration,
    },

    #[error("Internal error while processing the request")]
    Internal(#[from] anyhow::Error),
}

/// Coarse classification callers use to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad client input, detected before any storage work
    Validation,
    /// Business rule rejection, carries explanatory figures or status
    Rejected,
    /// Storage or transaction failure
    Internal,
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::InvalidAmount(_) | AppError::InvalidIdentifier { .. } => {
                ErrorKind::Validation
            }
            AppError::ProductNotAssigned { .. }
            | AppError::NoInvestmentRegistered { .. }
            | AppError::InsufficientAvailable { .. }
            | AppError::NotFound(_)
            | AppError::InvalidState { .. }
            | AppError::SubscriptionExists { .. } => ErrorKind::Rejected,
            AppError::Timeout { .. } | AppError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// True when the caller may retry the same operation unchanged.
    /// The engine itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Timeout { .. })
    }

    /// HTTP-equivalent status for transports that need one.
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::ProductNotAssigned { .. } | AppError::NotFound(_) => 404,
            AppError::SubscriptionExists { .. } => 409,
            AppError::Timeout { .. } => 503,
            AppError::Internal(_) => 500,
            _ => 400,
        }
    }
}

impl From<ParseCentsError> for AppError {
    fn from(err: ParseCentsError) -> Self {
        AppError::InvalidAmount(err.to_string())
    }
}

fn money(cents: &Cents) -> String {
    format_cents(*cents)
}

fn describe(availability: &Availability) -> String {
    format!(
        "invested {}, pending {}, applied {}, available {}",
        format_cents(availability.invested),
        format_cents(availability.pending_withdrawals),
        format_cents(availability.applied_withdrawals),
        format_cents(availability.available)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_available_explains_figures() {
        let err = AppError::InsufficientAvailable {
            requested: 80000,
            availability: Availability::new(100000, 0, 30000),
        };

        assert_eq!(
            err.to_string(),
            "Amount 800.00 exceeds the amount available for withdrawal: invested 1000.00, pending 0.00, applied 300.00, available 700.00"
        );
        assert_eq!(err.kind(), ErrorKind::Rejected);
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_internal_error_hides_details() {
        let err = AppError::from(anyhow::anyhow!("disk I/O error on transactions"));

        assert_eq!(err.to_string(), "Internal error while processing the request");
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_timeout_is_retryable() {
        let err = AppError::Timeout {
            operation: "request_withdrawal",
            limit: Duration::from_secs(10),
        };

        assert!(err.is_retryable());
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.status_code(), 503);
    }

    #[test]
    fn test_validation_errors() {
        let err = AppError::InvalidIdentifier {
            field: "user_id",
            value: 0,
        };
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(
            AppError::from(ParseCentsError::InvalidFormat).to_string(),
            "Invalid amount: invalid money format"
        );
    }

    #[test]
    fn test_not_found_maps_to_404() {
        assert_eq!(AppError::NotFound(5).status_code(), 404);
        assert_eq!(
            AppError::ProductNotAssigned {
                user_id: 1,
                product_id: 2
            }
            .status_code(),
            404
        );
    }
}
