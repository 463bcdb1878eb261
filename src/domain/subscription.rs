use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};

use super::Cents;

pub type UserId = i64;
pub type ProductId = i64;

/// A user's subscription to an investment product.
/// Owned by the subscription store; the withdrawal engine only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProduct {
    pub id: i64,
    pub user_id: UserId,
    pub product_id: ProductId,
    pub invested_cents: Cents,
    pub start_date: DateTime<Utc>,
    pub maturity_date: Option<DateTime<Utc>>,
    pub term_months: u32,
    /// Nominal annual rate in percent (e.g. 12.5)
    pub annual_rate: f64,
    pub currency: String,
}

impl UserProduct {
    /// Create a subscription; the maturity date follows from the term.
    pub fn new(
        user_id: UserId,
        product_id: ProductId,
        invested_cents: Cents,
        start_date: DateTime<Utc>,
        term_months: u32,
        annual_rate: f64,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            user_id,
            product_id,
            invested_cents,
            start_date,
            maturity_date: start_date.checked_add_months(Months::new(term_months)),
            term_months,
            annual_rate,
            currency: currency.into(),
        }
    }

    pub fn has_investment(&self) -> bool {
        self.invested_cents > 0
    }
}
