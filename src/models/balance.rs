use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// An immutable point-in-time balance reported by the provider.
///
/// Snapshots are append-only; multiple snapshots accumulate per account
/// over time and are never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    /// Provider balance type, e.g. `interimAvailable` or `closingBooked`.
    pub balance_type: String,
    pub amount: Decimal,
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_date: Option<NaiveDate>,
    pub retrieved_at: DateTime<Utc>,
}
