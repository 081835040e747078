use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Id;

/// An imported bank transaction.
///
/// Everything except `running_balance` is immutable once imported;
/// `(account_id, external_id)` is the dedup key for upserts.
/// `running_balance` is derived after every sync and is null until the
/// first calculation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Provider-assigned transaction id, unique within the account.
    pub external_id: String,
    pub account_id: Id,
    pub user_id: Uuid,
    /// Signed amount; negative for debits.
    pub amount: Decimal,
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub booking_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterparty: Option<String>,
    pub imported_at: DateTime<Utc>,
    /// Reconstructed account balance as of this transaction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running_balance: Option<Decimal>,
}

impl Transaction {
    /// The date this transaction takes effect: booking date, falling back
    /// to value date, then import time.
    pub fn effective_date(&self) -> NaiveDate {
        self.booking_date
            .or(self.value_date)
            .unwrap_or_else(|| self.imported_at.date_naive())
    }
}
