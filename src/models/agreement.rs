use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Id;

/// What data an agreement permits the provider to share.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessScope {
    Balances,
    Details,
    Transactions,
}

/// A user's consent grant for one institution. Immutable once accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agreement {
    pub id: Id,
    pub user_id: Uuid,
    pub institution_id: Id,
    /// Days of transaction history the consent covers.
    pub max_historical_days: u32,
    /// Days the consent stays valid after acceptance.
    pub access_valid_for_days: u32,
    pub access_scope: Vec<AccessScope>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_at: Option<DateTime<Utc>>,
}

impl Agreement {
    /// Whether the consent window could still be open at `now`.
    ///
    /// Unaccepted agreements are measured from creation, which is the
    /// conservative reading for reuse decisions.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let start = self.accepted_at.unwrap_or(self.created_at);
        start + chrono::Duration::days(i64::from(self.access_valid_for_days)) <= now
    }
}
