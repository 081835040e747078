use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Id, LinkStatus};

/// Account lifecycle. Mirrors the owning requisition's status, with two
/// transient states the sync pipeline moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Pending,
    Syncing,
    Calculating,
    Linked,
    Failed,
    Expired,
}

impl From<LinkStatus> for AccountStatus {
    fn from(status: LinkStatus) -> Self {
        match status {
            LinkStatus::Pending => AccountStatus::Pending,
            LinkStatus::Linked => AccountStatus::Linked,
            LinkStatus::Failed => AccountStatus::Failed,
            LinkStatus::Expired => AccountStatus::Expired,
        }
    }
}

/// A linked bank account.
///
/// `display_name` and `category` are user edits and survive upserts from
/// provider data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Id,
    pub user_id: Uuid,
    pub institution_id: Id,
    pub requisition_id: Id,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    /// Name as reported by the institution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// User-chosen display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// User-chosen grouping (e.g. "savings", "daily spending").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub status: AccountStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Merge freshly fetched provider details into this account, keeping
    /// user edits and sync bookkeeping intact.
    pub fn apply_details(&mut self, details: &AccountDetails) {
        if details.name.is_some() {
            self.name = details.name.clone();
        }
        if details.currency.is_some() {
            self.currency = details.currency.clone();
        }
    }
}

/// Account metadata from the provider's account endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountMetadata {
    pub id: Id,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub institution_id: Option<Id>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Account detail fields from the provider's details endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cash_account_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_name: Option<String>,
}
