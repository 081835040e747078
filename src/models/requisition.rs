use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Id;

/// Lifecycle of a linking attempt. `Linked`, `Failed`, and `Expired` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    Pending,
    Linked,
    Failed,
    Expired,
}

impl LinkStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, LinkStatus::Pending)
    }
}

/// One linking attempt tying a user, institution, and agreement together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Requisition {
    pub id: Id,
    pub user_id: Uuid,
    pub institution_id: Id,
    pub agreement_id: Id,
    /// Where the provider redirects the user after authorization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
    /// Caller-chosen idempotency reference for this attempt.
    pub reference: String,
    /// URL the user must visit to authorize the link.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_link: Option<String>,
    pub status: LinkStatus,
    /// Provider account ids produced once the requisition is linked.
    #[serde(default)]
    pub accounts: Vec<Id>,
    pub created_at: DateTime<Utc>,
}

impl Requisition {
    pub fn is_linked_with_accounts(&self) -> bool {
        self.status == LinkStatus::Linked && !self.accounts.is_empty()
    }
}
