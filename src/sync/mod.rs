//! The asynchronous sync pipeline.
//!
//! Three durable job kinds move a linked institution's data into storage:
//! institution sync fans out per-account jobs, account sync pulls balances
//! and transactions, and a final job recomputes running balances. Handlers
//! are idempotent; the worker owns redelivery.

mod handlers;
mod queue;
mod worker;

pub use handlers::SyncHandlers;
pub use queue::{Delivery, JobQueue, MemoryJobQueue};
pub use worker::Worker;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Id;

pub const INSTITUTION_SYNC_QUEUE: &str = "institution-sync";
pub const ACCOUNT_SYNC_QUEUE: &str = "account-sync";
pub const CALCULATE_RUNNING_BALANCE_QUEUE: &str = "calculate-running-balance";

/// Body published to `institution-sync`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstitutionSyncMessage {
    pub institution_id: Id,
    pub user_id: Uuid,
}

/// Body published to `account-sync`. The optional dates override the
/// handler's default transaction window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSyncMessage {
    pub account_id: Id,
    pub user_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_from: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_to: Option<NaiveDate>,
}

/// Body published to `calculate-running-balance`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculateRunningBalanceMessage {
    pub account_id: Id,
}

/// A job plus the queue it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Job {
    InstitutionSync(InstitutionSyncMessage),
    AccountSync(AccountSyncMessage),
    CalculateRunningBalance(CalculateRunningBalanceMessage),
}

impl Job {
    pub fn queue_name(&self) -> &'static str {
        match self {
            Job::InstitutionSync(_) => INSTITUTION_SYNC_QUEUE,
            Job::AccountSync(_) => ACCOUNT_SYNC_QUEUE,
            Job::CalculateRunningBalance(_) => CALCULATE_RUNNING_BALANCE_QUEUE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_use_camel_case_on_the_wire() {
        let msg = AccountSyncMessage {
            account_id: Id::from("acct-1"),
            user_id: Uuid::nil(),
            date_from: NaiveDate::from_ymd_opt(2026, 1, 1),
            date_to: None,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["accountId"], "acct-1");
        assert_eq!(json["dateFrom"], "2026-01-01");
        assert!(json.get("dateTo").is_none());
    }

    #[test]
    fn jobs_route_to_their_queues() {
        let job = Job::CalculateRunningBalance(CalculateRunningBalanceMessage {
            account_id: Id::from("acct-1"),
        });
        assert_eq!(job.queue_name(), CALCULATE_RUNNING_BALANCE_QUEUE);
    }
}
