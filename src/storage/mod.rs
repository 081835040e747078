mod json_file;
mod memory;

pub use json_file::JsonFileStorage;
pub use memory::MemoryStorage;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::{
    Account, AccountStatus, Agreement, BalanceSnapshot, CacheMetadata, Id, InstitutionMetadata,
    Requisition, Transaction, User,
};

/// Counts returned by a transaction upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub inserted: usize,
    /// Rows that already existed and were left untouched.
    pub existing: usize,
}

impl UpsertOutcome {
    pub fn total(&self) -> usize {
        self.inserted + self.existing
    }
}

/// Storage trait for persisting linking and sync data.
///
/// Concurrent jobs share one store; correctness relies on the
/// `(account_id, external_id)` upsert key rather than cross-call
/// transactions.
#[async_trait::async_trait]
pub trait Storage: Send + Sync {
    // Users
    async fn get_user(&self, id: Uuid) -> Result<Option<User>>;
    async fn get_user_by_subject(&self, subject: &str) -> Result<Option<User>>;
    async fn save_user(&self, user: &User) -> Result<()>;

    // Institution catalog cache
    async fn get_cached_institutions(&self, country: &str) -> Result<Vec<InstitutionMetadata>>;
    async fn replace_cached_institutions(
        &self,
        country: &str,
        institutions: &[InstitutionMetadata],
        metadata: &CacheMetadata,
    ) -> Result<()>;
    async fn get_cache_metadata(&self, key: &str) -> Result<Option<CacheMetadata>>;

    // Agreements (immutable once saved)
    async fn save_agreement(&self, agreement: &Agreement) -> Result<()>;
    async fn get_agreement(&self, id: &Id) -> Result<Option<Agreement>>;
    async fn agreements_for_institution(
        &self,
        institution_id: &Id,
        user_id: Uuid,
    ) -> Result<Vec<Agreement>>;

    // Requisitions. Listings are newest-first.
    async fn save_requisition(&self, requisition: &Requisition) -> Result<()>;
    async fn get_requisition(&self, id: &Id) -> Result<Option<Requisition>>;
    async fn requisitions_for_institution(
        &self,
        institution_id: &Id,
        user_id: Uuid,
    ) -> Result<Vec<Requisition>>;

    // Accounts. Upsert preserves user edits (display_name, category) and
    // sync bookkeeping on existing rows.
    async fn upsert_account(&self, account: &Account) -> Result<()>;
    async fn get_account(&self, id: &Id) -> Result<Option<Account>>;
    async fn accounts_for_user(&self, user_id: Uuid) -> Result<Vec<Account>>;
    async fn update_account_status(&self, id: &Id, status: AccountStatus) -> Result<()>;
    async fn update_last_synced(&self, id: &Id, at: DateTime<Utc>) -> Result<()>;

    // Balance snapshots (append-only)
    async fn append_balances(&self, account_id: &Id, snapshots: &[BalanceSnapshot]) -> Result<()>;
    async fn get_balances(&self, account_id: &Id) -> Result<Vec<BalanceSnapshot>>;

    /// Most recently retrieved snapshot, if any.
    async fn latest_balance(&self, account_id: &Id) -> Result<Option<BalanceSnapshot>> {
        let snapshots = self.get_balances(account_id).await?;
        Ok(snapshots
            .into_iter()
            .max_by_key(|s| (s.retrieved_at, s.reference_date)))
    }

    // Transactions
    async fn upsert_transactions(
        &self,
        account_id: &Id,
        transactions: &[Transaction],
    ) -> Result<UpsertOutcome>;
    async fn get_transactions(&self, account_id: &Id) -> Result<Vec<Transaction>>;

    /// Overwrite the derived running balances, keyed by external id.
    /// Returns how many rows were updated.
    async fn store_running_balances(
        &self,
        account_id: &Id,
        balances: &[(String, Decimal)],
    ) -> Result<usize>;
}
