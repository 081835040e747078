//! In-memory storage implementation for testing and in-process runs.

use std::collections::HashMap;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::{
    Account, AccountStatus, Agreement, BalanceSnapshot, CacheMetadata, Id, InstitutionMetadata,
    Requisition, Transaction, User,
};

use super::{Storage, UpsertOutcome};

/// In-memory storage backed by per-entity maps.
#[derive(Default)]
pub struct MemoryStorage {
    users: Mutex<HashMap<Uuid, User>>,
    institutions: Mutex<HashMap<String, Vec<InstitutionMetadata>>>,
    cache_metadata: Mutex<HashMap<String, CacheMetadata>>,
    agreements: Mutex<HashMap<Id, Agreement>>,
    requisitions: Mutex<HashMap<Id, Requisition>>,
    accounts: Mutex<HashMap<Id, Account>>,
    balances: Mutex<HashMap<Id, Vec<BalanceSnapshot>>>,
    transactions: Mutex<HashMap<Id, Vec<Transaction>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Storage for MemoryStorage {
    async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        let users = self.users.lock().await;
        Ok(users.get(&id).cloned())
    }

    async fn get_user_by_subject(&self, subject: &str) -> Result<Option<User>> {
        let users = self.users.lock().await;
        Ok(users.values().find(|u| u.subject == subject).cloned())
    }

    async fn save_user(&self, user: &User) -> Result<()> {
        let mut users = self.users.lock().await;
        users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_cached_institutions(&self, country: &str) -> Result<Vec<InstitutionMetadata>> {
        let institutions = self.institutions.lock().await;
        Ok(institutions.get(country).cloned().unwrap_or_default())
    }

    async fn replace_cached_institutions(
        &self,
        country: &str,
        items: &[InstitutionMetadata],
        metadata: &CacheMetadata,
    ) -> Result<()> {
        let mut institutions = self.institutions.lock().await;
        institutions.insert(country.to_string(), items.to_vec());
        let mut cache = self.cache_metadata.lock().await;
        cache.insert(metadata.key.clone(), metadata.clone());
        Ok(())
    }

    async fn get_cache_metadata(&self, key: &str) -> Result<Option<CacheMetadata>> {
        let cache = self.cache_metadata.lock().await;
        Ok(cache.get(key).cloned())
    }

    async fn save_agreement(&self, agreement: &Agreement) -> Result<()> {
        let mut agreements = self.agreements.lock().await;
        agreements.insert(agreement.id.clone(), agreement.clone());
        Ok(())
    }

    async fn get_agreement(&self, id: &Id) -> Result<Option<Agreement>> {
        let agreements = self.agreements.lock().await;
        Ok(agreements.get(id).cloned())
    }

    async fn agreements_for_institution(
        &self,
        institution_id: &Id,
        user_id: Uuid,
    ) -> Result<Vec<Agreement>> {
        let agreements = self.agreements.lock().await;
        let mut matching: Vec<Agreement> = agreements
            .values()
            .filter(|a| &a.institution_id == institution_id && a.user_id == user_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching)
    }

    async fn save_requisition(&self, requisition: &Requisition) -> Result<()> {
        let mut requisitions = self.requisitions.lock().await;
        requisitions.insert(requisition.id.clone(), requisition.clone());
        Ok(())
    }

    async fn get_requisition(&self, id: &Id) -> Result<Option<Requisition>> {
        let requisitions = self.requisitions.lock().await;
        Ok(requisitions.get(id).cloned())
    }

    async fn requisitions_for_institution(
        &self,
        institution_id: &Id,
        user_id: Uuid,
    ) -> Result<Vec<Requisition>> {
        let requisitions = self.requisitions.lock().await;
        let mut matching: Vec<Requisition> = requisitions
            .values()
            .filter(|r| &r.institution_id == institution_id && r.user_id == user_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching)
    }

    async fn upsert_account(&self, account: &Account) -> Result<()> {
        let mut accounts = self.accounts.lock().await;
        match accounts.get_mut(&account.id) {
            Some(existing) => {
                existing.name = account.name.clone().or(existing.name.take());
                existing.currency = account.currency.clone().or(existing.currency.take());
                existing.institution_id = account.institution_id.clone();
                existing.requisition_id = account.requisition_id.clone();
                existing.status = account.status;
            }
            None => {
                accounts.insert(account.id.clone(), account.clone());
            }
        }
        Ok(())
    }

    async fn get_account(&self, id: &Id) -> Result<Option<Account>> {
        let accounts = self.accounts.lock().await;
        Ok(accounts.get(id).cloned())
    }

    async fn accounts_for_user(&self, user_id: Uuid) -> Result<Vec<Account>> {
        let accounts = self.accounts.lock().await;
        let mut matching: Vec<Account> = accounts
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matching)
    }

    async fn update_account_status(&self, id: &Id, status: AccountStatus) -> Result<()> {
        let mut accounts = self.accounts.lock().await;
        match accounts.get_mut(id) {
            Some(account) => {
                account.status = status;
                Ok(())
            }
            None => bail!("account {id} not found"),
        }
    }

    async fn update_last_synced(&self, id: &Id, at: DateTime<Utc>) -> Result<()> {
        let mut accounts = self.accounts.lock().await;
        match accounts.get_mut(id) {
            Some(account) => {
                account.last_synced = Some(at);
                Ok(())
            }
            None => bail!("account {id} not found"),
        }
    }

    async fn append_balances(&self, account_id: &Id, snapshots: &[BalanceSnapshot]) -> Result<()> {
        let mut balances = self.balances.lock().await;
        balances
            .entry(account_id.clone())
            .or_default()
            .extend_from_slice(snapshots);
        Ok(())
    }

    async fn get_balances(&self, account_id: &Id) -> Result<Vec<BalanceSnapshot>> {
        let balances = self.balances.lock().await;
        Ok(balances.get(account_id).cloned().unwrap_or_default())
    }

    async fn upsert_transactions(
        &self,
        account_id: &Id,
        transactions: &[Transaction],
    ) -> Result<UpsertOutcome> {
        let mut all = self.transactions.lock().await;
        let rows = all.entry(account_id.clone()).or_default();

        let mut outcome = UpsertOutcome::default();
        for tx in transactions {
            if rows.iter().any(|r| r.external_id == tx.external_id) {
                outcome.existing += 1;
            } else {
                rows.push(tx.clone());
                outcome.inserted += 1;
            }
        }
        Ok(outcome)
    }

    async fn get_transactions(&self, account_id: &Id) -> Result<Vec<Transaction>> {
        let transactions = self.transactions.lock().await;
        Ok(transactions.get(account_id).cloned().unwrap_or_default())
    }

    async fn store_running_balances(
        &self,
        account_id: &Id,
        balances: &[(String, Decimal)],
    ) -> Result<usize> {
        let mut all = self.transactions.lock().await;
        let rows = all.entry(account_id.clone()).or_default();

        let mut updated = 0;
        for (external_id, balance) in balances {
            if let Some(row) = rows.iter_mut().find(|r| &r.external_id == external_id) {
                row.running_balance = Some(*balance);
                updated += 1;
            }
        }
        Ok(updated)
    }
}
