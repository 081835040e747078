use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Duration;
use tracing::{info, warn};

use super::{
    AccountSyncMessage, CalculateRunningBalanceMessage, InstitutionSyncMessage, Job, JobQueue,
};
use crate::balance::BalanceService;
use crate::clock::{Clock, SystemClock};
use crate::models::{Account, AccountStatus, Id, Requisition};
use crate::provider::BankProvider;
use crate::storage::Storage;

/// The three job handlers of the sync pipeline.
///
/// Every handler is idempotent: re-delivery after a crash re-does the work
/// without duplicating stored data. Handlers never retry provider calls
/// themselves; transient failures bubble up and the worker re-enqueues.
pub struct SyncHandlers {
    storage: Arc<dyn Storage>,
    provider: Arc<dyn BankProvider>,
    queue: Arc<dyn JobQueue>,
    lookback: Duration,
    clock: Arc<dyn Clock>,
}

impl SyncHandlers {
    pub fn new(
        storage: Arc<dyn Storage>,
        provider: Arc<dyn BankProvider>,
        queue: Arc<dyn JobQueue>,
        lookback_days: i64,
    ) -> Self {
        Self {
            storage,
            provider,
            queue,
            lookback: Duration::days(lookback_days),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub async fn handle(&self, job: &Job) -> Result<()> {
        match job {
            Job::InstitutionSync(msg) => self.sync_institution(msg).await,
            Job::AccountSync(msg) => self.sync_account(msg).await,
            Job::CalculateRunningBalance(msg) => self.calculate_running_balance(msg).await,
        }
    }

    /// Refresh the latest requisition for an institution and fan out one
    /// account-sync job per discovered account.
    async fn sync_institution(&self, msg: &InstitutionSyncMessage) -> Result<()> {
        let requisitions = self
            .storage
            .requisitions_for_institution(&msg.institution_id, msg.user_id)
            .await
            .context("Failed to list requisitions")?;

        let Some(stored) = requisitions.into_iter().next() else {
            info!(institution_id = %msg.institution_id, "no requisition to sync");
            return Ok(());
        };

        let Some(requisition) = self
            .provider
            .requisition(&stored.id, msg.user_id)
            .await
            .context("Failed to refresh requisition")?
        else {
            warn!(requisition_id = %stored.id, "requisition no longer exists at provider");
            return Ok(());
        };

        self.storage
            .save_requisition(&requisition)
            .await
            .context("Failed to persist requisition")?;

        if !requisition.is_linked_with_accounts() {
            info!(
                requisition_id = %requisition.id,
                status = ?requisition.status,
                "requisition has no linked accounts yet"
            );
            return Ok(());
        }

        for account_id in &requisition.accounts {
            self.upsert_discovered_account(account_id, msg, &requisition)
                .await?;
            self.queue
                .enqueue(Job::AccountSync(AccountSyncMessage {
                    account_id: account_id.clone(),
                    user_id: msg.user_id,
                    date_from: None,
                    date_to: None,
                }))
                .await?;
        }

        info!(
            institution_id = %msg.institution_id,
            accounts = requisition.accounts.len(),
            "institution sync fanned out"
        );
        Ok(())
    }

    async fn upsert_discovered_account(
        &self,
        account_id: &Id,
        msg: &InstitutionSyncMessage,
        requisition: &Requisition,
    ) -> Result<()> {
        let mut account = Account {
            id: account_id.clone(),
            user_id: msg.user_id,
            institution_id: msg.institution_id.clone(),
            requisition_id: requisition.id.clone(),
            currency: None,
            name: None,
            display_name: None,
            category: None,
            status: AccountStatus::from(requisition.status),
            last_synced: None,
            created_at: self.clock.now(),
        };

        if let Some(details) = self
            .provider
            .account_details(account_id)
            .await
            .context("Failed to fetch account details")?
        {
            account.apply_details(&details);
        }

        self.storage
            .upsert_account(&account)
            .await
            .context("Failed to upsert account")
    }

    /// Pull details, balance snapshots, and transactions for one account,
    /// then queue a running-balance recalculation.
    async fn sync_account(&self, msg: &AccountSyncMessage) -> Result<()> {
        let Some(mut account) = self
            .storage
            .get_account(&msg.account_id)
            .await
            .context("Failed to load account")?
        else {
            warn!(account_id = %msg.account_id, "account not in storage, skipping sync");
            return Ok(());
        };

        self.storage
            .update_account_status(&account.id, AccountStatus::Syncing)
            .await?;

        let Some(_metadata) = self
            .provider
            .account(&account.id)
            .await
            .context("Failed to fetch account metadata")?
        else {
            warn!(account_id = %account.id, "account gone at provider, marking expired");
            self.storage
                .update_account_status(&account.id, AccountStatus::Expired)
                .await?;
            return Ok(());
        };

        if let Some(details) = self
            .provider
            .account_details(&account.id)
            .await
            .context("Failed to fetch account details")?
        {
            account.apply_details(&details);
            self.storage.upsert_account(&account).await?;
        }

        if let Some(snapshots) = self
            .provider
            .account_balances(&account.id)
            .await
            .context("Failed to fetch balances")?
        {
            self.storage
                .append_balances(&account.id, &snapshots)
                .await
                .context("Failed to store balances")?;
        }

        let now = self.clock.now();
        let date_from = msg
            .date_from
            .or_else(|| account.last_synced.map(|t| t.date_naive()))
            .unwrap_or_else(|| (now - self.lookback).date_naive());
        let date_to = msg.date_to.unwrap_or_else(|| now.date_naive());

        if let Some(transactions) = self
            .provider
            .account_transactions(&account, Some(date_from), Some(date_to))
            .await
            .context("Failed to fetch transactions")?
        {
            let outcome = self
                .storage
                .upsert_transactions(&account.id, &transactions)
                .await
                .context("Failed to store transactions")?;
            info!(
                account_id = %account.id,
                inserted = outcome.inserted,
                existing = outcome.existing,
                %date_from,
                %date_to,
                "account transactions synced"
            );
        }

        self.storage.update_last_synced(&account.id, now).await?;
        self.storage
            .update_account_status(&account.id, AccountStatus::Linked)
            .await?;

        self.queue
            .enqueue(Job::CalculateRunningBalance(CalculateRunningBalanceMessage {
                account_id: account.id.clone(),
            }))
            .await
    }

    async fn calculate_running_balance(&self, msg: &CalculateRunningBalanceMessage) -> Result<()> {
        if self
            .storage
            .get_account(&msg.account_id)
            .await
            .context("Failed to load account")?
            .is_none()
        {
            warn!(account_id = %msg.account_id, "account not in storage, skipping calculation");
            return Ok(());
        }

        self.storage
            .update_account_status(&msg.account_id, AccountStatus::Calculating)
            .await?;

        let updated = BalanceService::new(Arc::clone(&self.storage))
            .recalculate(&msg.account_id)
            .await?;

        self.storage
            .update_account_status(&msg.account_id, AccountStatus::Linked)
            .await?;

        info!(account_id = %msg.account_id, updated, "running balances recalculated");
        Ok(())
    }
}
