//! Running balance reconstruction.
//!
//! The provider reports one current balance per account plus a transaction
//! history; per-transaction balances are derived by walking the history
//! backwards from that anchor.

use std::cmp::Reverse;
use std::sync::Arc;

use anyhow::{Context, Result};
use rust_decimal::Decimal;

use crate::models::{Id, Transaction};
use crate::storage::Storage;

/// Assign a running balance to every transaction, newest first.
///
/// Ordering is (effective date desc, external id desc), so ties within a
/// day resolve deterministically. The newest transaction gets the anchor
/// balance; each older one gets the anchor minus everything newer. Safe to
/// re-run: output depends only on the anchor and the set of transactions.
///
/// Returns the number of transactions assigned.
pub fn compute_running_balances(anchor: Decimal, transactions: &mut [Transaction]) -> usize {
    transactions.sort_by_key(|tx| Reverse((tx.effective_date(), tx.external_id.clone())));

    let mut current = anchor;
    for tx in transactions.iter_mut() {
        tx.running_balance = Some(current);
        current -= tx.amount;
    }
    transactions.len()
}

/// Storage wiring for the calculator.
pub struct BalanceService {
    storage: Arc<dyn Storage>,
}

impl BalanceService {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Recompute and persist running balances for one account. The anchor
    /// is the most recent balance snapshot, or zero when none has been
    /// fetched yet.
    pub async fn recalculate(&self, account_id: &Id) -> Result<usize> {
        let anchor = self
            .storage
            .latest_balance(account_id)
            .await
            .context("Failed to load balance snapshot")?
            .map(|s| s.amount)
            .unwrap_or(Decimal::ZERO);

        let mut transactions = self
            .storage
            .get_transactions(account_id)
            .await
            .context("Failed to load transactions")?;
        if transactions.is_empty() {
            return Ok(0);
        }

        compute_running_balances(anchor, &mut transactions);

        let balances: Vec<(String, Decimal)> = transactions
            .iter()
            .filter_map(|tx| tx.running_balance.map(|b| (tx.external_id.clone(), b)))
            .collect();
        self.storage
            .store_running_balances(account_id, &balances)
            .await
            .context("Failed to store running balances")
    }
}
