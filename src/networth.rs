//! Net worth over time, aggregated across a user's accounts.
//!
//! Each account contributes a sparse daily balance series (the last
//! running balance of each day). Summing raw balances across accounts
//! would be wrong on days where only some accounts moved, so the series
//! are first turned into day-over-day deltas, summed per date, and then
//! re-accumulated into a total.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::models::Transaction;
use crate::storage::Storage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetWorthStatus {
    /// No account has computed running balances yet.
    NotCalculated,
    Calculated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetWorthPoint {
    pub date: NaiveDate,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetWorthHistory {
    pub status: NetWorthStatus,
    /// Ascending by date. Dates where nothing changed are omitted.
    pub points: Vec<NetWorthPoint>,
    pub calculated_at: DateTime<Utc>,
}

pub struct NetWorthService {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
}

impl NetWorthService {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub async fn history(&self, user_id: Uuid) -> Result<NetWorthHistory> {
        let accounts = self
            .storage
            .accounts_for_user(user_id)
            .await
            .context("Failed to list accounts")?;

        let mut summed_deltas: BTreeMap<NaiveDate, Decimal> = BTreeMap::new();
        let mut any_balances = false;

        for account in &accounts {
            let transactions = self
                .storage
                .get_transactions(&account.id)
                .await
                .context("Failed to load transactions")?;

            let daily = daily_closing_balances(&transactions);
            if daily.is_empty() {
                continue;
            }
            any_balances = true;

            for (date, delta) in deltas(&daily) {
                *summed_deltas.entry(date).or_insert(Decimal::ZERO) += delta;
            }
        }

        let calculated_at = self.clock.now();
        if !any_balances {
            debug!(%user_id, "no running balances available for net worth");
            return Ok(NetWorthHistory {
                status: NetWorthStatus::NotCalculated,
                points: Vec::new(),
                calculated_at,
            });
        }

        let mut points = Vec::with_capacity(summed_deltas.len());
        let mut total = Decimal::ZERO;
        for (date, delta) in summed_deltas {
            total += delta;
            if delta.is_zero() {
                // Nothing changed that day across any account.
                continue;
            }
            points.push(NetWorthPoint {
                date,
                amount: total,
            });
        }

        Ok(NetWorthHistory {
            status: NetWorthStatus::Calculated,
            points,
            calculated_at,
        })
    }
}

/// Stage 1: the last running balance of each calendar day for one account.
///
/// "Last" means the transaction that sorts highest by (effective date,
/// external id), matching the order running balances were assigned in.
fn daily_closing_balances(transactions: &[Transaction]) -> BTreeMap<NaiveDate, Decimal> {
    let mut daily: BTreeMap<NaiveDate, (&str, Decimal)> = BTreeMap::new();
    for tx in transactions {
        let Some(balance) = tx.running_balance else {
            continue;
        };
        let date = tx.effective_date();
        match daily.get(&date) {
            Some((winner, _)) if *winner >= tx.external_id.as_str() => {}
            _ => {
                daily.insert(date, (tx.external_id.as_str(), balance));
            }
        }
    }
    daily
        .into_iter()
        .map(|(date, (_, balance))| (date, balance))
        .collect()
}

/// Stage 2: day-over-day changes. The first day's delta is the balance
/// itself, standing in for everything before the history window.
fn deltas(daily: &BTreeMap<NaiveDate, Decimal>) -> Vec<(NaiveDate, Decimal)> {
    let mut previous: Option<Decimal> = None;
    daily
        .iter()
        .map(|(&date, &balance)| {
            let delta = match previous {
                Some(prev) => balance - prev,
                None => balance,
            };
            previous = Some(balance);
            (date, delta)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Id;
    use chrono::{TimeZone, Utc};

    fn dec(value: i64) -> Decimal {
        Decimal::from(value)
    }

    fn tx(external_id: &str, day: u32, balance: Option<i64>) -> Transaction {
        Transaction {
            external_id: external_id.to_string(),
            account_id: Id::from("acct-1"),
            user_id: Uuid::nil(),
            amount: Decimal::ZERO,
            currency: "EUR".to_string(),
            booking_date: NaiveDate::from_ymd_opt(2026, 4, day),
            value_date: None,
            description: None,
            counterparty: None,
            imported_at: Utc.with_ymd_and_hms(2026, 4, 30, 0, 0, 0).unwrap(),
            running_balance: balance.map(Decimal::from),
        }
    }

    #[test]
    fn takes_the_last_balance_of_each_day() {
        let txs = vec![
            tx("a", 3, Some(10)),
            tx("c", 3, Some(30)),
            tx("b", 3, Some(20)),
            tx("d", 4, Some(40)),
        ];
        let daily = daily_closing_balances(&txs);
        assert_eq!(daily[&NaiveDate::from_ymd_opt(2026, 4, 3).unwrap()], dec(30));
        assert_eq!(daily[&NaiveDate::from_ymd_opt(2026, 4, 4).unwrap()], dec(40));
    }

    #[test]
    fn skips_transactions_without_running_balances() {
        let txs = vec![tx("a", 1, None), tx("b", 2, Some(5))];
        let daily = daily_closing_balances(&txs);
        assert_eq!(daily.len(), 1);
    }

    #[test]
    fn first_delta_is_the_balance_itself() {
        let mut daily = BTreeMap::new();
        daily.insert(NaiveDate::from_ymd_opt(2026, 4, 1).unwrap(), dec(100));
        daily.insert(NaiveDate::from_ymd_opt(2026, 4, 3).unwrap(), dec(150));

        let deltas = deltas(&daily);
        assert_eq!(deltas[0].1, dec(100));
        assert_eq!(deltas[1].1, dec(50));
    }
}
