#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use ledgerlink::models::{
    Account, AccountDetails, AccountMetadata, AccessScope, Agreement, BalanceSnapshot, Id,
    InstitutionMetadata, LinkStatus, Requisition, Transaction,
};
use ledgerlink::provider::{BankProvider, ProviderError};
use reqwest::StatusCode;
use rust_decimal::Decimal;
use uuid::Uuid;

pub fn institution(id: &str) -> InstitutionMetadata {
    InstitutionMetadata {
        id: Id::from(id),
        name: format!("Bank {id}"),
        bic: None,
        logo_url: None,
        countries: vec!["NL".to_string()],
        transaction_total_days: Some(180),
        max_access_valid_for_days: Some(90),
    }
}

pub fn transaction(account_id: &str, external_id: &str, day: u32, amount: i64) -> Transaction {
    Transaction {
        external_id: external_id.to_string(),
        account_id: Id::from(account_id),
        user_id: Uuid::nil(),
        amount: Decimal::from(amount),
        currency: "EUR".to_string(),
        booking_date: NaiveDate::from_ymd_opt(2026, 5, day),
        value_date: None,
        description: Some(format!("payment {external_id}")),
        counterparty: None,
        imported_at: Utc.with_ymd_and_hms(2026, 5, 28, 12, 0, 0).unwrap(),
        running_balance: None,
    }
}

pub fn snapshot(amount: i64) -> BalanceSnapshot {
    BalanceSnapshot {
        balance_type: "interimAvailable".to_string(),
        amount: Decimal::from(amount),
        currency: "EUR".to_string(),
        reference_date: None,
        retrieved_at: Utc.with_ymd_and_hms(2026, 5, 28, 12, 0, 0).unwrap(),
    }
}

#[derive(Default)]
pub struct StubState {
    pub institutions: Vec<InstitutionMetadata>,
    /// Provider-side view of requisitions, keyed by id.
    pub requisitions: HashMap<Id, Requisition>,
    pub details: HashMap<Id, AccountDetails>,
    pub balances: HashMap<Id, Vec<BalanceSnapshot>>,
    pub transactions: HashMap<Id, Vec<Transaction>>,
    /// Account ids the provider reports as gone (404 on metadata).
    pub missing_accounts: HashSet<Id>,
    /// Account ids whose metadata fetch fails with a 503 every time.
    pub failing_accounts: HashSet<Id>,
    pub agreements_created: u32,
    pub requisitions_created: u32,
}

/// Scriptable in-memory provider for exercising linking and sync without
/// HTTP.
pub struct StubProvider {
    pub state: Mutex<StubState>,
}

impl StubProvider {
    pub fn new(institutions: Vec<InstitutionMetadata>) -> Self {
        Self {
            state: Mutex::new(StubState {
                institutions,
                ..StubState::default()
            }),
        }
    }

    /// Mark a provider-side requisition as linked with the given accounts.
    pub fn set_linked(&self, requisition_id: &Id, accounts: &[&str]) {
        let mut state = self.state.lock().unwrap();
        let requisition = state
            .requisitions
            .get_mut(requisition_id)
            .expect("requisition exists");
        requisition.status = LinkStatus::Linked;
        requisition.accounts = accounts.iter().map(|a| Id::from(*a)).collect();
    }

    pub fn insert_requisition(&self, requisition: Requisition) {
        let mut state = self.state.lock().unwrap();
        state
            .requisitions
            .insert(requisition.id.clone(), requisition);
    }
}

#[async_trait]
impl BankProvider for StubProvider {
    async fn institution(&self, id: &Id) -> Result<InstitutionMetadata, ProviderError> {
        let state = self.state.lock().unwrap();
        state
            .institutions
            .iter()
            .find(|i| &i.id == id)
            .cloned()
            .ok_or(ProviderError::Request {
                status: StatusCode::NOT_FOUND,
                body: "institution not found".to_string(),
            })
    }

    async fn institutions(&self, _country: &str) -> Result<Vec<InstitutionMetadata>, ProviderError> {
        Ok(self.state.lock().unwrap().institutions.clone())
    }

    async fn create_agreement(
        &self,
        user_id: Uuid,
        institution_id: &Id,
        max_historical_days: u32,
        access_valid_for_days: u32,
    ) -> Result<Agreement, ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.agreements_created += 1;
        Ok(Agreement {
            id: Id::from(format!("agr-{}", state.agreements_created)),
            user_id,
            institution_id: institution_id.clone(),
            max_historical_days,
            access_valid_for_days,
            access_scope: vec![
                AccessScope::Balances,
                AccessScope::Details,
                AccessScope::Transactions,
            ],
            created_at: Utc::now(),
            accepted_at: None,
        })
    }

    async fn create_requisition(
        &self,
        user_id: Uuid,
        institution_id: &Id,
        agreement_id: &Id,
        redirect_url: &str,
        reference: &str,
    ) -> Result<Requisition, ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.requisitions_created += 1;
        let requisition = Requisition {
            id: Id::from(format!("req-{}", state.requisitions_created)),
            user_id,
            institution_id: institution_id.clone(),
            agreement_id: agreement_id.clone(),
            redirect: Some(redirect_url.to_string()),
            reference: reference.to_string(),
            authorization_link: Some(format!(
                "https://auth.example/start/req-{}",
                state.requisitions_created
            )),
            status: LinkStatus::Pending,
            accounts: Vec::new(),
            created_at: Utc::now(),
        };
        state
            .requisitions
            .insert(requisition.id.clone(), requisition.clone());
        Ok(requisition)
    }

    async fn requisition(
        &self,
        id: &Id,
        _user_id: Uuid,
    ) -> Result<Option<Requisition>, ProviderError> {
        Ok(self.state.lock().unwrap().requisitions.get(id).cloned())
    }

    async fn account(&self, id: &Id) -> Result<Option<AccountMetadata>, ProviderError> {
        let state = self.state.lock().unwrap();
        if state.failing_accounts.contains(id) {
            return Err(ProviderError::Request {
                status: StatusCode::SERVICE_UNAVAILABLE,
                body: "upstream unavailable".to_string(),
            });
        }
        if state.missing_accounts.contains(id) {
            return Ok(None);
        }
        Ok(Some(AccountMetadata {
            id: id.clone(),
            institution_id: None,
            status: Some("READY".to_string()),
            name: None,
        }))
    }

    async fn account_details(&self, id: &Id) -> Result<Option<AccountDetails>, ProviderError> {
        Ok(self.state.lock().unwrap().details.get(id).cloned())
    }

    async fn account_balances(
        &self,
        id: &Id,
    ) -> Result<Option<Vec<BalanceSnapshot>>, ProviderError> {
        Ok(Some(
            self.state
                .lock()
                .unwrap()
                .balances
                .get(id)
                .cloned()
                .unwrap_or_default(),
        ))
    }

    async fn account_transactions(
        &self,
        account: &Account,
        _date_from: Option<NaiveDate>,
        _date_to: Option<NaiveDate>,
    ) -> Result<Option<Vec<Transaction>>, ProviderError> {
        Ok(Some(
            self.state
                .lock()
                .unwrap()
                .transactions
                .get(&account.id)
                .cloned()
                .unwrap_or_default(),
        ))
    }
}
