//! Wire shapes for the provider API and their mapping onto domain models.
//!
//! The provider serializes everything in snake_case; amounts and day
//! limits arrive as strings and are parsed at this boundary, with warnings
//! and defaults where the original feed is sloppy.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    AccessScope, Account, AccountDetails, AccountMetadata, Agreement, BalanceSnapshot, Id,
    InstitutionMetadata, LinkStatus, Requisition, Transaction,
};

use super::ProviderError;

/// Provider ids double as storage path segments, so anything that is not
/// a safe single segment is rejected at the wire boundary.
fn parse_id(value: String) -> Result<Id, ProviderError> {
    Id::from_string_checked(value).map_err(|err| ProviderError::Decode(err.to_string()))
}

#[derive(Debug, Deserialize)]
pub struct InstitutionDto {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub bic: Option<String>,
    #[serde(default)]
    pub logo: Option<String>,
    #[serde(default)]
    pub countries: Option<Vec<String>>,
    #[serde(default)]
    pub transaction_total_days: Option<String>,
    #[serde(default)]
    pub max_access_valid_for_days: Option<String>,
}

impl InstitutionDto {
    pub fn into_model(self) -> Result<InstitutionMetadata, ProviderError> {
        let transaction_total_days = parse_day_limit(self.transaction_total_days.as_deref());
        let max_access_valid_for_days = parse_day_limit(self.max_access_valid_for_days.as_deref());
        if transaction_total_days.is_none() || max_access_valid_for_days.is_none() {
            tracing::warn!(
                institution_id = %self.id,
                "Institution reported unparsable history/validity day limits"
            );
        }

        Ok(InstitutionMetadata {
            id: parse_id(self.id)?,
            name: self.name,
            bic: self.bic,
            logo_url: self.logo,
            countries: self.countries.unwrap_or_default(),
            transaction_total_days,
            max_access_valid_for_days,
        })
    }
}

fn parse_day_limit(raw: Option<&str>) -> Option<u32> {
    raw.and_then(|v| v.trim().parse().ok())
}

#[derive(Debug, Serialize)]
pub struct CreateAgreementRequestDto<'a> {
    pub institution_id: &'a str,
    pub max_historical_days: u32,
    pub access_valid_for_days: u32,
    pub access_scope: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
pub struct AgreementDto {
    pub id: String,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    pub institution_id: String,
    pub max_historical_days: u32,
    pub access_valid_for_days: u32,
    #[serde(default)]
    pub access_scope: Vec<String>,
    #[serde(default)]
    pub accepted: Option<DateTime<Utc>>,
}

impl AgreementDto {
    pub fn into_model(self, user_id: Uuid, now: DateTime<Utc>) -> Result<Agreement, ProviderError> {
        let access_scope = self
            .access_scope
            .iter()
            .filter_map(|s| match s.as_str() {
                "balances" => Some(AccessScope::Balances),
                "details" => Some(AccessScope::Details),
                "transactions" => Some(AccessScope::Transactions),
                other => {
                    tracing::warn!(scope = other, "Ignoring unknown agreement access scope");
                    None
                }
            })
            .collect();

        Ok(Agreement {
            id: parse_id(self.id)?,
            user_id,
            institution_id: parse_id(self.institution_id)?,
            max_historical_days: self.max_historical_days,
            access_valid_for_days: self.access_valid_for_days,
            access_scope,
            created_at: self.created.unwrap_or(now),
            accepted_at: self.accepted,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct CreateRequisitionRequestDto<'a> {
    pub institution_id: &'a str,
    pub agreement: &'a str,
    pub redirect: &'a str,
    pub reference: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct RequisitionDto {
    pub id: String,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub redirect: Option<String>,
    pub status: String,
    pub institution_id: String,
    pub agreement: String,
    #[serde(default)]
    pub reference: String,
    #[serde(default)]
    pub accounts: Vec<String>,
    #[serde(default)]
    pub link: Option<String>,
}

impl RequisitionDto {
    pub fn into_model(self, user_id: Uuid, now: DateTime<Utc>) -> Result<Requisition, ProviderError> {
        Ok(Requisition {
            id: parse_id(self.id)?,
            user_id,
            institution_id: parse_id(self.institution_id)?,
            agreement_id: parse_id(self.agreement)?,
            redirect: self.redirect,
            reference: self.reference,
            authorization_link: self.link,
            status: parse_link_status(&self.status),
            accounts: self
                .accounts
                .into_iter()
                .map(parse_id)
                .collect::<Result<Vec<_>, _>>()?,
            created_at: self.created.unwrap_or(now),
        })
    }
}

/// Map the provider's requisition status codes onto the linking lifecycle.
///
/// Everything before end-user authorization completes (created, giving
/// consent, undergoing/selecting/granting access) is still `Pending`.
pub fn parse_link_status(code: &str) -> LinkStatus {
    match code {
        "CR" | "GC" | "UA" | "SA" | "GA" => LinkStatus::Pending,
        "LN" => LinkStatus::Linked,
        "RJ" => LinkStatus::Failed,
        "EX" => LinkStatus::Expired,
        other => {
            tracing::warn!(status = other, "Unknown requisition status; treating as pending");
            LinkStatus::Pending
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AccountDto {
    pub id: String,
    #[serde(default)]
    pub institution_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl AccountDto {
    pub fn into_model(self) -> Result<AccountMetadata, ProviderError> {
        Ok(AccountMetadata {
            id: parse_id(self.id)?,
            institution_id: self.institution_id.map(parse_id).transpose()?,
            status: self.status,
            name: self.name,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct AccountDetailsEnvelopeDto {
    pub account: AccountDetailsDto,
}

#[derive(Debug, Default, Deserialize)]
pub struct AccountDetailsDto {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default)]
    pub cash_account_type: Option<String>,
    #[serde(default)]
    pub owner_name: Option<String>,
}

impl AccountDetailsDto {
    pub fn into_model(self) -> AccountDetails {
        AccountDetails {
            name: self.display_name.or(self.name),
            currency: self.currency,
            product: self.product,
            cash_account_type: self.cash_account_type,
            owner_name: self.owner_name,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AmountDto {
    pub amount: String,
    pub currency: String,
}

impl AmountDto {
    pub fn parse(&self) -> Result<Decimal, ProviderError> {
        Decimal::from_str(self.amount.trim()).map_err(|err| {
            ProviderError::Decode(format!("unparsable amount {:?}: {err}", self.amount))
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct BalancesEnvelopeDto {
    #[serde(default)]
    pub balances: Vec<BalanceDto>,
}

#[derive(Debug, Deserialize)]
pub struct BalanceDto {
    pub balance_amount: AmountDto,
    #[serde(default)]
    pub balance_type: Option<String>,
    #[serde(default)]
    pub reference_date: Option<NaiveDate>,
}

impl BalanceDto {
    pub fn into_model(self, retrieved_at: DateTime<Utc>) -> Result<BalanceSnapshot, ProviderError> {
        let amount = self.balance_amount.parse()?;
        Ok(BalanceSnapshot {
            balance_type: self.balance_type.unwrap_or_else(|| "unknown".to_string()),
            amount,
            currency: self.balance_amount.currency,
            reference_date: self.reference_date,
            retrieved_at,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct TransactionsEnvelopeDto {
    pub transactions: TransactionPagesDto,
}

#[derive(Debug, Default, Deserialize)]
pub struct TransactionPagesDto {
    #[serde(default)]
    pub booked: Vec<TransactionDto>,
    #[serde(default)]
    pub pending: Vec<TransactionDto>,
}

#[derive(Debug, Deserialize)]
pub struct TransactionDto {
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub internal_transaction_id: Option<String>,
    pub transaction_amount: AmountDto,
    #[serde(default)]
    pub booking_date: Option<NaiveDate>,
    #[serde(default)]
    pub value_date: Option<NaiveDate>,
    #[serde(default)]
    pub remittance_information_unstructured: Option<String>,
    #[serde(default)]
    pub creditor_name: Option<String>,
    #[serde(default)]
    pub debtor_name: Option<String>,
}

impl TransactionDto {
    /// `None` when the provider sent no usable transaction id; such rows
    /// cannot be deduplicated and are skipped by the caller.
    pub fn into_model(
        self,
        account: &Account,
        imported_at: DateTime<Utc>,
    ) -> Result<Option<Transaction>, ProviderError> {
        let Some(external_id) = self.transaction_id.or(self.internal_transaction_id) else {
            return Ok(None);
        };

        let amount = self.transaction_amount.parse()?;
        Ok(Some(Transaction {
            external_id,
            account_id: account.id.clone(),
            user_id: account.user_id,
            amount,
            currency: self.transaction_amount.currency,
            booking_date: self.booking_date,
            value_date: self.value_date,
            description: self.remittance_information_unstructured,
            counterparty: self.creditor_name.or(self.debtor_name),
            imported_at,
            running_balance: None,
        }))
    }
}
