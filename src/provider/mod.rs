//! Client for the open-banking data provider's REST API.
//!
//! All outbound traffic funnels through [`ProviderClient`]: bearer tokens
//! come from the [`TokenManager`] single-flight cache, and transient
//! failures are retried here and nowhere else, so callers can treat
//! agreement/requisition creation as safe to invoke exactly once.

mod client;
mod dto;
mod token;

pub use client::ProviderClient;
pub use token::TokenManager;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::StatusCode;
use uuid::Uuid;

use crate::models::{
    Account, AccountDetails, AccountMetadata, Agreement, Id, InstitutionMetadata, Requisition,
    Transaction,
};
use crate::models::BalanceSnapshot;

/// Errors surfaced by the provider boundary.
///
/// Transient statuses (408/429/5xx) are retried inside the client and only
/// become `Request` once attempts are exhausted.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Token exchange failed or returned no usable token.
    #[error("provider token exchange failed: {0}")]
    Auth(String),

    /// Non-retryable response, or a retryable one after all attempts.
    #[error("provider request failed ({status}): {body}")]
    Request { status: StatusCode, body: String },

    /// Connection-level failure talking to the provider.
    #[error("provider transport error")]
    Transport(#[source] reqwest::Error),

    /// Response body did not match the documented shape.
    #[error("unexpected provider response: {0}")]
    Decode(String),
}

impl ProviderError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ProviderError::Request { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Operations the rest of the system needs from the data provider.
///
/// User ids are threaded through explicitly so provider responses can be
/// mapped straight onto owned domain records.
#[async_trait]
pub trait BankProvider: Send + Sync {
    async fn institution(&self, id: &Id) -> Result<InstitutionMetadata, ProviderError>;

    async fn institutions(&self, country: &str) -> Result<Vec<InstitutionMetadata>, ProviderError>;

    async fn create_agreement(
        &self,
        user_id: Uuid,
        institution_id: &Id,
        max_historical_days: u32,
        access_valid_for_days: u32,
    ) -> Result<Agreement, ProviderError>;

    async fn create_requisition(
        &self,
        user_id: Uuid,
        institution_id: &Id,
        agreement_id: &Id,
        redirect_url: &str,
        reference: &str,
    ) -> Result<Requisition, ProviderError>;

    /// `None` when the requisition is unknown to the provider.
    async fn requisition(&self, id: &Id, user_id: Uuid)
        -> Result<Option<Requisition>, ProviderError>;

    /// `None` when the account has been deleted or access was revoked.
    async fn account(&self, id: &Id) -> Result<Option<AccountMetadata>, ProviderError>;

    async fn account_details(&self, id: &Id) -> Result<Option<AccountDetails>, ProviderError>;

    async fn account_balances(&self, id: &Id)
        -> Result<Option<Vec<BalanceSnapshot>>, ProviderError>;

    async fn account_transactions(
        &self,
        account: &Account,
        date_from: Option<NaiveDate>,
        date_to: Option<NaiveDate>,
    ) -> Result<Option<Vec<Transaction>>, ProviderError>;
}
