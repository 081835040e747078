use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use rand::Rng;
use reqwest::{Method, RequestBuilder, StatusCode};
use secrecy::SecretString;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::config::ProviderConfig;
use crate::models::{
    Account, AccountDetails, AccountMetadata, Agreement, BalanceSnapshot, Id, InstitutionMetadata,
    Requisition, Transaction,
};

use super::dto;
use super::{BankProvider, ProviderError, TokenManager};

const MAX_ATTEMPTS: u32 = 5;
const BACKOFF_BASE: Duration = Duration::from_secs(1);
const JITTER_MAX_MS: u64 = 250;

/// REST client for the provider, with centralized retry.
///
/// Retries cover 408, 429, any 5xx, and transport timeouts, up to
/// [`MAX_ATTEMPTS`] per request; the delay honors `Retry-After` when the
/// server sends one and otherwise doubles from one second with jitter.
/// Nothing above this layer retries, so non-idempotent POSTs (agreement
/// and requisition creation) are issued at most once per caller attempt.
pub struct ProviderClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<TokenManager>,
    clock: Arc<dyn Clock>,
    backoff_base: Duration,
}

impl ProviderClient {
    pub fn new(config: &ProviderConfig) -> Self {
        let tokens = TokenManager::new(
            config.base_url.clone(),
            SecretString::from(config.secret_id.clone()),
            SecretString::from(config.secret_key.clone()),
        );
        Self::with_token_manager(config.base_url.clone(), Arc::new(tokens))
    }

    pub fn with_token_manager(base_url: impl Into<String>, tokens: Arc<TokenManager>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            tokens,
            clock: Arc::new(SystemClock),
            backoff_base: BACKOFF_BASE,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Shrink the exponential backoff floor. Tests use this to exercise
    /// the retry loop without real waits.
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ProviderError> {
        let body = self
            .send_with_retry(|| self.http.request(Method::GET, self.url(path)).query(query))
            .await?;
        decode(&body)
    }

    /// GET where a 404 means "does not exist" rather than an error.
    async fn get_json_optional<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Option<T>, ProviderError> {
        match self.get_json(path, query).await {
            Ok(value) => Ok(Some(value)),
            Err(ProviderError::Request { status, .. }) if status == StatusCode::NOT_FOUND => {
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    async fn post_json<T: DeserializeOwned, B: serde::Serialize>(
        &self,
        path: &str,
        request: &B,
    ) -> Result<T, ProviderError> {
        let body = self
            .send_with_retry(|| self.http.request(Method::POST, self.url(path)).json(request))
            .await?;
        decode(&body)
    }

    async fn send_with_retry(
        &self,
        build: impl Fn() -> RequestBuilder,
    ) -> Result<String, ProviderError> {
        let mut attempt = 0;
        loop {
            attempt += 1;

            let token = self.tokens.get_valid_token().await?;
            let outcome = match build().bearer_auth(&token).send().await {
                Ok(response) => {
                    let status = response.status();
                    let retry_after = parse_retry_after(&response);
                    let body = response.text().await.unwrap_or_default();
                    if status.is_success() {
                        return Ok(body);
                    }
                    if is_retryable(status) {
                        Attempt::Retry {
                            err: ProviderError::Request { status, body },
                            retry_after,
                        }
                    } else {
                        return Err(ProviderError::Request { status, body });
                    }
                }
                Err(err) if err.is_timeout() || err.is_connect() => Attempt::Retry {
                    err: ProviderError::Transport(err),
                    retry_after: None,
                },
                Err(err) => return Err(ProviderError::Transport(err)),
            };

            let Attempt::Retry { err, retry_after } = outcome;
            if attempt >= MAX_ATTEMPTS {
                return Err(err);
            }

            let delay = retry_delay(self.backoff_base, attempt, retry_after);
            tracing::debug!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying provider request"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

enum Attempt {
    Retry {
        err: ProviderError,
        retry_after: Option<Duration>,
    },
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T, ProviderError> {
    serde_json::from_str(body).map_err(|err| ProviderError::Decode(err.to_string()))
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

fn parse_retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// `max(Retry-After, base * 2^(attempt-1) + jitter)`.
fn retry_delay(base: Duration, attempt: u32, retry_after: Option<Duration>) -> Duration {
    let backoff = base * 2u32.saturating_pow(attempt - 1);
    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..JITTER_MAX_MS));
    let delay = backoff + jitter;
    match retry_after {
        Some(server) if server > delay => server,
        _ => delay,
    }
}

#[async_trait]
impl BankProvider for ProviderClient {
    async fn institution(&self, id: &Id) -> Result<InstitutionMetadata, ProviderError> {
        let dto: dto::InstitutionDto = self
            .get_json(&format!("/institutions/{id}/"), &[])
            .await?;
        dto.into_model()
    }

    async fn institutions(&self, country: &str) -> Result<Vec<InstitutionMetadata>, ProviderError> {
        let dtos: Vec<dto::InstitutionDto> = self
            .get_json("/institutions/", &[("country", country.to_string())])
            .await?;
        dtos.into_iter()
            .map(dto::InstitutionDto::into_model)
            .collect()
    }

    async fn create_agreement(
        &self,
        user_id: Uuid,
        institution_id: &Id,
        max_historical_days: u32,
        access_valid_for_days: u32,
    ) -> Result<Agreement, ProviderError> {
        let request = dto::CreateAgreementRequestDto {
            institution_id: institution_id.as_str(),
            max_historical_days,
            access_valid_for_days,
            access_scope: &["balances", "details", "transactions"],
        };
        let dto: dto::AgreementDto = self.post_json("/agreements/enduser/", &request).await?;
        dto.into_model(user_id, self.clock.now())
    }

    async fn create_requisition(
        &self,
        user_id: Uuid,
        institution_id: &Id,
        agreement_id: &Id,
        redirect_url: &str,
        reference: &str,
    ) -> Result<Requisition, ProviderError> {
        let request = dto::CreateRequisitionRequestDto {
            institution_id: institution_id.as_str(),
            agreement: agreement_id.as_str(),
            redirect: redirect_url,
            reference,
        };
        let dto: dto::RequisitionDto = self.post_json("/requisitions/", &request).await?;
        dto.into_model(user_id, self.clock.now())
    }

    async fn requisition(
        &self,
        id: &Id,
        user_id: Uuid,
    ) -> Result<Option<Requisition>, ProviderError> {
        let dto: Option<dto::RequisitionDto> = self
            .get_json_optional(&format!("/requisitions/{id}/"), &[])
            .await?;
        dto.map(|d| d.into_model(user_id, self.clock.now())).transpose()
    }

    async fn account(&self, id: &Id) -> Result<Option<AccountMetadata>, ProviderError> {
        let dto: Option<dto::AccountDto> = self
            .get_json_optional(&format!("/accounts/{id}/"), &[])
            .await?;
        dto.map(dto::AccountDto::into_model).transpose()
    }

    async fn account_details(&self, id: &Id) -> Result<Option<AccountDetails>, ProviderError> {
        let dto: Option<dto::AccountDetailsEnvelopeDto> = self
            .get_json_optional(&format!("/accounts/{id}/details/"), &[])
            .await?;
        Ok(dto.map(|d| d.account.into_model()))
    }

    async fn account_balances(
        &self,
        id: &Id,
    ) -> Result<Option<Vec<BalanceSnapshot>>, ProviderError> {
        let dto: Option<dto::BalancesEnvelopeDto> = self
            .get_json_optional(&format!("/accounts/{id}/balances/"), &[])
            .await?;
        let Some(envelope) = dto else {
            return Ok(None);
        };

        let retrieved_at = self.clock.now();
        let snapshots = envelope
            .balances
            .into_iter()
            .map(|b| b.into_model(retrieved_at))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(snapshots))
    }

    async fn account_transactions(
        &self,
        account: &Account,
        date_from: Option<NaiveDate>,
        date_to: Option<NaiveDate>,
    ) -> Result<Option<Vec<Transaction>>, ProviderError> {
        let mut query = Vec::new();
        if let Some(from) = date_from {
            query.push(("date_from", from.format("%Y-%m-%d").to_string()));
        }
        if let Some(to) = date_to {
            query.push(("date_to", to.format("%Y-%m-%d").to_string()));
        }

        let dto: Option<dto::TransactionsEnvelopeDto> = self
            .get_json_optional(&format!("/accounts/{}/transactions/", account.id), &query)
            .await?;
        let Some(envelope) = dto else {
            return Ok(None);
        };

        let imported_at = self.clock.now();
        let mut skipped = 0usize;
        let mut transactions = Vec::new();
        for tx in envelope
            .transactions
            .booked
            .into_iter()
            .chain(envelope.transactions.pending)
        {
            match tx.into_model(account, imported_at)? {
                Some(tx) => transactions.push(tx),
                None => skipped += 1,
            }
        }

        if skipped > 0 {
            tracing::warn!(
                account_id = %account.id,
                skipped,
                "Skipped transactions without a provider transaction id"
            );
        }

        Ok(Some(transactions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable(StatusCode::REQUEST_TIMEOUT));
        assert!(is_retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(is_retryable(StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_retryable(StatusCode::GATEWAY_TIMEOUT));
        assert!(!is_retryable(StatusCode::BAD_REQUEST));
        assert!(!is_retryable(StatusCode::NOT_FOUND));
        assert!(!is_retryable(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn retry_delay_prefers_server_hint_when_longer() {
        let server = Some(Duration::from_secs(30));
        assert_eq!(retry_delay(BACKOFF_BASE, 1, server), Duration::from_secs(30));

        // Exponential floor still applies when the hint is shorter.
        let short = Some(Duration::from_millis(10));
        assert!(retry_delay(BACKOFF_BASE, 3, short) >= Duration::from_secs(4));
    }
}
