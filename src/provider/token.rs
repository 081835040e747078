use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::clock::{Clock, SystemClock};

use super::ProviderError;

/// Subtracted from the provider-reported ttl so a token is never presented
/// within a minute of expiring.
const SAFETY_MARGIN_SECS: i64 = 60;

/// Ttl assumed when the exchange response omits `access_expires`.
const DEFAULT_TTL_SECS: i64 = 3600;

#[derive(Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Caches the provider bearer token and serializes refreshes.
///
/// The hot path reads the cache without any I/O or async locking; a cold
/// or expired cache funnels callers through a single-flight mutex with a
/// double-check inside, so N racing callers produce exactly one exchange
/// request against the provider.
pub struct TokenManager {
    http: reqwest::Client,
    token_url: String,
    secret_id: SecretString,
    secret_key: SecretString,
    clock: Arc<dyn Clock>,
    cached: RwLock<Option<CachedToken>>,
    refresh_lock: Mutex<()>,
}

impl TokenManager {
    pub fn new(
        base_url: impl Into<String>,
        secret_id: SecretString,
        secret_key: SecretString,
    ) -> Self {
        let base_url = base_url.into();
        Self {
            http: reqwest::Client::new(),
            token_url: format!("{}/token/new/", base_url.trim_end_matches('/')),
            secret_id,
            secret_key,
            clock: Arc::new(SystemClock),
            cached: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Return a token valid for at least the safety margin, refreshing it
    /// through the single-flight lock if needed.
    pub async fn get_valid_token(&self) -> Result<String, ProviderError> {
        if let Some(token) = self.cached_token() {
            return Ok(token);
        }

        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited on the lock.
        if let Some(token) = self.cached_token() {
            return Ok(token);
        }

        self.refresh().await
    }

    fn cached_token(&self) -> Option<String> {
        let cached = self.cached.read().expect("token cache lock poisoned");
        cached
            .as_ref()
            .filter(|c| !c.token.is_empty() && self.clock.now() < c.expires_at)
            .map(|c| c.token.clone())
    }

    async fn refresh(&self) -> Result<String, ProviderError> {
        #[derive(Serialize)]
        struct TokenRequest<'a> {
            secret_id: &'a str,
            secret_key: &'a str,
        }

        #[derive(Deserialize)]
        struct TokenResponse {
            access: Option<String>,
            access_expires: Option<i64>,
        }

        tracing::debug!("Refreshing provider access token");

        let response = self
            .http
            .post(&self.token_url)
            .json(&TokenRequest {
                secret_id: self.secret_id.expose_secret(),
                secret_key: self.secret_key.expose_secret(),
            })
            .send()
            .await
            .map_err(ProviderError::Transport)?;

        let status = response.status();
        let body = response.text().await.map_err(ProviderError::Transport)?;

        if !status.is_success() {
            return Err(ProviderError::Auth(format!(
                "token endpoint returned {status}: {body}"
            )));
        }

        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|err| ProviderError::Auth(format!("invalid token response: {err}")))?;

        let token = parsed
            .access
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ProviderError::Auth("no usable token in response".to_string()))?;

        let ttl = parsed.access_expires.unwrap_or(DEFAULT_TTL_SECS);
        let expires_at = self.clock.now() + Duration::seconds(ttl - SAFETY_MARGIN_SECS);

        let mut cached = self.cached.write().expect("token cache lock poisoned");
        *cached = Some(CachedToken {
            token: token.clone(),
            expires_at,
        });

        Ok(token)
    }
}
