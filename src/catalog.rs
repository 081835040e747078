//! TTL-cached institution catalog.
//!
//! The provider's institution list changes rarely, so we keep a per-country
//! copy in storage and only refetch once it goes stale.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Duration;
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::models::{CacheMetadata, Id, InstitutionMetadata};
use crate::provider::BankProvider;
use crate::storage::Storage;

fn cache_key(country: &str) -> String {
    format!("institutions:{country}")
}

pub struct InstitutionCatalog {
    storage: Arc<dyn Storage>,
    provider: Arc<dyn BankProvider>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl InstitutionCatalog {
    pub fn new(storage: Arc<dyn Storage>, provider: Arc<dyn BankProvider>, ttl: Duration) -> Self {
        Self {
            storage,
            provider,
            ttl,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Institutions available in a country, from cache when fresh.
    pub async fn list(&self, country: &str) -> Result<Vec<InstitutionMetadata>> {
        let key = cache_key(country);
        let metadata = self
            .storage
            .get_cache_metadata(&key)
            .await
            .context("Failed to read cache metadata")?;

        if let Some(metadata) = metadata {
            if metadata.is_fresh(self.clock.now(), self.ttl) {
                debug!(country, refreshed_at = %metadata.refreshed_at, "serving cached institutions");
                return self.storage.get_cached_institutions(country).await;
            }
        }

        self.refresh(country).await
    }

    /// One institution by id. Checks every cached country first, then asks
    /// the provider directly (the by-id endpoint is not country-scoped).
    pub async fn get(&self, country: &str, institution_id: &Id) -> Result<InstitutionMetadata> {
        let cached = self.storage.get_cached_institutions(country).await?;
        if let Some(institution) = cached.into_iter().find(|i| &i.id == institution_id) {
            return Ok(institution);
        }

        self.provider
            .institution(institution_id)
            .await
            .with_context(|| format!("Failed to fetch institution {institution_id}"))
    }

    async fn refresh(&self, country: &str) -> Result<Vec<InstitutionMetadata>> {
        let institutions = self
            .provider
            .institutions(country)
            .await
            .with_context(|| format!("Failed to fetch institutions for {country}"))?;

        let metadata = CacheMetadata {
            key: cache_key(country),
            refreshed_at: self.clock.now(),
            item_count: institutions.len(),
        };
        self.storage
            .replace_cached_institutions(country, &institutions, &metadata)
            .await
            .context("Failed to write institution cache")?;

        info!(country, count = institutions.len(), "refreshed institution catalog");
        Ok(institutions)
    }
}
