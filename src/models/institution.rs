use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Id;

/// Cached catalog entry for a bank. Not user-owned; refreshed on a TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstitutionMetadata {
    pub id: Id,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
    #[serde(default)]
    pub countries: Vec<String>,
    /// How many days of transaction history the institution can serve.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_total_days: Option<u32>,
    /// Longest consent window the institution accepts, in days.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_access_valid_for_days: Option<u32>,
}

/// Freshness tracking for a cached collection (e.g. a per-country
/// institution list).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub key: String,
    pub refreshed_at: DateTime<Utc>,
    pub item_count: usize,
}

impl CacheMetadata {
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        self.refreshed_at + ttl > now
    }
}
