use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default country used when listing institutions.
fn default_country() -> String {
    "GB".to_string()
}

fn default_lookback_days() -> i64 {
    90
}

fn default_max_deliveries() -> u32 {
    5
}

fn default_catalog_ttl_hours() -> i64 {
    24
}

/// Open-banking provider connection settings.
///
/// `secret_id`/`secret_key` are the provider portal credentials used for the
/// token exchange. They are read as plain strings here and wrapped in
/// `SecretString` at client construction.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL of the bank account data API.
    pub base_url: String,

    pub secret_id: String,
    pub secret_key: String,

    /// Where the end user lands after completing bank authorization.
    pub redirect_url: String,
}

/// Sync pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Transaction window for accounts that have never been synced, in days.
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,

    /// Deliveries attempted per queue message before it is dropped as poison.
    #[serde(default = "default_max_deliveries")]
    pub max_deliveries: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            lookback_days: default_lookback_days(),
            max_deliveries: default_max_deliveries(),
        }
    }
}

/// Institution catalog cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// How long a cached per-country institution list stays fresh, in hours.
    #[serde(default = "default_catalog_ttl_hours")]
    pub ttl_hours: i64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            ttl_hours: default_catalog_ttl_hours(),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to data directory. If relative, resolved from config file location.
    /// If not specified, defaults to the config file's directory.
    pub data_dir: Option<PathBuf>,

    /// Two-letter country code for institution listings.
    #[serde(default = "default_country")]
    pub country: String,

    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub catalog: CatalogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            country: default_country(),
            provider: ProviderConfig::default(),
            sync: SyncConfig::default(),
            catalog: CatalogConfig::default(),
        }
    }
}

impl Config {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load config from a file, or return default config if file doesn't exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Resolve the data directory path.
    ///
    /// If `data_dir` is set and relative, it's resolved relative to `config_dir`.
    /// If `data_dir` is not set, returns `config_dir`.
    pub fn resolve_data_dir(&self, config_dir: &Path) -> PathBuf {
        match &self.data_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => config_dir.join(dir),
            None => config_dir.to_path_buf(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_sections_missing() {
        let config: Config = toml::from_str("country = \"SE\"").unwrap();
        assert_eq!(config.country, "SE");
        assert_eq!(config.sync.lookback_days, 90);
        assert_eq!(config.sync.max_deliveries, 5);
        assert_eq!(config.catalog.ttl_hours, 24);
    }

    #[test]
    fn provider_section_parses() {
        let config: Config = toml::from_str(
            r#"
            [provider]
            base_url = "https://bankaccountdata.example.com/api/v2"
            secret_id = "id"
            secret_key = "key"
            redirect_url = "https://app.example.com/callback"
            "#,
        )
        .unwrap();
        assert_eq!(
            config.provider.base_url,
            "https://bankaccountdata.example.com/api/v2"
        );
        assert_eq!(config.provider.redirect_url, "https://app.example.com/callback");
    }

    #[test]
    fn data_dir_resolution() {
        let config = Config {
            data_dir: Some(PathBuf::from("data")),
            ..Config::default()
        };
        assert_eq!(
            config.resolve_data_dir(Path::new("/etc/ledgerlink")),
            PathBuf::from("/etc/ledgerlink/data")
        );

        let config = Config::default();
        assert_eq!(
            config.resolve_data_dir(Path::new("/etc/ledgerlink")),
            PathBuf::from("/etc/ledgerlink")
        );
    }
}
