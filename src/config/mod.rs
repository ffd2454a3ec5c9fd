//! Service configuration.
//!
//! Loaded from an optional TOML file (every section defaults), then
//! overridden by environment variables. Secrets normally come from the
//! environment only.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::time::Duration;

use crate::credentials::validate_key;

/// Complete service configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub shopify: ShopifyConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
}

/// Upstream app credentials and API settings
#[derive(Debug, Clone, Deserialize)]
pub struct ShopifyConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Replaces `https://{shop}` for every upstream call (local mocks)
    #[serde(default)]
    pub base_url_override: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_scopes() -> Vec<String> {
    vec!["read_products".to_string()]
}

fn default_api_version() -> String {
    "2024-01".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for ShopifyConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            scopes: default_scopes(),
            api_version: default_api_version(),
            base_url_override: None,
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

impl ShopifyConfig {
    /// Base URL for every upstream call made on behalf of `shop`.
    pub fn shop_base_url(&self, shop: &str) -> String {
        match &self.base_url_override {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => format!("https://{}", shop),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Public URL the storefront redirects back to after authorization
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
}

fn default_port() -> u16 {
    3000
}

fn default_public_base_url() -> String {
    "http://localhost:3000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            public_base_url: default_public_base_url(),
        }
    }
}

impl ServerConfig {
    pub fn callback_url(&self) -> String {
        format!("{}/auth/callback", self.public_base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    /// Base64-encoded 32-byte key sealing access tokens at rest
    #[serde(default)]
    pub encryption_key: String,
}

fn default_database_path() -> String {
    "storesync.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            encryption_key: String::new(),
        }
    }
}

/// Catalog sync cadence
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_interval")]
    pub interval_seconds: u64,
    /// A tenant sync running longer than this is abandoned for the tick
    #[serde(default = "default_sync_timeout")]
    pub sync_timeout_seconds: u64,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

fn default_interval() -> u64 {
    300
}

fn default_sync_timeout() -> u64 {
    120
}

fn default_max_concurrency() -> usize {
    4
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval(),
            sync_timeout_seconds: default_sync_timeout(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    #[serde(default = "default_state_ttl")]
    pub state_ttl_seconds: i64,
    #[serde(default = "default_state_cleanup_interval")]
    pub state_cleanup_interval_seconds: u64,
}

fn default_state_ttl() -> i64 {
    600
}

fn default_state_cleanup_interval() -> u64 {
    60
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            state_ttl_seconds: default_state_ttl(),
            state_cleanup_interval_seconds: default_state_cleanup_interval(),
        }
    }
}

impl AppConfig {
    /// Reads the TOML file at `path`.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path))?;
        toml::from_str(&contents).with_context(|| format!("Failed to parse config file {}", path))
    }

    /// Applies environment overrides on top of the current values.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SHOPIFY_API_KEY") {
            self.shopify.client_id = v;
        }
        if let Some(v) = lookup("SHOPIFY_API_SECRET") {
            self.shopify.client_secret = v;
        }
        if let Some(v) = lookup("SHOPIFY_SCOPES") {
            self.shopify.scopes = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = lookup("STORESYNC_PUBLIC_URL") {
            self.server.public_base_url = v;
        }
        if let Some(v) = lookup("STORESYNC_PORT") {
            self.server.port = v.parse().context("STORESYNC_PORT must be a valid port number")?;
        }
        if let Some(v) = lookup("STORESYNC_DATABASE_PATH") {
            self.storage.database_path = v;
        }
        if let Some(v) = lookup("STORESYNC_ENCRYPTION_KEY") {
            self.storage.encryption_key = v;
        }
        if let Some(v) = lookup("STORESYNC_SYNC_INTERVAL_SECONDS") {
            self.scheduler.interval_seconds = v
                .parse()
                .context("STORESYNC_SYNC_INTERVAL_SECONDS must be a whole number of seconds")?;
        }
        Ok(())
    }

    /// Rejects configurations the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.shopify.client_id.is_empty() || self.shopify.client_secret.is_empty() {
            bail!("SHOPIFY_API_KEY and SHOPIFY_API_SECRET are required");
        }
        if self.shopify.scopes.is_empty() {
            bail!("at least one OAuth scope is required");
        }
        if self.scheduler.interval_seconds == 0 {
            bail!("scheduler.interval_seconds must be greater than zero");
        }
        if self.scheduler.sync_timeout_seconds == 0 {
            bail!("scheduler.sync_timeout_seconds must be greater than zero");
        }
        if self.scheduler.max_concurrency == 0 {
            bail!("scheduler.max_concurrency must be greater than zero");
        }
        if self.oauth.state_ttl_seconds <= 0 {
            bail!("oauth.state_ttl_seconds must be greater than zero");
        }
        if self.oauth.state_cleanup_interval_seconds == 0 {
            bail!("oauth.state_cleanup_interval_seconds must be greater than zero");
        }
        validate_key(&self.storage.encryption_key)
            .context("STORESYNC_ENCRYPTION_KEY must be a base64-encoded 32-byte key")?;
        Ok(())
    }
}

/// Loads the file (if given), applies env overrides and validates.
pub fn load_config(path: Option<&str>) -> Result<AppConfig> {
    let mut config = match path {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::default(),
    };
    config.apply_env()?;
    config.validate()?;
    Ok(config)
}
