use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Cloudflare account ID (Workers AI provider)
    pub cf_account_id: Option<String>,

    /// Cloudflare Workers AI API token
    pub cf_api_token: Option<String>,

    /// OpenAI API key (images provider)
    pub openai_api_key: Option<String>,

    /// Bucket for generated images (S3-compatible)
    pub storage_bucket: Option<String>,

    pub storage_endpoint: Option<String>,

    pub storage_access_key: Option<String>,

    pub storage_secret_key: Option<String>,

    /// Public base URL under which uploaded images are served
    pub storage_public_url: Option<String>,

    /// Jobs claimed per worker batch
    #[serde(default = "default_batch_size")]
    pub worker_batch_size: u32,

    /// Seconds between worker batches when the queue is idle
    #[serde(default = "default_poll_interval")]
    pub worker_poll_interval_secs: u64,

    /// Upper bound on a single provider call
    #[serde(default = "default_provider_timeout")]
    pub provider_timeout_secs: u64,

    /// Age after which a `processing` claim may be taken over
    #[serde(default = "default_claim_timeout")]
    pub claim_timeout_secs: u64,

    /// Providers above this cost per image are never selected
    pub max_cost_per_image: Option<f64>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_batch_size() -> u32 {
    5
}

fn default_poll_interval() -> u64 {
    30
}

fn default_provider_timeout() -> u64 {
    60
}

fn default_claim_timeout() -> u64 {
    300
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(
        "CLAIM_TIMEOUT_SECS ({claim}) must be greater than PROVIDER_TIMEOUT_SECS ({provider})"
    )]
    ClaimShorterThanProvider { claim: u64, provider: u64 },
}

/// Connection settings for generated-image storage.
pub struct StorageSettings<'a> {
    pub bucket: &'a str,
    pub endpoint: &'a str,
    pub access_key: &'a str,
    pub secret_key: &'a str,
    pub public_url: &'a str,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// A claim must outlive the provider call it covers, otherwise a healthy
    /// worker's job is reclaimed mid-call.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.claim_timeout_secs <= self.provider_timeout_secs {
            return Err(ConfigError::ClaimShorterThanProvider {
                claim: self.claim_timeout_secs,
                provider: self.provider_timeout_secs,
            });
        }
        Ok(())
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn claim_timeout(&self) -> Duration {
        Duration::from_secs(self.claim_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.worker_poll_interval_secs)
    }

    /// Storage settings, when every storage variable is set.
    pub fn storage(&self) -> Option<StorageSettings<'_>> {
        Some(StorageSettings {
            bucket: self.storage_bucket.as_deref()?,
            endpoint: self.storage_endpoint.as_deref()?,
            access_key: self.storage_access_key.as_deref()?,
            secret_key: self.storage_secret_key.as_deref()?,
            public_url: self.storage_public_url.as_deref()?,
        })
    }
}
