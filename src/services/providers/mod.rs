//! Image-generation providers and the registry that picks between them.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::config::AppConfig;
use crate::models::job::ImageJob;
use crate::models::provider::ProviderConfig;

pub mod openai;
pub mod placeholder;
pub mod registry;
pub mod workers_ai;

pub use registry::{ProviderRegistry, ProviderSource, QualityWithinBudget, SelectionPolicy};

/// Provider names with a client implementation.
pub const WORKERS_AI: &str = "stable-diffusion";
pub const OPENAI: &str = "dall-e-3";
pub const PLACEHOLDER: &str = "placeholder";

/// What a provider is asked to draw.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub style_preset: Option<String>,
    pub negative_prompt: Option<String>,
}

impl GenerationRequest {
    /// Prompt with the style preset folded in, for providers without a
    /// separate style parameter.
    pub fn styled_prompt(&self) -> String {
        match self.style_preset.as_deref() {
            Some(style) if !style.trim().is_empty() => {
                format!("{}, {} style", self.prompt, style.replace('-', " "))
            }
            _ => self.prompt.clone(),
        }
    }
}

impl From<&ImageJob> for GenerationRequest {
    fn from(job: &ImageJob) -> Self {
        Self {
            prompt: job.prompt.clone(),
            style_preset: job.style_preset.clone(),
            negative_prompt: job.negative_prompt.clone(),
        }
    }
}

/// A generated image, either already hosted or as raw bytes to upload.
#[derive(Debug, Clone, PartialEq)]
pub enum GeneratedImage {
    Url(String),
    Bytes { data: Vec<u8>, content_type: String },
}

#[async_trait]
pub trait ImageProvider: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedImage, ProviderError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("quota exceeded")]
    QuotaExceeded,

    #[error("invalid API key")]
    InvalidKey,

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("timeout")]
    Timeout,
}

impl ProviderError {
    /// Map a non-success HTTP status to an error.
    pub fn from_status(status: StatusCode, body: String) -> Self {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::InvalidKey,
            StatusCode::TOO_MANY_REQUESTS | StatusCode::PAYMENT_REQUIRED => {
                ProviderError::QuotaExceeded
            }
            _ => ProviderError::Api {
                status: status.as_u16(),
                message: body.chars().take(300).collect(),
            },
        }
    }
}

/// Build a client for one configured provider, if the credentials it needs
/// are present.
pub fn build_provider(
    provider: &ProviderConfig,
    config: &AppConfig,
    http: &reqwest::Client,
) -> Option<Arc<dyn ImageProvider>> {
    match provider.name.as_str() {
        WORKERS_AI => {
            let account_id = config.cf_account_id.clone()?;
            let api_token = config.cf_api_token.clone()?;
            Some(Arc::new(workers_ai::WorkersAiClient::new(
                http.clone(),
                account_id,
                api_token,
            )))
        }
        OPENAI => {
            let api_key = config.openai_api_key.clone()?;
            Some(Arc::new(openai::OpenAiImagesClient::new(http.clone(), api_key)))
        }
        PLACEHOLDER => Some(Arc::new(placeholder::PlaceholderProvider::default())),
        _ => None,
    }
}
