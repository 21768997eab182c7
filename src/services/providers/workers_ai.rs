use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use super::{GeneratedImage, GenerationRequest, ImageProvider, ProviderError};

const MODEL: &str = "@cf/stabilityai/stable-diffusion-xl-base-1.0";

/// Client for Cloudflare Workers AI text-to-image.
pub struct WorkersAiClient {
    http: Client,
    account_id: String,
    api_token: String,
}

#[derive(Serialize)]
struct TextToImageRequest<'a> {
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    negative_prompt: Option<&'a str>,
    num_steps: u32,
}

impl WorkersAiClient {
    pub fn new(http: Client, account_id: String, api_token: String) -> Self {
        Self {
            http,
            account_id,
            api_token,
        }
    }

    fn url(&self) -> String {
        format!(
            "https://api.cloudflare.com/client/v4/accounts/{}/ai/run/{}",
            self.account_id, MODEL
        )
    }
}

#[async_trait]
impl ImageProvider for WorkersAiClient {
    /// The model answers with raw PNG bytes.
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedImage, ProviderError> {
        let prompt = request.styled_prompt();
        let body = TextToImageRequest {
            prompt: &prompt,
            negative_prompt: request.negative_prompt.as_deref(),
            num_steps: 20,
        };

        let response = self
            .http
            .post(self.url())
            .bearer_auth(&self.api_token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, text));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/png")
            .to_string();
        let data = response.bytes().await?.to_vec();
        if data.is_empty() {
            return Err(ProviderError::InvalidResponse("empty image body".to_string()));
        }

        Ok(GeneratedImage::Bytes { data, content_type })
    }
}
