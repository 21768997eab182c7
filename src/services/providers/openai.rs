use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;

use super::{GeneratedImage, GenerationRequest, ImageProvider, ProviderError};

const IMAGES_URL: &str = "https://api.openai.com/v1/images/generations";
const MODEL: &str = "dall-e-3";

/// Client for the OpenAI images endpoint.
pub struct OpenAiImagesClient {
    http: Client,
    api_key: String,
}

#[derive(Deserialize)]
struct ImagesResponse {
    data: Vec<ImageData>,
}

#[derive(Deserialize)]
struct ImageData {
    b64_json: Option<String>,
}

impl OpenAiImagesClient {
    pub fn new(http: Client, api_key: String) -> Self {
        Self { http, api_key }
    }
}

/// The endpoint has no negative prompt, so it is appended as an instruction.
fn compose_prompt(request: &GenerationRequest) -> String {
    let prompt = request.styled_prompt();
    match request.negative_prompt.as_deref() {
        Some(negative) if !negative.trim().is_empty() => format!("{prompt}. Avoid: {negative}"),
        _ => prompt,
    }
}

/// Hosted result URLs expire after about an hour, so the image is always
/// requested inline and goes through image storage.
fn request_body(request: &GenerationRequest) -> serde_json::Value {
    serde_json::json!({
        "model": MODEL,
        "prompt": compose_prompt(request),
        "n": 1,
        "size": "1024x1024",
        "response_format": "b64_json"
    })
}

fn into_image(response: ImagesResponse) -> Result<GeneratedImage, ProviderError> {
    let first = response
        .data
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::InvalidResponse("no image in response".to_string()))?;

    let encoded = first
        .b64_json
        .ok_or_else(|| ProviderError::InvalidResponse("image has no inline data".to_string()))?;
    let data = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
    Ok(GeneratedImage::Bytes {
        data,
        content_type: "image/png".to_string(),
    })
}

#[async_trait]
impl ImageProvider for OpenAiImagesClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedImage, ProviderError> {
        let body = request_body(request);

        let response = self
            .http
            .post(IMAGES_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, text));
        }

        let parsed: ImagesResponse = response.json().await?;
        into_image(parsed)
    }
}
