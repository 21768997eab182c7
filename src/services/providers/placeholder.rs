use async_trait::async_trait;
use reqwest::Url;

use super::{GeneratedImage, GenerationRequest, ImageProvider, ProviderError};

const BASE_URL: &str = "https://via.placeholder.com/1024";

/// Zero-cost provider that answers with a placeholder image URL.
///
/// The URL carries the placeholder marker, so entities completed through this
/// provider are still picked up by the next producer run.
#[derive(Debug, Default)]
pub struct PlaceholderProvider;

#[async_trait]
impl ImageProvider for PlaceholderProvider {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedImage, ProviderError> {
        let text: String = request.prompt.chars().take(60).collect();
        let url = Url::parse_with_params(BASE_URL, &[("text", text.as_str())])
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        Ok(GeneratedImage::Url(url.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::target::needs_image;

    #[tokio::test]
    async fn test_placeholder_url_still_needs_image() {
        let request = GenerationRequest {
            prompt: "Hemp & seeds".to_string(),
            style_preset: None,
            negative_prompt: None,
        };
        let GeneratedImage::Url(url) = PlaceholderProvider.generate(&request).await.unwrap() else {
            panic!("expected url");
        };
        assert!(url.starts_with(BASE_URL));
        assert!(url.contains("Hemp+%26+seeds"));
        assert!(needs_image(Some(&url)));
    }
}
