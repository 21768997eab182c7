use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;

use crate::config::AppConfig;
use crate::models::provider::ProviderConfig;
use crate::services::job_store::StoreError;
use crate::services::providers::{self, ImageProvider, ProviderSource};

/// Load every configured provider. Activation is decided by the admin process.
pub async fn list_providers(pool: &PgPool) -> Result<Vec<ProviderConfig>, sqlx::Error> {
    sqlx::query_as::<_, ProviderConfig>(
        r#"
        SELECT name, cost_per_image::float8 AS cost_per_image, quality_score, is_active
        FROM image_generation_providers
        ORDER BY name
        "#,
    )
    .fetch_all(pool)
    .await
}

/// Provider rows from `image_generation_providers`, with clients built from
/// the credentials in `AppConfig`.
pub struct PgProviderSource {
    pool: PgPool,
    config: Arc<AppConfig>,
    http: reqwest::Client,
}

impl PgProviderSource {
    pub fn new(pool: PgPool, config: Arc<AppConfig>, http: reqwest::Client) -> Self {
        Self { pool, config, http }
    }
}

#[async_trait]
impl ProviderSource for PgProviderSource {
    async fn load(&self) -> Result<Vec<ProviderConfig>, StoreError> {
        Ok(list_providers(&self.pool).await?)
    }

    fn client_for(&self, config: &ProviderConfig) -> Option<Arc<dyn ImageProvider>> {
        providers::build_provider(config, &self.config, &self.http)
    }
}
