use sqlx::PgPool;
use std::sync::Arc;

use crate::config::{AppConfig, ConfigError};
use crate::db::{
    provider_queries::PgProviderSource, queries::PgJobStore, target_queries::PgTargetRepository,
};
use crate::services::{
    job_store::{JobStore, StoreError},
    producer::Producer,
    providers::{ProviderRegistry, QualityWithinBudget},
    status::StatusReporter,
    storage::{ImageStorage, StorageError},
    targets::TargetRepository,
    worker::Worker,
};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Failed to load providers: {0}")]
    Providers(#[from] StoreError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to initialize storage: {0}")]
    Storage(#[from] StorageError),

    #[error("Failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub store: Arc<dyn JobStore>,
    pub targets: Arc<dyn TargetRepository>,
    pub producer: Arc<Producer>,
    pub worker: Arc<Worker>,
    pub status: Arc<StatusReporter>,
}

impl AppState {
    /// Assemble the services from explicit parts.
    pub fn new(
        db: PgPool,
        store: Arc<dyn JobStore>,
        targets: Arc<dyn TargetRepository>,
        worker: Worker,
    ) -> Self {
        let registry = worker.registry().clone();
        Self {
            producer: Arc::new(Producer::new(store.clone(), targets.clone())),
            status: Arc::new(StatusReporter::new(store.clone(), targets.clone(), registry)),
            worker: Arc::new(worker),
            db,
            store,
            targets,
        }
    }

    /// Postgres-backed state with providers and storage taken from `config`.
    pub async fn from_config(config: &AppConfig, db: PgPool) -> Result<Self, StartupError> {
        config.validate()?;
        let store: Arc<dyn JobStore> = Arc::new(PgJobStore::new(db.clone(), config.claim_timeout()));
        let targets: Arc<dyn TargetRepository> = Arc::new(PgTargetRepository::new(db.clone()));

        let registry = load_registry(config, &db).await?;

        let mut worker = Worker::new(
            store.clone(),
            targets.clone(),
            registry,
            config.provider_timeout(),
        );
        match config.storage() {
            Some(settings) => {
                tracing::info!(bucket = %settings.bucket, "Initializing image storage");
                let storage = ImageStorage::new(
                    settings.bucket,
                    settings.endpoint,
                    settings.access_key,
                    settings.secret_key,
                    settings.public_url,
                )?;
                worker = worker.with_storage(Arc::new(storage));
            }
            None => tracing::warn!(
                "Image storage not configured, byte-returning providers will fail their jobs"
            ),
        }

        Ok(Self::new(db, store, targets, worker))
    }
}

/// Registry backed by the provider table. Clients are built for every
/// provider whose credentials are configured, and the table is reloaded
/// before each run.
pub async fn load_registry(
    config: &AppConfig,
    db: &PgPool,
) -> Result<ProviderRegistry, StartupError> {
    let http = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let source = PgProviderSource::new(db.clone(), Arc::new(config.clone()), http);
    let registry = ProviderRegistry::new(Arc::new(QualityWithinBudget::new(
        config.max_cost_per_image,
    )))
    .with_source(Arc::new(source));

    let usable = registry.refresh().await?;
    for provider in registry.configs() {
        tracing::info!(
            provider = %provider.name,
            active = provider.is_active,
            cost_per_image = provider.cost_per_image,
            quality_score = provider.quality_score,
            "Loaded image provider"
        );
    }
    if registry.select().is_none() {
        tracing::warn!(usable, "No active image provider is selectable");
    }
    Ok(registry)
}
