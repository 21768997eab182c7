//! Fake providers and wiring shared by queue tests

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hemp_image_queue::models::provider::ProviderConfig;
use hemp_image_queue::services::job_store::{JobStore, MemoryJobStore, StoreError};
use hemp_image_queue::services::providers::{
    GeneratedImage, GenerationRequest, ImageProvider, ProviderError, ProviderRegistry,
    ProviderSource, QualityWithinBudget,
};
use hemp_image_queue::services::targets::{MemoryTargets, TargetRepository};
use hemp_image_queue::services::worker::Worker;

pub const PROVIDER_TIMEOUT: Duration = Duration::from_millis(100);

/// Answers every request with a hosted image URL.
#[derive(Default)]
pub struct UrlProvider {
    calls: AtomicU32,
}

impl UrlProvider {
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageProvider for UrlProvider {
    async fn generate(&self, _request: &GenerationRequest) -> Result<GeneratedImage, ProviderError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(GeneratedImage::Url(format!("https://images.example.com/generated-{n}.png")))
    }
}

/// Never answers within the test provider timeout.
pub struct SlowProvider;

#[async_trait]
impl ImageProvider for SlowProvider {
    async fn generate(&self, _request: &GenerationRequest) -> Result<GeneratedImage, ProviderError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(GeneratedImage::Url("https://images.example.com/late.png".to_string()))
    }
}

/// Fails requests whose prompt contains `marker`, succeeds otherwise.
pub struct FlakyProvider {
    pub marker: &'static str,
}

#[async_trait]
impl ImageProvider for FlakyProvider {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedImage, ProviderError> {
        if request.prompt.contains(self.marker) {
            return Err(ProviderError::QuotaExceeded);
        }
        Ok(GeneratedImage::Url("https://images.example.com/ok.png".to_string()))
    }
}

/// Answers after `delay`, with `url` or a quota error when `url` is `None`.
pub struct DelayedProvider {
    pub delay: Duration,
    pub url: Option<&'static str>,
}

#[async_trait]
impl ImageProvider for DelayedProvider {
    async fn generate(&self, _request: &GenerationRequest) -> Result<GeneratedImage, ProviderError> {
        tokio::time::sleep(self.delay).await;
        match self.url {
            Some(url) => Ok(GeneratedImage::Url(url.to_string())),
            None => Err(ProviderError::QuotaExceeded),
        }
    }
}

/// Provider table that tests edit between runs, like the admin process does.
pub struct EditableProviders {
    rows: Mutex<Vec<ProviderConfig>>,
    clients: HashMap<String, Arc<UrlProvider>>,
}

impl EditableProviders {
    /// One `UrlProvider` client per row.
    pub fn new(rows: Vec<ProviderConfig>) -> Self {
        let clients = rows
            .iter()
            .map(|row| (row.name.clone(), Arc::new(UrlProvider::default())))
            .collect();
        Self {
            rows: Mutex::new(rows),
            clients,
        }
    }

    pub fn client(&self, name: &str) -> Arc<UrlProvider> {
        self.clients[name].clone()
    }

    pub fn edit(&self, name: &str, f: impl FnOnce(&mut ProviderConfig)) {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.iter_mut().find(|row| row.name == name) {
            f(row);
        }
    }
}

#[async_trait]
impl ProviderSource for EditableProviders {
    async fn load(&self) -> Result<Vec<ProviderConfig>, StoreError> {
        Ok(self.rows.lock().unwrap().clone())
    }

    fn client_for(&self, config: &ProviderConfig) -> Option<Arc<dyn ImageProvider>> {
        let client: Arc<dyn ImageProvider> = self.clients.get(&config.name)?.clone();
        Some(client)
    }
}

/// Returns raw PNG bytes, which need storage to become a URL.
pub struct BytesProvider;

#[async_trait]
impl ImageProvider for BytesProvider {
    async fn generate(&self, _request: &GenerationRequest) -> Result<GeneratedImage, ProviderError> {
        Ok(GeneratedImage::Bytes {
            data: b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR".to_vec(),
            content_type: "image/png".to_string(),
        })
    }
}

/// Store, catalog and a worker using `client` as the only provider.
pub struct Harness {
    pub store: Arc<MemoryJobStore>,
    pub targets: Arc<MemoryTargets>,
    pub worker: Worker,
}

impl Harness {
    pub fn dyn_store(&self) -> Arc<dyn JobStore> {
        self.store.clone()
    }

    pub fn dyn_targets(&self) -> Arc<dyn TargetRepository> {
        self.targets.clone()
    }
}

pub fn no_providers() -> ProviderRegistry {
    ProviderRegistry::new(Arc::new(QualityWithinBudget::default()))
}

pub fn single(config: ProviderConfig, client: Arc<dyn ImageProvider>) -> ProviderRegistry {
    no_providers().with(config, client)
}

pub fn harness(
    catalog: Vec<hemp_image_queue::models::target::TargetEntity>,
    registry: ProviderRegistry,
) -> Harness {
    let store = Arc::new(MemoryJobStore::new(Duration::from_secs(300)));
    let targets = Arc::new(MemoryTargets::new(catalog));
    let worker = Worker::new(store.clone(), targets.clone(), registry, PROVIDER_TIMEOUT);
    Harness {
        store,
        targets,
        worker,
    }
}

pub fn stable_diffusion() -> ProviderConfig {
    ProviderConfig::new("stable-diffusion", 0.002, 70)
}
