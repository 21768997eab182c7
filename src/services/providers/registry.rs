use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use super::ImageProvider;
use crate::models::provider::ProviderConfig;
use crate::services::job_store::StoreError;

/// Chooses the preferred provider for a run.
pub trait SelectionPolicy: Send + Sync {
    fn select<'a>(&self, candidates: &'a [ProviderConfig]) -> Option<&'a ProviderConfig>;
}

/// Highest quality among active providers within an optional cost ceiling.
///
/// Ties on quality go to the cheaper provider, then to the name that sorts
/// first.
#[derive(Debug, Clone, Default)]
pub struct QualityWithinBudget {
    pub cost_ceiling: Option<f64>,
}

impl QualityWithinBudget {
    pub fn new(cost_ceiling: Option<f64>) -> Self {
        Self { cost_ceiling }
    }

    fn preference(a: &ProviderConfig, b: &ProviderConfig) -> Ordering {
        a.quality_score
            .cmp(&b.quality_score)
            .then_with(|| b.cost_per_image.total_cmp(&a.cost_per_image))
            .then_with(|| b.name.cmp(&a.name))
    }
}

impl SelectionPolicy for QualityWithinBudget {
    fn select<'a>(&self, candidates: &'a [ProviderConfig]) -> Option<&'a ProviderConfig> {
        candidates
            .iter()
            .filter(|p| p.is_active)
            .filter(|p| self.cost_ceiling.map_or(true, |ceiling| p.cost_per_image <= ceiling))
            .max_by(|a, b| Self::preference(a, b))
    }
}

/// Any `Fn(&[ProviderConfig]) -> Option<&ProviderConfig>` is a policy.
impl<F> SelectionPolicy for F
where
    F: for<'a> Fn(&'a [ProviderConfig]) -> Option<&'a ProviderConfig> + Send + Sync,
{
    fn select<'a>(&self, candidates: &'a [ProviderConfig]) -> Option<&'a ProviderConfig> {
        self(candidates)
    }
}

/// Where the registry reloads provider rows from.
///
/// The provider table is edited by an external admin process, so the set of
/// configs is reloaded per run while built clients are cached by name.
#[async_trait]
pub trait ProviderSource: Send + Sync {
    async fn load(&self) -> Result<Vec<ProviderConfig>, StoreError>;

    /// Client for a provider seen for the first time, if credentials allow.
    fn client_for(&self, config: &ProviderConfig) -> Option<Arc<dyn ImageProvider>>;
}

#[derive(Default)]
struct Entries {
    configs: Vec<ProviderConfig>,
    clients: HashMap<String, Arc<dyn ImageProvider>>,
    // rows already reported as having no client
    skipped: HashSet<String>,
}

/// Configured providers paired with their clients.
///
/// Clones share the same entries, so a refresh through one clone is seen by
/// all of them.
#[derive(Clone)]
pub struct ProviderRegistry {
    entries: Arc<RwLock<Entries>>,
    policy: Arc<dyn SelectionPolicy>,
    source: Option<Arc<dyn ProviderSource>>,
}

impl ProviderRegistry {
    pub fn new(policy: Arc<dyn SelectionPolicy>) -> Self {
        Self {
            entries: Arc::new(RwLock::new(Entries::default())),
            policy,
            source: None,
        }
    }

    pub fn with_source(mut self, source: Arc<dyn ProviderSource>) -> Self {
        self.source = Some(source);
        self
    }

    fn read(&self) -> RwLockReadGuard<'_, Entries> {
        self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Entries> {
        self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a provider, replacing any earlier entry with the same name.
    pub fn register(&self, config: ProviderConfig, client: Arc<dyn ImageProvider>) {
        let mut entries = self.write();
        entries.clients.insert(config.name.clone(), client);
        if let Some(existing) = entries.configs.iter_mut().find(|c| c.name == config.name) {
            *existing = config;
        } else {
            entries.configs.push(config);
        }
    }

    pub fn with(self, config: ProviderConfig, client: Arc<dyn ImageProvider>) -> Self {
        self.register(config, client);
        self
    }

    /// Reload provider rows from the source.
    ///
    /// Rows without a client are left out. Returns the number of usable
    /// providers. Without a source this is a no-op.
    pub async fn refresh(&self) -> Result<usize, StoreError> {
        let Some(source) = &self.source else {
            return Ok(self.read().configs.len());
        };
        let loaded = source.load().await?;

        let mut entries = self.write();
        let mut configs = Vec::with_capacity(loaded.len());
        for config in loaded {
            if !entries.clients.contains_key(&config.name) {
                match source.client_for(&config) {
                    Some(client) => {
                        tracing::info!(provider = %config.name, "Registered image provider");
                        entries.clients.insert(config.name.clone(), client);
                    }
                    None => {
                        if entries.skipped.insert(config.name.clone()) {
                            tracing::warn!(
                                provider = %config.name,
                                "No client or credentials for provider, skipping"
                            );
                        }
                        continue;
                    }
                }
            }
            configs.push(config);
        }
        entries.configs = configs;
        Ok(entries.configs.len())
    }

    /// Refresh before a run. A failed reload keeps the previous set.
    pub async fn refresh_or_keep(&self) {
        if let Err(e) = self.refresh().await {
            tracing::warn!(error = %e, "Failed to reload providers, keeping previous set");
        }
    }

    pub fn configs(&self) -> Vec<ProviderConfig> {
        self.read().configs.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.read().configs.is_empty()
    }

    /// The provider the policy prefers right now.
    pub fn select(&self) -> Option<(ProviderConfig, Arc<dyn ImageProvider>)> {
        let entries = self.read();
        let chosen = self.policy.select(&entries.configs)?;
        let client = entries.clients.get(&chosen.name)?.clone();
        Some((chosen.clone(), client))
    }

    /// An active provider by name.
    pub fn active(&self, name: &str) -> Option<(ProviderConfig, Arc<dyn ImageProvider>)> {
        let entries = self.read();
        let config = entries.configs.iter().find(|c| c.name == name && c.is_active)?;
        let client = entries.clients.get(name)?.clone();
        Some((config.clone(), client))
    }
}
