use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::models::target::{ImageCoverage, TargetEntity, TargetKind, TargetRef};
use crate::services::job_store::StoreError;

/// Catalog tables that own the `image_url` written by the worker.
#[async_trait]
pub trait TargetRepository: Send + Sync {
    /// Entities of `kind` with no image or a placeholder image.
    async fn missing_images(&self, kind: TargetKind) -> Result<Vec<TargetEntity>, StoreError>;

    /// Write a generated image URL back to the entity.
    async fn set_image_url(&self, target: TargetRef, image_url: &str) -> Result<(), StoreError>;

    async fn coverage(&self, kind: TargetKind) -> Result<ImageCoverage, StoreError>;
}

/// In-process catalog for tests and local runs.
#[derive(Default)]
pub struct MemoryTargets {
    entities: RwLock<BTreeMap<TargetRef, TargetEntity>>,
}

impl MemoryTargets {
    pub fn new(entities: impl IntoIterator<Item = TargetEntity>) -> Self {
        Self {
            entities: RwLock::new(
                entities
                    .into_iter()
                    .map(|entity| (entity.target_ref(), entity))
                    .collect(),
            ),
        }
    }

    pub async fn get(&self, target: TargetRef) -> Option<TargetEntity> {
        self.entities.read().await.get(&target).cloned()
    }
}

#[async_trait]
impl TargetRepository for MemoryTargets {
    async fn missing_images(&self, kind: TargetKind) -> Result<Vec<TargetEntity>, StoreError> {
        Ok(self
            .entities
            .read()
            .await
            .values()
            .filter(|entity| entity.kind == kind && entity.needs_image())
            .cloned()
            .collect())
    }

    async fn set_image_url(&self, target: TargetRef, image_url: &str) -> Result<(), StoreError> {
        let mut entities = self.entities.write().await;
        let entity = entities
            .get_mut(&target)
            .ok_or(StoreError::TargetNotFound(target))?;
        entity.image_url = Some(image_url.to_string());
        Ok(())
    }

    async fn coverage(&self, kind: TargetKind) -> Result<ImageCoverage, StoreError> {
        let entities = self.entities.read().await;
        let of_kind = entities.values().filter(|entity| entity.kind == kind);
        let (total, with_image) = of_kind.fold((0, 0), |(total, with), entity| {
            (total + 1, with + i64::from(!entity.needs_image()))
        });
        Ok(ImageCoverage {
            kind,
            total,
            with_image,
        })
    }
}
