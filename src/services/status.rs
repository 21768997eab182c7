use std::sync::Arc;

use serde::Serialize;
use strum::IntoEnumIterator;

use crate::models::job::{JobStatus, ProviderSpend};
use crate::models::target::{ImageCoverage, TargetKind};
use crate::services::job_store::{JobStore, StoreError};
use crate::services::providers::ProviderRegistry;
use crate::services::targets::TargetRepository;

/// Read-only snapshot of the queue for operators.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub total: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_provider: Option<String>,
    /// `pending * cost_per_image` of the selected provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_remaining_cost: Option<f64>,
    pub spend: Vec<ProviderSpend>,
    pub coverage: Vec<ImageCoverage>,
}

pub struct StatusReporter {
    store: Arc<dyn JobStore>,
    targets: Arc<dyn TargetRepository>,
    registry: ProviderRegistry,
}

impl StatusReporter {
    pub fn new(
        store: Arc<dyn JobStore>,
        targets: Arc<dyn TargetRepository>,
        registry: ProviderRegistry,
    ) -> Self {
        Self {
            store,
            targets,
            registry,
        }
    }

    pub async fn report(&self) -> Result<StatusReport, StoreError> {
        let counts = self.store.counts_by_status().await?;
        let pending = counts.get(JobStatus::Pending);
        metrics::gauge!("image_queue_depth").set(pending as f64);

        self.registry.refresh_or_keep().await;
        let selected = self.registry.select().map(|(config, _)| config);

        let mut coverage = Vec::new();
        for kind in TargetKind::iter() {
            coverage.push(self.targets.coverage(kind).await?);
        }

        Ok(StatusReport {
            pending,
            processing: counts.get(JobStatus::Processing),
            completed: counts.get(JobStatus::Completed),
            failed: counts.get(JobStatus::Failed),
            total: counts.total(),
            estimated_remaining_cost: selected
                .as_ref()
                .map(|provider| pending as f64 * provider.cost_per_image),
            selected_provider: selected.map(|provider| provider.name),
            spend: self.store.cost_summary().await?,
            coverage,
        })
    }
}
