use std::sync::Arc;

use serde::Serialize;
use strum::IntoEnumIterator;

use crate::models::target::TargetKind;
use crate::services::job_store::{JobStore, StoreError};
use crate::services::prompts::PromptCatalog;
use crate::services::targets::TargetRepository;

/// Summary of one producer run.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProducerReport {
    /// Entities found without an image.
    pub scanned: u32,
    pub enqueued: u32,
    /// Entities already covered by an unresolved job.
    pub skipped: u32,
}

/// Enqueues one job per catalog entity that is missing its image.
pub struct Producer {
    store: Arc<dyn JobStore>,
    targets: Arc<dyn TargetRepository>,
}

impl Producer {
    pub fn new(store: Arc<dyn JobStore>, targets: Arc<dyn TargetRepository>) -> Self {
        Self { store, targets }
    }

    /// Scan `kinds` (all kinds when empty) and enqueue at most `limit` jobs.
    ///
    /// Safe to re-run: entities with a pending or processing job are skipped.
    pub async fn run(
        &self,
        kinds: &[TargetKind],
        limit: Option<u32>,
    ) -> Result<ProducerReport, StoreError> {
        let kinds: Vec<TargetKind> = if kinds.is_empty() {
            TargetKind::iter().collect()
        } else {
            kinds.to_vec()
        };
        let mut report = ProducerReport::default();

        'kinds: for kind in kinds {
            let missing = self.targets.missing_images(kind).await?;
            tracing::info!(kind = %kind, missing = missing.len(), "Scanning entities without images");

            for entity in missing {
                if limit.is_some_and(|limit| report.enqueued >= limit) {
                    tracing::info!(limit = ?limit, "Enqueue limit reached");
                    break 'kinds;
                }
                report.scanned += 1;

                let job = PromptCatalog::job_for(&entity);
                match self.store.enqueue_unique(job).await? {
                    Some(job_id) => {
                        report.enqueued += 1;
                        metrics::counter!("image_jobs_enqueued_total").increment(1);
                        tracing::info!(
                            job_id = %job_id,
                            target = %entity.target_ref(),
                            name = %entity.name,
                            "Enqueued image job"
                        );
                    }
                    None => {
                        report.skipped += 1;
                        tracing::debug!(
                            target = %entity.target_ref(),
                            name = %entity.name,
                            "Unresolved job already exists, skipping"
                        );
                    }
                }
            }
        }

        tracing::info!(
            scanned = report.scanned,
            enqueued = report.enqueued,
            skipped = report.skipped,
            "Producer run complete"
        );
        Ok(report)
    }
}
