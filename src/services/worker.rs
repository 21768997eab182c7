use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::models::job::{ImageJob, JobResult, JobStatus};
use crate::models::provider::{ProviderConfig, ProviderStats};
use crate::services::job_store::{JobStore, StoreError};
use crate::services::providers::{
    GeneratedImage, GenerationRequest, ImageProvider, ProviderError, ProviderRegistry,
};
use crate::services::storage::{ImageStorage, StorageError};
use crate::services::targets::TargetRepository;

/// Error messages kept in a batch report.
const MAX_REPORTED_ERRORS: usize = 5;

/// One worker invocation.
#[derive(Debug, Clone, Default)]
pub struct BatchRequest {
    pub batch_size: u32,
    pub provider: Option<String>,
    pub test: bool,
}

/// Outcome of one worker invocation.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub provider_stats: BTreeMap<String, ProviderStats>,
    pub total_cost: f64,
    pub processed: u32,
    pub succeeded: u32,
    pub failed: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    pub dry_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending: Option<i64>,
}

impl BatchReport {
    fn record_error(&mut self, message: String) {
        if self.errors.len() < MAX_REPORTED_ERRORS {
            self.errors.push(message);
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Job store error: {0}")]
    Store(#[from] StoreError),

    #[error("No active image provider available")]
    NoProvider,

    #[error("Provider '{0}' is not an active registered provider")]
    UnknownProvider(String),
}

/// Why a single job failed. Never aborts the batch.
#[derive(Debug, thiserror::Error)]
enum JobFailure {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    #[error("target update failed: {0}")]
    Target(StoreError),
}

/// Claims pending jobs and runs them against an image provider.
pub struct Worker {
    store: Arc<dyn JobStore>,
    targets: Arc<dyn TargetRepository>,
    registry: ProviderRegistry,
    storage: Option<Arc<ImageStorage>>,
    provider_timeout: Duration,
}

impl Worker {
    pub fn new(
        store: Arc<dyn JobStore>,
        targets: Arc<dyn TargetRepository>,
        registry: ProviderRegistry,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            store,
            targets,
            registry,
            storage: None,
            provider_timeout,
        }
    }

    pub fn with_storage(mut self, storage: Arc<ImageStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    fn resolve_provider(
        &self,
        requested: Option<&str>,
    ) -> Result<(ProviderConfig, Arc<dyn ImageProvider>), WorkerError> {
        match requested {
            Some(name) => self
                .registry
                .active(name)
                .ok_or_else(|| WorkerError::UnknownProvider(name.to_string())),
            None => self.registry.select().ok_or(WorkerError::NoProvider),
        }
    }

    /// Claim up to `batch_size` jobs and run each one.
    ///
    /// Provider rows are reloaded first, so activation changes apply to the
    /// next run. Store errors abort the invocation. Failures of individual
    /// jobs are recorded on the job and counted in the report.
    pub async fn run_batch(&self, request: BatchRequest) -> Result<BatchReport, WorkerError> {
        let mut report = BatchReport::default();
        self.registry.refresh_or_keep().await;

        if request.test && request.batch_size == 0 {
            let counts = self.store.counts_by_status().await?;
            report.dry_run = true;
            report.pending = Some(counts.get(JobStatus::Pending));
            report.selected_provider = self
                .resolve_provider(request.provider.as_deref())
                .ok()
                .map(|(config, _)| config.name);
            tracing::info!(
                pending = report.pending,
                provider = ?report.selected_provider,
                "Dry run, no jobs claimed"
            );
            return Ok(report);
        }

        let (config, provider) = self.resolve_provider(request.provider.as_deref())?;
        report.selected_provider = Some(config.name.clone());

        let jobs = self.store.claim_next(request.batch_size).await?;
        if jobs.is_empty() {
            tracing::debug!("No claimable jobs");
            return Ok(report);
        }
        tracing::info!(
            claimed = jobs.len(),
            provider = %config.name,
            test = request.test,
            "Claimed image jobs"
        );

        for job in jobs {
            self.run_job(&job, &config, provider.as_ref(), &mut report).await?;
        }

        tracing::info!(
            processed = report.processed,
            succeeded = report.succeeded,
            failed = report.failed,
            total_cost = report.total_cost,
            "Batch complete"
        );
        Ok(report)
    }

    async fn run_job(
        &self,
        job: &ImageJob,
        config: &ProviderConfig,
        provider: &dyn ImageProvider,
        report: &mut BatchReport,
    ) -> Result<(), WorkerError> {
        report.processed += 1;
        report.provider_stats.entry(config.name.clone()).or_default().attempted += 1;

        tracing::info!(
            job_id = %job.id,
            priority = job.priority,
            attempts = job.attempts,
            target = ?job.target.map(|t| t.to_string()),
            "Processing image job"
        );

        let start = Instant::now();
        let outcome = self.generate(job, provider).await;
        metrics::histogram!("image_generation_seconds").record(start.elapsed().as_secs_f64());

        let outcome = match outcome {
            Ok(image_url) => match self.write_back(job, &image_url).await {
                Ok(true) => Ok(image_url),
                Ok(false) => return Ok(()),
                Err(WriteBack::Store(e)) => return Err(e.into()),
                Err(WriteBack::Target(e)) => Err(JobFailure::Target(e)),
            },
            Err(failure) => Err(failure),
        };

        match outcome {
            Ok(image_url) => {
                let result = JobResult {
                    image_url,
                    provider: config.name.clone(),
                    cost: config.cost_per_image,
                };
                match self.store.complete(job.id, job.attempts, result).await {
                    Ok(()) => {
                        let stats = report.provider_stats.entry(config.name.clone()).or_default();
                        stats.succeeded += 1;
                        stats.cost += config.cost_per_image;
                        report.succeeded += 1;
                        report.total_cost += config.cost_per_image;
                        metrics::counter!("image_jobs_completed_total").increment(1);
                        tracing::info!(
                            job_id = %job.id,
                            provider = %config.name,
                            cost = config.cost_per_image,
                            duration_ms = start.elapsed().as_millis() as u64,
                            "Job completed"
                        );
                    }
                    Err(e) if e.is_conflict() => {
                        tracing::warn!(job_id = %job.id, error = %e, "Job resolved elsewhere, ignoring");
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Err(failure) => {
                let reason = failure.to_string();
                match self.store.fail(job.id, job.attempts, &reason).await {
                    Ok(()) => {
                        report.provider_stats.entry(config.name.clone()).or_default().failed += 1;
                        report.failed += 1;
                        report.record_error(format!("{}: {}", job.id, reason));
                        metrics::counter!("image_jobs_failed_total").increment(1);
                        tracing::warn!(job_id = %job.id, provider = %config.name, reason = %reason, "Job failed");
                    }
                    Err(e) if e.is_conflict() => {
                        tracing::warn!(
                            job_id = %job.id,
                            reason = %reason,
                            error = %e,
                            "Job resolved elsewhere, ignoring failure"
                        );
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(())
    }

    /// Provider call and upload for one job. Returns the image URL.
    async fn generate(&self, job: &ImageJob, provider: &dyn ImageProvider) -> Result<String, JobFailure> {
        let request = GenerationRequest::from(job);
        let image = tokio::time::timeout(self.provider_timeout, provider.generate(&request))
            .await
            .map_err(|_| ProviderError::Timeout)??;

        match image {
            GeneratedImage::Url(url) => Ok(url),
            GeneratedImage::Bytes { data, content_type } => {
                let storage = self.storage.as_ref().ok_or(StorageError::NotConfigured)?;
                tracing::debug!(job_id = %job.id, content_type = %content_type, "Storing generated bytes");
                Ok(storage.store_generated(job.id, &data).await?)
            }
        }
    }

    /// Write the URL to the target entity while this claim still holds the job.
    ///
    /// Returns `false` when the job was reclaimed or resolved elsewhere; the
    /// entity is left untouched.
    async fn write_back(&self, job: &ImageJob, image_url: &str) -> Result<bool, WriteBack> {
        match self.store.renew(job.id, job.attempts).await {
            Ok(()) => {}
            Err(e) if e.is_conflict() => {
                tracing::warn!(
                    job_id = %job.id,
                    attempt = job.attempts,
                    error = %e,
                    "Claim lost before write-back, discarding result"
                );
                return Ok(false);
            }
            Err(e) => return Err(WriteBack::Store(e)),
        }

        if let Some(target) = job.target {
            self.targets
                .set_image_url(target, image_url)
                .await
                .map_err(WriteBack::Target)?;
        }
        Ok(true)
    }
}

enum WriteBack {
    /// The job store itself failed.
    Store(StoreError),
    Target(StoreError),
}
