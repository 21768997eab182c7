use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::job::{ImageJob, JobResult, JobStatus, NewJob, ProviderSpend, StatusCounts};
use crate::models::target::TargetRef;

/// Persistent store of image-generation jobs.
///
/// All coordination between producers and workers goes through these
/// operations. `claim_next` is the only operation that hands out work and
/// must never give the same row to two callers.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new pending job.
    ///
    /// A target has at most one unresolved job; enqueueing a second one
    /// returns `AlreadyQueued`. Untargeted jobs are always inserted.
    async fn enqueue(&self, job: NewJob) -> Result<Uuid, StoreError>;

    /// Insert a pending job unless an unresolved job already covers its
    /// target (or its prompt, for untargeted jobs).
    async fn enqueue_unique(&self, job: NewJob) -> Result<Option<Uuid>, StoreError>;

    /// Atomically move up to `batch_size` claimable jobs to `processing`.
    ///
    /// Claimable: pending, or processing with a claim older than the store's
    /// claim timeout. Returned highest priority first, oldest first on ties.
    async fn claim_next(&self, batch_size: u32) -> Result<Vec<ImageJob>, StoreError>;

    /// Confirm that claim `attempt` still holds the job and restart its
    /// claim clock.
    ///
    /// A worker calls this before touching the target entity. `LeaseLost`
    /// means another worker reclaimed the job, `Conflict` that it is resolved.
    async fn renew(&self, job_id: Uuid, attempt: i32) -> Result<(), StoreError>;

    /// Resolve a job held by claim `attempt` as completed.
    async fn complete(&self, job_id: Uuid, attempt: i32, result: JobResult)
        -> Result<(), StoreError>;

    /// Resolve a job held by claim `attempt` as failed.
    async fn fail(&self, job_id: Uuid, attempt: i32, reason: &str) -> Result<(), StoreError>;

    async fn counts_by_status(&self) -> Result<StatusCounts, StoreError>;

    async fn get(&self, job_id: Uuid) -> Result<Option<ImageJob>, StoreError>;

    /// Re-enqueue a failed job as a new pending row.
    async fn retry(&self, job_id: Uuid) -> Result<Uuid, StoreError>;

    /// Recorded spend per provider over completed jobs.
    async fn cost_summary(&self) -> Result<Vec<ProviderSpend>, StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Job {job_id} is already {status}")]
    Conflict { job_id: Uuid, status: JobStatus },

    #[error("Job {job_id} was reclaimed after attempt {attempt}")]
    LeaseLost { job_id: Uuid, attempt: i32 },

    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error("Target {0} not found")]
    TargetNotFound(TargetRef),

    #[error("An unresolved job already covers {0}")]
    AlreadyQueued(String),

    #[error("Invalid stored value: {0}")]
    Decode(String),
}

impl StoreError {
    /// The job is no longer this caller's to resolve.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. } | StoreError::LeaseLost { .. })
    }
}

/// Order in which claimable jobs are handed out.
pub fn claim_order(a: &ImageJob, b: &ImageJob) -> std::cmp::Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.created_at.cmp(&b.created_at))
}

/// In-process job store with the same contract as the Postgres store.
///
/// A single mutex serializes every operation, which gives `claim_next` the
/// same all-or-nothing behavior as the conditional update in Postgres.
pub struct MemoryJobStore {
    claim_timeout: chrono::Duration,
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    jobs: HashMap<Uuid, ImageJob>,
    // insertion sequence, breaks created_at ties
    seq: HashMap<Uuid, u64>,
    next_seq: u64,
}

impl MemoryInner {
    fn insert(&mut self, job: NewJob, retry_of: Option<Uuid>) -> Uuid {
        let id = Uuid::new_v4();
        self.jobs.insert(
            id,
            ImageJob {
                id,
                target: job.target,
                prompt: job.prompt,
                style_preset: job.style_preset,
                negative_prompt: job.negative_prompt,
                priority: job.priority,
                status: JobStatus::Pending,
                attempts: 0,
                provider: None,
                cost: None,
                image_url: None,
                error: None,
                retry_of,
                created_at: Utc::now(),
                claimed_at: None,
                completed_at: None,
            },
        );
        self.seq.insert(id, self.next_seq);
        self.next_seq += 1;
        id
    }

    /// The job when claim `attempt` still holds it.
    fn held(&mut self, job_id: Uuid, attempt: i32) -> Result<&mut ImageJob, StoreError> {
        let job = self.jobs.get_mut(&job_id).ok_or(StoreError::NotFound(job_id))?;
        if job.status != JobStatus::Processing {
            return Err(StoreError::Conflict {
                job_id,
                status: job.status,
            });
        }
        if job.attempts != attempt {
            return Err(StoreError::LeaseLost { job_id, attempt });
        }
        Ok(job)
    }

    fn finish(
        &mut self,
        job_id: Uuid,
        attempt: i32,
        next: JobStatus,
    ) -> Result<&mut ImageJob, StoreError> {
        let job = self.held(job_id, attempt)?;
        if !job.status.can_transition_to(next) {
            return Err(StoreError::Conflict {
                job_id,
                status: job.status,
            });
        }
        job.status = next;
        job.completed_at = Some(Utc::now());
        Ok(job)
    }
}

impl MemoryJobStore {
    pub fn new(claim_timeout: std::time::Duration) -> Self {
        Self {
            claim_timeout: chrono::Duration::from_std(claim_timeout)
                .unwrap_or(chrono::Duration::MAX),
            inner: Mutex::new(MemoryInner::default()),
        }
    }

    /// All jobs, in claim order.
    pub async fn snapshot(&self) -> Vec<ImageJob> {
        let inner = self.inner.lock().await;
        let mut jobs: Vec<ImageJob> = inner.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| claim_order(a, b).then_with(|| inner.seq[&a.id].cmp(&inner.seq[&b.id])));
        jobs
    }

    fn is_claimable(&self, job: &ImageJob, now: DateTime<Utc>) -> bool {
        match job.status {
            JobStatus::Pending => true,
            JobStatus::Processing => match (job.claimed_at, now.checked_sub_signed(self.claim_timeout)) {
                (Some(claimed), Some(cutoff)) => claimed < cutoff,
                // a processing row without a claim time is treated as stale
                (None, _) => true,
                (Some(_), None) => false,
            },
            _ => false,
        }
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn enqueue(&self, job: NewJob) -> Result<Uuid, StoreError> {
        let mut inner = self.inner.lock().await;
        // at most one unresolved job per target
        if job.target.is_some() && inner.jobs.values().any(|existing| job.is_covered_by(existing)) {
            return Err(StoreError::AlreadyQueued(job.subject()));
        }
        Ok(inner.insert(job, None))
    }

    async fn enqueue_unique(&self, job: NewJob) -> Result<Option<Uuid>, StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.jobs.values().any(|existing| job.is_covered_by(existing)) {
            return Ok(None);
        }
        Ok(Some(inner.insert(job, None)))
    }

    async fn claim_next(&self, batch_size: u32) -> Result<Vec<ImageJob>, StoreError> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();

        let mut candidates: Vec<(i32, DateTime<Utc>, u64, Uuid)> = inner
            .jobs
            .values()
            .filter(|job| self.is_claimable(job, now))
            .map(|job| (job.priority, job.created_at, inner.seq[&job.id], job.id))
            .collect();
        candidates.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));
        candidates.truncate(batch_size as usize);

        let mut claimed = Vec::with_capacity(candidates.len());
        for (_, _, _, id) in candidates {
            if let Some(job) = inner.jobs.get_mut(&id) {
                job.status = JobStatus::Processing;
                job.claimed_at = Some(now);
                job.attempts += 1;
                claimed.push(job.clone());
            }
        }
        Ok(claimed)
    }

    async fn renew(&self, job_id: Uuid, attempt: i32) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let job = inner.held(job_id, attempt)?;
        job.claimed_at = Some(Utc::now());
        Ok(())
    }

    async fn complete(
        &self,
        job_id: Uuid,
        attempt: i32,
        result: JobResult,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let job = inner.finish(job_id, attempt, JobStatus::Completed)?;
        job.image_url = Some(result.image_url);
        job.provider = Some(result.provider);
        job.cost = Some(result.cost);
        Ok(())
    }

    async fn fail(&self, job_id: Uuid, attempt: i32, reason: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let job = inner.finish(job_id, attempt, JobStatus::Failed)?;
        job.error = Some(reason.to_string());
        Ok(())
    }

    async fn counts_by_status(&self) -> Result<StatusCounts, StoreError> {
        let inner = self.inner.lock().await;
        let mut counts = StatusCounts::zeroed();
        for job in inner.jobs.values() {
            counts.add(job.status, 1);
        }
        Ok(counts)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<ImageJob>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.jobs.get(&job_id).cloned())
    }

    async fn retry(&self, job_id: Uuid) -> Result<Uuid, StoreError> {
        let mut inner = self.inner.lock().await;
        let job = inner.jobs.get(&job_id).ok_or(StoreError::NotFound(job_id))?;
        if job.status != JobStatus::Failed {
            return Err(StoreError::Conflict {
                job_id,
                status: job.status,
            });
        }
        let again = NewJob {
            target: job.target,
            prompt: job.prompt.clone(),
            style_preset: job.style_preset.clone(),
            negative_prompt: job.negative_prompt.clone(),
            priority: job.priority,
        };
        if inner.jobs.values().any(|existing| again.is_covered_by(existing)) {
            return Err(StoreError::AlreadyQueued(again.subject()));
        }
        Ok(inner.insert(again, Some(job_id)))
    }

    async fn cost_summary(&self) -> Result<Vec<ProviderSpend>, StoreError> {
        let inner = self.inner.lock().await;
        let mut by_provider: HashMap<&str, ProviderSpend> = HashMap::new();
        for job in inner.jobs.values().filter(|j| j.status == JobStatus::Completed) {
            let Some(provider) = job.provider.as_deref() else {
                continue;
            };
            let spend = by_provider.entry(provider).or_insert_with(|| ProviderSpend {
                provider: provider.to_string(),
                ..Default::default()
            });
            spend.completed += 1;
            spend.total_cost += job.cost.unwrap_or(0.0);
        }
        let mut spend: Vec<ProviderSpend> = by_provider.into_values().collect();
        spend.sort_by(|a, b| a.provider.cmp(&b.provider));
        Ok(spend)
    }
}
