use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::job::{ImageJob, JobResult, JobStatus, NewJob, ProviderSpend, StatusCounts};
use crate::models::target::{TargetKind, TargetRef};
use crate::services::job_store::{claim_order, JobStore, StoreError};

const JOB_COLUMNS: &str = r#"
    id, target_kind, target_id, prompt, style_preset, negative_prompt, priority,
    status, attempts, provider, cost, image_url, error, retry_of,
    created_at, claimed_at, completed_at
"#;

/// Postgres-backed job store over `image_generation_jobs`.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
    claim_timeout: Duration,
}

impl PgJobStore {
    pub fn new(pool: PgPool, claim_timeout: Duration) -> Self {
        Self {
            pool,
            claim_timeout,
        }
    }

    /// Current status and attempt count of `job_id`.
    async fn claim_state(&self, job_id: Uuid) -> Result<(JobStatus, i32), StoreError> {
        let row = sqlx::query("SELECT status, attempts FROM image_generation_jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound(job_id))?;
        let status: String = row.try_get("status")?;
        Ok((parse_status(&status)?, row.try_get("attempts")?))
    }

    /// Explain why a conditional update on `job_id` matched no row.
    async fn conflict_or_missing(&self, job_id: Uuid) -> StoreError {
        match self.claim_state(job_id).await {
            Ok((status, _)) => StoreError::Conflict { job_id, status },
            Err(e) => e,
        }
    }

    /// Same as `conflict_or_missing`, for updates held by claim `attempt`.
    async fn lost_claim(&self, job_id: Uuid, attempt: i32) -> StoreError {
        match self.claim_state(job_id).await {
            Ok((JobStatus::Processing, current)) if current != attempt => {
                StoreError::LeaseLost { job_id, attempt }
            }
            Ok((status, _)) => StoreError::Conflict { job_id, status },
            Err(e) => e,
        }
    }
}

fn parse_status(value: &str) -> Result<JobStatus, StoreError> {
    JobStatus::from_str(value).map_err(|_| StoreError::Decode(format!("job status '{value}'")))
}

fn job_from_row(row: &PgRow) -> Result<ImageJob, StoreError> {
    let status: String = row.try_get("status")?;
    let target_kind: Option<String> = row.try_get("target_kind")?;
    let target_id: Option<i64> = row.try_get("target_id")?;

    let target = match (target_kind, target_id) {
        (Some(kind), Some(id)) => Some(TargetRef {
            kind: TargetKind::from_str(&kind)
                .map_err(|_| StoreError::Decode(format!("target kind '{kind}'")))?,
            id,
        }),
        _ => None,
    };

    Ok(ImageJob {
        id: row.try_get("id")?,
        target,
        prompt: row.try_get("prompt")?,
        style_preset: row.try_get("style_preset")?,
        negative_prompt: row.try_get("negative_prompt")?,
        priority: row.try_get("priority")?,
        status: parse_status(&status)?,
        attempts: row.try_get("attempts")?,
        provider: row.try_get("provider")?,
        cost: row.try_get("cost")?,
        image_url: row.try_get("image_url")?,
        error: row.try_get("error")?,
        retry_of: row.try_get("retry_of")?,
        created_at: row.try_get("created_at")?,
        claimed_at: row.try_get("claimed_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn enqueue(&self, job: NewJob) -> Result<Uuid, StoreError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO image_generation_jobs
                (target_kind, target_id, prompt, style_preset, negative_prompt, priority)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(job.target.map(|t| t.kind.as_str()))
        .bind(job.target.map(|t| t.id))
        .bind(&job.prompt)
        .bind(&job.style_preset)
        .bind(&job.negative_prompt)
        .bind(job.priority)
        .fetch_one(&self.pool)
        .await;

        match inserted {
            Ok(row) => Ok(row.try_get("id")?),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::AlreadyQueued(job.subject()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn enqueue_unique(&self, job: NewJob) -> Result<Option<Uuid>, StoreError> {
        // The partial unique index on unresolved targets closes the race the
        // NOT EXISTS check leaves open.
        let row = sqlx::query(
            r#"
            INSERT INTO image_generation_jobs
                (target_kind, target_id, prompt, style_preset, negative_prompt, priority)
            SELECT $1::text, $2::bigint, $3::text, $4::text, $5::text, $6::int4
            WHERE NOT EXISTS (
                SELECT 1 FROM image_generation_jobs
                WHERE status IN ('pending', 'processing')
                  AND (
                      ($2::bigint IS NOT NULL AND target_kind = $1::text AND target_id = $2::bigint)
                      OR ($2::bigint IS NULL AND target_id IS NULL AND prompt = $3::text)
                  )
            )
            ON CONFLICT DO NOTHING
            RETURNING id
            "#,
        )
        .bind(job.target.map(|t| t.kind.as_str()))
        .bind(job.target.map(|t| t.id))
        .bind(&job.prompt)
        .bind(&job.style_preset)
        .bind(&job.negative_prompt)
        .bind(job.priority)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(row.try_get("id")?)),
            None => Ok(None),
        }
    }

    async fn claim_next(&self, batch_size: u32) -> Result<Vec<ImageJob>, StoreError> {
        let query = format!(
            r#"
            UPDATE image_generation_jobs AS j
            SET status = 'processing',
                claimed_at = NOW(),
                attempts = j.attempts + 1
            FROM (
                SELECT id
                FROM image_generation_jobs
                WHERE status = 'pending'
                   OR (status = 'processing'
                       AND (claimed_at IS NULL
                            OR claimed_at < NOW() - make_interval(secs => $2::float8)))
                ORDER BY priority DESC, created_at ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            ) AS next
            WHERE j.id = next.id
            RETURNING {}
            "#,
            JOB_COLUMNS
                .split(',')
                .map(|c| format!("j.{}", c.trim()))
                .collect::<Vec<_>>()
                .join(", ")
        );

        let rows = sqlx::query(&query)
            .bind(i64::from(batch_size))
            .bind(self.claim_timeout.as_secs_f64())
            .fetch_all(&self.pool)
            .await?;

        let mut jobs = rows
            .iter()
            .map(job_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        // RETURNING does not preserve the subquery order
        jobs.sort_by(claim_order);
        Ok(jobs)
    }

    async fn renew(&self, job_id: Uuid, attempt: i32) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE image_generation_jobs
            SET claimed_at = NOW()
            WHERE id = $1 AND status = 'processing' AND attempts = $2
            "#,
        )
        .bind(job_id)
        .bind(attempt)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(self.lost_claim(job_id, attempt).await);
        }
        Ok(())
    }

    async fn complete(
        &self,
        job_id: Uuid,
        attempt: i32,
        result: JobResult,
    ) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE image_generation_jobs
            SET status = 'completed',
                image_url = $3,
                provider = $4,
                cost = $5,
                completed_at = NOW()
            WHERE id = $1 AND status = 'processing' AND attempts = $2
            "#,
        )
        .bind(job_id)
        .bind(attempt)
        .bind(&result.image_url)
        .bind(&result.provider)
        .bind(result.cost)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(self.lost_claim(job_id, attempt).await);
        }
        Ok(())
    }

    async fn fail(&self, job_id: Uuid, attempt: i32, reason: &str) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE image_generation_jobs
            SET status = 'failed',
                error = $3,
                completed_at = NOW()
            WHERE id = $1 AND status = 'processing' AND attempts = $2
            "#,
        )
        .bind(job_id)
        .bind(attempt)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(self.lost_claim(job_id, attempt).await);
        }
        Ok(())
    }

    async fn counts_by_status(&self) -> Result<StatusCounts, StoreError> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS count FROM image_generation_jobs GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts = StatusCounts::zeroed();
        for row in rows {
            let status: String = row.try_get("status")?;
            counts.add(parse_status(&status)?, row.try_get("count")?);
        }
        Ok(counts)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<ImageJob>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM image_generation_jobs WHERE id = $1"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn retry(&self, job_id: Uuid) -> Result<Uuid, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO image_generation_jobs
                (target_kind, target_id, prompt, style_preset, negative_prompt, priority, retry_of)
            SELECT f.target_kind, f.target_id, f.prompt, f.style_preset, f.negative_prompt,
                   f.priority, f.id
            FROM image_generation_jobs AS f
            WHERE f.id = $1 AND f.status = 'failed'
              AND NOT EXISTS (
                  SELECT 1 FROM image_generation_jobs AS o
                  WHERE o.status IN ('pending', 'processing')
                    AND (
                        (f.target_id IS NOT NULL
                         AND o.target_kind = f.target_kind AND o.target_id = f.target_id)
                        OR (f.target_id IS NULL AND o.target_id IS NULL AND o.prompt = f.prompt)
                    )
              )
            ON CONFLICT DO NOTHING
            RETURNING id
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(row.try_get("id")?),
            None => match self.conflict_or_missing(job_id).await {
                StoreError::Conflict {
                    status: JobStatus::Failed,
                    ..
                } => Err(StoreError::AlreadyQueued(format!("the subject of job {job_id}"))),
                other => Err(other),
            },
        }
    }

    async fn cost_summary(&self) -> Result<Vec<ProviderSpend>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT provider,
                   COUNT(*) AS completed,
                   COALESCE(SUM(cost), 0)::float8 AS total_cost
            FROM image_generation_jobs
            WHERE status = 'completed' AND provider IS NOT NULL
            GROUP BY provider
            ORDER BY provider
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(ProviderSpend {
                    provider: row.try_get("provider")?,
                    completed: row.try_get("completed")?,
                    total_cost: row.try_get("total_cost")?,
                })
            })
            .collect()
    }
}
