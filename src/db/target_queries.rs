use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::models::target::{ImageCoverage, TargetEntity, TargetKind, TargetRef, PLACEHOLDER_MARKER};
use crate::services::job_store::StoreError;
use crate::services::targets::TargetRepository;

/// Catalog tables in Postgres.
#[derive(Clone)]
pub struct PgTargetRepository {
    pool: PgPool,
}

impl PgTargetRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// Same rule as `target::needs_image`, in SQL.
const MISSING_IMAGE: &str =
    "(image_url IS NULL OR btrim(image_url) = '' OR image_url ILIKE '%' || $1::text || '%')";

#[async_trait]
impl TargetRepository for PgTargetRepository {
    async fn missing_images(&self, kind: TargetKind) -> Result<Vec<TargetEntity>, StoreError> {
        // Table names come from a fixed match on the kind, never from input.
        let query = format!(
            "SELECT id, name, description, image_url FROM {} WHERE {} ORDER BY id",
            kind.table(),
            MISSING_IMAGE
        );

        let rows = sqlx::query(&query)
            .bind(PLACEHOLDER_MARKER)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                Ok(TargetEntity {
                    kind,
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    description: row.try_get("description")?,
                    image_url: row.try_get("image_url")?,
                })
            })
            .collect()
    }

    async fn set_image_url(&self, target: TargetRef, image_url: &str) -> Result<(), StoreError> {
        let query = format!(
            "UPDATE {} SET image_url = $1, updated_at = NOW() WHERE id = $2",
            target.kind.table()
        );

        let updated = sqlx::query(&query)
            .bind(image_url)
            .bind(target.id)
            .execute(&self.pool)
            .await?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::TargetNotFound(target));
        }
        Ok(())
    }

    async fn coverage(&self, kind: TargetKind) -> Result<ImageCoverage, StoreError> {
        let query = format!(
            "SELECT COUNT(*) AS total, COUNT(*) FILTER (WHERE NOT {}) AS with_image FROM {}",
            MISSING_IMAGE,
            kind.table()
        );

        let row = sqlx::query(&query)
            .bind(PLACEHOLDER_MARKER)
            .fetch_one(&self.pool)
            .await?;

        Ok(ImageCoverage {
            kind,
            total: row.try_get("total")?,
            with_image: row.try_get("with_image")?,
        })
    }
}
