use s3::creds::Credentials;
use s3::{Bucket, Region};
use uuid::Uuid;

/// S3-compatible bucket holding generated images (Supabase Storage, R2).
pub struct ImageStorage {
    bucket: Box<Bucket>,
    public_base_url: String,
}

impl ImageStorage {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
        public_base_url: &str,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: "auto".to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials =
            Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?
            .with_path_style();

        Ok(Self {
            bucket,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Validate generated bytes and upload them, returning the public URL.
    pub async fn store_generated(
        &self,
        job_id: Uuid,
        data: &[u8],
    ) -> Result<String, StorageError> {
        let format = image::guess_format(data).map_err(|_| StorageError::NotAnImage)?;
        let extension = format.extensions_str().first().copied().unwrap_or("img");
        let key = object_key(job_id, extension);

        self.bucket
            .put_object_with_content_type(&key, data, format.to_mime_type())
            .await
            .map_err(StorageError::S3)?;

        tracing::debug!(job_id = %job_id, key = %key, bytes = data.len(), "Uploaded generated image");
        Ok(format!("{}/{}", self.public_base_url, key))
    }
}

fn object_key(job_id: Uuid, extension: &str) -> String {
    format!("generated/{job_id}.{extension}")
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Storage configuration error: {0}")]
    Config(String),

    #[error("Provider output is not a supported image")]
    NotAnImage,

    #[error("Provider returned image bytes but no storage is configured")]
    NotConfigured,
}
