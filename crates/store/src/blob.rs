//! Blob storage provider trait and the S3 implementation.

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use chrono::Utc;

use crate::error::StoreError;

/// Uploads encoded images and returns the stored blob's URL.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload JPEG bytes under `key` in `bucket`, returning the blob
    /// URL on success.
    async fn put_jpeg(&self, bucket: &str, key: &str, bytes: &[u8]) -> Result<String, StoreError>;
}

/// S3-backed blob store.
#[derive(Clone)]
pub struct S3BlobStore {
    client: aws_sdk_s3::Client,
}

impl S3BlobStore {
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            client: aws_sdk_s3::Client::new(config),
        }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put_jpeg(&self, bucket: &str, key: &str, bytes: &[u8]) -> Result<String, StoreError> {
        tracing::debug!(bucket, key, size = bytes.len(), "Uploading JPEG blob");

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(bytes.to_vec()))
            .content_type("image/jpeg")
            .metadata("timestamp", Utc::now().to_rfc3339())
            .send()
            .await
            .map_err(|e| StoreError::Blob(e.to_string()))?;

        Ok(format!("s3://{bucket}/{key}"))
    }
}
