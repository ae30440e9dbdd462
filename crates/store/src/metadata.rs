//! Metadata store provider trait and the DynamoDB implementation.
//!
//! Three tables: jobs (lifecycle commands from the dashboard), frame
//! detections (one row per flush) and impurity crops (one row per
//! qualifying detection, TTL-expired by the store).

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use chrono::Utc;

use sorter_core::{CropRecord, FrameRecord, Job, JobStatus};

use crate::error::StoreError;

/// Structured metadata persistence.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Write one immutable frame record.
    async fn put_frame(&self, record: &FrameRecord) -> Result<(), StoreError>;

    /// Write one crop record.
    async fn put_crop(&self, record: &CropRecord) -> Result<(), StoreError>;

    /// All jobs currently in `pending` status.
    async fn pending_jobs(&self) -> Result<Vec<Job>, StoreError>;

    /// Transition a job's status, attaching a human-readable message.
    async fn update_job_status(
        &self,
        job_id: &str,
        user_id: &str,
        status: JobStatus,
        message: &str,
    ) -> Result<(), StoreError>;
}

/// Table names for the DynamoDB store.
#[derive(Debug, Clone)]
pub struct MetadataTables {
    pub jobs: String,
    pub frames: String,
    pub impurities: String,
}

/// DynamoDB-backed metadata store.
#[derive(Clone)]
pub struct DynamoMetadataStore {
    client: aws_sdk_dynamodb::Client,
    tables: MetadataTables,
}

impl DynamoMetadataStore {
    pub fn new(config: &aws_config::SdkConfig, tables: MetadataTables) -> Self {
        Self {
            client: aws_sdk_dynamodb::Client::new(config),
            tables,
        }
    }
}

fn s(value: impl Into<String>) -> AttributeValue {
    AttributeValue::S(value.into())
}

fn n(value: impl ToString) -> AttributeValue {
    AttributeValue::N(value.to_string())
}

/// Extract a required string attribute, or `None` if absent/non-string.
fn get_s(item: &HashMap<String, AttributeValue>, name: &str) -> Option<String> {
    item.get(name).and_then(|v| v.as_s().ok()).cloned()
}

#[async_trait]
impl MetadataStore for DynamoMetadataStore {
    async fn put_frame(&self, record: &FrameRecord) -> Result<(), StoreError> {
        let detections: Vec<AttributeValue> = record
            .detections
            .iter()
            .map(|d| {
                let mut m = HashMap::new();
                m.insert("class".to_string(), n(d.class));
                m.insert("x".to_string(), n(d.x));
                m.insert("y".to_string(), n(d.y));
                m.insert("w".to_string(), n(d.w));
                m.insert("h".to_string(), n(d.h));
                m.insert("label".to_string(), s(&d.label));
                m.insert("confidence".to_string(), n(d.confidence));
                AttributeValue::M(m)
            })
            .collect();

        self.client
            .put_item()
            .table_name(&self.tables.frames)
            .item("frameId", s(record.frame_id.to_string()))
            .item("userId", s(&record.user_id))
            .item("timestamp", n(record.timestamp_ms))
            .item("detectionCount", n(record.detection_count))
            .item("s3UrlWithBbox", s(&record.annotated_url))
            .item("s3UrlWithoutBbox", s(&record.raw_url))
            .item("s3LabelsPath", s(&record.labels_path))
            .item("labelingStatus", s("auto"))
            .item("detections", AttributeValue::L(detections))
            .item("modelUsed", s(&record.model_used))
            .send()
            .await
            .map_err(|e| StoreError::Metadata(e.to_string()))?;
        Ok(())
    }

    async fn put_crop(&self, record: &CropRecord) -> Result<(), StoreError> {
        let bbox_json = serde_json::to_string(&record.bbox)
            .map_err(|e| StoreError::Metadata(e.to_string()))?;

        self.client
            .put_item()
            .table_name(&self.tables.impurities)
            .item("impurityId", s(record.impurity_id.to_string()))
            .item("userId", s(&record.user_id))
            .item("timestamp", n(record.timestamp_ms))
            .item("s3Url", s(&record.blob_url))
            .item("label", s(&record.label))
            .item("confidence", n(record.confidence))
            .item("bbox", s(bbox_json))
            .item("ttl", n(record.ttl_epoch_secs))
            .send()
            .await
            .map_err(|e| StoreError::Metadata(e.to_string()))?;
        Ok(())
    }

    async fn pending_jobs(&self) -> Result<Vec<Job>, StoreError> {
        let resp = self
            .client
            .scan()
            .table_name(&self.tables.jobs)
            .filter_expression("#s = :pending")
            .expression_attribute_names("#s", "status")
            .expression_attribute_values(":pending", s("pending"))
            .send()
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let mut jobs = Vec::new();
        for item in resp.items() {
            let (Some(job_id), Some(command)) = (get_s(item, "jobId"), get_s(item, "command"))
            else {
                tracing::warn!("Skipping malformed job row (missing jobId or command)");
                continue;
            };
            jobs.push(Job {
                job_id,
                user_id: get_s(item, "userId").unwrap_or_else(|| "web-user".to_string()),
                command,
                model_url: get_s(item, "modelUrl"),
            });
        }
        Ok(jobs)
    }

    async fn update_job_status(
        &self,
        job_id: &str,
        user_id: &str,
        status: JobStatus,
        message: &str,
    ) -> Result<(), StoreError> {
        self.client
            .update_item()
            .table_name(&self.tables.jobs)
            .key("jobId", s(job_id))
            .key("userId", s(user_id))
            .update_expression("SET #s = :status, #m = :msg, #ts = :timestamp")
            .expression_attribute_names("#s", "status")
            .expression_attribute_names("#m", "message")
            .expression_attribute_names("#ts", "timestamp")
            .expression_attribute_values(":status", s(status.as_str()))
            .expression_attribute_values(":msg", s(message))
            .expression_attribute_values(":timestamp", n(Utc::now().timestamp_millis()))
            .send()
            .await
            .map_err(|e| StoreError::Metadata(e.to_string()))?;

        tracing::info!(job_id, status = %status, message, "Job status updated");
        Ok(())
    }
}
