//! Upload coordination: one flush cycle at a time.
//!
//! The reentrancy gate is a `try_lock` on an async mutex, claimed
//! BEFORE the caller drains the buffer: a tick that finds the gate
//! held leaves its events queued, so nothing is lost to a collision.
//! The guard drops on every exit path, so the gate can never stay
//! stuck after a failure.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use sorter_core::{normalize_detections, DetectionEvent, FrameRecord};
use sorter_store::{keys, BlobStore, MetadataStore};

use crate::cache::FrameCache;
use crate::crops::CropExtractor;

/// Identity and destinations for one pipeline instance.
#[derive(Debug, Clone)]
pub struct UploaderConfig {
    pub user_id: String,
    pub raw_bucket: String,
    pub annotated_bucket: String,
    pub model_tag: String,
}

pub struct UploadCoordinator {
    blob: Arc<dyn BlobStore>,
    meta: Arc<dyn MetadataStore>,
    cache: Arc<FrameCache>,
    crops: CropExtractor,
    config: UploaderConfig,
    gate: Arc<tokio::sync::Mutex<()>>,
}

impl UploadCoordinator {
    pub fn new(
        blob: Arc<dyn BlobStore>,
        meta: Arc<dyn MetadataStore>,
        cache: Arc<FrameCache>,
        crops: CropExtractor,
        config: UploaderConfig,
    ) -> Self {
        Self {
            blob,
            meta,
            cache,
            crops,
            config,
            gate: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Claim the upload gate, or `None` while a flush is in flight.
    ///
    /// Callers that drain a buffer must claim first and drain second;
    /// the guard drops on every path, releasing the gate.
    pub fn try_begin(&self) -> Option<OwnedMutexGuard<()>> {
        Arc::clone(&self.gate).try_lock_owned().ok()
    }

    /// Upload one grouping window as a single frame record.
    ///
    /// Returns `true` only when the final metadata write succeeded.
    /// Empty groups and gate collisions return `false` without
    /// contacting any store.
    pub async fn flush(&self, group: Vec<DetectionEvent>) -> bool {
        if group.is_empty() {
            tracing::debug!("Flush called with empty group, nothing to do");
            return false;
        }

        let Some(guard) = self.try_begin() else {
            tracing::debug!("Upload already in flight, skipping this flush");
            return false;
        };
        self.flush_held(guard, group).await
    }

    /// Upload one grouping window under an already-claimed gate.
    pub async fn flush_held(&self, _guard: OwnedMutexGuard<()>, group: Vec<DetectionEvent>) -> bool {
        if group.is_empty() {
            tracing::debug!("Flush called with empty group, nothing to do");
            return false;
        }

        let timestamp_ms = Utc::now().timestamp_millis();

        // Prefer the imagery snapshotted with the first detection
        // (synchronized at capture time); fall back to the cache.
        let first = &group[0];
        let raw = first.raw_frame.clone().or_else(|| self.cache.raw());
        let annotated = first
            .annotated_frame
            .clone()
            .or_else(|| self.cache.annotated());

        let (Some(raw), Some(annotated)) = (raw, annotated) else {
            tracing::error!(
                detections = group.len(),
                "No frame available for flush, discarding group"
            );
            return false;
        };

        let raw_key = keys::raw_frame_key(&self.config.user_id, timestamp_ms);
        let raw_url = match self
            .blob
            .put_jpeg(&self.config.raw_bucket, &raw_key, raw.as_bytes())
            .await
        {
            Ok(url) => url,
            Err(e) => {
                tracing::error!(error = %e, "Raw frame upload failed, aborting flush");
                return false;
            }
        };

        let annotated_key = keys::annotated_frame_key(&self.config.user_id, timestamp_ms);
        let annotated_url = match self
            .blob
            .put_jpeg(
                &self.config.annotated_bucket,
                &annotated_key,
                annotated.as_bytes(),
            )
            .await
        {
            Ok(url) => url,
            Err(e) => {
                tracing::error!(error = %e, "Annotated frame upload failed, aborting flush");
                return false;
            }
        };

        // Crops are independent side effects: written before the frame
        // record and not rolled back if it fails below.
        let crop_records = self.crops.extract(&raw, &group, timestamp_ms).await;

        let detections = normalize_detections(&group, raw.width(), raw.height());

        let record = FrameRecord {
            frame_id: Uuid::new_v4(),
            user_id: self.config.user_id.clone(),
            timestamp_ms,
            detection_count: group.len(),
            annotated_url,
            raw_url: raw_url.clone(),
            labels_path: keys::labels_path(&raw_url),
            detections,
            model_used: self.config.model_tag.clone(),
        };

        match self.meta.put_frame(&record).await {
            Ok(()) => {
                tracing::info!(
                    frame_id = %record.frame_id,
                    detections = record.detection_count,
                    crops = crop_records.len(),
                    "Frame record saved"
                );
                true
            }
            Err(e) => {
                tracing::error!(frame_id = %record.frame_id, error = %e, "Frame record write failed");
                false
            }
        }
    }
}
