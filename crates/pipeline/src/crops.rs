//! Crop extraction: padded sub-images per detection.
//!
//! Crops are cut from the raw frame (no boxes drawn on them), padded,
//! clamped to the frame and uploaded one by one. Failures are
//! contained per crop; one bad region never aborts the rest.

use std::sync::Arc;

use chrono::Utc;
use image::codecs::jpeg::JpegEncoder;
use uuid::Uuid;

use sorter_core::{BoundingBox, CropRecord, DetectionEvent, FrameImage};
use sorter_store::{keys, BlobStore, MetadataStore};

/// Padding added on every side of a detection's bbox.
const CROP_PADDING_PX: i64 = 20;

/// Minimum width/height of the clamped region; anything smaller is
/// useless for review and is skipped.
const MIN_CROP_SIDE_PX: i64 = 10;

/// Crop metadata rows expire after this many days.
const CROP_TTL_DAYS: i64 = 30;

const JPEG_QUALITY: u8 = 90;

/// Pad `bbox` and clamp it to the frame, returning `(x, y, w, h)` or
/// `None` when the clamped region is below the minimum size.
fn padded_region(bbox: &BoundingBox, frame_w: u32, frame_h: u32) -> Option<(u32, u32, u32, u32)> {
    let x1 = (bbox.x as i64 - CROP_PADDING_PX).max(0);
    let y1 = (bbox.y as i64 - CROP_PADDING_PX).max(0);
    let x2 = (bbox.x as i64 + bbox.width as i64 + CROP_PADDING_PX).min(frame_w as i64);
    let y2 = (bbox.y as i64 + bbox.height as i64 + CROP_PADDING_PX).min(frame_h as i64);

    let w = x2 - x1;
    let h = y2 - y1;
    if w < MIN_CROP_SIDE_PX || h < MIN_CROP_SIDE_PX {
        return None;
    }
    Some((x1 as u32, y1 as u32, w as u32, h as u32))
}

/// Derives, uploads and records per-detection crops.
pub struct CropExtractor {
    blob: Arc<dyn BlobStore>,
    meta: Arc<dyn MetadataStore>,
    bucket: String,
    user_id: String,
}

impl CropExtractor {
    pub fn new(
        blob: Arc<dyn BlobStore>,
        meta: Arc<dyn MetadataStore>,
        bucket: String,
        user_id: String,
    ) -> Self {
        Self {
            blob,
            meta,
            bucket,
            user_id,
        }
    }

    /// Extract and upload one crop per qualifying detection, in list
    /// order. Returns the records of every successfully uploaded crop;
    /// a metadata write failure is logged but does not remove the crop
    /// from the result (the blob exists either way).
    pub async fn extract(
        &self,
        raw_frame: &FrameImage,
        detections: &[DetectionEvent],
        timestamp_ms: i64,
    ) -> Vec<CropRecord> {
        let decoded = match image::load_from_memory(raw_frame.as_bytes()) {
            Ok(img) => img,
            Err(e) => {
                tracing::warn!(error = %e, "Raw frame undecodable, skipping crop extraction");
                return Vec::new();
            }
        };

        let frame_w = decoded.width();
        let frame_h = decoded.height();
        let mut records = Vec::new();

        for (index, detection) in detections.iter().enumerate() {
            let Some((x, y, w, h)) = padded_region(&detection.bbox, frame_w, frame_h) else {
                tracing::debug!(index, bbox = ?detection.bbox, "Cropped region too small, skipping");
                continue;
            };

            let crop = decoded.crop_imm(x, y, w, h);
            let mut jpeg = Vec::new();
            let encoder = JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY);
            if let Err(e) = crop.write_with_encoder(encoder) {
                tracing::warn!(index, error = %e, "Failed to encode crop");
                continue;
            }

            let key = keys::crop_key(&self.user_id, timestamp_ms, index);
            let blob_url = match self.blob.put_jpeg(&self.bucket, &key, &jpeg).await {
                Ok(url) => url,
                Err(e) => {
                    tracing::warn!(index, error = %e, "Crop upload failed");
                    continue;
                }
            };

            let record = CropRecord {
                impurity_id: Uuid::new_v4(),
                user_id: self.user_id.clone(),
                timestamp_ms,
                blob_url,
                label: detection.label.clone(),
                confidence: detection.confidence,
                bbox: detection.bbox,
                ttl_epoch_secs: Utc::now().timestamp() + CROP_TTL_DAYS * 24 * 60 * 60,
            };

            if let Err(e) = self.meta.put_crop(&record).await {
                tracing::warn!(index, error = %e, "Crop metadata write failed");
            }

            tracing::debug!(
                index,
                label = %record.label,
                confidence = record.confidence,
                "Crop uploaded"
            );
            records.push(record);
        }

        records
    }
}
