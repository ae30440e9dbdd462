//! Frame imagery and the persisted metadata records.
//!
//! [`FrameImage`] holds an already-encoded JPEG as received from the
//! perception bridge; only the dimensions are decoded up front
//! (header-only read), cloning shares the underlying bytes.

use std::io::Cursor;
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::detection::{BoundingBox, NormalizedDetection};

/// Failure to interpret an incoming JPEG payload.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("unreadable image payload: {0}")]
    Unreadable(#[from] std::io::Error),

    #[error("invalid image payload: {0}")]
    Invalid(#[from] image::ImageError),
}

/// An encoded JPEG frame plus its pixel dimensions.
///
/// Cheap to clone: the bytes are shared, which matters because every
/// buffered detection snapshots the two current frames.
#[derive(Debug, Clone)]
pub struct FrameImage {
    jpeg: Arc<Vec<u8>>,
    width: u32,
    height: u32,
}

impl FrameImage {
    /// Wrap encoded JPEG bytes, reading only the header for the
    /// dimensions.
    pub fn from_jpeg(bytes: Vec<u8>) -> Result<Self, FrameError> {
        let reader = image::ImageReader::new(Cursor::new(&bytes)).with_guessed_format()?;
        let (width, height) = reader.into_dimensions()?;
        Ok(Self {
            jpeg: Arc::new(bytes),
            width,
            height,
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.jpeg
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

/// The immutable metadata unit for one camera frame: written once to
/// the frame table at flush time, never updated.
#[derive(Debug, Clone, Serialize)]
pub struct FrameRecord {
    pub frame_id: Uuid,
    pub user_id: String,
    pub timestamp_ms: i64,
    pub detection_count: usize,
    /// Blob URL of the annotated (bbox-drawn) frame.
    pub annotated_url: String,
    /// Blob URL of the raw frame.
    pub raw_url: String,
    /// Label-file location derived from the raw frame URL.
    pub labels_path: String,
    pub detections: Vec<NormalizedDetection>,
    pub model_used: String,
}

/// Metadata for one cropped impurity image. Rows carry a TTL so the
/// store can expire them without a cleanup pass.
#[derive(Debug, Clone, Serialize)]
pub struct CropRecord {
    pub impurity_id: Uuid,
    pub user_id: String,
    pub timestamp_ms: i64,
    pub blob_url: String,
    pub label: String,
    pub confidence: f64,
    pub bbox: BoundingBox,
    /// Expiry as epoch seconds.
    pub ttl_epoch_secs: i64,
}
