//! `sorter-core` -- domain types shared across the edge agent.
//!
//! Detections, frames, crops and jobs are plain data; the only logic
//! here is bounding-box normalization and configuration loading.

pub mod config;
pub mod detection;
pub mod frame;
pub mod job;

pub use config::AgentConfig;
pub use detection::{normalize_detections, BoundingBox, DetectionEvent, NormalizedDetection};
pub use frame::{CropRecord, FrameImage, FrameRecord};
pub use job::{Job, JobCommand, JobStatus, ServiceKey};
