//! `sorter-pipeline` -- detection aggregation and upload.
//!
//! Producers (the perception bridge) feed [`FrameCache`] and
//! [`DetectionBuffer`]; the [`FrameAggregator`] periodically carves a
//! time-coherent group out of the buffer and hands it to the
//! [`UploadCoordinator`], which uploads imagery, extracts crops and
//! persists one frame record per group.

pub mod aggregator;
pub mod buffer;
pub mod cache;
pub mod crops;
pub mod ingest;
pub mod uploader;

pub use aggregator::FrameAggregator;
pub use buffer::DetectionBuffer;
pub use cache::FrameCache;
pub use crops::CropExtractor;
pub use ingest::{PerceptionBridge, PerceptionEvent};
pub use uploader::{UploadCoordinator, UploaderConfig};
