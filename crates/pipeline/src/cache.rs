//! Last-write-wins cache of the two most recent frames.
//!
//! Written by the frame and annotated-frame producers, read by the
//! flush path as a fallback when a detection carries no synchronized
//! snapshot. Access is serialized by a mutex; the critical sections
//! only swap `Arc`-backed images, so contention is negligible.

use std::sync::Mutex;

use sorter_core::FrameImage;

#[derive(Default)]
struct CacheInner {
    raw: Option<FrameImage>,
    annotated: Option<FrameImage>,
}

/// Shared cache of the most recent raw and annotated frames.
#[derive(Default)]
pub struct FrameCache {
    inner: Mutex<CacheInner>,
}

impl FrameCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_raw(&self, frame: FrameImage) {
        self.inner.lock().unwrap().raw = Some(frame);
    }

    pub fn set_annotated(&self, frame: FrameImage) {
        self.inner.lock().unwrap().annotated = Some(frame);
    }

    pub fn raw(&self) -> Option<FrameImage> {
        self.inner.lock().unwrap().raw.clone()
    }

    pub fn annotated(&self) -> Option<FrameImage> {
        self.inner.lock().unwrap().annotated.clone()
    }

    /// Both current frames in one lock acquisition.
    pub fn snapshot(&self) -> (Option<FrameImage>, Option<FrameImage>) {
        let inner = self.inner.lock().unwrap();
        (inner.raw.clone(), inner.annotated.clone())
    }
}
