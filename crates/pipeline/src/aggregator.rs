//! Periodic flush driver.
//!
//! Every tick, if sending is enabled and there is anything to send,
//! one grouping window is taken from the buffer and flushed on a
//! spawned task so the tick loop (and the producers) never block on
//! store I/O. The coordinator's gate guarantees at most one upload in
//! flight; a tick that collides simply leaves the buffer to the next
//! one.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::buffer::DetectionBuffer;
use crate::cache::FrameCache;
use crate::uploader::UploadCoordinator;

pub struct FrameAggregator {
    cache: Arc<FrameCache>,
    buffer: Arc<DetectionBuffer>,
    uploader: Arc<UploadCoordinator>,
    send_enabled: watch::Receiver<bool>,
    flush_interval: Duration,
    window_ms: i64,
}

impl FrameAggregator {
    pub fn new(
        cache: Arc<FrameCache>,
        buffer: Arc<DetectionBuffer>,
        uploader: Arc<UploadCoordinator>,
        send_enabled: watch::Receiver<bool>,
        flush_interval: Duration,
        window_ms: i64,
    ) -> Self {
        Self {
            cache,
            buffer,
            uploader,
            send_enabled,
            flush_interval,
            window_ms,
        }
    }

    /// Run the flush timer until `cancel` is triggered.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(
            interval_secs = self.flush_interval.as_secs(),
            window_ms = self.window_ms,
            "Frame aggregator started"
        );

        let mut ticker = tokio::time::interval(self.flush_interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Frame aggregator stopping");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick();
                }
            }
        }
    }

    /// One flush tick. No-op while sending is disabled, no annotated
    /// frame has been seen yet, or the buffer is empty -- the buffer
    /// keeps accumulating in the meantime.
    fn tick(&self) {
        if !*self.send_enabled.borrow() {
            return;
        }
        if self.cache.annotated().is_none() {
            return;
        }
        if self.buffer.is_empty() {
            return;
        }

        // Claim the gate before draining: a tick that collides with an
        // in-flight upload leaves the buffer intact for the next one.
        let Some(guard) = self.uploader.try_begin() else {
            tracing::debug!("Upload in flight, deferring this tick");
            return;
        };

        let group = self.buffer.take_window(self.window_ms);
        if group.is_empty() {
            return;
        }

        tracing::debug!(detections = group.len(), "Dispatching grouping window");

        let uploader = Arc::clone(&self.uploader);
        tokio::spawn(async move {
            if !uploader.flush_held(guard, group).await {
                tracing::debug!("Flush cycle did not persist a frame record");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::Semaphore;

    use sorter_core::{BoundingBox, DetectionEvent, FrameImage};
    use sorter_store::{
        BlobStore, InMemoryBlobStore, InMemoryMetadataStore, MetadataStore, StoreError,
    };

    use crate::crops::CropExtractor;
    use crate::uploader::{UploadCoordinator, UploaderConfig};

    fn test_frame() -> FrameImage {
        let img = image::RgbImage::from_pixel(64, 64, image::Rgb([40, 120, 40]));
        let mut jpeg = Vec::new();
        let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, 90);
        image::DynamicImage::ImageRgb8(img)
            .write_with_encoder(encoder)
            .expect("test JPEG encodes");
        FrameImage::from_jpeg(jpeg).expect("test JPEG parses")
    }

    fn detection(ts: i64, frame: &FrameImage) -> DetectionEvent {
        DetectionEvent {
            label: "impurity".into(),
            confidence: 0.9,
            bbox: BoundingBox {
                x: 10,
                y: 10,
                width: 20,
                height: 20,
            },
            captured_at_ms: ts,
            raw_frame: Some(frame.clone()),
            annotated_frame: Some(frame.clone()),
        }
    }

    fn aggregator(
        blob: Arc<dyn BlobStore>,
        meta: Arc<InMemoryMetadataStore>,
        send_enabled: watch::Receiver<bool>,
    ) -> (FrameAggregator, Arc<FrameCache>, Arc<DetectionBuffer>) {
        let cache = Arc::new(FrameCache::new());
        let buffer = Arc::new(DetectionBuffer::default());
        let meta_dyn: Arc<dyn MetadataStore> = meta;
        let crops = CropExtractor::new(
            Arc::clone(&blob),
            Arc::clone(&meta_dyn),
            "impurities".into(),
            "web-user".into(),
        );
        let uploader = Arc::new(UploadCoordinator::new(
            blob,
            meta_dyn,
            Arc::clone(&cache),
            crops,
            UploaderConfig {
                user_id: "web-user".into(),
                raw_bucket: "frames-raw".into(),
                annotated_bucket: "frames-annotated".into(),
                model_tag: "yolov8-best".into(),
            },
        ));
        let agg = FrameAggregator::new(
            Arc::clone(&cache),
            Arc::clone(&buffer),
            uploader,
            send_enabled,
            Duration::from_secs(2),
            100,
        );
        (agg, cache, buffer)
    }

    /// Blob store whose uploads block until the test grants permits.
    struct BlockingBlobStore {
        calls: AtomicUsize,
        permits: Semaphore,
    }

    #[async_trait]
    impl BlobStore for BlockingBlobStore {
        async fn put_jpeg(
            &self,
            bucket: &str,
            key: &str,
            _bytes: &[u8],
        ) -> Result<String, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let permit = self.permits.acquire().await.expect("semaphore open");
            permit.forget();
            Ok(format!("s3://{bucket}/{key}"))
        }
    }

    #[tokio::test]
    async fn tick_is_a_noop_while_sending_is_disabled() {
        let blob = Arc::new(InMemoryBlobStore::new());
        let meta = Arc::new(InMemoryMetadataStore::new());
        let (_tx, rx) = watch::channel(false);
        let (agg, cache, buffer) = aggregator(blob.clone(), meta.clone(), rx);

        let frame = test_frame();
        cache.set_raw(frame.clone());
        cache.set_annotated(frame.clone());
        buffer.push(detection(1000, &frame));

        agg.tick();

        assert_eq!(buffer.len(), 1);
        assert_eq!(blob.put_count(), 0);
        assert_eq!(meta.write_count(), 0);
    }

    #[tokio::test]
    async fn tick_waits_for_an_annotated_frame() {
        let blob = Arc::new(InMemoryBlobStore::new());
        let meta = Arc::new(InMemoryMetadataStore::new());
        let (_tx, rx) = watch::channel(true);
        let (agg, cache, buffer) = aggregator(blob.clone(), meta.clone(), rx);

        let frame = test_frame();
        cache.set_raw(frame.clone());
        buffer.push(detection(1000, &frame));

        agg.tick();

        assert_eq!(buffer.len(), 1);
        assert_eq!(blob.put_count(), 0);
    }

    /// A tick that collides with an in-flight upload must leave its
    /// events queued; they go out on a later tick once the gate frees.
    #[tokio::test]
    async fn colliding_tick_defers_the_group_instead_of_dropping_it() {
        let blob = Arc::new(BlockingBlobStore {
            calls: AtomicUsize::new(0),
            permits: Semaphore::new(0),
        });
        let meta = Arc::new(InMemoryMetadataStore::new());
        let (_tx, rx) = watch::channel(true);
        let (agg, cache, buffer) = aggregator(blob.clone(), meta.clone(), rx);

        let frame = test_frame();
        cache.set_raw(frame.clone());
        cache.set_annotated(frame.clone());

        buffer.push(detection(1000, &frame));
        agg.tick();

        // Wait for the first flush to block inside the raw-frame upload.
        while blob.calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // Second group arrives while the upload is in flight; the
        // colliding tick must not drain it.
        buffer.push(detection(5000, &frame));
        agg.tick();
        assert_eq!(buffer.len(), 1);

        // Release the first flush and let it persist.
        blob.permits.add_permits(64);
        while meta.frames().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // The deferred group flushes on a later tick.
        for _ in 0..200 {
            agg.tick();
            if meta.frames().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(meta.frames().len(), 2);
        assert!(buffer.is_empty());
    }
}
