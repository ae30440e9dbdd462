//! Perception event ingest.
//!
//! The external perception process connects over TCP and streams
//! line-delimited JSON events: raw frames, annotated frames and
//! detections. Frames carry base64-encoded JPEG payloads; detections
//! carry a center-based box which is converted to top-left pixel
//! coordinates on receipt. Each connection is served by its own task;
//! a malformed line is logged and skipped, never fatal.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use sorter_core::{BoundingBox, DetectionEvent, FrameImage};

use crate::buffer::DetectionBuffer;
use crate::cache::FrameCache;

/// One event from the perception process.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PerceptionEvent {
    /// Raw camera frame, base64 JPEG.
    Frame { jpeg_base64: String },
    /// Detector-annotated frame (boxes already drawn), base64 JPEG.
    AnnotatedFrame { jpeg_base64: String },
    /// One detector hit with a center-based pixel box.
    Detection {
        label: String,
        confidence: f64,
        center_x: f64,
        center_y: f64,
        width: f64,
        height: f64,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error(transparent)]
    Frame(#[from] sorter_core::frame::FrameError),
}

/// Applies incoming perception events to the cache and buffer.
pub struct PerceptionBridge {
    cache: Arc<FrameCache>,
    buffer: Arc<DetectionBuffer>,
}

impl PerceptionBridge {
    pub fn new(cache: Arc<FrameCache>, buffer: Arc<DetectionBuffer>) -> Self {
        Self { cache, buffer }
    }

    /// Apply one decoded event.
    ///
    /// Detections snapshot the currently cached frames so the flush
    /// path can upload imagery synchronized with the detection.
    pub fn apply(&self, event: PerceptionEvent) -> Result<(), IngestError> {
        match event {
            PerceptionEvent::Frame { jpeg_base64 } => {
                let frame = FrameImage::from_jpeg(BASE64.decode(jpeg_base64)?)?;
                self.cache.set_raw(frame);
            }
            PerceptionEvent::AnnotatedFrame { jpeg_base64 } => {
                let frame = FrameImage::from_jpeg(BASE64.decode(jpeg_base64)?)?;
                self.cache.set_annotated(frame);
            }
            PerceptionEvent::Detection {
                label,
                confidence,
                center_x,
                center_y,
                width,
                height,
            } => {
                let bbox = BoundingBox::from_center(center_x, center_y, width, height);
                let (raw_frame, annotated_frame) = self.cache.snapshot();
                tracing::debug!(
                    label = %label,
                    confidence,
                    ?bbox,
                    "Buffering detection"
                );
                self.buffer.push(DetectionEvent {
                    label,
                    confidence,
                    bbox,
                    captured_at_ms: Utc::now().timestamp_millis(),
                    raw_frame,
                    annotated_frame,
                });
            }
        }
        Ok(())
    }

    /// Accept perception connections until `cancel` is triggered.
    pub async fn listen(self: Arc<Self>, listener: TcpListener, cancel: CancellationToken) {
        tracing::info!(
            addr = ?listener.local_addr().ok(),
            "Perception event listener started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Perception event listener stopping");
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            tracing::info!(%peer, "Perception process connected");
                            let bridge = Arc::clone(&self);
                            let conn_cancel = cancel.clone();
                            tokio::spawn(async move {
                                bridge.serve_connection(stream, conn_cancel).await;
                            });
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Accept failed");
                        }
                    }
                }
            }
        }
    }

    /// Read and apply events from one connection until it closes.
    async fn serve_connection(&self, stream: TcpStream, cancel: CancellationToken) {
        let mut lines = BufReader::new(stream).lines();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                line = lines.next_line() => {
                    match line {
                        Ok(Some(text)) => self.handle_line(&text),
                        Ok(None) => {
                            tracing::info!("Perception connection closed");
                            break;
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Perception connection read error");
                            break;
                        }
                    }
                }
            }
        }
    }

    fn handle_line(&self, text: &str) {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return;
        }
        match serde_json::from_str::<PerceptionEvent>(trimmed) {
            Ok(event) => {
                if let Err(e) = self.apply(event) {
                    tracing::warn!(error = %e, "Dropping undecodable perception event");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed perception line");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn detection_event_parses_and_converts_center_box() {
        let json = r#"{"type":"detection","label":"impurity","confidence":0.8,
                       "center_x":50.0,"center_y":40.0,"width":20.0,"height":10.0}"#;
        let event: PerceptionEvent = serde_json::from_str(json).expect("valid event");
        assert_matches!(event, PerceptionEvent::Detection { .. });

        let cache = Arc::new(FrameCache::new());
        let buffer = Arc::new(DetectionBuffer::default());
        let bridge = PerceptionBridge::new(Arc::clone(&cache), Arc::clone(&buffer));
        bridge.apply(event).expect("apply succeeds");

        assert_eq!(buffer.len(), 1);
        let window = buffer.take_window(i64::MAX);
        assert_eq!(window[0].bbox.x, 40);
        assert_eq!(window[0].bbox.y, 35);
        assert_eq!(window[0].bbox.width, 20);
        assert_eq!(window[0].bbox.height, 10);
        // No frames were cached yet, so no snapshots attach.
        assert!(window[0].raw_frame.is_none());
        assert!(window[0].annotated_frame.is_none());
    }

    #[test]
    fn malformed_frame_payload_is_an_error_not_a_panic() {
        let cache = Arc::new(FrameCache::new());
        let buffer = Arc::new(DetectionBuffer::default());
        let bridge = PerceptionBridge::new(cache, buffer);

        let err = bridge.apply(PerceptionEvent::Frame {
            jpeg_base64: "!!!not-base64!!!".into(),
        });
        assert_matches!(err, Err(IngestError::Base64(_)));
    }
}
