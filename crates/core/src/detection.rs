//! Detection events and bounding-box normalization.
//!
//! A [`DetectionEvent`] is created once per upstream detector message
//! and never mutated. Each event carries snapshots of the raw and
//! annotated frames that were current when it arrived, so a flush can
//! upload imagery synchronized with the detection instead of whatever
//! the camera produced last.

use serde::Serialize;

use crate::frame::FrameImage;

/// Axis-aligned box in pixel coordinates, top-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingBox {
    /// Build a box from the detector's center-based message fields.
    pub fn from_center(center_x: f64, center_y: f64, width: f64, height: f64) -> Self {
        Self {
            x: (center_x - width / 2.0) as i32,
            y: (center_y - height / 2.0) as i32,
            width: width as i32,
            height: height as i32,
        }
    }
}

/// One detector hit, buffered until the next flush groups it into a
/// frame record.
#[derive(Debug, Clone)]
pub struct DetectionEvent {
    pub label: String,
    /// Detector confidence in `[0, 1]`.
    pub confidence: f64,
    pub bbox: BoundingBox,
    /// Wall-clock arrival time in epoch milliseconds; used as the
    /// grouping-window anchor.
    pub captured_at_ms: i64,
    /// Raw frame current at capture time, if any was cached yet.
    pub raw_frame: Option<FrameImage>,
    /// Annotated (bbox-drawn) frame current at capture time.
    pub annotated_frame: Option<FrameImage>,
}

/// A detection converted to YOLO label-file format: center and size
/// relative to the frame dimensions.
#[derive(Debug, Clone, Serialize)]
pub struct NormalizedDetection {
    /// Label-file class index. Single-class dataset, always 0.
    pub class: u32,
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
    pub label: String,
    pub confidence: f64,
}

/// Convert pixel bboxes to normalized label format.
///
/// Detections are skipped entirely when the frame dimensions are
/// non-positive; there is nothing meaningful to divide by.
pub fn normalize_detections(
    detections: &[DetectionEvent],
    frame_width: u32,
    frame_height: u32,
) -> Vec<NormalizedDetection> {
    if frame_width == 0 || frame_height == 0 {
        return Vec::new();
    }
    let fw = frame_width as f64;
    let fh = frame_height as f64;

    detections
        .iter()
        .map(|det| {
            let x = det.bbox.x as f64;
            let y = det.bbox.y as f64;
            let w = det.bbox.width as f64;
            let h = det.bbox.height as f64;
            NormalizedDetection {
                class: 0,
                x: (x + w / 2.0) / fw,
                y: (y + h / 2.0) / fh,
                w: w / fw,
                h: h / fh,
                label: det.label.clone(),
                confidence: det.confidence,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(bbox: BoundingBox) -> DetectionEvent {
        DetectionEvent {
            label: "impurity".into(),
            confidence: 0.9,
            bbox,
            captured_at_ms: 0,
            raw_frame: None,
            annotated_frame: None,
        }
    }

    #[test]
    fn normalizes_centered_box() {
        let dets = [event(BoundingBox {
            x: 10,
            y: 10,
            width: 20,
            height: 20,
        })];
        let norm = normalize_detections(&dets, 100, 100);
        assert_eq!(norm.len(), 1);
        assert!((norm[0].x - 0.2).abs() < f64::EPSILON);
        assert!((norm[0].y - 0.2).abs() < f64::EPSILON);
        assert!((norm[0].w - 0.2).abs() < f64::EPSILON);
        assert!((norm[0].h - 0.2).abs() < f64::EPSILON);
        assert_eq!(norm[0].class, 0);
    }

    #[test]
    fn skips_all_when_frame_dimensions_are_zero() {
        let dets = [event(BoundingBox {
            x: 1,
            y: 1,
            width: 2,
            height: 2,
        })];
        assert!(normalize_detections(&dets, 0, 100).is_empty());
        assert!(normalize_detections(&dets, 100, 0).is_empty());
    }

    #[test]
    fn center_based_box_converts_to_top_left() {
        let bbox = BoundingBox::from_center(50.0, 40.0, 20.0, 10.0);
        assert_eq!(bbox.x, 40);
        assert_eq!(bbox.y, 35);
        assert_eq!(bbox.width, 20);
        assert_eq!(bbox.height, 10);
    }
}
