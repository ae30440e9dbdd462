//! Blob key layout.
//!
//! All imagery for one flush lives under `{userId}/{timestampMs}/`,
//! which is what the dashboard's history view expects.

/// Key for the raw (no boxes drawn) frame.
pub fn raw_frame_key(user_id: &str, timestamp_ms: i64) -> String {
    format!("{user_id}/{timestamp_ms}/frame-no-bbox.jpg")
}

/// Key for the annotated (boxes drawn) frame.
pub fn annotated_frame_key(user_id: &str, timestamp_ms: i64) -> String {
    format!("{user_id}/{timestamp_ms}/frame-with-bbox.jpg")
}

/// Key for one cropped impurity, indexed by its position in the flush
/// group.
pub fn crop_key(user_id: &str, timestamp_ms: i64, index: usize) -> String {
    format!("{user_id}/{timestamp_ms}/cropped_impurity_{index}.jpg")
}

/// Derive the label-file location from a raw frame blob URL.
///
/// Only `s3://` URLs get a labels path; anything else yields an empty
/// string, matching what the labelling tooling tolerates.
pub fn labels_path(raw_frame_url: &str) -> String {
    if raw_frame_url.starts_with("s3://") {
        raw_frame_url.replace(".jpg", ".txt").replace(".png", ".txt")
    } else {
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_follow_per_flush_layout() {
        assert_eq!(
            raw_frame_key("web-user", 1700000000000),
            "web-user/1700000000000/frame-no-bbox.jpg"
        );
        assert_eq!(
            annotated_frame_key("web-user", 1700000000000),
            "web-user/1700000000000/frame-with-bbox.jpg"
        );
        assert_eq!(
            crop_key("web-user", 1700000000000, 3),
            "web-user/1700000000000/cropped_impurity_3.jpg"
        );
    }

    #[test]
    fn labels_path_swaps_image_extension() {
        assert_eq!(
            labels_path("s3://bucket/u/1/frame-no-bbox.jpg"),
            "s3://bucket/u/1/frame-no-bbox.txt"
        );
        assert_eq!(labels_path("memory://u/1/frame-no-bbox.jpg"), "");
    }
}
