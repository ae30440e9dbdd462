//! Bounded buffer of detection events awaiting grouping.
//!
//! Arrival order is preserved end to end: events enter at the back,
//! and `take_window` partitions from the front. The buffer is bounded
//! with drop-oldest eviction so that a stalled or disabled flush path
//! cannot grow it without limit.

use std::collections::VecDeque;
use std::sync::Mutex;

use sorter_core::DetectionEvent;

/// Default capacity. At the detector's peak rate this is well over a
/// minute of backlog, far beyond what a healthy flush cycle leaves
/// queued.
pub const DEFAULT_CAPACITY: usize = 256;

pub struct DetectionBuffer {
    inner: Mutex<VecDeque<DetectionEvent>>,
    capacity: usize,
}

impl Default for DetectionBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl DetectionBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    /// Append an event, evicting the oldest one when full.
    pub fn push(&self, event: DetectionEvent) {
        let mut inner = self.inner.lock().unwrap();
        if inner.len() >= self.capacity {
            inner.pop_front();
            tracing::warn!(
                capacity = self.capacity,
                "Detection buffer full, dropping oldest event"
            );
        }
        inner.push_back(event);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    /// Remove and return one grouping window.
    ///
    /// The anchor is the oldest event's timestamp; every event whose
    /// timestamp is within `tolerance_ms` of the anchor is returned in
    /// arrival order. Everything else stays queued for the next tick --
    /// deferred, never dropped.
    pub fn take_window(&self, tolerance_ms: i64) -> Vec<DetectionEvent> {
        let mut inner = self.inner.lock().unwrap();
        let Some(anchor) = inner.front().map(|e| e.captured_at_ms) else {
            return Vec::new();
        };

        let mut window = Vec::new();
        let mut remainder = VecDeque::new();
        for event in inner.drain(..) {
            if (event.captured_at_ms - anchor).abs() < tolerance_ms {
                window.push(event);
            } else {
                remainder.push_back(event);
            }
        }
        *inner = remainder;
        window
    }
}
