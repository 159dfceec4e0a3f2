use serde::Serialize;

use crate::person::Observation;

/// Bounding region in the frame's pixel space.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    pub bbox: Option<BoundingBox>,
    pub label: String,
    /// Clamped to 0..=1.
    pub confidence: f32,
    pub camera_id: String,
    pub frame_timestamp_ms: u64,
}

/// Result of processing one frame.
#[derive(Clone, Debug, Default)]
pub struct FrameAnalysis {
    pub detections: Vec<Detection>,
    pub observations: Vec<Observation>,
}

impl FrameAnalysis {
    pub fn person_count(&self) -> usize {
        self.detections
            .iter()
            .filter(|d| d.label.eq_ignore_ascii_case("person"))
            .count()
    }
}
