//! Captured frame container.
//!
//! A `Frame` is created by the sampler, consumed once by the frame processor,
//! then dropped. The encoded image bytes are private: there is no `Clone`, no
//! `AsRef<[u8]>` and no `Serialize`. Crate-internal code reads them through
//! `payload()` when building the detection request.

use zeroize::Zeroize;

/// Where the frame bytes came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOrigin {
    Live,
    /// Index into the camera's fallback image list.
    Fallback(usize),
}

/// One captured image from a camera at a point in time.
pub struct Frame {
    /// Encoded image (JPEG/PNG). MUST NOT be exposed via any public API.
    data: Vec<u8>,

    pub camera_id: String,

    /// Capture time in milliseconds since the unix epoch.
    pub captured_at_ms: u64,

    pub origin: FrameOrigin,
}

// Explicitly NOT implementing Clone: a frame is handed off exactly once.

impl Frame {
    pub fn new(
        data: Vec<u8>,
        camera_id: impl Into<String>,
        captured_at_ms: u64,
        origin: FrameOrigin,
    ) -> Self {
        Self {
            data,
            camera_id: camera_id.into(),
            captured_at_ms,
            origin,
        }
    }

    pub(crate) fn payload(&self) -> &[u8] {
        &self.data
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self.origin, FrameOrigin::Fallback(_))
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.data.zeroize();
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("camera_id", &self.camera_id)
            .field("captured_at_ms", &self.captured_at_ms)
            .field("origin", &self.origin)
            .field("bytes", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_hides_payload() {
        let frame = Frame::new(vec![0xAB; 16], "cam-1", 42, FrameOrigin::Live);
        let rendered = format!("{:?}", frame);
        assert!(rendered.contains("bytes: 16"));
        assert!(!rendered.contains("171"));
    }

    #[test]
    fn fallback_origin_is_reported() {
        let frame = Frame::new(vec![1], "cam-1", 0, FrameOrigin::Fallback(2));
        assert!(frame.is_fallback());
        assert_eq!(frame.payload(), &[1]);
    }
}
