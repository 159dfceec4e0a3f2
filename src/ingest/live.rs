//! Live capture sources.
//!
//! `SnapshotSource` fetches one JPEG per capture from an HTTP endpoint and
//! verifies it decodes before handing it on. Decode or fetch failures are
//! capture errors; the sampler reacts by degrading to fallback images.

use std::io::{Cursor, Read};
use std::time::Duration;

use image::{ImageFormat, Rgb, RgbImage};
use url::Url;

use super::FrameSource;
use crate::camera::Camera;
use crate::error::CaptureError;
use crate::frame::{Frame, FrameOrigin};
use crate::now_ms;

const MAX_SNAPSHOT_BYTES: u64 = 5 * 1024 * 1024;
const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(5);

/// Build the live source for a camera from its `source` URL.
///
/// Cameras without a usable source get an `UnavailableSource`, which fails
/// every capture and therefore puts the camera straight onto its fallback list.
pub fn source_for_camera(camera: &Camera) -> Box<dyn FrameSource> {
    let Some(source) = camera.source.as_deref() else {
        return Box::new(UnavailableSource::new("camera has no live source"));
    };
    if let Some(name) = source.strip_prefix("stub://") {
        return Box::new(SyntheticSource::new(name, 64, 48));
    }
    match Url::parse(source) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {
            Box::new(SnapshotSource::new(url.to_string()))
        }
        Ok(url) => Box::new(UnavailableSource::new(format!(
            "unsupported capture scheme '{}'",
            url.scheme()
        ))),
        Err(e) => Box::new(UnavailableSource::new(format!(
            "invalid capture url '{}': {}",
            source, e
        ))),
    }
}

/// HTTP(S) still-image source.
pub struct SnapshotSource {
    url: String,
    agent: ureq::Agent,
    frames_captured: u64,
}

impl SnapshotSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            agent: ureq::AgentBuilder::new().timeout(SNAPSHOT_TIMEOUT).build(),
            frames_captured: 0,
        }
    }

    fn fetch(&self) -> Result<Vec<u8>, CaptureError> {
        let response = self
            .agent
            .get(&self.url)
            .call()
            .map_err(|e| CaptureError::Fetch(format!("{}: {}", self.url, e)))?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_SNAPSHOT_BYTES)
            .read_to_end(&mut bytes)
            .map_err(|e| CaptureError::Fetch(format!("read snapshot: {}", e)))?;
        if bytes.is_empty() {
            return Err(CaptureError::Fetch("empty snapshot".to_string()));
        }
        Ok(bytes)
    }
}

impl FrameSource for SnapshotSource {
    fn describe(&self) -> String {
        self.url.clone()
    }

    fn capture(&mut self, camera_id: &str) -> Result<Frame, CaptureError> {
        let bytes = self.fetch()?;
        image::load_from_memory(&bytes).map_err(|e| CaptureError::Decode(e.to_string()))?;
        self.frames_captured += 1;
        Ok(Frame::new(bytes, camera_id, now_ms(), FrameOrigin::Live))
    }
}

/// Synthetic PNG feed for `stub://` cameras.
pub struct SyntheticSource {
    name: String,
    width: u32,
    height: u32,
    frame_count: u64,
}

impl SyntheticSource {
    pub fn new(name: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            frame_count: 0,
        }
    }

    fn render(&self) -> Result<Vec<u8>, CaptureError> {
        let shift = (self.frame_count % 256) as u32;
        let image = RgbImage::from_fn(self.width, self.height, |x, y| {
            Rgb([
                ((x + shift) % 256) as u8,
                ((y + shift) % 256) as u8,
                ((x + y) % 256) as u8,
            ])
        });
        let mut buf = Cursor::new(Vec::new());
        image
            .write_to(&mut buf, ImageFormat::Png)
            .map_err(|e| CaptureError::Decode(format!("encode synthetic frame: {}", e)))?;
        Ok(buf.into_inner())
    }
}

impl FrameSource for SyntheticSource {
    fn describe(&self) -> String {
        format!("stub://{}", self.name)
    }

    fn capture(&mut self, camera_id: &str) -> Result<Frame, CaptureError> {
        self.frame_count += 1;
        let bytes = self.render()?;
        Ok(Frame::new(bytes, camera_id, now_ms(), FrameOrigin::Live))
    }
}

/// Source that cannot capture. Every call reports `Unsupported`.
pub struct UnavailableSource {
    reason: String,
}

impl UnavailableSource {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl FrameSource for UnavailableSource {
    fn describe(&self) -> String {
        format!("unavailable ({})", self.reason)
    }

    fn capture(&mut self, _camera_id: &str) -> Result<Frame, CaptureError> {
        Err(CaptureError::Unsupported(self.reason.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::has_visible_content;

    #[test]
    fn synthetic_frames_decode_and_are_visible() {
        let mut source = SyntheticSource::new("lobby", 8, 8);
        let frame = source.capture("cam-lobby").unwrap();
        assert_eq!(frame.camera_id, "cam-lobby");
        assert_eq!(frame.origin, FrameOrigin::Live);
        assert!(has_visible_content(frame.payload()).unwrap());
    }

    #[test]
    fn camera_without_source_is_unavailable() {
        let camera = Camera::new("cam-1", "Gate");
        let mut source = source_for_camera(&camera);
        assert!(matches!(
            source.capture("cam-1"),
            Err(CaptureError::Unsupported(_))
        ));
    }

    #[test]
    fn rtsp_scheme_is_unsupported() {
        let camera = Camera::new("cam-2", "Dock").with_source("rtsp://10.0.0.5/stream");
        let mut source = source_for_camera(&camera);
        assert!(source.describe().contains("rtsp"));
        assert!(source.capture("cam-2").is_err());
    }

    #[test]
    fn stub_scheme_builds_synthetic_source() {
        let camera = Camera::new("cam-3", "Hall").with_source("stub://hall");
        let mut source = source_for_camera(&camera);
        assert_eq!(source.describe(), "stub://hall");
        assert!(source.capture("cam-3").is_ok());
    }
}
