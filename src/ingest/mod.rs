//! Frame capture sources.
//!
//! This module provides the sources the sampler captures from:
//! - HTTP(S) snapshot endpoints (IP cameras exposing a still JPEG)
//! - Synthetic `stub://` feeds (demos, tests)
//! - `FallbackImageSource`, the static image list used after live capture fails
//!
//! Capture is a black box that produces one encoded image. Sources MUST NOT
//! retain frames after handing them to the sampler.

mod fallback;
mod live;

pub use fallback::{has_visible_content, FallbackCandidate, FallbackImageSource};
pub use live::{source_for_camera, SnapshotSource, SyntheticSource, UnavailableSource};

use crate::error::CaptureError;
use crate::frame::Frame;

/// A live frame source for one camera.
pub trait FrameSource: Send {
    /// Human-readable source description for logs and status reports.
    fn describe(&self) -> String;

    /// Capture one frame. Errors are capture-level (fetch/decode/unsupported).
    fn capture(&mut self, camera_id: &str) -> Result<Frame, CaptureError>;
}
