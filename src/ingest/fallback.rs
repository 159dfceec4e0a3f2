//! Static fallback images for cameras whose live capture failed.
//!
//! The candidate list is walked linearly, once per degradation episode. Each
//! candidate is decoded and must contain at least one non-transparent pixel;
//! blank or undecodable candidates are skipped. When the list runs out the
//! source is exhausted and stays exhausted until `reset()`.

use std::path::PathBuf;

use crate::error::FallbackError;
use crate::frame::{Frame, FrameOrigin};
use crate::now_ms;

#[derive(Clone, Debug)]
pub enum FallbackCandidate {
    Path(PathBuf),
    Bytes { label: String, data: Vec<u8> },
}

impl FallbackCandidate {
    fn label(&self) -> String {
        match self {
            Self::Path(path) => path.display().to_string(),
            Self::Bytes { label, .. } => label.clone(),
        }
    }

    fn load(&self) -> std::io::Result<Vec<u8>> {
        match self {
            Self::Path(path) => std::fs::read(path),
            Self::Bytes { data, .. } => Ok(data.clone()),
        }
    }
}

impl From<PathBuf> for FallbackCandidate {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

pub struct FallbackImageSource {
    candidates: Vec<FallbackCandidate>,
    cursor: usize,
}

impl FallbackImageSource {
    pub fn new(candidates: Vec<FallbackCandidate>) -> Self {
        Self {
            candidates,
            cursor: 0,
        }
    }

    pub fn from_paths(paths: &[PathBuf]) -> Self {
        Self::new(paths.iter().cloned().map(FallbackCandidate::from).collect())
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.candidates.len()
    }

    /// Start a new degradation episode from the first candidate.
    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    /// Produce the next valid fallback frame.
    pub fn next(&mut self, camera_id: &str) -> Result<Frame, FallbackError> {
        if self.candidates.is_empty() {
            return Err(FallbackError::Empty);
        }
        while self.cursor < self.candidates.len() {
            let index = self.cursor;
            self.cursor += 1;
            let candidate = &self.candidates[index];
            let bytes = match candidate.load() {
                Ok(bytes) => bytes,
                Err(e) => {
                    log::warn!(
                        "fallback candidate {} unreadable: {}",
                        candidate.label(),
                        e
                    );
                    continue;
                }
            };
            match has_visible_content(&bytes) {
                Ok(true) => {
                    return Ok(Frame::new(
                        bytes,
                        camera_id,
                        now_ms(),
                        FrameOrigin::Fallback(index),
                    ))
                }
                Ok(false) => {
                    log::debug!("fallback candidate {} is blank; skipping", candidate.label());
                }
                Err(e) => {
                    log::warn!(
                        "fallback candidate {} failed to decode: {}",
                        candidate.label(),
                        e
                    );
                }
            }
        }
        Err(FallbackError::Exhausted {
            tried: self.candidates.len(),
        })
    }
}

/// True when the encoded image has at least one non-transparent pixel.
pub fn has_visible_content(bytes: &[u8]) -> Result<bool, image::ImageError> {
    let image = image::load_from_memory(bytes)?;
    let rgba = image.to_rgba8();
    Ok(rgba.pixels().any(|pixel| pixel.0[3] != 0))
}
